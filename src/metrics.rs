use prometheus::{IntCounter, IntGauge, Registry};

/// Metrics for the era supervisor.
#[derive(Debug)]
pub struct Metrics {
    /// Number of eras currently loaded.
    pub(crate) eras_loaded: IntGauge,
    /// Number of delayed actions currently scheduled.
    pub(crate) scheduled_actions: IntGauge,
    /// Total number of scheduled actions that fired.
    pub(crate) actions_fired: IntCounter,
    /// Total number of scheduled actions that failed and were dropped.
    pub(crate) actions_failed: IntCounter,
    /// Total number of inbound messages handled.
    pub(crate) messages_handled: IntCounter,
    /// Reference to the registry for unregistering.
    registry: Registry,
}

impl Metrics {
    /// Creates a new instance of the era supervisor metrics.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let eras_loaded = IntGauge::new(
            "era_supervisor_eras_loaded",
            "number of eras currently loaded by the era supervisor",
        )?;
        let scheduled_actions = IntGauge::new(
            "era_supervisor_scheduled_actions",
            "number of delayed actions currently scheduled",
        )?;
        let actions_fired = IntCounter::new(
            "era_supervisor_actions_fired",
            "total number of scheduled actions that fired",
        )?;
        let actions_failed = IntCounter::new(
            "era_supervisor_actions_failed",
            "total number of scheduled actions that failed and were dropped",
        )?;
        let messages_handled = IntCounter::new(
            "era_supervisor_messages_handled",
            "total number of inbound messages handled by the era supervisor",
        )?;

        registry.register(Box::new(eras_loaded.clone()))?;
        registry.register(Box::new(scheduled_actions.clone()))?;
        registry.register(Box::new(actions_fired.clone()))?;
        registry.register(Box::new(actions_failed.clone()))?;
        registry.register(Box::new(messages_handled.clone()))?;

        Ok(Metrics {
            eras_loaded,
            scheduled_actions,
            actions_fired,
            actions_failed,
            messages_handled,
            registry: registry.clone(),
        })
    }
}

impl Drop for Metrics {
    fn drop(&mut self) {
        self.registry
            .unregister(Box::new(self.eras_loaded.clone()))
            .expect("did not expect deregistering eras_loaded to fail");
        self.registry
            .unregister(Box::new(self.scheduled_actions.clone()))
            .expect("did not expect deregistering scheduled_actions to fail");
        self.registry
            .unregister(Box::new(self.actions_fired.clone()))
            .expect("did not expect deregistering actions_fired to fail");
        self.registry
            .unregister(Box::new(self.actions_failed.clone()))
            .expect("did not expect deregistering actions_failed to fail");
        self.registry
            .unregister(Box::new(self.messages_handled.clone()))
            .expect("did not expect deregistering messages_handled to fail");
    }
}
