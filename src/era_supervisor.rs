//! The era supervisor: the concurrent control plane of the Highway consensus protocol.
//!
//! The supervisor owns one [`EraRuntime`] per loaded era and orchestrates everything around
//! them: it routes inbound blocks to the era that issued them, instantiates era runtimes
//! lazily as messages reference them, runs each runtime's agenda on cancellable timer fibers,
//! replays the domain events the runtimes emit as side effects (relaying, fork-choice updates,
//! child-era creation), and reconstructs the active frontier of eras from storage on startup.
//! It tries to know as little as possible about the consensus rules themselves; those live in
//! the runtimes.


use std::{
    collections::{HashMap, HashSet, VecDeque},
    convert::TryFrom,
    fmt::{self, Debug, Formatter},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex as StdMutex, MutexGuard, PoisonError,
    },
};

use itertools::Itertools;
use prometheus::Registry;
use tokio::{
    sync::{Mutex, RwLock, Semaphore},
    task::JoinHandle,
};
use tracing::{debug, error, info, trace, warn};

use crate::{
    agenda::{Agenda, DelayedAction},
    config::Config,
    era_runtime::EraRuntime,
    error::{Error, StorageError},
    event::HighwayEvent,
    metrics::Metrics,
    traits::{BlockExecutor, EraStorage, ForkChoiceManager, IsSynced, Relaying},
    types::{Block, BlockHash, Era, Message, TickClock},
};

type ScheduleTable = HashMap<(BlockHash, DelayedAction), JoinHandle<()>>;

/// The era supervisor. Cheap to clone; every clone shares the same state, and the timer fibers
/// it spawns each hold one.
#[derive(Clone)]
pub struct EraSupervisor {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    clock: TickClock,
    is_synced: IsSynced,
    era_store: Arc<dyn EraStorage>,
    relaying: Arc<dyn Relaying>,
    fork_choice: Arc<dyn ForkChoiceManager>,
    block_executor: Arc<dyn BlockExecutor>,
    /// Monotonic: only ever flips from `false` to `true`.
    is_shutdown: AtomicBool,
    /// Every loaded era, keyed by its key block hash.
    eras: RwLock<HashMap<BlockHash, EraEntry>>,
    /// One entry per in-flight timer fiber. Entries are removed on fire, before the action
    /// body runs, and drained wholesale on shutdown.
    schedule: StdMutex<ScheduleTable>,
    /// Serializes all first-time era loads.
    load_permit: Semaphore,
    metrics: Metrics,
}

/// One loaded era: its runtime and the child links known so far. The runtime mutex is the
/// per-era serialization point; message and agenda handling on the same era never overlap.
struct EraEntry {
    era: Era,
    runtime: Arc<Mutex<EraRuntime>>,
    children: HashSet<BlockHash>,
}

/// A loaded era as handed around internally: shared runtime handle plus a copy of the child
/// links at the time of the lookup.
struct LoadedEra {
    runtime: Arc<Mutex<EraRuntime>>,
    children: HashSet<BlockHash>,
}

/// A read-only snapshot of one loaded era, as returned by [`EraSupervisor::eras`].
#[derive(Debug, Clone)]
pub struct EraSummary {
    /// The era itself.
    pub era: Era,
    /// The key block hashes of the era's known children.
    pub children: HashSet<BlockHash>,
}

impl Debug for EraSupervisor {
    fn fmt(&self, formatter: &mut Formatter) -> fmt::Result {
        match self.inner.eras.try_read() {
            Ok(eras) => {
                let keys: Vec<_> = eras.keys().collect();
                write!(formatter, "EraSupervisor {{ eras: {:?}, .. }}", keys)
            }
            Err(_) => write!(formatter, "EraSupervisor {{ eras: <locked>, .. }}"),
        }
    }
}

impl EraSupervisor {
    /// Creates a new `EraSupervisor`: inserts the genesis era into storage if absent and
    /// reconstructs the active frontier of eras from the persisted tips.
    pub async fn new(
        config: Config,
        is_synced: IsSynced,
        era_store: Arc<dyn EraStorage>,
        relaying: Arc<dyn Relaying>,
        fork_choice: Arc<dyn ForkChoiceManager>,
        block_executor: Arc<dyn BlockExecutor>,
        registry: &Registry,
    ) -> Result<Self, anyhow::Error> {
        let metrics = Metrics::new(registry)?;
        let clock = config.tick_clock();
        let supervisor = EraSupervisor {
            inner: Arc::new(Inner {
                config,
                clock,
                is_synced,
                era_store,
                relaying,
                fork_choice,
                block_executor,
                is_shutdown: AtomicBool::new(false),
                eras: RwLock::new(HashMap::new()),
                schedule: StdMutex::new(HashMap::new()),
                load_permit: Semaphore::new(1),
                metrics,
            }),
        };
        supervisor.bootstrap().await?;
        Ok(supervisor)
    }

    /// Validates an inbound block against the era that issued it and feeds it through the
    /// pipeline: execution, latest-message propagation, and the era runtime's reaction.
    pub async fn validate_and_add_block(&self, block: Block) -> Result<(), Error> {
        if self.inner.is_shutdown.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }
        let message = Message::try_from(&block)?;
        trace!(%message, "received block");
        let loaded = self.load(message.key_block_hash).await?;
        // One critical section from validation to the runtime's reaction. Releasing the lock
        // in between would let a second message for the same (creator, round, kind) slip past
        // the double-round check before the first one is recorded.
        let events = {
            let mut runtime = loaded.runtime.lock().await;
            if let Err(error) = runtime.validate(&message) {
                warn!(%error, %message, "dropping invalid block");
                return Err(Error::InvalidBlock(error));
            }
            self.inner
                .block_executor
                .execute_block(&block)
                .await
                .map_err(StorageError::from)?;
            self.propagate_latest_message(&message).await?;
            runtime.handle_message(&message)
        };
        self.inner.metrics.messages_handled.inc();
        self.handle_events(events).await
    }

    /// A point-in-time snapshot of the loaded eras. Unordered.
    pub async fn eras(&self) -> Vec<EraSummary> {
        self.inner
            .eras
            .read()
            .await
            .values()
            .map(|entry| EraSummary {
                era: entry.era.clone(),
                children: entry.children.clone(),
            })
            .collect()
    }

    /// Sets the shutdown flag and cancels every outstanding timer fiber. Safe to call more
    /// than once; after the first call every public operation fails with `ShuttingDown`.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// Inserts the genesis era and starts every era of the active frontier: walking upward
    /// from the persisted tips, any era whose initial agenda is non-empty. The walk is upward
    /// because a finished tip's ancestors can still be running overlapping rounds.
    async fn bootstrap(&self) -> Result<(), Error> {
        let genesis = Era::genesis(
            &self.inner.config.genesis_summary,
            self.inner.config.era_length(),
        );
        info!(era = %genesis, "inserting genesis era");
        self.inner.era_store.add_era(genesis).await?;

        let tips = self.inner.era_store.get_childless_eras().await?;
        let now = self.inner.clock.now();
        let mut visited = HashSet::new();
        let mut queue: VecDeque<Era> = tips.into_iter().collect();
        let mut to_start = Vec::new();
        while let Some(era) = queue.pop_front() {
            if !visited.insert(era.key_block_hash()) {
                continue;
            }
            if let Some(parent) = era.parent_key_block_hash() {
                if !visited.contains(&parent) {
                    queue.push_back(self.inner.era_store.get_era_unsafe(parent).await?);
                }
            }
            let runtime = self.make_runtime(era);
            let agenda = runtime.init_agenda(now);
            if agenda.is_empty() {
                debug!(era = %runtime.era(), "era already finished; not starting it");
                continue;
            }
            to_start.push((runtime, agenda));
        }

        info!(count = to_start.len(), "collected active eras");
        for (runtime, agenda) in to_start {
            self.install(runtime, agenda).await?;
        }
        Ok(())
    }

    /// Returns the entry for the given era, instantiating it on first reference.
    async fn load(&self, key_block_hash: BlockHash) -> Result<LoadedEra, Error> {
        if let Some(loaded) = self.get_loaded(key_block_hash).await {
            return Ok(loaded);
        }
        // All first-time loads are serialized through one permit; cold loads are rare compared
        // to message traffic.
        let _permit = self
            .inner
            .load_permit
            .acquire()
            .await
            .expect("load semaphore closed");
        if let Some(loaded) = self.get_loaded(key_block_hash).await {
            return Ok(loaded);
        }
        self.start(key_block_hash).await
    }

    async fn get_loaded(&self, key_block_hash: BlockHash) -> Option<LoadedEra> {
        self.inner
            .eras
            .read()
            .await
            .get(&key_block_hash)
            .map(|entry| LoadedEra {
                runtime: Arc::clone(&entry.runtime),
                children: entry.children.clone(),
            })
    }

    /// Builds and registers the runtime for an era that storage knows. Runs at most once per
    /// era over the supervisor's lifetime.
    async fn start(&self, key_block_hash: BlockHash) -> Result<LoadedEra, Error> {
        let era = self.inner.era_store.get_era_unsafe(key_block_hash).await?;
        let runtime = self.make_runtime(era);
        let agenda = runtime.init_agenda(self.inner.clock.now());
        self.install(runtime, agenda).await
    }

    /// Records a freshly built runtime in the era map and schedules its agenda.
    async fn install(&self, runtime: EraRuntime, agenda: Agenda) -> Result<LoadedEra, Error> {
        let era = runtime.era().clone();
        let key_block_hash = era.key_block_hash();
        let children: HashSet<BlockHash> = self
            .inner
            .era_store
            .get_children(key_block_hash)
            .await?
            .into_iter()
            .map(|child| child.key_block_hash())
            .collect();
        let runtime = Arc::new(Mutex::new(runtime));
        {
            let mut eras = self.inner.eras.write().await;
            let previous = eras.insert(
                key_block_hash,
                EraEntry {
                    era,
                    runtime: Arc::clone(&runtime),
                    children: children.clone(),
                },
            );
            assert!(previous.is_none(), "era {} started twice", key_block_hash);
        }
        self.inner.metrics.eras_loaded.inc();
        info!(era = %key_block_hash, actions = agenda.len(), "era started");
        self.schedule(key_block_hash, Arc::clone(&runtime), agenda);
        Ok(LoadedEra { runtime, children })
    }

    /// Spawns one cancellable timer fiber per delayed action and installs the handles in the
    /// scheduling table.
    fn schedule(
        &self,
        key_block_hash: BlockHash,
        runtime: Arc<Mutex<EraRuntime>>,
        agenda: Agenda,
    ) {
        for delayed in agenda {
            let delay = self.inner.clock.delay_until(delayed.tick);
            let supervisor = self.clone();
            let runtime = Arc::clone(&runtime);
            // The fired fiber removes its own table entry before anything else; holding the
            // table lock across spawn-and-insert means that removal cannot run in between.
            let mut table = self.inner.lock_schedule();
            if self.inner.is_shutdown.load(Ordering::SeqCst) {
                return;
            }
            let handle = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                supervisor
                    .scheduled_action_fired(key_block_hash, runtime, delayed)
                    .await;
            });
            let previous = table.insert((key_block_hash, delayed), handle);
            assert!(
                previous.is_none(),
                "{} scheduled twice for era {}",
                delayed,
                key_block_hash
            );
            self.inner.metrics.scheduled_actions.inc();
        }
    }

    /// The body of a timer fiber: removes its own scheduling-table entry, then runs the
    /// runtime's agenda handler and replays the results. Failures are logged and swallowed;
    /// the next scheduled round is the recovery path.
    async fn scheduled_action_fired(
        &self,
        key_block_hash: BlockHash,
        runtime: Arc<Mutex<EraRuntime>>,
        delayed: DelayedAction,
    ) {
        if self
            .inner
            .lock_schedule()
            .remove(&(key_block_hash, delayed))
            .is_some()
        {
            self.inner.metrics.scheduled_actions.dec();
        }
        if self.inner.is_shutdown.load(Ordering::SeqCst) {
            return;
        }
        trace!(era = %key_block_hash, action = %delayed, "scheduled action fired");
        self.inner.metrics.actions_fired.inc();
        if let Err(error) = self
            .run_scheduled_action(key_block_hash, runtime, delayed)
            .await
        {
            self.inner.metrics.actions_failed.inc();
            error!(era = %key_block_hash, action = %delayed, %error, "scheduled action failed");
        }
    }

    async fn run_scheduled_action(
        &self,
        key_block_hash: BlockHash,
        runtime: Arc<Mutex<EraRuntime>>,
        delayed: DelayedAction,
    ) -> Result<(), Error> {
        let (events, next_agenda) = runtime.lock().await.handle_agenda(delayed.action);
        self.handle_events(events).await?;
        self.schedule(key_block_hash, runtime, next_agenda);
        Ok(())
    }

    /// Replays runtime events as side effects, in emission order.
    async fn handle_events(&self, events: Vec<HighwayEvent>) -> Result<(), Error> {
        if events.is_empty() {
            return Ok(());
        }
        trace!("handling events: {}", events.iter().join(", "));
        for event in events {
            match event {
                HighwayEvent::CreatedEra(era) => self.handle_created_era(era).await?,
                HighwayEvent::CreatedLambdaMessage(message)
                | HighwayEvent::CreatedLambdaResponse(message)
                | HighwayEvent::CreatedOmegaMessage(message) => {
                    self.handle_created_message(message).await?
                }
            }
        }
        Ok(())
    }

    async fn handle_created_era(&self, era: Era) -> Result<(), Error> {
        info!(era = %era.key_block_hash(), parent = ?era.parent_key_block_hash(), "era created");
        // The runtimes are pure: the era reaches storage here, before the load below looks
        // for it.
        self.inner.era_store.add_era(era.clone()).await?;
        let key_block_hash = era.key_block_hash();
        self.load(key_block_hash).await?;
        if let Some(parent) = era.parent_key_block_hash() {
            let mut eras = self.inner.eras.write().await;
            if let Some(entry) = eras.get_mut(&parent) {
                entry.children.insert(key_block_hash);
            }
        }
        Ok(())
    }

    async fn handle_created_message(&self, message: Message) -> Result<(), Error> {
        info!(%message, "created message");
        self.inner.relaying.relay(vec![message.hash]).await;
        self.propagate_latest_message(&message).await
    }

    /// Records `message` as its creator's latest message in its own era and in every loaded
    /// descendant era, breadth-first over the child links. Cold descendants are loaded as the
    /// traversal proceeds, so branches are never silently skipped: a stray message in a
    /// grandparent era must reach the grandchild even if the creator is unbonded in between.
    async fn propagate_latest_message(&self, message: &Message) -> Result<(), Error> {
        let origin = message.key_block_hash;
        self.inner
            .fork_choice
            .update_latest_message(origin, message.clone())
            .await;

        let mut visited = HashSet::new();
        visited.insert(origin);
        let mut queue: VecDeque<BlockHash> = match self.get_loaded(origin).await {
            Some(loaded) => loaded.children.into_iter().collect(),
            None => {
                debug!(era = %origin, "message era not loaded; nothing to propagate");
                return Ok(());
            }
        };
        while let Some(descendant) = queue.pop_front() {
            if !visited.insert(descendant) {
                continue;
            }
            let loaded = self.load(descendant).await?;
            self.inner
                .fork_choice
                .update_latest_message(descendant, message.clone())
                .await;
            queue.extend(loaded.children);
        }
        Ok(())
    }

    fn make_runtime(&self, era: Era) -> EraRuntime {
        EraRuntime::new(era, &self.inner.config, Arc::clone(&self.inner.is_synced))
    }

    /// The scheduling-table keys currently in flight.
    #[cfg(test)]
    pub(crate) fn scheduled_keys(&self) -> Vec<(BlockHash, DelayedAction)> {
        self.inner.lock_schedule().keys().copied().collect()
    }
}

impl Inner {
    fn lock_schedule(&self) -> MutexGuard<ScheduleTable> {
        self.schedule
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn shutdown(&self) {
        self.is_shutdown.store(true, Ordering::SeqCst);
        let cancelled: Vec<((BlockHash, DelayedAction), JoinHandle<()>)> =
            self.lock_schedule().drain().collect();
        for ((era, delayed), handle) in &cancelled {
            handle.abort();
            trace!(era = %era, action = %delayed, "cancelled scheduled action");
        }
        if !cancelled.is_empty() {
            info!(count = cancelled.len(), "cancelled outstanding scheduled actions");
        }
        self.metrics.scheduled_actions.set(0);
    }
}

/// Dropping the last handle cancels all outstanding fibers, so they cannot outlive the scope
/// that created the supervisor.
impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown();
    }
}
