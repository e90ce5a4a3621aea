//! The agenda: the finite, tick-ordered set of future self-invocations an era runtime wants.

use std::fmt::{self, Display, Formatter};

use datasize::DataSize;
use serde::{Deserialize, Serialize};

use crate::types::{RoundId, Tick};

/// An action an era runtime can ask to be woken up for. Equality is structural: the scheduling
/// table keys on `(era, DelayedAction)`.
#[derive(DataSize, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    /// Begin the given round: produce the lambda message if this node leads it, and line up
    /// the follow-up actions.
    StartRound(RoundId),
    /// Produce the omega message of the given round.
    CreateOmegaMessage(RoundId),
}

impl Display for Action {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Action::StartRound(round_id) => write!(f, "start round {}", round_id),
            Action::CreateOmegaMessage(round_id) => {
                write!(f, "create omega message for round {}", round_id)
            }
        }
    }
}

/// A single scheduled invocation: fire `action` at `tick`.
#[derive(DataSize, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DelayedAction {
    /// The tick at which to fire.
    pub tick: Tick,
    /// The action to fire.
    pub action: Action,
}

impl Display for DelayedAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} at tick {}", self.action, self.tick)
    }
}

/// The set of delayed actions a runtime currently wants, ordered by tick. Two distinct actions
/// scheduled for the same tick fire independently.
#[derive(DataSize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Agenda(Vec<DelayedAction>);

impl Agenda {
    /// Creates an empty agenda.
    pub fn new() -> Self {
        Agenda(Vec::new())
    }

    /// Adds an action at the given tick, keeping the agenda tick-ordered.
    pub(crate) fn schedule(&mut self, tick: Tick, action: Action) {
        let delayed = DelayedAction { tick, action };
        let index = self
            .0
            .iter()
            .position(|existing| existing.tick > tick)
            .unwrap_or(self.0.len());
        self.0.insert(index, delayed);
    }

    /// Returns whether the agenda holds no actions.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The number of scheduled actions.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates over the scheduled actions in tick order.
    pub fn iter(&self) -> impl Iterator<Item = &DelayedAction> {
        self.0.iter()
    }
}

impl IntoIterator for Agenda {
    type Item = DelayedAction;
    type IntoIter = std::vec::IntoIter<DelayedAction>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
