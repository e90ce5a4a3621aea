//! The era supervisor of the Highway consensus protocol.
//!
//! Highway organizes consensus as a tree of time-bounded eras, each running a round-based
//! message-production schedule against a shared logical tick clock. This crate implements the
//! control plane around those eras: the [`EraSupervisor`] routes inbound blocks to the era
//! that issued them, lazily instantiates one [`EraRuntime`] per referenced era, drives each
//! runtime's agenda on cancellable timer fibers, and replays the domain events the runtimes
//! emit: relaying produced messages, feeding latest-message observations to fork choice, and
//! creating child eras as the tree extends in time.
//!
//! The supervisor reaches the rest of the node exclusively through the contracts in
//! [`traits`]: the era store, the gossip relay, the fork-choice manager and the block
//! pipeline. It tries to know as little as possible about the consensus rules themselves;
//! those live in the era runtimes.

#![warn(missing_docs)]

mod agenda;
mod config;
mod era_runtime;
mod era_supervisor;
mod error;
mod event;
mod metrics;
#[cfg(test)]
pub(crate) mod testing;
pub mod traits;
mod types;

pub use agenda::{Action, Agenda, DelayedAction};
pub use config::Config;
pub use era_runtime::EraRuntime;
pub use era_supervisor::{EraSummary, EraSupervisor};
pub use error::{BlockParseError, Error, StorageError, ValidationError};
pub use event::HighwayEvent;
pub use metrics::Metrics;
pub use types::{
    Block, BlockHash, BlockSummary, Era, Message, MessageKind, RoundId, Tick, TickClock, TimeDiff,
    Timestamp, Validator, ValidatorId, Validators,
};
