//! The error taxonomy of the era supervisor's public surface.

use thiserror::Error;

use crate::types::{BlockHash, MessageKind, Tick, ValidatorId};

/// An error returned by the era supervisor's public operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The supervisor has been shut down and no longer accepts blocks.
    #[error("the era supervisor is shutting down")]
    ShuttingDown,
    /// The inbound block could not be parsed as a consensus message.
    #[error("malformed block: {0}")]
    Malformed(#[from] BlockParseError),
    /// The era runtime rejected the message; the block is dropped.
    #[error("invalid block: {0}")]
    InvalidBlock(#[from] ValidationError),
    /// An underlying store failed; no local recovery is attempted.
    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),
}

/// A reason an inbound block failed to parse as a consensus message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlockParseError {
    /// The block's kind tag does not name a message kind.
    #[error("unknown message kind tag {0}")]
    UnknownKind(u8),
    /// The block hash is the zero placeholder.
    #[error("the block hash is missing")]
    MissingHash,
    /// The key era reference is the zero placeholder.
    #[error("the key era is missing")]
    MissingEraKey,
}

/// A reason an era runtime rejected a message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The message was routed to an era it does not belong to.
    #[error("the message belongs to era {got}, not era {expected}")]
    WrongEra {
        /// The era the message was validated against.
        expected: BlockHash,
        /// The era the message names.
        got: BlockHash,
    },
    /// The creator is not in the era's bonded snapshot.
    #[error("the creator {0} is not bonded in this era")]
    SignerNotBonded(ValidatorId),
    /// The round lies outside the era's tick bounds.
    #[error("round {round} lies outside the era bounds [{start}, {end}]")]
    RoundOutOfBounds {
        /// The round the message names.
        round: Tick,
        /// The era's first tick.
        start: Tick,
        /// The era's last tick.
        end: Tick,
    },
    /// The round does not start on a round boundary.
    #[error("round {0} is not aligned to a round boundary")]
    MisalignedRound(Tick),
    /// The parent is neither the era's key block nor a message known to the era.
    #[error("parent {0} is neither the key block nor a known message of this era")]
    UnknownParent(BlockHash),
    /// The creator already sent a different message of the same kind in the same round.
    #[error("{creator} already sent a {kind} message in round {round}")]
    DoubleRoundMessage {
        /// The message creator.
        creator: ValidatorId,
        /// The round in question.
        round: Tick,
        /// The duplicated kind.
        kind: MessageKind,
    },
}

/// A failure of one of the underlying stores or of the block pipeline.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested era is not in the era store.
    #[error("era {0} not found in the era store")]
    EraNotFound(BlockHash),
    /// Any other backend failure.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
