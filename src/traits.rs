//! Contracts of the era supervisor's external collaborators.
//!
//! The supervisor tries to know as little as possible about the rest of the node: persistence,
//! gossip, fork choice and block execution are reached exclusively through these traits. All of
//! them may suspend; none of them are assumed to be fast.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    error::StorageError,
    types::{Block, BlockHash, Era, Message},
};

/// Access to the persisted era tree.
#[async_trait]
pub trait EraStorage: Send + Sync {
    /// Stores an era. Idempotent upsert keyed by the era's key block hash.
    async fn add_era(&self, era: Era) -> Result<(), StorageError>;

    /// Returns the era with the given key block hash, or fails with
    /// [`StorageError::EraNotFound`] if the hash is unknown.
    async fn get_era_unsafe(&self, hash: BlockHash) -> Result<Era, StorageError>;

    /// Returns the stored children of the given era; empty if there are none.
    async fn get_children(&self, hash: BlockHash) -> Result<Vec<Era>, StorageError>;

    /// Returns the current tips of the era tree: every stored era without children.
    async fn get_childless_eras(&self) -> Result<Vec<Era>, StorageError>;
}

/// Broadcast of locally produced message hashes to peers. Fire-and-forget: implementations log
/// their own failures, the supervisor never learns about them.
#[async_trait]
pub trait Relaying: Send + Sync {
    /// Relays the given message hashes.
    async fn relay(&self, hashes: Vec<BlockHash>);
}

/// The fork-choice manager's intake: per-era latest-message observations. Consulted elsewhere
/// to pick block parents.
#[async_trait]
pub trait ForkChoiceManager: Send + Sync {
    /// Records `message` as its creator's latest message from the perspective of the given
    /// era. Idempotent per `(era, message hash)`; the manager reconciles with its own
    /// persisted state on the first observation per era.
    async fn update_latest_message(&self, era: BlockHash, message: Message);
}

/// The block persistence and execution pipeline, invoked once a block has passed era
/// validation and before it is propagated.
#[async_trait]
pub trait BlockExecutor: Send + Sync {
    /// Persists and executes the block.
    async fn execute_block(&self, block: &Block) -> Result<(), anyhow::Error>;
}

/// Answers whether this node has finished synchronizing with the network. A node that is still
/// catching up keeps scheduling rounds but produces no messages.
pub type IsSynced = Arc<dyn Fn() -> bool + Send + Sync>;
