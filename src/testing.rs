//! Test fixtures: a reproducible RNG, era and message builders, and recording implementations
//! of the supervisor's collaborators.

use std::{
    collections::HashMap,
    iter::FromIterator,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use rand::{Rng, RngCore};
use rand_pcg::Pcg64Mcg;

use crate::{
    config::Config,
    error::StorageError,
    traits::{BlockExecutor, EraStorage, ForkChoiceManager, IsSynced, Relaying},
    types::{
        Block, BlockHash, BlockSummary, Era, Message, MessageKind, Tick, TimeDiff, ValidatorId,
        Validators,
    },
};

/// A seeded RNG for tests. The seed is printed on construction so a failing run can be
/// reproduced by pinning it.
pub(crate) struct TestRng(Pcg64Mcg);

impl TestRng {
    pub(crate) fn new() -> Self {
        let seed: u64 = rand::thread_rng().gen();
        println!("TestRng seed: {}", seed);
        TestRng::from_seed(seed)
    }

    pub(crate) fn from_seed(seed: u64) -> Self {
        use rand::SeedableRng;
        TestRng(Pcg64Mcg::seed_from_u64(seed))
    }
}

impl RngCore for TestRng {
    fn next_u32(&mut self) -> u32 {
        self.0.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.0.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.0.fill_bytes(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.0.try_fill_bytes(dest)
    }
}

/// A hash with every byte set to `id`; handy for readable assertions.
pub(crate) fn block_hash(id: u8) -> BlockHash {
    BlockHash::new([id; BlockHash::LENGTH])
}

/// A random hash.
pub(crate) fn random_hash(rng: &mut TestRng) -> BlockHash {
    let mut bytes = [0; BlockHash::LENGTH];
    rng.fill_bytes(&mut bytes);
    BlockHash::new(bytes)
}

/// A validator identity with every byte set to `id`.
pub(crate) fn validator_id(id: u8) -> ValidatorId {
    ValidatorId::new([id; ValidatorId::LENGTH])
}

/// A bonded snapshot from `(id, weight)` pairs.
pub(crate) fn validators(weights: &[(u8, u64)]) -> Validators {
    Validators::from_iter(
        weights
            .iter()
            .map(|(id, weight)| (validator_id(*id), *weight)),
    )
}

/// An era keyed by `block_hash(key)` with the given tick bounds; its seed is the key byte, so
/// two test eras with different keys get different leader schedules.
pub(crate) fn era_with_bounds(key: u8, start: u64, end: u64, validators: Validators) -> Era {
    Era::new(
        block_hash(key),
        None,
        Tick::from(start),
        Tick::from(end),
        validators,
        key as u64,
    )
}

/// A child era of `parent` keyed by `block_hash(key)` with explicit bounds; unlike
/// [`Era::child`] this allows the overlapping and short-lived shapes the startup walk has to
/// cope with.
pub(crate) fn child_era_with_bounds(parent: &Era, key: u8, start: u64, end: u64) -> Era {
    Era::new(
        block_hash(key),
        Some(parent.key_block_hash()),
        Tick::from(start),
        Tick::from(end),
        parent.validators().clone(),
        key as u64,
    )
}

/// A config for driving an [`EraRuntime`](crate::EraRuntime) directly in unit tests; the
/// genesis summary is a placeholder.
pub(crate) fn runtime_config(round_exponent: u8, bonded: Option<ValidatorId>) -> Config {
    Config {
        tick_unit: TimeDiff::from_millis(1_000),
        init_round_exponent: round_exponent,
        era_duration: TimeDiff::from_millis(16_000),
        genesis_summary: BlockSummary {
            block_hash: block_hash(1),
            parent_hash: BlockHash::default(),
            tick: Tick::from(0),
            validators: validators(&[(1, 1)]),
            seed: 0,
        },
        bonded_validator: bonded,
    }
}

pub(crate) fn synced() -> IsSynced {
    Arc::new(|| true)
}

pub(crate) fn never_synced() -> IsSynced {
    Arc::new(|| false)
}

/// A ballot in the given era: valid if `creator` is bonded and `round` is a boundary.
pub(crate) fn ballot_block(era: &Era, creator: ValidatorId, round: u64, hash: BlockHash) -> Block {
    Block {
        hash,
        parent_hash: era.key_block_hash(),
        key_block_hash: era.key_block_hash(),
        round_id: round,
        creator,
        kind_tag: MessageKind::Ballot.tag(),
        payload: Vec::new(),
    }
}

/// One observed side effect. Both recording collaborators append to a single shared log, so
/// tests can assert on the relative order of relay and fork-choice calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Observed {
    Relayed(Vec<BlockHash>),
    LatestMessage { era: BlockHash, message: Message },
}

pub(crate) type EffectLog = Arc<Mutex<Vec<Observed>>>;

pub(crate) fn effect_log() -> EffectLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// The hashes relayed so far, in order.
pub(crate) fn relayed_hashes(log: &EffectLog) -> Vec<BlockHash> {
    log.lock()
        .unwrap()
        .iter()
        .filter_map(|observed| match observed {
            Observed::Relayed(hashes) => Some(hashes.clone()),
            Observed::LatestMessage { .. } => None,
        })
        .flatten()
        .collect()
}

/// The `(era, message hash)` pairs the fork-choice manager saw, in order.
pub(crate) fn latest_message_updates(log: &EffectLog) -> Vec<(BlockHash, BlockHash)> {
    log.lock()
        .unwrap()
        .iter()
        .filter_map(|observed| match observed {
            Observed::Relayed(_) => None,
            Observed::LatestMessage { era, message } => Some((*era, message.hash)),
        })
        .collect()
}

/// An in-memory era store, keeping count of `get_era_unsafe` calls per era.
#[derive(Default)]
pub(crate) struct InMemEraStore {
    eras: Mutex<HashMap<BlockHash, Era>>,
    fetches: Mutex<HashMap<BlockHash, usize>>,
}

impl InMemEraStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_eras(eras: Vec<Era>) -> Self {
        let store = Self::new();
        {
            let mut guard = store.eras.lock().unwrap();
            for era in eras {
                guard.insert(era.key_block_hash(), era);
            }
        }
        store
    }

    /// How often `get_era_unsafe` was called for the given era.
    pub(crate) fn fetch_count(&self, hash: BlockHash) -> usize {
        *self.fetches.lock().unwrap().get(&hash).unwrap_or(&0)
    }

    pub(crate) fn contains(&self, hash: BlockHash) -> bool {
        self.eras.lock().unwrap().contains_key(&hash)
    }
}

/// Every method yields once before touching the maps, modelling the suspension point a real
/// store has; concurrent callers genuinely interleave.
#[async_trait]
impl EraStorage for InMemEraStore {
    async fn add_era(&self, era: Era) -> Result<(), StorageError> {
        tokio::task::yield_now().await;
        self.eras.lock().unwrap().insert(era.key_block_hash(), era);
        Ok(())
    }

    async fn get_era_unsafe(&self, hash: BlockHash) -> Result<Era, StorageError> {
        tokio::task::yield_now().await;
        *self.fetches.lock().unwrap().entry(hash).or_insert(0) += 1;
        self.eras
            .lock()
            .unwrap()
            .get(&hash)
            .cloned()
            .ok_or(StorageError::EraNotFound(hash))
    }

    async fn get_children(&self, hash: BlockHash) -> Result<Vec<Era>, StorageError> {
        tokio::task::yield_now().await;
        Ok(self
            .eras
            .lock()
            .unwrap()
            .values()
            .filter(|era| era.parent_key_block_hash() == Some(hash))
            .cloned()
            .collect())
    }

    async fn get_childless_eras(&self) -> Result<Vec<Era>, StorageError> {
        tokio::task::yield_now().await;
        let eras = self.eras.lock().unwrap();
        Ok(eras
            .values()
            .filter(|era| {
                !eras
                    .values()
                    .any(|child| child.parent_key_block_hash() == Some(era.key_block_hash()))
            })
            .cloned()
            .collect())
    }
}

/// Relay that appends to the shared effect log.
pub(crate) struct RecordingRelay {
    log: EffectLog,
}

impl RecordingRelay {
    pub(crate) fn new(log: EffectLog) -> Self {
        RecordingRelay { log }
    }
}

#[async_trait]
impl Relaying for RecordingRelay {
    async fn relay(&self, hashes: Vec<BlockHash>) {
        self.log.lock().unwrap().push(Observed::Relayed(hashes));
    }
}

/// Fork-choice manager that appends to the shared effect log.
pub(crate) struct RecordingForkChoice {
    log: EffectLog,
}

impl RecordingForkChoice {
    pub(crate) fn new(log: EffectLog) -> Self {
        RecordingForkChoice { log }
    }
}

#[async_trait]
impl ForkChoiceManager for RecordingForkChoice {
    async fn update_latest_message(&self, era: BlockHash, message: Message) {
        self.log
            .lock()
            .unwrap()
            .push(Observed::LatestMessage { era, message });
    }
}

/// Block executor that accepts everything.
pub(crate) struct NoopBlockExecutor;

#[async_trait]
impl BlockExecutor for NoopBlockExecutor {
    async fn execute_block(&self, _block: &Block) -> Result<(), anyhow::Error> {
        Ok(())
    }
}
