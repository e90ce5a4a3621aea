use std::{
    convert::TryInto,
    fmt::{self, Debug, Display, Formatter},
    iter::FromIterator,
};

use datasize::DataSize;
use hex_fmt::HexFmt;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use super::{
    block::{digest, BlockHash},
    BlockSummary, Tick,
};

/// The identity of a validator: opaque public-key bytes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ValidatorId([u8; ValidatorId::LENGTH]);

impl ValidatorId {
    /// The number of bytes in a `ValidatorId`.
    pub const LENGTH: usize = 32;

    /// Constructs a new `ValidatorId` from raw key bytes.
    pub const fn new(bytes: [u8; ValidatorId::LENGTH]) -> Self {
        ValidatorId(bytes)
    }
}

impl Display for ValidatorId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:10}", HexFmt(&self.0))
    }
}

impl Debug for ValidatorId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "ValidatorId({})", HexFmt(&self.0))
    }
}

impl AsRef<[u8]> for ValidatorId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl DataSize for ValidatorId {
    const IS_DYNAMIC: bool = false;

    const STATIC_HEAP_SIZE: usize = 0;

    #[inline]
    fn estimate_heap_size(&self) -> usize {
        0
    }
}

/// A bonded validator and its weight.
#[derive(DataSize, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    id: ValidatorId,
    weight: u64,
}

impl Validator {
    /// Returns the validator's identity.
    pub fn id(&self) -> &ValidatorId {
        &self.id
    }

    /// Returns the validator's weight.
    pub fn weight(&self) -> u64 {
        self.weight
    }
}

/// The bonded-validators snapshot of an era: an ordered list of validators and weights. The
/// order is part of the snapshot, since the leader schedule indexes into it by weight.
#[derive(DataSize, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validators {
    validators: Vec<Validator>,
    total_weight: u64,
}

impl Validators {
    /// Returns the sum of all validator weights.
    pub fn total_weight(&self) -> u64 {
        self.total_weight
    }

    /// Returns whether the given identity is bonded in this snapshot.
    pub fn contains(&self, id: &ValidatorId) -> bool {
        self.validators.iter().any(|validator| validator.id() == id)
    }

    /// Returns an iterator over the validators, in snapshot order.
    pub fn iter(&self) -> impl Iterator<Item = &Validator> {
        self.validators.iter()
    }

    /// The number of bonded validators.
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// Returns whether the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Returns the validator owning the weighted index `target`, which must be less than the
    /// total weight.
    pub(crate) fn by_weighted_index(&self, target: u64) -> &ValidatorId {
        let mut remaining = target;
        for validator in &self.validators {
            if remaining < validator.weight() {
                return validator.id();
            }
            remaining -= validator.weight();
        }
        unreachable!("weighted index {} exceeds total weight", target)
    }
}

impl FromIterator<(ValidatorId, u64)> for Validators {
    fn from_iter<I: IntoIterator<Item = (ValidatorId, u64)>>(iter: I) -> Validators {
        let validators: Vec<Validator> = iter
            .into_iter()
            .map(|(id, weight)| Validator { id, weight })
            .collect();
        let total_weight = validators
            .iter()
            .map(Validator::weight)
            .fold(0u64, |sum, weight| {
                sum.checked_add(weight).expect("total weight overflow")
            });
        assert!(total_weight > 0, "cannot build an era with total weight 0");
        Validators {
            validators,
            total_weight,
        }
    }
}

impl Display for Validators {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            self.validators
                .iter()
                .map(|validator| format!("{}: {}", validator.id(), validator.weight()))
                .join(", ")
        )
    }
}

/// A time-bounded era of the protocol: a sub-tree of consensus messages with its own
/// bonded-validator snapshot and round schedule. Identified by the hash of the switch block
/// that opened it.
#[derive(DataSize, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Era {
    key_block_hash: BlockHash,
    parent_key_block_hash: Option<BlockHash>,
    start_tick: Tick,
    end_tick: Tick,
    validators: Validators,
    seed: u64,
}

impl Era {
    /// Constructs an era from its persisted parts.
    pub fn new(
        key_block_hash: BlockHash,
        parent_key_block_hash: Option<BlockHash>,
        start_tick: Tick,
        end_tick: Tick,
        validators: Validators,
        seed: u64,
    ) -> Self {
        assert!(start_tick <= end_tick, "era must not end before it starts");
        Era {
            key_block_hash,
            parent_key_block_hash,
            start_tick,
            end_tick,
            validators,
            seed,
        }
    }

    /// Constructs the genesis era from the configured key-block summary.
    pub fn genesis(summary: &BlockSummary, length: u64) -> Self {
        Era::new(
            summary.block_hash,
            None,
            summary.tick,
            summary.tick.add(length),
            summary.validators.clone(),
            summary.seed,
        )
    }

    /// Constructs the child era opened by the given switch block. The child starts where this
    /// era ends, runs for the same length, and inherits the bonded snapshot; its seed is
    /// derived from this era's seed and the switch block hash.
    pub fn child(&self, switch_block_hash: BlockHash) -> Era {
        let length = self.end_tick.saturating_diff(self.start_tick);
        Era::new(
            switch_block_hash,
            Some(self.key_block_hash),
            self.end_tick,
            self.end_tick.add(length),
            self.validators.clone(),
            era_seed(self.seed, &switch_block_hash),
        )
    }

    /// The era's primary identifier: the hash of the switch block that opened it.
    pub fn key_block_hash(&self) -> BlockHash {
        self.key_block_hash
    }

    /// The parent era's key block hash; `None` iff this is the genesis era.
    pub fn parent_key_block_hash(&self) -> Option<BlockHash> {
        self.parent_key_block_hash
    }

    /// The tick at which the era's first round starts.
    pub fn start_tick(&self) -> Tick {
        self.start_tick
    }

    /// The tick at which the era nominally ends.
    pub fn end_tick(&self) -> Tick {
        self.end_tick
    }

    /// The bonded-validators snapshot.
    pub fn validators(&self) -> &Validators {
        &self.validators
    }

    /// The leader-schedule seed.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Returns whether this is the genesis era.
    pub fn is_genesis(&self) -> bool {
        self.parent_key_block_hash.is_none()
    }
}

impl Display for Era {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "era {}", self.key_block_hash)
    }
}

/// Derives a child era's leader-schedule seed from the parent seed and the switch block hash.
fn era_seed(parent_seed: u64, switch_block_hash: &BlockHash) -> u64 {
    let result = digest(&[&parent_seed.to_le_bytes(), switch_block_hash.as_ref()]);
    u64::from_le_bytes(result[0..std::mem::size_of::<u64>()].try_into().unwrap())
}
