use std::fmt::{self, Debug, Display, Formatter};

use blake2::{
    digest::{Update, VariableOutput},
    VarBlake2b,
};
use datasize::DataSize;
use hex_fmt::HexFmt;
use serde::{Deserialize, Serialize};

use super::{Tick, ValidatorId, Validators};

/// The cryptographic hash of a consensus block or message.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockHash([u8; BlockHash::LENGTH]);

impl BlockHash {
    /// The number of bytes in a `BlockHash` digest.
    pub const LENGTH: usize = 32;

    /// Constructs a new `BlockHash` from raw digest bytes.
    pub const fn new(bytes: [u8; BlockHash::LENGTH]) -> Self {
        BlockHash(bytes)
    }

    /// Returns the underlying digest bytes.
    pub fn inner(&self) -> &[u8; BlockHash::LENGTH] {
        &self.0
    }

    /// Returns whether this is the all-zero placeholder hash.
    pub(crate) fn is_zero(&self) -> bool {
        self.0 == [0; BlockHash::LENGTH]
    }
}

impl Display for BlockHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:10}", HexFmt(&self.0))
    }
}

impl Debug for BlockHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({})", HexFmt(&self.0))
    }
}

impl AsRef<[u8]> for BlockHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl DataSize for BlockHash {
    const IS_DYNAMIC: bool = false;

    const STATIC_HEAP_SIZE: usize = 0;

    #[inline]
    fn estimate_heap_size(&self) -> usize {
        0
    }
}

/// Computes the blake2b-256 digest of the concatenation of the given chunks.
pub(crate) fn digest(chunks: &[&[u8]]) -> [u8; BlockHash::LENGTH] {
    let mut hasher = VarBlake2b::new(BlockHash::LENGTH).expect("should create hasher");
    for chunk in chunks {
        hasher.update(chunk);
    }
    let mut result = [0; BlockHash::LENGTH];
    hasher.finalize_variable(|slice| result.copy_from_slice(slice));
    result
}

/// An inbound consensus block, as handed over by the gossip intake. The header fields arrive
/// already deserialized but unvalidated; parsing into a [`Message`](super::Message) is where
/// they are checked.
#[derive(DataSize, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// The hash identifying this block.
    pub hash: BlockHash,
    /// The hash of the creator's previous message.
    pub parent_hash: BlockHash,
    /// The key block hash of the era this block was issued in.
    pub key_block_hash: BlockHash,
    /// The start tick of the round this block belongs to.
    pub round_id: u64,
    /// The validator that created this block.
    pub creator: ValidatorId,
    /// The raw tag of the message kind.
    pub kind_tag: u8,
    /// Opaque payload, interpreted by the block pipeline only.
    pub payload: Vec<u8>,
}

impl Display for Block {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "block {} in round {} of era {}",
            self.hash, self.round_id, self.key_block_hash
        )
    }
}

/// Condensed view of a key block: everything needed to seed the era it opens.
#[derive(DataSize, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSummary {
    /// The key block's hash; the identifier of the era it opens.
    pub block_hash: BlockHash,
    /// The hash of the key block's parent.
    pub parent_hash: BlockHash,
    /// The tick at which the opened era starts.
    pub tick: Tick,
    /// The bonded-validators snapshot of the opened era.
    pub validators: Validators,
    /// The leader-schedule seed of the opened era.
    pub seed: u64,
}
