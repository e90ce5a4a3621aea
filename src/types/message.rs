use std::{
    convert::TryFrom,
    fmt::{self, Display, Formatter},
};

use datasize::DataSize;
use serde::{Deserialize, Serialize};

use super::{Block, BlockHash, RoundId, Tick, ValidatorId};
use crate::error::BlockParseError;

/// The kind of consensus message a round produces.
#[derive(DataSize, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// The round leader's scheduled message, carrying a proposed block.
    Lambda,
    /// A validator's direct response to the round leader's lambda message.
    LambdaResponse,
    /// The scheduled end-of-round message every validator sends.
    Omega,
    /// A non-proposing consensus vote.
    Ballot,
    /// A full block outside the lambda schedule.
    Block,
}

impl MessageKind {
    /// The wire tag of this kind.
    pub fn tag(self) -> u8 {
        match self {
            MessageKind::Lambda => 0,
            MessageKind::LambdaResponse => 1,
            MessageKind::Omega => 2,
            MessageKind::Ballot => 3,
            MessageKind::Block => 4,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(MessageKind::Lambda),
            1 => Some(MessageKind::LambdaResponse),
            2 => Some(MessageKind::Omega),
            3 => Some(MessageKind::Ballot),
            4 => Some(MessageKind::Block),
            _ => None,
        }
    }

    /// Returns whether messages of this kind carry a proposed block, and can therefore act as
    /// the switch block opening a child era.
    pub(crate) fn is_block_carrying(self) -> bool {
        matches!(self, MessageKind::Lambda | MessageKind::Block)
    }
}

impl Display for MessageKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Lambda => write!(f, "lambda"),
            MessageKind::LambdaResponse => write!(f, "lambda response"),
            MessageKind::Omega => write!(f, "omega"),
            MessageKind::Ballot => write!(f, "ballot"),
            MessageKind::Block => write!(f, "block"),
        }
    }
}

/// The normalized view of a consensus message: what the supervisor and the era runtimes need to
/// route, validate and propagate it.
#[derive(DataSize, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// The message's own hash.
    pub hash: BlockHash,
    /// The hash of the creator's previous message, or of the era's key block for the creator's
    /// first message.
    pub parent_hash: BlockHash,
    /// The key block hash of the era the message was issued in.
    pub key_block_hash: BlockHash,
    /// The round the message belongs to.
    pub round_id: RoundId,
    /// The validator that created the message.
    pub creator: ValidatorId,
    /// The message kind.
    pub kind: MessageKind,
}

impl TryFrom<&Block> for Message {
    type Error = BlockParseError;

    fn try_from(block: &Block) -> Result<Self, Self::Error> {
        if block.hash.is_zero() {
            return Err(BlockParseError::MissingHash);
        }
        if block.key_block_hash.is_zero() {
            return Err(BlockParseError::MissingEraKey);
        }
        let kind = MessageKind::from_tag(block.kind_tag)
            .ok_or(BlockParseError::UnknownKind(block.kind_tag))?;
        Ok(Message {
            hash: block.hash,
            parent_hash: block.parent_hash,
            key_block_hash: block.key_block_hash,
            round_id: Tick::from(block.round_id),
            creator: block.creator,
            kind,
        })
    }
}

impl Display for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} message {} by {} in round {} of era {}",
            self.kind, self.hash, self.creator, self.round_id, self.key_block_hash
        )
    }
}
