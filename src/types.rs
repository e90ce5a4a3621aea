mod block;
mod era;
mod message;
mod tick;
mod timestamp;

pub use block::{Block, BlockHash, BlockSummary};
pub(crate) use block::digest;
pub use era::{Era, Validator, ValidatorId, Validators};
pub use message::{Message, MessageKind};
pub use tick::{RoundId, Tick, TickClock};
pub use timestamp::{TimeDiff, Timestamp};
