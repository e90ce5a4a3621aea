use std::fmt::{self, Display, Formatter};

use datasize::DataSize;

use crate::types::{Era, Message};

/// A domain event emitted by an era runtime. Runtimes are pure with respect to storage and the
/// network; every side effect they want is surfaced as one of these, and the supervisor replays
/// them in emission order.
#[derive(DataSize, Debug, Clone, PartialEq, Eq)]
pub enum HighwayEvent {
    /// A switch block opened a new era.
    CreatedEra(Era),
    /// This node produced the lambda message of a round it leads.
    CreatedLambdaMessage(Message),
    /// This node responded to a round leader's lambda message.
    CreatedLambdaResponse(Message),
    /// This node produced an omega message.
    CreatedOmegaMessage(Message),
}

impl HighwayEvent {
    /// The produced message, if this event carries one.
    pub fn message(&self) -> Option<&Message> {
        match self {
            HighwayEvent::CreatedEra(_) => None,
            HighwayEvent::CreatedLambdaMessage(message)
            | HighwayEvent::CreatedLambdaResponse(message)
            | HighwayEvent::CreatedOmegaMessage(message) => Some(message),
        }
    }
}

impl Display for HighwayEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            HighwayEvent::CreatedEra(era) => write!(f, "created {}", era),
            HighwayEvent::CreatedLambdaMessage(message)
            | HighwayEvent::CreatedLambdaResponse(message)
            | HighwayEvent::CreatedOmegaMessage(message) => write!(f, "created {}", message),
        }
    }
}
