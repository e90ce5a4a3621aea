use std::{
    fmt::{self, Display},
    time::Duration,
};

use datasize::DataSize;
use derive_more::From;
use serde::{Deserialize, Serialize};

use super::{TimeDiff, Timestamp};

/// An integer logical-clock unit. The conversion to wall-clock time is fixed by the configured
/// tick unit; all round and era bounds are expressed in ticks.
#[derive(
    DataSize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    From,
    Serialize,
    Deserialize,
)]
pub struct Tick(u64);

/// A round is identified by its start tick.
pub type RoundId = Tick;

impl Tick {
    /// Returns the tick as a plain integer.
    pub fn value(self) -> u64 {
        self.0
    }

    /// Returns the tick `diff` units later.
    pub fn add(self, diff: u64) -> Tick {
        Tick(self.0 + diff)
    }

    /// Returns the number of ticks from `earlier` to `self`, or `0` if `self` comes first.
    pub fn saturating_diff(self, earlier: Tick) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Converts between wall-clock timestamps and logical ticks, according to the configured tick
/// unit.
#[derive(DataSize, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickClock {
    unit: TimeDiff,
}

impl TickClock {
    /// Creates a clock with the given tick unit. The unit must be a positive duration.
    pub fn new(unit: TimeDiff) -> Self {
        assert!(unit.millis() > 0, "tick unit must be positive");
        TickClock { unit }
    }

    /// The current moment, in ticks.
    pub fn now(&self) -> Tick {
        self.tick_at(Timestamp::now())
    }

    /// The tick containing the given timestamp.
    pub fn tick_at(&self, timestamp: Timestamp) -> Tick {
        Tick(timestamp / self.unit)
    }

    /// The timestamp at which the given tick begins.
    pub fn timestamp(&self, tick: Tick) -> Timestamp {
        Timestamp::zero() + self.unit * tick.0
    }

    /// The wall-clock delay from now until the given tick, clamped to zero if the tick has
    /// already begun.
    pub fn delay_until(&self, tick: Tick) -> Duration {
        self.timestamp(tick).saturating_sub(Timestamp::now()).into()
    }
}
