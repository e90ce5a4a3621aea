use std::iter;

use datasize::DataSize;
use serde::{Deserialize, Serialize};

use crate::types::{BlockHash, BlockSummary, Tick, TickClock, TimeDiff, ValidatorId};

/// Configuration of the era supervisor.
/// NOTE: `tick_unit`, `init_round_exponent` and `era_duration` define the protocol schedule and
/// must be identical on all nodes; the remaining fields are local.
#[derive(DataSize, Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Wall-clock duration of one logical tick.
    pub tick_unit: TimeDiff,
    /// Binary exponent of the round length: a round spans `2^init_round_exponent` ticks.
    pub init_round_exponent: u8,
    /// Nominal wall-clock duration of an era; rounded up to a whole number of rounds.
    pub era_duration: TimeDiff,
    /// Summary of the genesis key block; seeds the genesis era on first startup.
    pub genesis_summary: BlockSummary,
    /// The identity under which this node produces messages. `None` runs every era as a
    /// passive observer.
    pub bonded_validator: Option<ValidatorId>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            tick_unit: TimeDiff::from_millis(1),
            init_round_exponent: 12,
            era_duration: TimeDiff::from_millis(7_200_000),
            // A placeholder summary; operators must supply the real genesis key block.
            genesis_summary: BlockSummary {
                block_hash: BlockHash::default(),
                parent_hash: BlockHash::default(),
                tick: Tick::from(0),
                validators: iter::once((ValidatorId::new([0; ValidatorId::LENGTH]), 1)).collect(),
                seed: 0,
            },
            bonded_validator: None,
        }
    }
}

impl Config {
    /// The clock converting between wall-clock time and ticks.
    pub(crate) fn tick_clock(&self) -> TickClock {
        TickClock::new(self.tick_unit)
    }

    /// The round length, in ticks.
    pub(crate) fn round_len(&self) -> u64 {
        1u64 << self.init_round_exponent
    }

    /// The era length, in ticks: `era_duration` rounded up to a whole number of rounds, at
    /// least one. Era ends always land on a round boundary, so the final round is never cut
    /// short.
    pub(crate) fn era_length(&self) -> u64 {
        let round_len = self.round_len();
        let rounds = (self.era_duration / self.tick_unit + round_len - 1) / round_len;
        rounds.max(1) * round_len
    }
}
