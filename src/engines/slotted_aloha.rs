use super::{AccessConditions, TxOpportunity};
use crate::channel::AllocationChannel;
use crate::rng::RandomSource;
use serde::{Deserialize, Serialize};
use tracing::trace;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct SlottedAlohaStats {
    pub evaluations: u32,
    pub releases: u32,
    pub blocks_with_dama: u32,
}

/// Single-replica access with a random release time. No backoff state.
#[derive(Debug, Default)]
pub struct SlottedAlohaEngine {
    stats: SlottedAlohaStats,
}

impl SlottedAlohaEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_stats(&self) -> &SlottedAlohaStats {
        &self.stats
    }

    pub fn evaluate<C, R>(
        &mut self,
        channel: &AllocationChannel,
        conditions: &C,
        rng: &mut R,
    ) -> TxOpportunity
    where
        C: AccessConditions + ?Sized,
        R: RandomSource + ?Sized,
    {
        self.stats.evaluations = self.stats.evaluations.saturating_add(1);

        if conditions.is_dama_available() {
            trace!(channel = channel.id(), "DAMA available, Slotted ALOHA not used");
            self.stats.blocks_with_dama = self.stats.blocks_with_dama.saturating_add(1);
            return TxOpportunity::DoNothing;
        }

        let wait_ms = randomize_release_time(channel, rng);
        self.stats.releases = self.stats.releases.saturating_add(1);
        trace!(channel = channel.id(), wait_ms, "Slotted ALOHA release time drawn");

        TxOpportunity::SlottedAloha { wait_ms }
    }
}

fn randomize_release_time<R: RandomSource + ?Sized>(
    channel: &AllocationChannel,
    rng: &mut R,
) -> u32 {
    // Bounds were validated non-negative with min <= max.
    let min_ms = channel.release_min_ms() as u32;
    let max_ms = channel.release_max_ms() as u32;
    rng.uniform_int(min_ms, max_ms)
}
