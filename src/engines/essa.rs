use super::TxOpportunity;
use crate::channel::AllocationChannel;
use crate::rng::RandomSource;
use serde::{Deserialize, Serialize};
use tracing::trace;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct EssaStats {
    pub evaluations: u32,
    pub immediate_releases: u32,
    pub total_backoff_frames: u64,
}

/// Persistence-based backoff for asynchronous ESSA access.
#[derive(Debug, Default)]
pub struct EssaEngine {
    stats: EssaStats,
}

impl EssaEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_stats(&self) -> &EssaStats {
        &self.stats
    }

    /// Count failed persistence draws until one succeeds and convert the
    /// count to a wait time. Every draw is taken from `rng`; the loop is
    /// not replaced by a closed-form geometric sample.
    pub fn evaluate<R: RandomSource + ?Sized>(
        &mut self,
        channel: &AllocationChannel,
        rng: &mut R,
    ) -> TxOpportunity {
        self.stats.evaluations = self.stats.evaluations.saturating_add(1);

        let persistence = channel.persistence();
        let mut count: u32 = 0;
        let mut draw = rng.uniform();
        while draw > persistence {
            count = count.saturating_add(1);
            draw = rng.uniform();
        }

        if count == 0 {
            self.stats.immediate_releases = self.stats.immediate_releases.saturating_add(1);
        }
        let backoff_frames = count.saturating_mul(channel.backoff_frames());
        self.stats.total_backoff_frames = self
            .stats
            .total_backoff_frames
            .saturating_add(u64::from(backoff_frames));

        let wait_ms = backoff_frames.saturating_mul(channel.frame_duration_ms());
        trace!(channel = channel.id(), count, wait_ms, "ESSA backoff drawn");

        TxOpportunity::Essa { wait_ms }
    }
}
