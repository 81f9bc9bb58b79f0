use super::{AccessConditions, ReplicaMap, TxOpportunity};
use crate::channel::{AllocationChannel, ChannelSet};
use crate::random_access::RandomAccessError;
use crate::rng::RandomSource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::trace;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CrdsaStats {
    pub blocks_evaluated: u32,
    pub blocks_transmitted: u32,
    pub blocks_in_backoff: u32,
    pub blocks_with_dama: u32,
    pub blocks_with_empty_buffers: u32,
    pub blocks_idle: u32,
    pub backoffs_triggered: u32,
    pub packets_scheduled: u32,
    pub replicas_scheduled: u32,
    pub idle_periods_forced: u32,
}

/// Contention Resolution Diversity Slotted ALOHA for one terminal.
///
/// Per-channel timers and counters live in the [`ChannelSet`]; the engine
/// itself only carries the new-data flag and the packet id counter.
#[derive(Debug)]
pub struct CrdsaEngine {
    new_data: bool,
    next_packet_id: u32,
    stats: CrdsaStats,
}

impl CrdsaEngine {
    pub fn new() -> Self {
        Self {
            new_data: true,
            next_packet_id: 1,
            stats: CrdsaStats::default(),
        }
    }

    pub fn has_new_data(&self) -> bool {
        self.new_data
    }

    pub fn set_new_data(&mut self, new_data: bool) {
        self.new_data = new_data;
    }

    pub fn get_stats(&self) -> &CrdsaStats {
        &self.stats
    }

    /// Run one CRDSA block on `channel_id`.
    ///
    /// A block inside the channel's backoff period, with a DAMA grant
    /// available, or with nothing queued does not contend and releases
    /// one idle block on every channel.
    pub fn evaluate<C, R>(
        &mut self,
        channels: &mut ChannelSet,
        channel_id: u32,
        now_ms: u64,
        conditions: &mut C,
        rng: &mut R,
    ) -> Result<TxOpportunity, RandomAccessError>
    where
        C: AccessConditions + ?Sized,
        R: RandomSource + ?Sized,
    {
        self.stats.blocks_evaluated = self.stats.blocks_evaluated.saturating_add(1);

        let channel = channel_mut(channels, channel_id)?;
        if !channel.has_backoff_time_passed(now_ms) {
            trace!(
                channel = channel_id,
                now_ms,
                release_ms = channel.backoff_release_time_ms(),
                "CRDSA backoff in effect"
            );
            self.stats.blocks_in_backoff = self.stats.blocks_in_backoff.saturating_add(1);
            channels.release_block();
            return Ok(TxOpportunity::DoNothing);
        }

        if conditions.is_dama_available() {
            trace!(channel = channel_id, "DAMA available, CRDSA aborted");
            self.stats.blocks_with_dama = self.stats.blocks_with_dama.saturating_add(1);
            channels.release_block();
            return Ok(TxOpportunity::DoNothing);
        }

        if conditions.are_buffers_empty() {
            trace!(channel = channel_id, "buffers empty, CRDSA aborted");
            self.stats.blocks_with_empty_buffers =
                self.stats.blocks_with_empty_buffers.saturating_add(1);
            channels.release_block();
            return Ok(TxOpportunity::DoNothing);
        }

        if self.new_data {
            self.new_data = false;

            let channel = channel_mut(channels, channel_id)?;
            if do_backoff(channel, rng) {
                channel.set_backoff_timer(now_ms);
                trace!(
                    channel = channel_id,
                    release_ms = channel.backoff_release_time_ms(),
                    "backoff drawn for new data"
                );
                self.stats.backoffs_triggered = self.stats.backoffs_triggered.saturating_add(1);
                // No all-channel reset on this path.
                return Ok(TxOpportunity::DoNothing);
            }
        }

        let opportunity =
            self.prepare_to_transmit(channels, channel_id, now_ms, conditions, rng)?;

        if let TxOpportunity::Crdsa { replicas } = &opportunity {
            self.stats.blocks_transmitted = self.stats.blocks_transmitted.saturating_add(1);
            let packet_count = replicas.len() as u32;
            let replica_count: usize = replicas.values().map(BTreeSet::len).sum();
            self.stats.packets_scheduled =
                self.stats.packets_scheduled.saturating_add(packet_count);
            self.stats.replicas_scheduled =
                self.stats.replicas_scheduled.saturating_add(replica_count as u32);

            channels.increase_consecutive_blocks_used();
            let forced = channels.enforce_idle_blocks();
            self.stats.idle_periods_forced = self.stats.idle_periods_forced.saturating_add(forced);
        } else {
            self.stats.blocks_idle = self.stats.blocks_idle.saturating_add(1);
            channels.release_block();
        }

        Ok(opportunity)
    }

    fn prepare_to_transmit<C, R>(
        &mut self,
        channels: &mut ChannelSet,
        channel_id: u32,
        now_ms: u64,
        conditions: &mut C,
        rng: &mut R,
    ) -> Result<TxOpportunity, RandomAccessError>
    where
        C: AccessConditions + ?Sized,
        R: RandomSource + ?Sized,
    {
        let channel = channel_mut(channels, channel_id)?;
        let mut used_slots = BTreeSet::new();
        let mut replicas = ReplicaMap::new();

        for _ in 0..channel.max_unique_payload_per_block() {
            if do_backoff(channel, rng) {
                channel.set_backoff_timer(now_ms);
                trace!(
                    channel = channel_id,
                    release_ms = channel.backoff_release_time_ms(),
                    scheduled = replicas.len(),
                    "backoff drawn, abandoning the rest of the block"
                );
                self.stats.backoffs_triggered = self.stats.backoffs_triggered.saturating_add(1);
                break;
            }

            if !channel.is_crdsa_free() {
                trace!(
                    channel = channel_id,
                    idle_blocks_left = channel.idle_blocks_left(),
                    "channel idle"
                );
                continue;
            }

            let slots = randomize_tx_opportunities(channel, &mut used_slots, rng);
            let packet_id = self.next_packet_id;
            self.next_packet_id = self.next_packet_id.wrapping_add(1);
            trace!(channel = channel_id, packet_id, ?slots, "replica slots assigned");
            replicas.insert(packet_id, slots);

            conditions.on_packet_scheduled();
            if conditions.are_buffers_empty() {
                self.new_data = true;
            }
        }

        if replicas.is_empty() {
            Ok(TxOpportunity::DoNothing)
        } else {
            Ok(TxOpportunity::Crdsa { replicas })
        }
    }
}

impl Default for CrdsaEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn channel_mut(
    channels: &mut ChannelSet,
    channel_id: u32,
) -> Result<&mut AllocationChannel, RandomAccessError> {
    channels
        .get_mut(channel_id)
        .ok_or(RandomAccessError::UnknownChannel(channel_id))
}

fn do_backoff<R: RandomSource + ?Sized>(channel: &AllocationChannel, rng: &mut R) -> bool {
    rng.uniform() < channel.backoff_probability()
}

/// Draw `num_instances` slots for one packet, rejecting any slot already
/// used in this block. Retries are unbounded.
fn randomize_tx_opportunities<R: RandomSource + ?Sized>(
    channel: &AllocationChannel,
    used_slots: &mut BTreeSet<u32>,
    rng: &mut R,
) -> BTreeSet<u32> {
    let mut slots = BTreeSet::new();
    while slots.len() < channel.num_instances() as usize {
        let slot = rng.uniform_int(channel.min_slot(), channel.max_slot());
        if used_slots.insert(slot) {
            slots.insert(slot);
        } else {
            trace!(channel = channel.id(), slot, "slot already used in this block, redrawing");
        }
    }
    slots
}
