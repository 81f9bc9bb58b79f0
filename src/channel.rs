use heapless::Vec;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Lower layer service carries at most four RA service entries per terminal.
pub const MAX_ALLOCATION_CHANNELS: usize = 4;
pub const MIN_CRDSA_INSTANCES: u32 = 1;
pub const MAX_CRDSA_INSTANCES: u32 = 3;

// Defaults for a single RA service entry
const DEFAULT_MIN_SLOT: u32 = 0;
const DEFAULT_MAX_SLOT: u32 = 79;
const DEFAULT_NUM_INSTANCES: u32 = 3;
const DEFAULT_MAX_UNIQUE_PAYLOAD_PER_BLOCK: u32 = 3;
const DEFAULT_MAX_CONSECUTIVE_BLOCKS_ACCESSED: u32 = 6;
const DEFAULT_MIN_IDLE_BLOCKS: u32 = 2;
const DEFAULT_BACKOFF_PROBABILITY: f64 = 0.05;
const DEFAULT_BACKOFF_TIME_MS: u32 = 250;
const DEFAULT_RELEASE_MIN_MS: f64 = 0.0;
const DEFAULT_RELEASE_MAX_MS: f64 = 100.0; // control randomization interval
const DEFAULT_PERSISTENCE: f64 = 0.5;
const DEFAULT_BACKOFF_FRAMES: u32 = 1;

const DEFAULT_RA_SLOT_COUNT: u32 = 80;
const DEFAULT_FRAME_DURATION_MS: u32 = 10;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("allocation channel {channel}: frame plan has no random access slots")]
    NoRandomAccessSlots { channel: u32 },

    #[error("allocation channel {channel}: min slot {min} > max slot {max}")]
    MinSlotAboveMaxSlot { channel: u32, min: u32, max: u32 },

    #[error("allocation channel {channel}: number of instances {instances} outside [1, 3]")]
    InstancesOutOfRange { channel: u32, instances: u32 },

    #[error("allocation channel {channel}: slot span {span} < number of instances {instances}")]
    SlotRangeTooNarrow {
        channel: u32,
        span: u32,
        instances: u32,
    },

    #[error("allocation channel {channel}: backoff probability {probability} outside [0, 1]")]
    BackoffProbabilityOutOfRange { channel: u32, probability: f64 },

    #[error("allocation channel {channel}: maximum unique payload per block must be at least 1")]
    ZeroUniquePayloadPerBlock { channel: u32 },

    #[error("allocation channel {channel}: maximum consecutive blocks accessed must be at least 1")]
    ZeroConsecutiveBlocksAccessed { channel: u32 },

    #[error("allocation channel {channel}: invalid release interval [{min}, {max}] ms")]
    InvalidReleaseInterval { channel: u32, min: f64, max: f64 },

    #[error("allocation channel {channel}: invalid persistence {persistence}")]
    PersistenceOutOfRange { channel: u32, persistence: f64 },

    #[error("allocation channel {channel} configured twice")]
    DuplicateChannel { channel: u32 },

    #[error("at most {max} allocation channels are supported")]
    TooManyChannels { max: usize },
}

/// Static parameters of one RA allocation channel, as read from the lower
/// layer service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationChannelConfig {
    pub id: u32,
    pub slotted_aloha_allowed: bool,
    pub crdsa_allowed: bool,
    pub essa_allowed: bool,

    // CRDSA
    pub min_slot: u32,
    pub max_slot: u32,
    pub num_instances: u32,
    pub max_unique_payload_per_block: u32,
    pub max_consecutive_blocks_accessed: u32,
    pub min_idle_blocks: u32,
    pub backoff_probability: f64,
    pub backoff_time_ms: u32,

    // Slotted ALOHA
    pub release_min_ms: f64,
    pub release_max_ms: f64,

    // ESSA
    pub persistence: f64,
    pub backoff_frames: u32,
}

impl Default for AllocationChannelConfig {
    fn default() -> Self {
        Self {
            id: 0,
            slotted_aloha_allowed: true,
            crdsa_allowed: true,
            essa_allowed: false,
            min_slot: DEFAULT_MIN_SLOT,
            max_slot: DEFAULT_MAX_SLOT,
            num_instances: DEFAULT_NUM_INSTANCES,
            max_unique_payload_per_block: DEFAULT_MAX_UNIQUE_PAYLOAD_PER_BLOCK,
            max_consecutive_blocks_accessed: DEFAULT_MAX_CONSECUTIVE_BLOCKS_ACCESSED,
            min_idle_blocks: DEFAULT_MIN_IDLE_BLOCKS,
            backoff_probability: DEFAULT_BACKOFF_PROBABILITY,
            backoff_time_ms: DEFAULT_BACKOFF_TIME_MS,
            release_min_ms: DEFAULT_RELEASE_MIN_MS,
            release_max_ms: DEFAULT_RELEASE_MAX_MS,
            persistence: DEFAULT_PERSISTENCE,
            backoff_frames: DEFAULT_BACKOFF_FRAMES,
        }
    }
}

/// The part of the superframe description the RA channels depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameLayout {
    pub ra_slot_count: u32,
    pub frame_duration_ms: u32,
}

impl Default for FrameLayout {
    fn default() -> Self {
        Self {
            ra_slot_count: DEFAULT_RA_SLOT_COUNT,
            frame_duration_ms: DEFAULT_FRAME_DURATION_MS,
        }
    }
}

/// Validated configuration plus the mutable CRDSA counters of one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationChannel {
    id: u32,
    slotted_aloha_allowed: bool,
    crdsa_allowed: bool,
    essa_allowed: bool,

    min_slot: u32,
    max_slot: u32,
    num_instances: u32,
    max_unique_payload_per_block: u32,
    max_consecutive_blocks_accessed: u32,
    min_idle_blocks: u32,
    backoff_probability: f64,
    backoff_time_ms: u32,
    backoff_release_time_ms: u64,
    idle_blocks_left: u32,
    consecutive_blocks_used: u32,

    release_min_ms: f64,
    release_max_ms: f64,

    persistence: f64,
    backoff_frames: u32,
    frame_duration_ms: u32,
}

impl AllocationChannel {
    /// Build a channel from its configuration, clamping the CRDSA
    /// randomization range to the RA slots available in the frame.
    pub fn new(config: &AllocationChannelConfig, layout: FrameLayout) -> Result<Self, ConfigError> {
        if layout.ra_slot_count == 0 {
            return Err(ConfigError::NoRandomAccessSlots { channel: config.id });
        }

        let last_slot = layout.ra_slot_count - 1;
        let max_slot = config.max_slot.min(last_slot);
        if max_slot != config.max_slot {
            debug!(
                channel = config.id,
                configured = config.max_slot,
                clamped = max_slot,
                "CRDSA max slot clamped to frame RA slot count"
            );
        }

        let channel = Self {
            id: config.id,
            slotted_aloha_allowed: config.slotted_aloha_allowed,
            crdsa_allowed: config.crdsa_allowed,
            essa_allowed: config.essa_allowed,
            min_slot: config.min_slot,
            max_slot,
            num_instances: config.num_instances,
            max_unique_payload_per_block: config.max_unique_payload_per_block,
            max_consecutive_blocks_accessed: config.max_consecutive_blocks_accessed,
            min_idle_blocks: config.min_idle_blocks,
            backoff_probability: config.backoff_probability,
            backoff_time_ms: config.backoff_time_ms,
            backoff_release_time_ms: 0,
            idle_blocks_left: 0,
            consecutive_blocks_used: 0,
            release_min_ms: config.release_min_ms,
            release_max_ms: config.release_max_ms,
            persistence: config.persistence,
            backoff_frames: config.backoff_frames,
            frame_duration_ms: layout.frame_duration_ms,
        };

        channel.validate()?;
        Ok(channel)
    }

    /// CRDSA variables are always checked. The Slotted ALOHA interval is
    /// checked only when the channel can be routed to Slotted ALOHA, either
    /// directly or as a single-instance channel.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.check_crdsa_variables()?;
        if self.slotted_aloha_allowed || self.num_instances < 2 {
            self.check_slotted_aloha_variables()?;
        }
        self.check_essa_variables()
    }

    pub fn check_crdsa_variables(&self) -> Result<(), ConfigError> {
        let channel = self.id;

        if self.min_slot > self.max_slot {
            return Err(ConfigError::MinSlotAboveMaxSlot {
                channel,
                min: self.min_slot,
                max: self.max_slot,
            });
        }

        if !(MIN_CRDSA_INSTANCES..=MAX_CRDSA_INSTANCES).contains(&self.num_instances) {
            return Err(ConfigError::InstancesOutOfRange {
                channel,
                instances: self.num_instances,
            });
        }

        let span = self.max_slot - self.min_slot;
        if span < self.num_instances {
            return Err(ConfigError::SlotRangeTooNarrow {
                channel,
                span,
                instances: self.num_instances,
            });
        }

        if !(0.0..=1.0).contains(&self.backoff_probability) {
            return Err(ConfigError::BackoffProbabilityOutOfRange {
                channel,
                probability: self.backoff_probability,
            });
        }

        if self.max_unique_payload_per_block < 1 {
            return Err(ConfigError::ZeroUniquePayloadPerBlock { channel });
        }

        if self.max_consecutive_blocks_accessed < 1 {
            return Err(ConfigError::ZeroConsecutiveBlocksAccessed { channel });
        }

        Ok(())
    }

    pub fn check_slotted_aloha_variables(&self) -> Result<(), ConfigError> {
        let (min, max) = (self.release_min_ms, self.release_max_ms);
        // NaN bounds fail every comparison and are rejected too.
        let valid = min >= 0.0 && max >= 0.0 && min <= max;
        if !valid {
            return Err(ConfigError::InvalidReleaseInterval {
                channel: self.id,
                min,
                max,
            });
        }
        Ok(())
    }

    /// Persistence must lie in `[0, 1]`; a channel that runs ESSA also
    /// needs it non-zero for the backoff loop to terminate.
    pub fn check_essa_variables(&self) -> Result<(), ConfigError> {
        let in_range = (0.0..=1.0).contains(&self.persistence);
        let valid = in_range && (!self.essa_allowed || self.persistence > 0.0);
        if !valid {
            return Err(ConfigError::PersistenceOutOfRange {
                channel: self.id,
                persistence: self.persistence,
            });
        }
        Ok(())
    }

    /// Replace the CRDSA randomization variables. A rejected update leaves
    /// the channel untouched.
    pub fn update_crdsa_randomization(
        &mut self,
        min_slot: u32,
        max_slot: u32,
        num_instances: u32,
        max_unique_payload_per_block: u32,
    ) -> Result<(), ConfigError> {
        let mut candidate = self.clone();
        candidate.min_slot = min_slot;
        candidate.max_slot = max_slot;
        candidate.num_instances = num_instances;
        candidate.max_unique_payload_per_block = max_unique_payload_per_block;
        // A drop to one instance can route the channel to Slotted ALOHA.
        candidate.validate()?;

        debug!(
            channel = self.id,
            min_slot,
            max_slot,
            num_instances,
            max_unique_payload_per_block,
            "CRDSA randomization updated"
        );
        *self = candidate;
        Ok(())
    }

    pub fn update_slotted_aloha_interval(
        &mut self,
        min_ms: f64,
        max_ms: f64,
    ) -> Result<(), ConfigError> {
        let mut candidate = self.clone();
        candidate.release_min_ms = min_ms;
        candidate.release_max_ms = max_ms;
        candidate.check_slotted_aloha_variables()?;

        debug!(
            channel = self.id,
            min_ms, max_ms, "Slotted ALOHA release interval updated"
        );
        *self = candidate;
        Ok(())
    }

    /// Overwrite backoff probability and time, as carried by a load
    /// control message.
    pub fn apply_backoff_parameters(
        &mut self,
        probability: f64,
        time_ms: u32,
    ) -> Result<(), ConfigError> {
        let mut candidate = self.clone();
        candidate.backoff_probability = probability;
        candidate.backoff_time_ms = time_ms;
        candidate.check_crdsa_variables()?;

        debug!(
            channel = self.id,
            probability, time_ms, "CRDSA backoff parameters updated"
        );
        *self = candidate;
        Ok(())
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn slotted_aloha_allowed(&self) -> bool {
        self.slotted_aloha_allowed
    }

    pub fn crdsa_allowed(&self) -> bool {
        self.crdsa_allowed
    }

    pub fn essa_allowed(&self) -> bool {
        self.essa_allowed
    }

    pub fn min_slot(&self) -> u32 {
        self.min_slot
    }

    pub fn max_slot(&self) -> u32 {
        self.max_slot
    }

    pub fn num_instances(&self) -> u32 {
        self.num_instances
    }

    pub fn max_unique_payload_per_block(&self) -> u32 {
        self.max_unique_payload_per_block
    }

    pub fn max_consecutive_blocks_accessed(&self) -> u32 {
        self.max_consecutive_blocks_accessed
    }

    pub fn min_idle_blocks(&self) -> u32 {
        self.min_idle_blocks
    }

    pub fn backoff_probability(&self) -> f64 {
        self.backoff_probability
    }

    pub fn backoff_time_ms(&self) -> u32 {
        self.backoff_time_ms
    }

    pub fn backoff_release_time_ms(&self) -> u64 {
        self.backoff_release_time_ms
    }

    pub fn idle_blocks_left(&self) -> u32 {
        self.idle_blocks_left
    }

    pub fn consecutive_blocks_used(&self) -> u32 {
        self.consecutive_blocks_used
    }

    pub fn release_min_ms(&self) -> f64 {
        self.release_min_ms
    }

    pub fn release_max_ms(&self) -> f64 {
        self.release_max_ms
    }

    pub fn persistence(&self) -> f64 {
        self.persistence
    }

    pub fn backoff_frames(&self) -> u32 {
        self.backoff_frames
    }

    pub fn frame_duration_ms(&self) -> u32 {
        self.frame_duration_ms
    }

    pub fn set_idle_blocks_left(&mut self, idle_blocks_left: u32) {
        self.idle_blocks_left = idle_blocks_left;
    }

    pub fn set_consecutive_blocks_used(&mut self, consecutive_blocks_used: u32) {
        self.consecutive_blocks_used = consecutive_blocks_used;
    }

    /// A channel can contend only when no idle blocks are pending.
    pub fn is_crdsa_free(&self) -> bool {
        self.idle_blocks_left == 0
    }

    pub fn has_backoff_time_passed(&self, now_ms: u64) -> bool {
        now_ms >= self.backoff_release_time_ms
    }

    pub(crate) fn set_backoff_timer(&mut self, now_ms: u64) {
        self.backoff_release_time_ms = now_ms.saturating_add(u64::from(self.backoff_time_ms));
    }
}

/// The terminal's allocation channels, kept sorted by id so that
/// all-channel updates run in a stable order.
#[derive(Debug, Clone, Default)]
pub struct ChannelSet {
    channels: Vec<AllocationChannel, MAX_ALLOCATION_CHANNELS>,
}

impl ChannelSet {
    pub fn new() -> Self {
        Self {
            channels: Vec::new(),
        }
    }

    pub fn from_configs(
        configs: &[AllocationChannelConfig],
        layout: FrameLayout,
    ) -> Result<Self, ConfigError> {
        let mut set = Self::new();
        for config in configs {
            set.insert(AllocationChannel::new(config, layout)?)?;
        }
        Ok(set)
    }

    pub fn insert(&mut self, channel: AllocationChannel) -> Result<(), ConfigError> {
        if self.get(channel.id()).is_some() {
            return Err(ConfigError::DuplicateChannel {
                channel: channel.id(),
            });
        }

        self.channels
            .push(channel)
            .map_err(|_| ConfigError::TooManyChannels {
                max: MAX_ALLOCATION_CHANNELS,
            })?;
        self.channels.sort_by_key(AllocationChannel::id);
        Ok(())
    }

    pub fn get(&self, id: u32) -> Option<&AllocationChannel> {
        self.channels.iter().find(|c| c.id == id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut AllocationChannel> {
        self.channels.iter_mut().find(|c| c.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AllocationChannel> {
        self.channels.iter()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Bookkeeping for a block in which the terminal did not contend:
    /// every channel loses one idle block (floor 0) and its consecutive
    /// block count restarts.
    pub fn release_block(&mut self) {
        for channel in self.channels.iter_mut() {
            channel.idle_blocks_left = channel.idle_blocks_left.saturating_sub(1);
            channel.consecutive_blocks_used = 0;
        }
    }

    pub fn reset_consecutive_blocks_used(&mut self) {
        for channel in self.channels.iter_mut() {
            channel.consecutive_blocks_used = 0;
        }
    }

    pub fn increase_consecutive_blocks_used(&mut self) {
        for channel in self.channels.iter_mut() {
            channel.consecutive_blocks_used = channel.consecutive_blocks_used.saturating_add(1);
        }
    }

    /// Force idle blocks on the first channel, in id order, that has used up
    /// its consecutive block budget, then restart every channel's count.
    /// Returns the number of channels forced idle (0 or 1).
    pub fn enforce_idle_blocks(&mut self) -> u32 {
        let Some(channel) = self
            .channels
            .iter_mut()
            .find(|c| c.consecutive_blocks_used >= c.max_consecutive_blocks_accessed)
        else {
            return 0;
        };

        channel.idle_blocks_left = channel.min_idle_blocks;
        debug!(
            channel = channel.id,
            idle_blocks = channel.min_idle_blocks,
            "consecutive block limit reached, forcing idle blocks"
        );
        self.reset_consecutive_blocks_used();
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(ra_slot_count: u32) -> FrameLayout {
        FrameLayout {
            ra_slot_count,
            frame_duration_ms: 10,
        }
    }

    fn with_id(id: u32) -> AllocationChannelConfig {
        AllocationChannelConfig {
            id,
            ..Default::default()
        }
    }

    #[test]
    fn test_max_slot_clamped_to_frame() {
        let config = AllocationChannelConfig {
            max_slot: 200,
            ..Default::default()
        };
        let channel = AllocationChannel::new(&config, layout(40)).unwrap();
        assert_eq!(channel.max_slot(), 39);
        assert_eq!(channel.idle_blocks_left(), 0);
        assert_eq!(channel.backoff_release_time_ms(), 0);
    }

    #[test]
    fn test_frame_without_ra_slots_rejected() {
        let config = AllocationChannelConfig::default();
        assert_eq!(
            AllocationChannel::new(&config, layout(0)),
            Err(ConfigError::NoRandomAccessSlots { channel: 0 })
        );
    }

    #[test]
    fn test_crdsa_sanity_checks() {
        let cases = [
            (
                AllocationChannelConfig {
                    min_slot: 10,
                    max_slot: 5,
                    ..Default::default()
                },
                ConfigError::MinSlotAboveMaxSlot {
                    channel: 0,
                    min: 10,
                    max: 5,
                },
            ),
            (
                AllocationChannelConfig {
                    num_instances: 4,
                    ..Default::default()
                },
                ConfigError::InstancesOutOfRange {
                    channel: 0,
                    instances: 4,
                },
            ),
            (
                AllocationChannelConfig {
                    num_instances: 0,
                    ..Default::default()
                },
                ConfigError::InstancesOutOfRange {
                    channel: 0,
                    instances: 0,
                },
            ),
            (
                AllocationChannelConfig {
                    min_slot: 0,
                    max_slot: 2,
                    num_instances: 3,
                    ..Default::default()
                },
                ConfigError::SlotRangeTooNarrow {
                    channel: 0,
                    span: 2,
                    instances: 3,
                },
            ),
            (
                AllocationChannelConfig {
                    backoff_probability: 1.5,
                    ..Default::default()
                },
                ConfigError::BackoffProbabilityOutOfRange {
                    channel: 0,
                    probability: 1.5,
                },
            ),
            (
                AllocationChannelConfig {
                    max_unique_payload_per_block: 0,
                    ..Default::default()
                },
                ConfigError::ZeroUniquePayloadPerBlock { channel: 0 },
            ),
            (
                AllocationChannelConfig {
                    max_consecutive_blocks_accessed: 0,
                    ..Default::default()
                },
                ConfigError::ZeroConsecutiveBlocksAccessed { channel: 0 },
            ),
        ];

        for (config, expected) in cases {
            assert_eq!(AllocationChannel::new(&config, layout(80)), Err(expected));
        }
    }

    #[test]
    fn test_slot_span_equal_to_instances_accepted() {
        let config = AllocationChannelConfig {
            min_slot: 0,
            max_slot: 3,
            num_instances: 3,
            ..Default::default()
        };
        let channel = AllocationChannel::new(&config, layout(80)).unwrap();
        assert_eq!(channel.max_slot() - channel.min_slot(), channel.num_instances());

        let shifted = AllocationChannelConfig {
            min_slot: 5,
            max_slot: 7,
            num_instances: 2,
            ..Default::default()
        };
        assert!(AllocationChannel::new(&shifted, layout(80)).is_ok());
    }

    #[test]
    fn test_slotted_aloha_interval_checked_when_routable() {
        let inverted = AllocationChannelConfig {
            release_min_ms: 50.0,
            release_max_ms: 10.0,
            ..Default::default()
        };
        assert!(matches!(
            AllocationChannel::new(&inverted, layout(80)),
            Err(ConfigError::InvalidReleaseInterval { .. })
        ));

        // Single-instance channels fall back to Slotted ALOHA.
        let single_instance = AllocationChannelConfig {
            slotted_aloha_allowed: false,
            num_instances: 1,
            ..inverted.clone()
        };
        assert!(matches!(
            AllocationChannel::new(&single_instance, layout(80)),
            Err(ConfigError::InvalidReleaseInterval { .. })
        ));

        let crdsa_only = AllocationChannelConfig {
            slotted_aloha_allowed: false,
            ..inverted
        };
        assert!(AllocationChannel::new(&crdsa_only, layout(80)).is_ok());
    }

    #[test]
    fn test_persistence_checks() {
        let crdsa_only = AllocationChannelConfig {
            essa_allowed: false,
            persistence: 0.0,
            ..Default::default()
        };
        let channel = AllocationChannel::new(&crdsa_only, FrameLayout::default()).unwrap();
        assert_eq!(channel.persistence(), 0.0);

        let essa = AllocationChannelConfig {
            essa_allowed: true,
            ..crdsa_only.clone()
        };
        assert_eq!(
            AllocationChannel::new(&essa, layout(80)),
            Err(ConfigError::PersistenceOutOfRange {
                channel: 0,
                persistence: 0.0,
            })
        );

        let above_one = AllocationChannelConfig {
            persistence: 1.5,
            ..crdsa_only
        };
        assert!(matches!(
            AllocationChannel::new(&above_one, layout(80)),
            Err(ConfigError::PersistenceOutOfRange { .. })
        ));
    }

    #[test]
    fn test_rejected_update_leaves_channel_unchanged() {
        let config = AllocationChannelConfig::default();
        let mut channel = AllocationChannel::new(&config, layout(80)).unwrap();
        let before = channel.clone();

        assert!(channel.update_crdsa_randomization(0, 1, 3, 1).is_err());
        assert!(channel.apply_backoff_parameters(-0.1, 100).is_err());
        assert!(channel.update_slotted_aloha_interval(5.0, 1.0).is_err());
        assert_eq!(channel, before);

        channel.apply_backoff_parameters(0.75, 500).unwrap();
        assert_eq!(channel.backoff_probability(), 0.75);
        assert_eq!(channel.backoff_time_ms(), 500);
    }

    #[test]
    fn test_single_instance_update_rechecks_release_interval() {
        let config = AllocationChannelConfig {
            slotted_aloha_allowed: false,
            release_min_ms: 30.0,
            release_max_ms: 20.0,
            ..Default::default()
        };
        let mut channel = AllocationChannel::new(&config, layout(80)).unwrap();

        assert!(matches!(
            channel.update_crdsa_randomization(0, 9, 1, 1),
            Err(ConfigError::InvalidReleaseInterval { .. })
        ));
        assert_eq!(channel.num_instances(), 3);

        channel.update_crdsa_randomization(0, 9, 2, 1).unwrap();
        assert_eq!(channel.num_instances(), 2);
    }

    #[test]
    fn test_channel_set_sorted_and_bounded() {
        let mut set = ChannelSet::new();
        assert!(set.is_empty());

        for id in [3, 1, 2, 0] {
            set.insert(AllocationChannel::new(&with_id(id), layout(80)).unwrap())
                .unwrap();
        }
        assert!(!set.is_empty());
        assert_eq!(set.len(), MAX_ALLOCATION_CHANNELS);
        let ids: std::vec::Vec<u32> = set.iter().map(AllocationChannel::id).collect();
        assert_eq!(ids, [0, 1, 2, 3]);

        let extra = AllocationChannel::new(&with_id(9), layout(80)).unwrap();
        assert_eq!(
            set.insert(extra),
            Err(ConfigError::TooManyChannels {
                max: MAX_ALLOCATION_CHANNELS
            })
        );

        let duplicate = AllocationChannel::new(&with_id(2), layout(80)).unwrap();
        assert_eq!(
            set.insert(duplicate),
            Err(ConfigError::DuplicateChannel { channel: 2 })
        );
    }

    #[test]
    fn test_release_block_floors_idle_blocks() {
        let mut set = ChannelSet::from_configs(&[with_id(0), with_id(1)], layout(80)).unwrap();
        set.get_mut(0).unwrap().set_idle_blocks_left(1);
        set.get_mut(1).unwrap().set_consecutive_blocks_used(4);

        set.release_block();
        set.release_block();

        assert_eq!(set.get(0).unwrap().idle_blocks_left(), 0);
        assert_eq!(set.get(1).unwrap().idle_blocks_left(), 0);
        assert_eq!(set.get(1).unwrap().consecutive_blocks_used(), 0);
    }

    #[test]
    fn test_enforce_idle_blocks_forces_first_exhausted_channel() {
        let configs = [
            AllocationChannelConfig {
                max_consecutive_blocks_accessed: 4,
                ..with_id(0)
            },
            AllocationChannelConfig {
                max_consecutive_blocks_accessed: 2,
                min_idle_blocks: 5,
                ..with_id(1)
            },
            AllocationChannelConfig {
                max_consecutive_blocks_accessed: 2,
                min_idle_blocks: 7,
                ..with_id(2)
            },
        ];
        let mut set = ChannelSet::from_configs(&configs, layout(80)).unwrap();

        set.increase_consecutive_blocks_used();
        assert_eq!(set.enforce_idle_blocks(), 0);

        set.increase_consecutive_blocks_used();
        assert_eq!(set.enforce_idle_blocks(), 1);

        assert_eq!(set.get(0).unwrap().idle_blocks_left(), 0);
        assert_eq!(set.get(1).unwrap().idle_blocks_left(), 5);
        assert_eq!(set.get(2).unwrap().idle_blocks_left(), 0);
        assert!(set.iter().all(|c| c.consecutive_blocks_used() == 0));
    }
}
