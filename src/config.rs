use crate::channel::{AllocationChannelConfig, ChannelSet, ConfigError, FrameLayout};
use crate::load_control::{LoadControlParameters, DEFAULT_MEASUREMENT_WINDOW_FRAMES};
use crate::random_access::AccessModel;
use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

/// Network-side load control. Disabled unless configured; each channel
/// entry must spell out all of its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadControlConfig {
    pub enabled: bool,
    pub measurement_window_frames: usize,
    pub channels: Vec<LoadControlParameters>,
}

impl Default for LoadControlConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            measurement_window_frames: DEFAULT_MEASUREMENT_WINDOW_FRAMES,
            channels: Vec::new(),
        }
    }
}

/// Complete random access setup for a beam and its terminals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomAccessConfig {
    pub model: AccessModel,
    pub frame: FrameLayout,
    pub channels: Vec<AllocationChannelConfig>,
    pub load_control: LoadControlConfig,
}

impl Default for RandomAccessConfig {
    fn default() -> Self {
        Self {
            model: AccessModel::Rcs2Specification,
            frame: FrameLayout::default(),
            channels: alloc::vec![AllocationChannelConfig::default()],
            load_control: LoadControlConfig::default(),
        }
    }
}

impl RandomAccessConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<alloc::string::String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Validate every channel against the frame layout.
    pub fn build_channels(&self) -> Result<ChannelSet, ConfigError> {
        ChannelSet::from_configs(&self.channels, self.frame)
    }
}
