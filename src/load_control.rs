//! Network-side dynamic load control for random access.
//!
//! The controller keeps one hysteresis state per (beam, allocation channel)
//! and switches the terminals' CRDSA backoff parameterization when the
//! measured average normalized offered load crosses the channel threshold.
//! Every channel needs explicit parameters; there are no built-in values.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use thiserror::Error;
use tracing::{debug, info, trace};

pub const DEFAULT_MEASUREMENT_WINDOW_FRAMES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadState {
    LowLoad,
    HighLoad,
}

/// Threshold and the two backoff parameterizations of one allocation channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadControlParameters {
    pub channel_id: u32,
    pub threshold: f64,
    pub low_load_backoff_probability: f64,
    pub low_load_backoff_time_ms: u32,
    pub high_load_backoff_probability: f64,
    pub high_load_backoff_time_ms: u32,
}

impl LoadControlParameters {
    fn validate(&self) -> Result<(), LoadControlError> {
        let channel_id = self.channel_id;
        let threshold_valid = self.threshold.is_finite() && self.threshold >= 0.0;
        if !threshold_valid {
            return Err(LoadControlError::InvalidParameters {
                channel_id,
                reason: "threshold must be finite and non-negative",
            });
        }
        if !(0.0..=1.0).contains(&self.low_load_backoff_probability) {
            return Err(LoadControlError::InvalidParameters {
                channel_id,
                reason: "low load backoff probability outside [0, 1]",
            });
        }
        if !(0.0..=1.0).contains(&self.high_load_backoff_probability) {
            return Err(LoadControlError::InvalidParameters {
                channel_id,
                reason: "high load backoff probability outside [0, 1]",
            });
        }
        Ok(())
    }
}

/// Measured load reported by the beam's return link receiver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadSample {
    pub beam_id: u32,
    pub channel_id: u32,
    pub carrier_id: u32,
    pub average_normalized_offered_load: f64,
}

/// Broadcast to every terminal of the beam sharing the channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadControlMessage {
    pub beam_id: u32,
    pub channel_id: u32,
    pub backoff_probability: f64,
    pub backoff_time_ms: u32,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LoadControlError {
    #[error(
        "load control parameters not set for beam {beam_id}, carrier {carrier_id}, \
         allocation channel {channel_id}"
    )]
    MissingParameters {
        beam_id: u32,
        carrier_id: u32,
        channel_id: u32,
    },

    #[error("allocation channel {channel_id}: {reason}")]
    InvalidParameters {
        channel_id: u32,
        reason: &'static str,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct LoadControlStats {
    pub samples_processed: u32,
    pub transitions_to_high: u32,
    pub transitions_to_low: u32,
    pub messages_sent: u32,
}

#[derive(Debug, Default)]
pub struct LoadController {
    parameters: BTreeMap<u32, LoadControlParameters>,
    states: BTreeMap<(u32, u32), LoadState>,
    stats: LoadControlStats,
}

impl LoadController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parameters<I>(parameters: I) -> Result<Self, LoadControlError>
    where
        I: IntoIterator<Item = LoadControlParameters>,
    {
        let mut controller = Self::new();
        for params in parameters {
            controller.set_channel_parameters(params)?;
        }
        Ok(controller)
    }

    pub fn set_channel_parameters(
        &mut self,
        params: LoadControlParameters,
    ) -> Result<(), LoadControlError> {
        params.validate()?;
        debug!(
            channel = params.channel_id,
            threshold = params.threshold,
            low_probability = params.low_load_backoff_probability,
            high_probability = params.high_load_backoff_probability,
            "load control parameters set"
        );
        self.parameters.insert(params.channel_id, params);
        Ok(())
    }

    pub fn channel_parameters(&self, channel_id: u32) -> Option<&LoadControlParameters> {
        self.parameters.get(&channel_id)
    }

    /// `None` until the first sample for the pair has been processed.
    pub fn state(&self, beam_id: u32, channel_id: u32) -> Option<LoadState> {
        self.states.get(&(beam_id, channel_id)).copied()
    }

    pub fn get_stats(&self) -> &LoadControlStats {
        &self.stats
    }

    /// Feed one measurement. A message is produced only when the state
    /// changes: low load switches at `load >= threshold`, high load at
    /// `load < threshold`.
    pub fn on_load_sample(
        &mut self,
        sample: &LoadSample,
    ) -> Result<Option<LoadControlMessage>, LoadControlError> {
        let params = self.parameters.get(&sample.channel_id).copied().ok_or(
            LoadControlError::MissingParameters {
                beam_id: sample.beam_id,
                carrier_id: sample.carrier_id,
                channel_id: sample.channel_id,
            },
        )?;

        self.stats.samples_processed = self.stats.samples_processed.saturating_add(1);

        let state = self
            .states
            .entry((sample.beam_id, sample.channel_id))
            .or_insert(LoadState::LowLoad);
        let load = sample.average_normalized_offered_load;

        trace!(
            beam = sample.beam_id,
            carrier = sample.carrier_id,
            channel = sample.channel_id,
            load,
            ?state,
            "measured average normalized offered load"
        );

        let (next_state, backoff_probability, backoff_time_ms) = match *state {
            LoadState::LowLoad if load >= params.threshold => (
                LoadState::HighLoad,
                params.high_load_backoff_probability,
                params.high_load_backoff_time_ms,
            ),
            LoadState::HighLoad if load < params.threshold => (
                LoadState::LowLoad,
                params.low_load_backoff_probability,
                params.low_load_backoff_time_ms,
            ),
            _ => return Ok(None),
        };

        *state = next_state;
        match next_state {
            LoadState::HighLoad => {
                self.stats.transitions_to_high = self.stats.transitions_to_high.saturating_add(1);
            }
            LoadState::LowLoad => {
                self.stats.transitions_to_low = self.stats.transitions_to_low.saturating_add(1);
            }
        }
        self.stats.messages_sent = self.stats.messages_sent.saturating_add(1);

        info!(
            beam = sample.beam_id,
            carrier = sample.carrier_id,
            channel = sample.channel_id,
            load,
            ?next_state,
            backoff_probability,
            backoff_time_ms,
            "switching random access backoff parameterization"
        );

        Ok(Some(LoadControlMessage {
            beam_id: sample.beam_id,
            channel_id: sample.channel_id,
            backoff_probability,
            backoff_time_ms,
        }))
    }
}

/// Sliding window over per-frame normalized offered load.
#[derive(Debug, Clone)]
pub struct OfferedLoadWindow {
    window_size: usize,
    samples: VecDeque<f64>,
}

impl OfferedLoadWindow {
    /// A window of zero frames is treated as one frame.
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(1);
        Self {
            window_size,
            samples: VecDeque::with_capacity(window_size),
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Record the unique packets offered in one frame against the RA slots
    /// of that frame. Returns the window average once the window is full.
    pub fn record_frame(&mut self, offered_packets: u32, ra_slots: u32) -> Option<f64> {
        let normalized = if ra_slots == 0 {
            0.0
        } else {
            f64::from(offered_packets) / f64::from(ra_slots)
        };

        self.samples.push_back(normalized);
        if self.samples.len() > self.window_size {
            self.samples.pop_front();
        }

        if self.samples.len() == self.window_size {
            Some(self.samples.iter().sum::<f64>() / self.window_size as f64)
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}
