#![allow(dead_code)]

use satra::engines::AccessConditions;
use satra::{AllocationChannelConfig, ChannelSet, FrameLayout, RandomSource};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Draw {
    Uniform(f64),
    UniformInt { min: u32, max: u32, value: u32 },
}

/// Replays fixed draws and records every call in order.
#[derive(Debug, Default)]
pub struct ScriptedRandom {
    uniforms: VecDeque<f64>,
    integers: VecDeque<u32>,
    pub log: Vec<Draw>,
}

impl ScriptedRandom {
    pub fn new(uniforms: &[f64], integers: &[u32]) -> Self {
        Self {
            uniforms: uniforms.iter().copied().collect(),
            integers: integers.iter().copied().collect(),
            log: Vec::new(),
        }
    }

    pub fn uniforms_left(&self) -> usize {
        self.uniforms.len()
    }

    pub fn integers_left(&self) -> usize {
        self.integers.len()
    }
}

impl RandomSource for ScriptedRandom {
    fn uniform(&mut self) -> f64 {
        let value = self.uniforms.pop_front().expect("uniform script exhausted");
        self.log.push(Draw::Uniform(value));
        value
    }

    fn uniform_int(&mut self, min: u32, max: u32) -> u32 {
        let value = self.integers.pop_front().expect("integer script exhausted");
        assert!(
            (min..=max).contains(&value),
            "scripted integer {} outside [{}, {}]",
            value,
            min,
            max
        );
        self.log.push(Draw::UniformInt { min, max, value });
        value
    }
}

/// Oracle backed by a packet counter, drained by scheduled packets.
#[derive(Debug, Default, Clone)]
pub struct QueueConditions {
    pub queued: u32,
    pub dama_available: bool,
    pub notifications: u32,
}

impl QueueConditions {
    pub fn with_packets(queued: u32) -> Self {
        Self {
            queued,
            ..Default::default()
        }
    }
}

impl AccessConditions for QueueConditions {
    fn is_dama_available(&self) -> bool {
        self.dama_available
    }

    fn are_buffers_empty(&self) -> bool {
        self.queued == 0
    }

    fn on_packet_scheduled(&mut self) {
        self.notifications += 1;
        self.queued = self.queued.saturating_sub(1);
    }
}

pub fn layout(ra_slot_count: u32) -> FrameLayout {
    FrameLayout {
        ra_slot_count,
        frame_duration_ms: 10,
    }
}

/// Channel of the basic CRDSA scenario: slots 0..=9, two replicas, one
/// packet per block, no backoff.
pub fn basic_crdsa_config(id: u32) -> AllocationChannelConfig {
    AllocationChannelConfig {
        id,
        min_slot: 0,
        max_slot: 9,
        num_instances: 2,
        max_unique_payload_per_block: 1,
        backoff_probability: 0.0,
        ..Default::default()
    }
}

pub fn channel_set(configs: &[AllocationChannelConfig]) -> ChannelSet {
    ChannelSet::from_configs(configs, layout(10)).expect("valid test channels")
}
