//! # Satellite Random Access
//!
//! Contention-based random access for a satellite return link: terminals
//! transmit bursts on shared RA slots without a dedicated grant, and the
//! network tunes their backoff to the measured load.
//!
//! ## Features
//!
//! - **CRDSA**: multi-replica slot randomization with backoff timers and
//!   idle-block rate limiting
//! - **Slotted ALOHA**: single replica with a random release time
//! - **ESSA**: persistence-based backoff for asynchronous access
//! - **Dispatch** over the configured access model and trigger
//! - **Dynamic load control**: per beam and channel hysteresis that
//!   broadcasts new backoff parameters
//! - **Deterministic draws**: an injected [`RandomSource`] per terminal
//!
//! ## Quick Start
//!
//! ```rust
//! use satra::{RandomAccess, RandomAccessConfig, SeededRandom, StaticConditions, TriggerKind};
//!
//! let config = RandomAccessConfig::default();
//! let mut access = RandomAccess::from_config(&config, SeededRandom::from_seed(1)).unwrap();
//!
//! let mut conditions = StaticConditions::backlogged();
//! let opportunity = access.evaluate(0, TriggerKind::Crdsa, 0, &mut conditions).unwrap();
//! println!("{:?}", opportunity);
//! ```
//!
//! ## Architecture
//!
//! - [`channel`] - Allocation channel configuration, validation and counters
//! - [`engines`] - CRDSA, Slotted ALOHA and ESSA access engines
//! - [`random_access`] - Terminal-side dispatcher
//! - [`load_control`] - Network-side load controller and offered-load window
//! - [`config`] - Serializable configuration document
//! - [`rng`] - Random source abstraction

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]

extern crate alloc;

pub mod channel;
pub mod config;
pub mod engines;
pub mod load_control;
pub mod random_access;
pub mod rng;

// Re-export main public types for convenience
pub use channel::{
    AllocationChannel, AllocationChannelConfig, ChannelSet, ConfigError, FrameLayout,
};
pub use config::{LoadControlConfig, RandomAccessConfig};
pub use engines::{AccessConditions, StaticConditions, TxOpportunity};
pub use load_control::{
    LoadControlMessage, LoadController, LoadSample, LoadState, OfferedLoadWindow,
};
pub use random_access::{AccessModel, RandomAccess, RandomAccessError, TriggerKind};
pub use rng::{RandomSource, SeededRandom};
