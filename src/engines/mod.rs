pub mod crdsa;
pub mod essa;
pub mod slotted_aloha;

pub use crdsa::{CrdsaEngine, CrdsaStats};
pub use essa::{EssaEngine, EssaStats};
pub use slotted_aloha::{SlottedAlohaEngine, SlottedAlohaStats};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// CRDSA replica slots keyed by unique packet id.
pub type ReplicaMap = BTreeMap<u32, BTreeSet<u32>>;

/// Decision produced by one random access evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxOpportunity {
    DoNothing,
    SlottedAloha { wait_ms: u32 },
    Essa { wait_ms: u32 },
    /// Slot sets of different packets never intersect, and each set holds
    /// exactly the channel's number of instances.
    Crdsa { replicas: ReplicaMap },
}

impl TxOpportunity {
    pub fn is_do_nothing(&self) -> bool {
        matches!(self, TxOpportunity::DoNothing)
    }

    /// Number of unique payloads this opportunity releases.
    pub fn unique_packets(&self) -> u32 {
        match self {
            TxOpportunity::DoNothing => 0,
            TxOpportunity::SlottedAloha { .. } | TxOpportunity::Essa { .. } => 1,
            TxOpportunity::Crdsa { replicas } => replicas.len() as u32,
        }
    }
}

/// Oracles supplied by the queueing and capacity-grant collaborators.
pub trait AccessConditions {
    fn is_dama_available(&self) -> bool;
    fn are_buffers_empty(&self) -> bool;

    /// Called after a CRDSA packet has been granted replica slots and
    /// before the buffers are queried again.
    fn on_packet_scheduled(&mut self) {}
}

/// Fixed oracle answers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StaticConditions {
    pub dama_available: bool,
    pub buffers_empty: bool,
}

impl StaticConditions {
    /// Data queued and no dedicated grant.
    pub fn backlogged() -> Self {
        Self {
            dama_available: false,
            buffers_empty: false,
        }
    }
}

impl AccessConditions for StaticConditions {
    fn is_dama_available(&self) -> bool {
        self.dama_available
    }

    fn are_buffers_empty(&self) -> bool {
        self.buffers_empty
    }
}
