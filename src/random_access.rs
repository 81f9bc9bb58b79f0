use crate::channel::{AllocationChannel, ChannelSet, ConfigError};
use crate::config::RandomAccessConfig;
use crate::engines::{AccessConditions, CrdsaEngine, EssaEngine, SlottedAlohaEngine, TxOpportunity};
use crate::load_control::LoadControlMessage;
use crate::rng::{RandomSource, SeededRandom};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, trace};

/// Random access model configured for the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessModel {
    Off,
    SlottedAloha,
    Crdsa,
    Marsala,
    Essa,
    /// Slotted ALOHA on channels with a single instance, CRDSA otherwise.
    Rcs2Specification,
}

/// What prompted the evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerKind {
    SlottedAloha,
    Crdsa,
    Essa,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RandomAccessError {
    #[error("allocation channel {0} is not configured")]
    UnknownChannel(u32),

    #[error("{model:?} access, {trigger:?} trigger not allowed on allocation channel {channel}")]
    NotAllowed {
        model: AccessModel,
        trigger: TriggerKind,
        channel: u32,
    },

    #[error("rejected parameters: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct RandomAccessStats {
    pub evaluations: u32,
    pub crdsa_evaluations: u32,
    pub slotted_aloha_evaluations: u32,
    pub essa_evaluations: u32,
    pub disabled_no_ops: u32,
    pub load_control_messages_applied: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Crdsa,
    SlottedAloha,
    Essa,
    Disabled,
}

/// Terminal-side random access: routes each evaluation to one engine and
/// owns every piece of state those engines mutate.
#[derive(Debug)]
pub struct RandomAccess<R = SeededRandom> {
    model: AccessModel,
    channels: ChannelSet,
    crdsa: CrdsaEngine,
    slotted_aloha: SlottedAlohaEngine,
    essa: EssaEngine,
    rng: R,
    stats: RandomAccessStats,
}

impl<R: RandomSource> RandomAccess<R> {
    pub fn new(model: AccessModel, channels: ChannelSet, rng: R) -> Self {
        debug!(?model, channels = channels.len(), "random access created");
        Self {
            model,
            channels,
            crdsa: CrdsaEngine::new(),
            slotted_aloha: SlottedAlohaEngine::new(),
            essa: EssaEngine::new(),
            rng,
            stats: RandomAccessStats::default(),
        }
    }

    pub fn from_config(config: &RandomAccessConfig, rng: R) -> Result<Self, ConfigError> {
        let channels = config.build_channels()?;
        Ok(Self::new(config.model, channels, rng))
    }

    /// Evaluate one access opportunity ("block") on `channel_id`.
    pub fn evaluate<C>(
        &mut self,
        channel_id: u32,
        trigger: TriggerKind,
        now_ms: u64,
        conditions: &mut C,
    ) -> Result<TxOpportunity, RandomAccessError>
    where
        C: AccessConditions + ?Sized,
    {
        self.stats.evaluations = self.stats.evaluations.saturating_add(1);

        match self.route(channel_id, trigger)? {
            Route::Crdsa => {
                self.stats.crdsa_evaluations = self.stats.crdsa_evaluations.saturating_add(1);
                self.crdsa
                    .evaluate(&mut self.channels, channel_id, now_ms, conditions, &mut self.rng)
            }
            Route::SlottedAloha => {
                self.stats.slotted_aloha_evaluations =
                    self.stats.slotted_aloha_evaluations.saturating_add(1);
                let channel = self
                    .channels
                    .get(channel_id)
                    .ok_or(RandomAccessError::UnknownChannel(channel_id))?;
                Ok(self.slotted_aloha.evaluate(channel, &*conditions, &mut self.rng))
            }
            Route::Essa => {
                self.stats.essa_evaluations = self.stats.essa_evaluations.saturating_add(1);
                let channel = self
                    .channels
                    .get(channel_id)
                    .ok_or(RandomAccessError::UnknownChannel(channel_id))?;
                Ok(self.essa.evaluate(channel, &mut self.rng))
            }
            Route::Disabled => {
                trace!(
                    model = ?self.model,
                    ?trigger,
                    channel = channel_id,
                    "model disabled for trigger"
                );
                self.stats.disabled_no_ops = self.stats.disabled_no_ops.saturating_add(1);
                Ok(TxOpportunity::DoNothing)
            }
        }
    }

    fn route(&self, channel_id: u32, trigger: TriggerKind) -> Result<Route, RandomAccessError> {
        let channel = self
            .channels
            .get(channel_id)
            .ok_or(RandomAccessError::UnknownChannel(channel_id))?;

        let route = match (self.model, trigger) {
            (AccessModel::Crdsa | AccessModel::Marsala, TriggerKind::Crdsa) => {
                self.require(channel.crdsa_allowed(), trigger, channel, Route::Crdsa)?
            }
            (AccessModel::Essa, TriggerKind::Essa) => {
                self.require(channel.essa_allowed(), trigger, channel, Route::Essa)?
            }
            (AccessModel::SlottedAloha, TriggerKind::SlottedAloha) => {
                let allowed = channel.slotted_aloha_allowed();
                self.require(allowed, trigger, channel, Route::SlottedAloha)?
            }
            (AccessModel::Rcs2Specification, _) => {
                if channel.num_instances() < 2 {
                    if trigger == TriggerKind::SlottedAloha {
                        Route::SlottedAloha
                    } else {
                        Route::Disabled
                    }
                } else if trigger == TriggerKind::Crdsa {
                    self.require(channel.crdsa_allowed(), trigger, channel, Route::Crdsa)?
                } else {
                    Route::Disabled
                }
            }
            _ => Route::Disabled,
        };

        Ok(route)
    }

    fn require(
        &self,
        allowed: bool,
        trigger: TriggerKind,
        channel: &AllocationChannel,
        route: Route,
    ) -> Result<Route, RandomAccessError> {
        if allowed {
            Ok(route)
        } else {
            Err(RandomAccessError::NotAllowed {
                model: self.model,
                trigger,
                channel: channel.id(),
            })
        }
    }

    /// Apply backoff parameters received from the network. An invalid
    /// parameter set is rejected and the channel keeps its previous values.
    pub fn apply_load_control(
        &mut self,
        message: &LoadControlMessage,
    ) -> Result<(), RandomAccessError> {
        let channel = self
            .channels
            .get_mut(message.channel_id)
            .ok_or(RandomAccessError::UnknownChannel(message.channel_id))?;

        channel.apply_backoff_parameters(message.backoff_probability, message.backoff_time_ms)?;
        self.stats.load_control_messages_applied =
            self.stats.load_control_messages_applied.saturating_add(1);

        info!(
            beam = message.beam_id,
            channel = message.channel_id,
            backoff_probability = message.backoff_probability,
            backoff_time_ms = message.backoff_time_ms,
            "load control message applied"
        );
        Ok(())
    }

    pub fn update_crdsa_randomization(
        &mut self,
        channel_id: u32,
        min_slot: u32,
        max_slot: u32,
        num_instances: u32,
        max_unique_payload_per_block: u32,
    ) -> Result<(), RandomAccessError> {
        self.channels
            .get_mut(channel_id)
            .ok_or(RandomAccessError::UnknownChannel(channel_id))?
            .update_crdsa_randomization(
                min_slot,
                max_slot,
                num_instances,
                max_unique_payload_per_block,
            )?;
        Ok(())
    }

    pub fn update_slotted_aloha_interval(
        &mut self,
        channel_id: u32,
        min_ms: f64,
        max_ms: f64,
    ) -> Result<(), RandomAccessError> {
        self.channels
            .get_mut(channel_id)
            .ok_or(RandomAccessError::UnknownChannel(channel_id))?
            .update_slotted_aloha_interval(min_ms, max_ms)?;
        Ok(())
    }

    /// The trigger this terminal's model contends with on `channel_id`.
    pub fn default_trigger(&self, channel_id: u32) -> Option<TriggerKind> {
        let channel = self.channels.get(channel_id)?;
        match self.model {
            AccessModel::Off => None,
            AccessModel::SlottedAloha => Some(TriggerKind::SlottedAloha),
            AccessModel::Crdsa | AccessModel::Marsala => Some(TriggerKind::Crdsa),
            AccessModel::Essa => Some(TriggerKind::Essa),
            AccessModel::Rcs2Specification if channel.num_instances() < 2 => {
                Some(TriggerKind::SlottedAloha)
            }
            AccessModel::Rcs2Specification => Some(TriggerKind::Crdsa),
        }
    }

    pub fn model(&self) -> AccessModel {
        self.model
    }

    pub fn set_model(&mut self, model: AccessModel) {
        debug!(old = ?self.model, new = ?model, "random access model changed");
        self.model = model;
    }

    pub fn channels(&self) -> &ChannelSet {
        &self.channels
    }

    pub fn channels_mut(&mut self) -> &mut ChannelSet {
        &mut self.channels
    }

    pub fn crdsa(&self) -> &CrdsaEngine {
        &self.crdsa
    }

    pub fn crdsa_mut(&mut self) -> &mut CrdsaEngine {
        &mut self.crdsa
    }

    pub fn slotted_aloha(&self) -> &SlottedAlohaEngine {
        &self.slotted_aloha
    }

    pub fn essa(&self) -> &EssaEngine {
        &self.essa
    }

    pub fn get_stats(&self) -> &RandomAccessStats {
        &self.stats
    }
}
