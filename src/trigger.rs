//! Clarification trigger
//!
//! Watches published transitions for the focused → confused edge and decides
//! whether the consumer should be asked to offer clarification, rate limited
//! by a cooldown.

use crate::config::{secs_to_duration, PipelineConfig, DEFAULT_COOLDOWN_SECS};
use crate::gate::StateTransition;
use crate::types::LearningState;
use chrono::{DateTime, Duration, Utc};
use serde::{Serialize, Serializer};
use tracing::{debug, info};

/// Why a transition did not fire the trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// Transition is not focused → confused
    NonMatchingTransition,
    /// Consumer is busy (e.g. the user is typing)
    ConsumerBusy,
    /// Still inside the cooldown window
    CoolingDown {
        #[serde(rename = "remaining_ms", serialize_with = "serialize_millis")]
        remaining: Duration,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TriggerDecision {
    Fired,
    Skipped(SkipReason),
}

impl TriggerDecision {
    pub fn fired(&self) -> bool {
        matches!(self, TriggerDecision::Fired)
    }
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_i64(duration.num_milliseconds())
}

#[derive(Debug, Clone)]
pub struct TransitionTrigger {
    cooldown: Duration,
    last_fired: Option<DateTime<Utc>>,
}

impl Default for TransitionTrigger {
    fn default() -> Self {
        Self::new(secs_to_duration(DEFAULT_COOLDOWN_SECS))
    }
}

impl TransitionTrigger {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_fired: None,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.cooldown())
    }

    /// Evaluate one published transition
    ///
    /// Checks run in order: transition match, consumer busy, cooldown.
    /// Only a firing updates the cooldown clock.
    pub fn evaluate(
        &mut self,
        transition: &StateTransition,
        consumer_busy: bool,
        now: DateTime<Utc>,
    ) -> TriggerDecision {
        let decision = self.decide(transition, consumer_busy, now);
        match decision {
            TriggerDecision::Fired => {
                self.last_fired = Some(now);
                info!(from = %transition.from, to = %transition.to, "clarification triggered");
            }
            TriggerDecision::Skipped(SkipReason::NonMatchingTransition) => {
                debug!(from = %transition.from, to = %transition.to, "transition does not trigger clarification");
            }
            TriggerDecision::Skipped(SkipReason::ConsumerBusy) => {
                info!("clarification skipped: consumer busy");
            }
            TriggerDecision::Skipped(SkipReason::CoolingDown { remaining }) => {
                info!(
                    remaining_ms = remaining.num_milliseconds(),
                    "clarification skipped: cooling down"
                );
            }
        }
        decision
    }

    fn decide(
        &self,
        transition: &StateTransition,
        consumer_busy: bool,
        now: DateTime<Utc>,
    ) -> TriggerDecision {
        if transition.from != LearningState::Focused || transition.to != LearningState::Confused {
            return TriggerDecision::Skipped(SkipReason::NonMatchingTransition);
        }
        if consumer_busy {
            return TriggerDecision::Skipped(SkipReason::ConsumerBusy);
        }
        if let Some(last) = self.last_fired {
            let elapsed = now - last;
            if elapsed < self.cooldown {
                return TriggerDecision::Skipped(SkipReason::CoolingDown {
                    remaining: self.cooldown - elapsed,
                });
            }
        }
        TriggerDecision::Fired
    }

    pub fn last_fired(&self) -> Option<DateTime<Utc>> {
        self.last_fired
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}
