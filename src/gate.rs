//! Stability gate
//!
//! Turns the per-frame candidate stream into a published state. A changed
//! candidate needs enough confidence to enter the buffer, and the published
//! state only moves once the whole buffer agrees on a different state.

use crate::config::{PipelineConfig, DEFAULT_ACCEPTANCE_THRESHOLD, DEFAULT_STABILITY_BUFFER_SIZE};
use crate::types::LearningState;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info};

/// A change of the published state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: LearningState,
    pub to: LearningState,
}

/// Gate result for one candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateDecision {
    /// Whether the candidate entered the stability buffer
    pub accepted: bool,
    /// Published state after this candidate
    pub published: LearningState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition: Option<StateTransition>,
}

#[derive(Debug, Clone)]
pub struct StabilityGate {
    capacity: usize,
    acceptance_threshold: f64,
    buffer: VecDeque<LearningState>,
    last_accepted: Option<LearningState>,
    published: LearningState,
}

impl Default for StabilityGate {
    fn default() -> Self {
        Self::new(DEFAULT_STABILITY_BUFFER_SIZE, DEFAULT_ACCEPTANCE_THRESHOLD)
    }
}

impl StabilityGate {
    /// `capacity` is clamped to at least one slot
    pub fn new(capacity: usize, acceptance_threshold: f64) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            acceptance_threshold,
            buffer: VecDeque::with_capacity(capacity),
            last_accepted: None,
            published: LearningState::default(),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.stability_buffer_size, config.acceptance_threshold)
    }

    /// Offer one classified candidate
    pub fn offer(&mut self, candidate: LearningState, confidence: f64) -> GateDecision {
        let accepted =
            confidence > self.acceptance_threshold || self.last_accepted == Some(candidate);

        if !accepted {
            debug!(
                candidate = %candidate,
                confidence,
                "candidate rejected by stability gate"
            );
            return GateDecision {
                accepted: false,
                published: self.published,
                transition: None,
            };
        }

        self.last_accepted = Some(candidate);
        self.buffer.push_back(candidate);
        while self.buffer.len() > self.capacity {
            self.buffer.pop_front();
        }

        let transition = if self.is_unanimous(candidate) && candidate != self.published {
            let transition = StateTransition {
                from: self.published,
                to: candidate,
            };
            info!(from = %transition.from, to = %transition.to, "published state changed");
            self.published = candidate;
            Some(transition)
        } else {
            None
        };

        GateDecision {
            accepted: true,
            published: self.published,
            transition,
        }
    }

    fn is_unanimous(&self, candidate: LearningState) -> bool {
        self.buffer.len() == self.capacity && self.buffer.iter().all(|&s| s == candidate)
    }

    pub fn published(&self) -> LearningState {
        self.published
    }

    pub fn buffer(&self) -> &VecDeque<LearningState> {
        &self.buffer
    }
}
