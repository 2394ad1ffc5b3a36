//! Confidence scoring
//!
//! Confidence fuses three terms: how clearly one expression dominates, how
//! pronounced the facial geometry behind the chosen state is, and how stable
//! the smoothed metrics have been over the last few frames.

use crate::config::{ConfidenceWeights, PipelineConfig, DEFAULT_CONFIDENCE_FLOOR};
use crate::types::{ExpressionVector, LearningState, Metric, MetricSet};
use std::collections::VecDeque;

/// Number of recent smoothed sets the stability term looks at
pub const STABILITY_WINDOW: usize = 3;

/// Stability reported before the window has filled
const UNKNOWN_STABILITY: f64 = 0.5;

/// Lower bound of the stability term
const MIN_STABILITY: f64 = 0.3;

#[derive(Debug, Clone)]
pub struct ConfidenceScorer {
    weights: ConfidenceWeights,
    floor: f64,
}

impl Default for ConfidenceScorer {
    fn default() -> Self {
        Self::new(ConfidenceWeights::default(), DEFAULT_CONFIDENCE_FLOOR)
    }
}

impl ConfidenceScorer {
    pub fn new(weights: ConfidenceWeights, floor: f64) -> Self {
        Self { weights, floor }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.confidence_weights, config.confidence_floor)
    }

    pub fn floor(&self) -> f64 {
        self.floor
    }

    /// Confidence for a landmark-backed candidate
    ///
    /// Formula:
    /// ```text
    /// w_e * expression_clarity + w_g * geometric_clarity + w_s * stability
    /// ```
    /// clamped to `[floor, 1]`.
    pub fn score(
        &self,
        expressions: &ExpressionVector,
        metrics: &MetricSet,
        state: LearningState,
        recent: &VecDeque<MetricSet>,
    ) -> f64 {
        let raw = self.weights.expression * expressions.clarity()
            + self.weights.geometry * geometric_clarity(state, metrics)
            + self.weights.stability * temporal_stability(recent);
        self.clamp(raw)
    }

    /// Confidence for a candidate classified from expressions alone
    ///
    /// Formula: `0.7 * state_score + 0.3 * clarity`, clamped to `[floor, 1]`.
    pub fn score_expressions_only(&self, expressions: &ExpressionVector, state: LearningState) -> f64 {
        let raw = 0.7 * expression_state_score(expressions, state) + 0.3 * expressions.clarity();
        self.clamp(raw)
    }

    fn clamp(&self, raw: f64) -> f64 {
        if raw.is_nan() {
            return self.floor;
        }
        raw.clamp(self.floor, 1.0)
    }
}

/// How pronounced the geometry behind `state` is
pub fn geometric_clarity(state: LearningState, m: &MetricSet) -> f64 {
    match state {
        LearningState::Confused => (m.eyebrow_raise + m.brow_furrow) / 2.0,
        LearningState::Tired => 1.0 - m.eye_openness,
        LearningState::Bored => ((1.0 - m.smile_width) + (1.0 - m.eye_openness)) / 2.0,
        LearningState::Focused => (m.eye_openness + m.smile_width) / 2.0,
    }
}

/// Temporal stability of the most recent smoothed sets
///
/// `0.5` until [`STABILITY_WINDOW`] sets exist; afterwards
/// `max(0.3, 1 - mean_variance)` where `mean_variance` is the population
/// variance of each metric over the window, averaged across metrics.
pub fn temporal_stability(recent: &VecDeque<MetricSet>) -> f64 {
    if recent.len() < STABILITY_WINDOW {
        return UNKNOWN_STABILITY;
    }

    let window: Vec<&MetricSet> = recent.iter().skip(recent.len() - STABILITY_WINDOW).collect();
    let n = window.len() as f64;

    let total_variance: f64 = Metric::ALL
        .iter()
        .map(|&metric| {
            let mean = window.iter().map(|m| m.get(metric)).sum::<f64>() / n;
            window
                .iter()
                .map(|m| (m.get(metric) - mean).powi(2))
                .sum::<f64>()
                / n
        })
        .sum();
    let mean_variance = total_variance / Metric::ALL.len() as f64;

    (1.0 - mean_variance).max(MIN_STABILITY)
}

fn expression_state_score(e: &ExpressionVector, state: LearningState) -> f64 {
    match state {
        LearningState::Confused => e.surprised.max(e.fearful),
        LearningState::Bored => {
            let blank = if e.neutral > 0.75 { e.neutral } else { 0.0 };
            e.sad.max(e.disgusted).max(blank)
        }
        LearningState::Tired => 0.5 * e.neutral + 0.3 * e.sad + 0.2 * e.angry,
        LearningState::Focused => {
            let calm = if (0.35..=0.65).contains(&e.neutral) {
                0.6
            } else {
                0.5 * e.neutral
            };
            e.happy.max(calm)
        }
    }
}
