//! Learning-state classification
//!
//! Fuses smoothed landmark metrics with the expression vector into one of the
//! four learning states. Each state has a weighted composite score compared
//! against a tunable threshold, plus fallback triggers on single metrics.
//!
//! Evaluation order is the priority among states: confusion first, then
//! fatigue, then boredom; focused is the default when nothing fires.

use crate::config::{secs_to_duration, BoredomStrategy, ClassifierThresholds, PipelineConfig};
use crate::types::{Emotion, ExpressionVector, LearningState, MetricSet};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Expression probability counted as "present" by the expression-only rules
const SIGNIFICANT_EMOTION: f64 = 0.12;

/// Composite scores computed for one frame
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StateScores {
    pub confusion: f64,
    pub fatigue: f64,
    pub boredom: f64,
}

impl StateScores {
    pub fn compute(expressions: &ExpressionVector, metrics: &MetricSet) -> Self {
        Self {
            confusion: compute_confusion_score(expressions, metrics),
            fatigue: compute_fatigue_score(expressions, metrics),
            boredom: compute_boredom_score(expressions, metrics),
        }
    }
}

/// Classifier output for one frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub state: LearningState,
    pub scores: StateScores,
}

/// Tracks how long the eyes have been continuously closed
#[derive(Debug, Clone, Default)]
pub struct EyeClosureTimer {
    closed_since: Option<DateTime<Utc>>,
}

impl EyeClosureTimer {
    /// Record one frame and return how long the eyes have been closed so far
    pub fn observe(&mut self, eye_openness: f64, closed_below: f64, now: DateTime<Utc>) -> Duration {
        if eye_openness >= closed_below {
            self.closed_since = None;
            return Duration::zero();
        }
        let since = *self.closed_since.get_or_insert(now);
        (now - since).max(Duration::zero())
    }

    pub fn reset(&mut self) {
        self.closed_since = None;
    }

    pub fn is_running(&self) -> bool {
        self.closed_since.is_some()
    }
}

/// State classifier with configurable thresholds and boredom strategy
#[derive(Debug, Clone)]
pub struct StateClassifier {
    thresholds: ClassifierThresholds,
    boredom: BoredomStrategy,
    eye_closure: EyeClosureTimer,
}

impl Default for StateClassifier {
    fn default() -> Self {
        Self::new(ClassifierThresholds::default(), BoredomStrategy::Scoring)
    }
}

impl StateClassifier {
    pub fn new(thresholds: ClassifierThresholds, boredom: BoredomStrategy) -> Self {
        Self {
            thresholds,
            boredom,
            eye_closure: EyeClosureTimer::default(),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.thresholds, config.boredom)
    }

    /// Classify one frame from expressions and smoothed metrics
    ///
    /// `now` only matters for the eye-closure boredom strategy.
    pub fn classify(
        &mut self,
        expressions: &ExpressionVector,
        metrics: &MetricSet,
        now: DateTime<Utc>,
    ) -> Classification {
        let scores = StateScores::compute(expressions, metrics);
        let state = match self.boredom {
            BoredomStrategy::Scoring => self.classify_scoring(expressions, metrics, &scores),
            BoredomStrategy::EyeClosure {
                closed_below,
                min_duration_secs,
            } => {
                let closed_for = self.eye_closure.observe(metrics.eye_openness, closed_below, now);
                self.classify_eye_closure(
                    expressions,
                    metrics,
                    &scores,
                    closed_for >= secs_to_duration(min_duration_secs),
                )
            }
        };

        debug!(
            state = %state,
            confusion = scores.confusion,
            fatigue = scores.fatigue,
            boredom = scores.boredom,
            "classified frame"
        );

        Classification { state, scores }
    }

    /// Reset duration-based timers (called when no face is in view)
    pub fn reset_timers(&mut self) {
        self.eye_closure.reset();
    }

    pub fn eye_closure_timer(&self) -> &EyeClosureTimer {
        &self.eye_closure
    }

    fn classify_scoring(
        &self,
        expressions: &ExpressionVector,
        metrics: &MetricSet,
        scores: &StateScores,
    ) -> LearningState {
        if self.is_confused(expressions, metrics, scores) {
            LearningState::Confused
        } else if self.is_tired(expressions, metrics, scores) {
            LearningState::Tired
        } else if self.is_bored(expressions, metrics, scores) {
            LearningState::Bored
        } else {
            LearningState::Focused
        }
    }

    // Sustained closure is checked ahead of fatigue: the instantaneous
    // eye-openness fatigue trigger would otherwise always claim closed eyes.
    fn classify_eye_closure(
        &self,
        expressions: &ExpressionVector,
        metrics: &MetricSet,
        scores: &StateScores,
        eyes_closed_long_enough: bool,
    ) -> LearningState {
        if self.is_confused(expressions, metrics, scores) {
            LearningState::Confused
        } else if eyes_closed_long_enough {
            LearningState::Bored
        } else if self.is_tired(expressions, metrics, scores) {
            LearningState::Tired
        } else {
            LearningState::Focused
        }
    }

    fn is_confused(&self, e: &ExpressionVector, m: &MetricSet, s: &StateScores) -> bool {
        let t = &self.thresholds;
        s.confusion > t.confusion_score
            || m.eyebrow_raise > t.confusion_eyebrow_raise
            || e.surprised > t.confusion_surprised
    }

    fn is_tired(&self, e: &ExpressionVector, m: &MetricSet, s: &StateScores) -> bool {
        let t = &self.thresholds;
        s.fatigue > t.tired_score
            || m.eye_openness < t.tired_eye_openness
            || (e.neutral > t.tired_neutral && m.eye_openness < t.tired_drowsy_eye_openness)
    }

    fn is_bored(&self, e: &ExpressionVector, m: &MetricSet, s: &StateScores) -> bool {
        let t = &self.thresholds;
        s.boredom > t.bored_score
            || m.mouth_corners_down > t.bored_mouth_corners_down
            || e.sad > t.bored_sad
            || (e.neutral > t.bored_neutral && m.smile_width < t.bored_flat_smile_width)
            || (m.mouth_corners_down > t.bored_mild_frown && e.neutral > t.bored_mild_frown_neutral)
    }

    /// Classify from expressions alone, for frames without landmarks
    pub fn classify_expressions_only(e: &ExpressionVector) -> LearningState {
        if e.surprised > 0.25 || e.fearful > 0.2 {
            return LearningState::Confused;
        }

        let significant = [e.happy, e.sad, e.angry, e.fearful, e.disgusted, e.surprised]
            .iter()
            .filter(|&&v| v > SIGNIFICANT_EMOTION)
            .count();
        if significant >= 3 && e.neutral < 0.4 {
            return LearningState::Confused;
        }

        if e.sad > 0.25 || e.disgusted > 0.2 {
            return LearningState::Bored;
        }
        if e.neutral > 0.75 && e.happy < 0.1 && e.surprised < 0.1 {
            return LearningState::Bored;
        }

        if e.neutral > 0.45 && e.sad > 0.15 && e.sad < 0.35 && e.happy < 0.15 {
            return LearningState::Tired;
        }
        if e.angry > 0.2 && e.angry < 0.5 && e.happy < 0.12 && e.surprised < 0.12 {
            return LearningState::Tired;
        }

        LearningState::Focused
    }
}

/// Confusion score
///
/// Formula:
/// ```text
/// 0.4 * eyebrow_raise + 0.2 * mouth_open + 0.2 * brow_furrow
///   + 0.15 * surprised + 0.05 * fearful
/// ```
fn compute_confusion_score(e: &ExpressionVector, m: &MetricSet) -> f64 {
    0.4 * m.eyebrow_raise
        + 0.2 * m.mouth_open
        + 0.2 * m.brow_furrow
        + 0.15 * e.get(Emotion::Surprised)
        + 0.05 * e.get(Emotion::Fearful)
}

/// Fatigue score; droopy eyes weigh the most
///
/// Formula:
/// ```text
/// 0.45 * (1 - eye_openness) + 0.15 * (1 - smile_width) + 0.15 * neutral
///   + 0.15 * sad + 0.1 * (1 - eyebrow_raise)
/// ```
fn compute_fatigue_score(e: &ExpressionVector, m: &MetricSet) -> f64 {
    0.45 * (1.0 - m.eye_openness)
        + 0.15 * (1.0 - m.smile_width)
        + 0.15 * e.neutral
        + 0.15 * e.sad
        + 0.1 * (1.0 - m.eyebrow_raise)
}

/// Boredom score; a frown is the most direct indicator
///
/// Formula:
/// ```text
/// 0.30 * mouth_corners_down + 0.25 * sad + 0.20 * (1 - smile_width)
///   + 0.15 * neutral + 0.10 * disgusted
/// ```
fn compute_boredom_score(e: &ExpressionVector, m: &MetricSet) -> f64 {
    0.30 * m.mouth_corners_down
        + 0.25 * e.sad
        + 0.20 * (1.0 - m.smile_width)
        + 0.15 * e.neutral
        + 0.10 * e.disgusted
}
