//! Pipeline orchestration
//!
//! `LearningStatePipeline` is the public entry point. It owns every stateful
//! stage for one session and turns a stream of model outputs into published
//! learning states, a detection history, and clarification decisions.
//!
//! Pipeline stages per frame:
//! 1. LandmarkExtractor - geometry to raw metrics
//! 2. MetricSmoother - EMA over metrics
//! 3. StateClassifier - candidate learning state
//! 4. ConfidenceScorer - candidate confidence
//! 5. StabilityGate - published state and transitions
//! 6. TransitionTrigger - clarification decision on transitions

use crate::classifier::{StateClassifier, StateScores};
use crate::confidence::ConfidenceScorer;
use crate::config::PipelineConfig;
use crate::error::{FaceError, InferenceError};
use crate::gate::{StabilityGate, StateTransition};
use crate::history::DetectionHistory;
use crate::landmarks::LandmarkExtractor;
use crate::smoother::MetricSmoother;
use crate::trigger::{TransitionTrigger, TriggerDecision};
use crate::types::{
    Detection, DetectionStats, Emotion, EmotionShare, ExpressionVector, FaceObservation,
    LearningState, MetricSet,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Per-frame context supplied by the host
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameContext {
    pub timestamp: DateTime<Utc>,
    /// Whether the consumer is currently busy (e.g. the user is typing)
    pub consumer_busy: bool,
}

impl FrameContext {
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            consumer_busy: false,
        }
    }

    pub fn busy(mut self, consumer_busy: bool) -> Self {
        self.consumer_busy = consumer_busy;
        self
    }
}

/// Everything the pipeline decided about one classified frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameReport {
    pub timestamp: DateTime<Utc>,
    /// Classifier candidate for this frame
    pub candidate: LearningState,
    pub confidence: f64,
    /// Classified from expressions alone (no landmarks)
    pub expression_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scores: Option<StateScores>,
    /// Whether the candidate passed the stability gate
    pub accepted: bool,
    /// Published state after this frame
    pub published: LearningState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition: Option<StateTransition>,
    /// Trigger decision; present only when the frame produced a transition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clarification: Option<TriggerDecision>,
}

/// Result of offering one frame to the pipeline
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FrameOutcome {
    Detected(FrameReport),
    /// No face in view
    NoFace,
    /// Malformed model output; pipeline state untouched
    Failed { code: String, message: String },
    /// Model not ready; nothing counted
    Skipped { message: String },
}

impl FrameOutcome {
    pub fn report(&self) -> Option<&FrameReport> {
        match self {
            FrameOutcome::Detected(report) => Some(report),
            _ => None,
        }
    }

    /// True when this frame should prompt the consumer for clarification
    pub fn clarification_requested(&self) -> bool {
        self.report()
            .and_then(|r| r.clarification)
            .map(|d| d.fired())
            .unwrap_or(false)
    }
}

/// Read-only view of pipeline state for diagnostics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineSnapshot {
    pub session_id: Uuid,
    pub published: LearningState,
    pub dominant_recent: LearningState,
    pub stats: DetectionStats,
    pub history_len: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_detection: Option<Detection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dominant_expression: Option<Emotion>,
    pub expression_breakdown: Vec<EmotionShare>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_clarification: Option<DateTime<Utc>>,
}

/// Candidate produced by the analysis stages
struct Candidate {
    state: LearningState,
    confidence: f64,
    expressions: ExpressionVector,
    metrics: Option<MetricSet>,
    scores: Option<StateScores>,
}

/// Stateful learning-state inference for one session
pub struct LearningStatePipeline {
    config: PipelineConfig,
    session_id: Uuid,
    extractor: LandmarkExtractor,
    smoother: MetricSmoother,
    classifier: StateClassifier,
    scorer: ConfidenceScorer,
    gate: StabilityGate,
    history: DetectionHistory,
    trigger: TransitionTrigger,
    stats: DetectionStats,
}

impl Default for LearningStatePipeline {
    fn default() -> Self {
        Self::build(PipelineConfig::default())
    }
}

impl LearningStatePipeline {
    /// Create a pipeline with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pipeline with a validated configuration
    pub fn with_config(config: PipelineConfig) -> Result<Self, InferenceError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: PipelineConfig) -> Self {
        let session_id = Uuid::new_v4();
        info!(session_id = %session_id, "learning state pipeline created");
        Self {
            session_id,
            extractor: LandmarkExtractor::from_config(&config),
            smoother: MetricSmoother::new(config.smoothing_alpha, config.recent_metrics_capacity),
            classifier: StateClassifier::from_config(&config),
            scorer: ConfidenceScorer::from_config(&config),
            gate: StabilityGate::from_config(&config),
            history: DetectionHistory::from_config(&config),
            trigger: TransitionTrigger::from_config(&config),
            stats: DetectionStats::default(),
            config,
        }
    }

    /// Process one frame's model output
    ///
    /// Never fails: errors and missing faces become outcomes so the caller's
    /// loop keeps running.
    pub fn process_frame(
        &mut self,
        frame: Result<Option<FaceObservation>, InferenceError>,
        ctx: FrameContext,
    ) -> FrameOutcome {
        let observation = match frame {
            Err(InferenceError::ModelUnavailable(message)) => {
                debug!(session_id = %self.session_id, %message, "frame skipped: model unavailable");
                return FrameOutcome::Skipped { message };
            }
            Err(err) => {
                self.stats.total += 1;
                return self.fail(err);
            }
            Ok(observation) => observation,
        };

        self.stats.total += 1;

        let observation = match observation {
            Some(observation) if !observation.is_empty() => observation,
            _ => {
                self.stats.failed += 1;
                self.classifier.reset_timers();
                debug!(session_id = %self.session_id, "no face detected");
                return FrameOutcome::NoFace;
            }
        };

        let candidate = match self.analyze(&observation, ctx.timestamp) {
            Ok(candidate) => candidate,
            Err(err) => return self.fail(err),
        };

        let decision = self.gate.offer(candidate.state, candidate.confidence);
        if decision.accepted {
            self.stats.successful += 1;
            self.history.push(Detection {
                state: candidate.state,
                confidence: candidate.confidence,
                expressions: candidate.expressions,
                metrics: candidate.metrics,
                timestamp: ctx.timestamp,
            });
        }

        let clarification = decision
            .transition
            .map(|transition| self.trigger.evaluate(&transition, ctx.consumer_busy, ctx.timestamp));

        debug!(
            session_id = %self.session_id,
            candidate = %candidate.state,
            confidence = candidate.confidence,
            accepted = decision.accepted,
            published = %decision.published,
            "frame processed"
        );

        FrameOutcome::Detected(FrameReport {
            timestamp: ctx.timestamp,
            candidate: candidate.state,
            confidence: candidate.confidence,
            expression_only: candidate.metrics.is_none(),
            scores: candidate.scores,
            accepted: decision.accepted,
            published: decision.published,
            transition: decision.transition,
            clarification,
        })
    }

    /// Run the analysis stages; input is fully validated before any stage
    /// state is touched
    fn analyze(
        &mut self,
        observation: &FaceObservation,
        now: DateTime<Utc>,
    ) -> Result<Candidate, InferenceError> {
        observation.validate()?;
        match (&observation.landmarks, &observation.expressions) {
            (Some(landmarks), Some(expressions)) => {
                let raw = self.extractor.extract(landmarks)?;
                let smoothed = self.smoother.smooth(&raw);
                let classification = self.classifier.classify(expressions, &smoothed, now);
                let confidence = self.scorer.score(
                    expressions,
                    &smoothed,
                    classification.state,
                    self.smoother.recent(),
                );
                Ok(Candidate {
                    state: classification.state,
                    confidence,
                    expressions: *expressions,
                    metrics: Some(smoothed),
                    scores: Some(classification.scores),
                })
            }
            (None, Some(expressions)) => {
                let state = StateClassifier::classify_expressions_only(expressions);
                let confidence = self.scorer.score_expressions_only(expressions, state);
                Ok(Candidate {
                    state,
                    confidence,
                    expressions: *expressions,
                    metrics: None,
                    scores: None,
                })
            }
            (Some(_), None) => Err(FaceError::LandmarksWithoutExpressions.into()),
            (None, None) => Err(InferenceError::Schema("empty observation".to_string())),
        }
    }

    fn fail(&mut self, err: InferenceError) -> FrameOutcome {
        self.stats.failed += 1;
        warn!(session_id = %self.session_id, code = err.code(), error = %err, "frame failed");
        FrameOutcome::Failed {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    /// Dominant state over the configured trailing window
    pub fn dominant_recent_state(&self, now: DateTime<Utc>) -> LearningState {
        self.history
            .dominant_recent_state(now, self.config.aggregation_window(), self.gate.published())
    }

    pub fn published_state(&self) -> LearningState {
        self.gate.published()
    }

    pub fn history(&self) -> &DetectionHistory {
        &self.history
    }

    pub fn stats(&self) -> DetectionStats {
        self.stats
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> PipelineSnapshot {
        let last_detection = self.history.latest().cloned();
        let (dominant_expression, expression_breakdown) = match &last_detection {
            Some(detection) => (
                Some(detection.expressions.dominant()),
                detection.expressions.breakdown(),
            ),
            None => (None, Vec::new()),
        };

        PipelineSnapshot {
            session_id: self.session_id,
            published: self.published_state(),
            dominant_recent: self.dominant_recent_state(now),
            stats: self.stats,
            history_len: self.history.len(),
            last_detection,
            dominant_expression,
            expression_breakdown,
            last_clarification: self.trigger.last_fired(),
        }
    }
}
