//! Pipeline configuration
//!
//! Every tunable of the inference pipeline lives here. Configuration can be
//! built from defaults, a JSON document (missing fields fall back to their
//! defaults), or `LEARNSTATE_*` environment variables.

use crate::confidence::STABILITY_WINDOW;
use crate::error::InferenceError;
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Default EMA weight of the newest frame
pub const DEFAULT_SMOOTHING_ALPHA: f64 = 0.6;

/// Default number of consecutive agreeing candidates before a state is published
pub const DEFAULT_STABILITY_BUFFER_SIZE: usize = 3;

/// Default number of detections kept in history
pub const DEFAULT_HISTORY_CAPACITY: usize = 20;

/// Default trailing window for the dominant recent state (seconds)
pub const DEFAULT_AGGREGATION_WINDOW_SECS: f64 = 30.0;

/// Default minimum time between two clarification triggers (seconds).
/// An earlier variant of the tutor used 30 seconds.
pub const DEFAULT_COOLDOWN_SECS: f64 = 10.0;

/// Default lower bound for reported confidence
pub const DEFAULT_CONFIDENCE_FLOOR: f64 = 0.3;

/// Default frame sampling interval (seconds)
pub const DEFAULT_FRAME_INTERVAL_SECS: f64 = 1.0;

/// Default confidence a new candidate needs to enter the stability buffer
pub const DEFAULT_ACCEPTANCE_THRESHOLD: f64 = 0.4;

/// Default number of smoothed metric sets retained for temporal stability
pub const DEFAULT_RECENT_METRICS_CAPACITY: usize = 5;

/// Weights of the three confidence terms; must sum to 1
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceWeights {
    pub expression: f64,
    pub geometry: f64,
    pub stability: f64,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            expression: 0.3,
            geometry: 0.5,
            stability: 0.2,
        }
    }
}

impl ConfidenceWeights {
    pub fn sum(&self) -> f64 {
        self.expression + self.geometry + self.stability
    }
}

/// Pixel constants of the landmark metrics
///
/// Each `*_px` value is the landmark distance that maps to a metric of 1.
/// With `reference_face_width` set, every pixel constant is multiplied by
/// `jaw_width / reference_face_width` for the frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LandmarkCalibration {
    pub eyebrow_raise_px: f64,
    pub eye_openness_px: f64,
    pub mouth_open_px: f64,
    /// Inner-brow distance at which the furrow reaches zero
    pub brow_furrow_px: f64,
    pub mouth_corners_down_px: f64,
    /// Fraction of jaw width treated as a full smile
    pub smile_jaw_fraction: f64,
    /// Jaw width (px) the pixel constants were tuned for; `None` keeps them fixed
    pub reference_face_width: Option<f64>,
}

impl Default for LandmarkCalibration {
    fn default() -> Self {
        Self {
            eyebrow_raise_px: 15.0,
            eye_openness_px: 8.0,
            mouth_open_px: 20.0,
            brow_furrow_px: 20.0,
            mouth_corners_down_px: 10.0,
            smile_jaw_fraction: 0.6,
            reference_face_width: None,
        }
    }
}

/// Composite-score thresholds and fallback triggers of the state classifier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierThresholds {
    /// Confusion score above which the frame is confused
    pub confusion_score: f64,
    /// Eyebrow raise that alone implies confusion
    pub confusion_eyebrow_raise: f64,
    /// Surprise probability that alone implies confusion
    pub confusion_surprised: f64,
    /// Fatigue score above which the frame is tired
    pub tired_score: f64,
    /// Eye openness below which the frame is tired
    pub tired_eye_openness: f64,
    /// Neutral probability that, with drowsy eyes, implies fatigue
    pub tired_neutral: f64,
    /// Eye openness counted as drowsy when the face is neutral
    pub tired_drowsy_eye_openness: f64,
    /// Boredom score above which the frame is bored
    pub bored_score: f64,
    /// Frown depth that alone implies boredom
    pub bored_mouth_corners_down: f64,
    /// Sadness that alone implies boredom
    pub bored_sad: f64,
    /// Neutral probability that, with a flat mouth, implies boredom
    pub bored_neutral: f64,
    /// Smile width counted as flat when the face is neutral
    pub bored_flat_smile_width: f64,
    /// Mild frown depth that, with a neutral face, implies boredom
    pub bored_mild_frown: f64,
    /// Neutral probability paired with a mild frown
    pub bored_mild_frown_neutral: f64,
}

impl Default for ClassifierThresholds {
    fn default() -> Self {
        Self {
            confusion_score: 0.15,
            confusion_eyebrow_raise: 0.3,
            confusion_surprised: 0.2,
            tired_score: 0.20,
            tired_eye_openness: 0.55,
            tired_neutral: 0.6,
            tired_drowsy_eye_openness: 0.65,
            bored_score: 0.12,
            bored_mouth_corners_down: 0.25,
            bored_sad: 0.10,
            bored_neutral: 0.55,
            bored_flat_smile_width: 0.35,
            bored_mild_frown: 0.15,
            bored_mild_frown_neutral: 0.4,
        }
    }
}

/// How boredom is detected
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BoredomStrategy {
    /// Instantaneous weighted boredom score with fallback triggers
    #[default]
    Scoring,
    /// Eyes closed continuously for at least `min_duration_secs`
    EyeClosure {
        closed_below: f64,
        min_duration_secs: f64,
    },
}

impl BoredomStrategy {
    /// Eye-closure strategy with its reference parameters
    pub fn eye_closure() -> Self {
        BoredomStrategy::EyeClosure {
            closed_below: 0.3,
            min_duration_secs: 3.0,
        }
    }
}

/// Full pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// EMA weight of the newest frame, in (0, 1)
    pub smoothing_alpha: f64,
    /// Smoothed metric sets kept for temporal stability
    pub recent_metrics_capacity: usize,
    /// Stability buffer size M
    pub stability_buffer_size: usize,
    /// Confidence needed for a changed candidate to enter the buffer
    pub acceptance_threshold: f64,
    /// History capacity K
    pub history_capacity: usize,
    /// Trailing window of the dominant recent state (seconds)
    pub aggregation_window_secs: f64,
    /// Clarification trigger cooldown (seconds)
    pub cooldown_secs: f64,
    /// Lower bound for reported confidence
    pub confidence_floor: f64,
    /// Capture cadence of the detection loop (seconds)
    pub frame_interval_secs: f64,
    pub confidence_weights: ConfidenceWeights,
    pub calibration: LandmarkCalibration,
    pub thresholds: ClassifierThresholds,
    pub boredom: BoredomStrategy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            smoothing_alpha: DEFAULT_SMOOTHING_ALPHA,
            recent_metrics_capacity: DEFAULT_RECENT_METRICS_CAPACITY,
            stability_buffer_size: DEFAULT_STABILITY_BUFFER_SIZE,
            acceptance_threshold: DEFAULT_ACCEPTANCE_THRESHOLD,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            aggregation_window_secs: DEFAULT_AGGREGATION_WINDOW_SECS,
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
            confidence_floor: DEFAULT_CONFIDENCE_FLOOR,
            frame_interval_secs: DEFAULT_FRAME_INTERVAL_SECS,
            confidence_weights: ConfidenceWeights::default(),
            calibration: LandmarkCalibration::default(),
            thresholds: ClassifierThresholds::default(),
            boredom: BoredomStrategy::default(),
        }
    }
}

impl PipelineConfig {
    /// Parse a JSON configuration; absent fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self, InferenceError> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to pretty JSON
    pub fn to_json(&self) -> Result<String, InferenceError> {
        serde_json::to_string_pretty(self).map_err(|e| InferenceError::Encoding(e.to_string()))
    }

    /// Defaults overridden by `LEARNSTATE_*` environment variables
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply `LEARNSTATE_*` environment overrides on top of this configuration.
    /// Unparseable values are ignored.
    pub fn with_env_overrides(mut self) -> Self {
        fn read<T: std::str::FromStr>(name: &str) -> Option<T> {
            std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
        }

        if let Some(v) = read("LEARNSTATE_SMOOTHING_ALPHA") {
            self.smoothing_alpha = v;
        }
        if let Some(v) = read("LEARNSTATE_STABILITY_BUFFER_SIZE") {
            self.stability_buffer_size = v;
        }
        if let Some(v) = read("LEARNSTATE_ACCEPTANCE_THRESHOLD") {
            self.acceptance_threshold = v;
        }
        if let Some(v) = read("LEARNSTATE_HISTORY_CAPACITY") {
            self.history_capacity = v;
        }
        if let Some(v) = read("LEARNSTATE_AGGREGATION_WINDOW_SECS") {
            self.aggregation_window_secs = v;
        }
        if let Some(v) = read("LEARNSTATE_COOLDOWN_SECS") {
            self.cooldown_secs = v;
        }
        if let Some(v) = read("LEARNSTATE_CONFIDENCE_FLOOR") {
            self.confidence_floor = v;
        }
        if let Some(v) = read("LEARNSTATE_FRAME_INTERVAL_SECS") {
            self.frame_interval_secs = v;
        }
        if let Some(v) = read("LEARNSTATE_REFERENCE_FACE_WIDTH") {
            self.calibration.reference_face_width = Some(v);
        }
        self
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<(), InferenceError> {
        let invalid =
            |msg: String| -> Result<(), InferenceError> { Err(InferenceError::InvalidConfig(msg)) };

        if !(self.smoothing_alpha > 0.0 && self.smoothing_alpha < 1.0) {
            return invalid(format!(
                "smoothing_alpha must be in (0, 1), got {}",
                self.smoothing_alpha
            ));
        }
        if self.stability_buffer_size == 0 {
            return invalid("stability_buffer_size must be at least 1".to_string());
        }
        if self.history_capacity == 0 {
            return invalid("history_capacity must be at least 1".to_string());
        }
        if self.recent_metrics_capacity < STABILITY_WINDOW {
            return invalid(format!(
                "recent_metrics_capacity must be at least {}, got {}",
                STABILITY_WINDOW, self.recent_metrics_capacity
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence_floor) {
            return invalid(format!(
                "confidence_floor must be in [0, 1], got {}",
                self.confidence_floor
            ));
        }
        if !(0.0..=1.0).contains(&self.acceptance_threshold) {
            return invalid(format!(
                "acceptance_threshold must be in [0, 1], got {}",
                self.acceptance_threshold
            ));
        }
        for (name, secs) in [
            ("aggregation_window_secs", self.aggregation_window_secs),
            ("cooldown_secs", self.cooldown_secs),
        ] {
            if !secs.is_finite() || secs < 0.0 {
                return invalid(format!("{} must be a non-negative number, got {}", name, secs));
            }
        }
        match std::time::Duration::try_from_secs_f64(self.frame_interval_secs) {
            Ok(interval) if !interval.is_zero() => {}
            _ => {
                return invalid(format!(
                    "frame_interval_secs must be a positive, representable duration, got {}",
                    self.frame_interval_secs
                ))
            }
        }

        let weights = &self.confidence_weights;
        if weights.expression < 0.0 || weights.geometry < 0.0 || weights.stability < 0.0 {
            return invalid("confidence weights must be non-negative".to_string());
        }
        if (weights.sum() - 1.0).abs() > 1e-6 {
            return invalid(format!(
                "confidence weights must sum to 1, got {}",
                weights.sum()
            ));
        }

        let calibration = &self.calibration;
        for (name, value) in [
            ("eyebrow_raise_px", calibration.eyebrow_raise_px),
            ("eye_openness_px", calibration.eye_openness_px),
            ("mouth_open_px", calibration.mouth_open_px),
            ("brow_furrow_px", calibration.brow_furrow_px),
            ("mouth_corners_down_px", calibration.mouth_corners_down_px),
            ("smile_jaw_fraction", calibration.smile_jaw_fraction),
            (
                "reference_face_width",
                calibration.reference_face_width.unwrap_or(1.0),
            ),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return invalid(format!("{} must be positive, got {}", name, value));
            }
        }

        if let BoredomStrategy::EyeClosure {
            closed_below,
            min_duration_secs,
        } = self.boredom
        {
            if !(0.0..=1.0).contains(&closed_below) {
                return invalid(format!(
                    "eye closure threshold must be in [0, 1], got {}",
                    closed_below
                ));
            }
            if !min_duration_secs.is_finite() || min_duration_secs < 0.0 {
                return invalid(format!(
                    "eye closure duration must be non-negative, got {}",
                    min_duration_secs
                ));
            }
        }

        Ok(())
    }

    pub fn aggregation_window(&self) -> Duration {
        secs_to_duration(self.aggregation_window_secs)
    }

    pub fn cooldown(&self) -> Duration {
        secs_to_duration(self.cooldown_secs)
    }

    /// Capture cadence; falls back to the default for values `validate` rejects
    pub fn frame_interval(&self) -> std::time::Duration {
        match std::time::Duration::try_from_secs_f64(self.frame_interval_secs) {
            Ok(interval) if !interval.is_zero() => interval,
            _ => std::time::Duration::from_secs(DEFAULT_FRAME_INTERVAL_SECS as u64),
        }
    }
}

/// Convert fractional seconds into a millisecond-resolution chrono duration
pub(crate) fn secs_to_duration(secs: f64) -> Duration {
    Duration::milliseconds((secs * 1000.0).round() as i64)
}
