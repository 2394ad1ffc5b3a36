//! Core types for the Learnstate pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: facial geometry and expression vectors coming from the upstream
//! model, metric sets produced by extraction and smoothing, and the detections
//! recorded once a classified frame is accepted.

use crate::error::{FaceError, InferenceError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of landmarks in the 68-point facial schema
pub const NUM_FACIAL_LANDMARKS: usize = 68;

/// A single 2-D landmark in image coordinates (y grows downward)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Midpoint between two landmarks
    pub fn midpoint(a: Point, b: Point) -> Point {
        Point::new((a.x + b.x) / 2.0, (a.y + b.y) / 2.0)
    }
}

/// Per-frame facial geometry: the 68 named anatomical points
///
/// Index ranges follow the standard 68-point layout:
/// jaw 0-16, eyebrows 17-26, nose 27-35, eyes 36-47, mouth 48-67.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FacialGeometry {
    points: Vec<Point>,
}

impl FacialGeometry {
    /// Build geometry from a point list, rejecting anything that is not the 68-point schema
    pub fn new(points: Vec<Point>) -> Result<Self, InferenceError> {
        let geometry = Self { points };
        geometry.validate()?;
        Ok(geometry)
    }

    /// Check the point count and that every coordinate is finite
    pub fn validate(&self) -> Result<(), FaceError> {
        if self.points.len() != NUM_FACIAL_LANDMARKS {
            return Err(FaceError::LandmarkCount {
                expected: NUM_FACIAL_LANDMARKS,
                actual: self.points.len(),
            });
        }
        if let Some(index) = self
            .points
            .iter()
            .position(|p| !p.x.is_finite() || !p.y.is_finite())
        {
            return Err(FaceError::NonFiniteLandmark { index });
        }
        Ok(())
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Closed set of emotion labels produced by the expression model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Happy,
    Sad,
    Angry,
    Fearful,
    Disgusted,
    Surprised,
    Neutral,
}

impl Emotion {
    pub const ALL: [Emotion; 7] = [
        Emotion::Happy,
        Emotion::Sad,
        Emotion::Angry,
        Emotion::Fearful,
        Emotion::Disgusted,
        Emotion::Surprised,
        Emotion::Neutral,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Happy => "happy",
            Emotion::Sad => "sad",
            Emotion::Angry => "angry",
            Emotion::Fearful => "fearful",
            Emotion::Disgusted => "disgusted",
            Emotion::Surprised => "surprised",
            Emotion::Neutral => "neutral",
        }
    }
}

/// Per-frame expression probabilities over the closed emotion set
///
/// Values are model output in [0, 1]; they need not sum to exactly 1.
/// Unknown keys are rejected when deserializing.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExpressionVector {
    pub happy: f64,
    pub sad: f64,
    pub angry: f64,
    pub fearful: f64,
    pub disgusted: f64,
    pub surprised: f64,
    pub neutral: f64,
}

/// One row of an emotion breakdown, as shown in the diagnostic panel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmotionShare {
    pub emotion: Emotion,
    /// Rounded percentage (0-100)
    pub percent: u32,
}

impl ExpressionVector {
    pub fn get(&self, emotion: Emotion) -> f64 {
        match emotion {
            Emotion::Happy => self.happy,
            Emotion::Sad => self.sad,
            Emotion::Angry => self.angry,
            Emotion::Fearful => self.fearful,
            Emotion::Disgusted => self.disgusted,
            Emotion::Surprised => self.surprised,
            Emotion::Neutral => self.neutral,
        }
    }

    /// Probabilities in `Emotion::ALL` order
    pub fn values(&self) -> [f64; 7] {
        Emotion::ALL.map(|e| self.get(e))
    }

    /// Every probability must be finite and inside [0, 1]
    pub fn validate(&self) -> Result<(), FaceError> {
        for emotion in Emotion::ALL {
            let value = self.get(emotion);
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(FaceError::ExpressionOutOfRange {
                    emotion: emotion.as_str().to_string(),
                    value,
                });
            }
        }
        Ok(())
    }

    /// How clearly one emotion stands out: `min(2 * (max - mean), 1)`
    pub fn clarity(&self) -> f64 {
        let values = self.values();
        let max = values.iter().cloned().fold(f64::MIN, f64::max);
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        ((max - mean) * 2.0).min(1.0)
    }

    /// Highest-probability emotion; neutral when nothing is above zero
    pub fn dominant(&self) -> Emotion {
        let mut best = Emotion::Neutral;
        let mut best_value = 0.0;
        for emotion in Emotion::ALL {
            let value = self.get(emotion);
            if value > best_value {
                best_value = value;
                best = emotion;
            }
        }
        best
    }

    /// Emotions sorted by descending probability with rounded percentages
    pub fn breakdown(&self) -> Vec<EmotionShare> {
        let mut shares: Vec<EmotionShare> = Emotion::ALL
            .iter()
            .map(|&emotion| EmotionShare {
                emotion,
                percent: (self.get(emotion) * 100.0).round() as u32,
            })
            .collect();
        // stable sort keeps label order among equal percentages
        shares.sort_by(|a, b| b.percent.cmp(&a.percent));
        shares
    }
}

/// Names of the normalized geometric features
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    EyebrowRaise,
    SmileWidth,
    EyeOpenness,
    MouthOpen,
    BrowFurrow,
    MouthCornersDown,
}

impl Metric {
    pub const ALL: [Metric; 6] = [
        Metric::EyebrowRaise,
        Metric::SmileWidth,
        Metric::EyeOpenness,
        Metric::MouthOpen,
        Metric::BrowFurrow,
        Metric::MouthCornersDown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::EyebrowRaise => "eyebrow_raise",
            Metric::SmileWidth => "smile_width",
            Metric::EyeOpenness => "eye_openness",
            Metric::MouthOpen => "mouth_open",
            Metric::BrowFurrow => "brow_furrow",
            Metric::MouthCornersDown => "mouth_corners_down",
        }
    }
}

/// Normalized geometric features, each in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricSet {
    /// Vertical gap between eyebrow and eye top (confusion/surprise)
    pub eyebrow_raise: f64,
    /// Mouth-corner distance relative to jaw width (engagement)
    pub smile_width: f64,
    /// Vertical eyelid gap (fatigue when low)
    pub eye_openness: f64,
    /// Vertical lip gap (surprise/confusion)
    pub mouth_open: f64,
    /// Closeness of the inner eyebrow corners (concentration/confusion)
    pub brow_furrow: f64,
    /// Mouth corners below the upper-lip reference (frown)
    pub mouth_corners_down: f64,
}

impl MetricSet {
    pub fn get(&self, metric: Metric) -> f64 {
        match metric {
            Metric::EyebrowRaise => self.eyebrow_raise,
            Metric::SmileWidth => self.smile_width,
            Metric::EyeOpenness => self.eye_openness,
            Metric::MouthOpen => self.mouth_open,
            Metric::BrowFurrow => self.brow_furrow,
            Metric::MouthCornersDown => self.mouth_corners_down,
        }
    }

    /// Combine two sets metric by metric
    pub fn zip_with(&self, other: &MetricSet, f: impl Fn(f64, f64) -> f64) -> MetricSet {
        MetricSet {
            eyebrow_raise: f(self.eyebrow_raise, other.eyebrow_raise),
            smile_width: f(self.smile_width, other.smile_width),
            eye_openness: f(self.eye_openness, other.eye_openness),
            mouth_open: f(self.mouth_open, other.mouth_open),
            brow_furrow: f(self.brow_furrow, other.brow_furrow),
            mouth_corners_down: f(self.mouth_corners_down, other.mouth_corners_down),
        }
    }
}

/// Discrete learning state published to the dialogue agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LearningState {
    #[default]
    Focused,
    Confused,
    Bored,
    Tired,
}

impl LearningState {
    pub const ALL: [LearningState; 4] = [
        LearningState::Focused,
        LearningState::Confused,
        LearningState::Bored,
        LearningState::Tired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LearningState::Focused => "focused",
            LearningState::Confused => "confused",
            LearningState::Bored => "bored",
            LearningState::Tired => "tired",
        }
    }
}

impl fmt::Display for LearningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An accepted, classified frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub state: LearningState,
    /// Confidence in [0, 1]
    pub confidence: f64,
    pub expressions: ExpressionVector,
    /// Smoothed metrics; absent for expression-only detections
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricSet>,
    pub timestamp: DateTime<Utc>,
}

/// Running detection counters for the diagnostic panel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DetectionStats {
    /// Frames offered while the model was ready
    pub total: u64,
    /// Frames accepted into history
    pub successful: u64,
    /// Frames with no face or malformed input
    pub failed: u64,
}

/// What the upstream model returns for a frame with a face in it
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FaceObservation {
    #[serde(default)]
    pub landmarks: Option<FacialGeometry>,
    #[serde(default)]
    pub expressions: Option<ExpressionVector>,
}

impl FaceObservation {
    pub fn new(landmarks: FacialGeometry, expressions: ExpressionVector) -> Self {
        Self {
            landmarks: Some(landmarks),
            expressions: Some(expressions),
        }
    }

    /// An observation carrying neither part is treated as "no face"
    pub fn is_empty(&self) -> bool {
        self.landmarks.is_none() && self.expressions.is_none()
    }

    /// Structural check of both parts. Landmarks always need expressions
    /// alongside them; expressions alone are a valid fallback.
    pub fn validate(&self) -> Result<(), FaceError> {
        if let Some(landmarks) = &self.landmarks {
            landmarks.validate()?;
        }
        match &self.expressions {
            Some(expressions) => expressions.validate(),
            None if self.landmarks.is_some() => Err(FaceError::LandmarksWithoutExpressions),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_geometry_rejects_wrong_point_count() {
        let result = FacialGeometry::new(vec![Point::default(); 67]);
        assert!(matches!(result, Err(InferenceError::Schema(_))));

        let result = FacialGeometry::new(vec![Point::default(); NUM_FACIAL_LANDMARKS]);
        assert!(result.is_ok());
    }

    #[test]
    fn test_geometry_rejects_non_finite() {
        let mut points = vec![Point::default(); NUM_FACIAL_LANDMARKS];
        points[30] = Point::new(f64::NAN, 1.0);
        assert!(FacialGeometry::new(points).is_err());
    }

    #[test]
    fn test_expression_vector_rejects_unknown_keys() {
        let json = r#"{"happy":0.1,"sad":0.1,"angry":0.1,"fearful":0.1,
            "disgusted":0.1,"surprised":0.1,"neutral":0.4,"contempt":0.2}"#;
        assert!(serde_json::from_str::<ExpressionVector>(json).is_err());
    }

    #[test]
    fn test_expression_vector_validate_range() {
        let mut expressions = ExpressionVector {
            neutral: 0.9,
            ..Default::default()
        };
        assert!(expressions.validate().is_ok());

        expressions.sad = 1.2;
        assert!(expressions.validate().is_err());

        expressions.sad = -0.01;
        assert!(expressions.validate().is_err());
    }

    #[test]
    fn test_clarity() {
        // Uniform distribution has no clear emotion
        let uniform = ExpressionVector {
            happy: 0.2,
            sad: 0.2,
            angry: 0.2,
            fearful: 0.2,
            disgusted: 0.2,
            surprised: 0.2,
            neutral: 0.2,
        };
        assert!(uniform.clarity().abs() < 1e-9);

        // Single peaked emotion: max 0.7, mean 0.1 => min(1.2, 1) = 1
        let peaked = ExpressionVector {
            neutral: 0.7,
            ..Default::default()
        };
        assert!((peaked.clarity() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_dominant_and_breakdown() {
        let expressions = ExpressionVector {
            happy: 0.62,
            neutral: 0.3,
            sad: 0.08,
            ..Default::default()
        };
        assert_eq!(expressions.dominant(), Emotion::Happy);
        assert_eq!(ExpressionVector::default().dominant(), Emotion::Neutral);

        let breakdown = expressions.breakdown();
        assert_eq!(breakdown[0], EmotionShare { emotion: Emotion::Happy, percent: 62 });
        assert_eq!(breakdown[1], EmotionShare { emotion: Emotion::Neutral, percent: 30 });
        assert_eq!(breakdown[2], EmotionShare { emotion: Emotion::Sad, percent: 8 });
        assert_eq!(breakdown.len(), 7);
    }

    #[test]
    fn test_learning_state_serde() {
        let json = serde_json::to_string(&LearningState::Confused).unwrap();
        assert_eq!(json, "\"confused\"");
        let state: LearningState = serde_json::from_str("\"tired\"").unwrap();
        assert_eq!(state, LearningState::Tired);
        assert_eq!(LearningState::default(), LearningState::Focused);
    }

    #[test]
    fn test_face_observation_validate() {
        let expressions_only = FaceObservation {
            landmarks: None,
            expressions: Some(ExpressionVector::default()),
        };
        assert_eq!(expressions_only.validate(), Ok(()));

        let landmarks_only = FaceObservation {
            landmarks: Some(FacialGeometry {
                points: vec![Point::default(); NUM_FACIAL_LANDMARKS],
            }),
            expressions: None,
        };
        assert_eq!(
            landmarks_only.validate(),
            Err(FaceError::LandmarksWithoutExpressions)
        );

        let short = FaceObservation {
            landmarks: Some(FacialGeometry {
                points: vec![Point::default(); 5],
            }),
            expressions: Some(ExpressionVector::default()),
        };
        assert_eq!(
            short.validate(),
            Err(FaceError::LandmarkCount {
                expected: NUM_FACIAL_LANDMARKS,
                actual: 5
            })
        );
    }

    #[test]
    fn test_face_observation_empty() {
        assert!(FaceObservation::default().is_empty());
        let observation = FaceObservation {
            landmarks: None,
            expressions: Some(ExpressionVector::default()),
        };
        assert!(!observation.is_empty());
    }
}
