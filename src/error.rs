//! Error types for Learnstate

use thiserror::Error;

/// Errors that can occur while processing a frame or configuring a pipeline
#[derive(Debug, Error)]
pub enum InferenceError {
    /// Malformed geometry or expression input. Fatal to the frame only.
    #[error("Schema error: {0}")]
    Schema(String),

    /// The upstream face/landmark/expression model is not loaded yet.
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to parse input: {0}")]
    Parse(String),

    #[error("Encoding error: {0}")]
    Encoding(String),
}

impl InferenceError {
    /// Short machine-readable code, used in reports and FFI payloads
    pub fn code(&self) -> &'static str {
        match self {
            InferenceError::Schema(_) => "SCHEMA_ERROR",
            InferenceError::ModelUnavailable(_) => "MODEL_UNAVAILABLE",
            InferenceError::InvalidConfig(_) => "INVALID_CONFIG",
            InferenceError::Json(_) => "JSON_ERROR",
            InferenceError::Parse(_) => "PARSE_ERROR",
            InferenceError::Encoding(_) => "ENCODING_ERROR",
        }
    }
}

/// Structural problems with one frame's face payload
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FaceError {
    #[error("Wrong landmark count: expected {expected}, got {actual}")]
    LandmarkCount { expected: usize, actual: usize },

    #[error("Landmark {index} has a non-finite coordinate")]
    NonFiniteLandmark { index: usize },

    #[error("Expression '{emotion}' out of range: {value}")]
    ExpressionOutOfRange { emotion: String, value: f64 },

    #[error("Landmarks present without expressions")]
    LandmarksWithoutExpressions,

    /// Payload does not decode as a face observation (unknown emotion key,
    /// wrong value type, ...)
    #[error("Malformed face payload: {0}")]
    Malformed(String),
}

impl From<FaceError> for InferenceError {
    fn from(e: FaceError) -> Self {
        InferenceError::Schema(e.to_string())
    }
}
