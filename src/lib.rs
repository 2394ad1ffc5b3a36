//! Learnstate - learning-state inference from facial landmarks and expressions
//!
//! Learnstate turns per-frame face-model output into a stable learning state
//! (focused, confused, bored, tired) through a deterministic pipeline:
//! landmark metrics → temporal smoothing → classification → confidence →
//! stability gate → history and clarification trigger.
//!
//! ## Modules
//!
//! - **Pipeline**: `LearningStatePipeline`, one instance per session
//! - **Driver**: async detection loop over a `FaceModel`
//! - **Schema**: frame-record wire format used by the CLI and FFI

pub mod classifier;
pub mod confidence;
pub mod config;
pub mod driver;
pub mod error;
pub mod gate;
pub mod history;
pub mod landmarks;
pub mod pipeline;
pub mod schema;
pub mod smoother;
pub mod trigger;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use config::{
    BoredomStrategy, ClassifierThresholds, ConfidenceWeights, LandmarkCalibration, PipelineConfig,
};
pub use driver::{DetectionLoop, FaceModel, LoopEvent, SharedPipeline};
pub use error::{FaceError, InferenceError};
pub use gate::StateTransition;
pub use pipeline::{FrameContext, FrameOutcome, FrameReport, LearningStatePipeline, PipelineSnapshot};
pub use trigger::{SkipReason, TriggerDecision};
pub use types::{
    Detection, DetectionStats, ExpressionVector, FaceObservation, FacialGeometry, LearningState,
    MetricSet,
};

// Schema exports
pub use schema::{FrameRecord, FrameRecordReader};

/// Library version
pub const LEARNSTATE_VERSION: &str = env!("CARGO_PKG_VERSION");
