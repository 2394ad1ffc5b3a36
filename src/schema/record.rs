//! Frame records and their reader
//!
//! A frame record is one sampled camera frame as seen by the upstream model,
//! plus the host flags the pipeline needs for that frame.

use crate::error::{FaceError, InferenceError};
use crate::pipeline::FrameContext;
use crate::types::FaceObservation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One sampled frame
///
/// The face payload is kept as raw JSON and decoded per frame, so a
/// malformed payload fails that frame instead of the whole stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub timestamp: DateTime<Utc>,
    /// Model output; `null` when no face was found
    #[serde(default)]
    pub face: Option<Value>,
    /// Consumer busy flag at capture time
    #[serde(default)]
    pub consumer_busy: bool,
    /// Whether the model was loaded when the frame was captured
    #[serde(default = "default_model_ready")]
    pub model_ready: bool,
}

fn default_model_ready() -> bool {
    true
}

impl FrameRecord {
    pub fn no_face(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            face: None,
            consumer_busy: false,
            model_ready: true,
        }
    }

    pub fn with_face(timestamp: DateTime<Utc>, face: FaceObservation) -> Self {
        Self {
            face: serde_json::to_value(face).ok(),
            ..Self::no_face(timestamp)
        }
    }

    /// Decode the face payload
    pub fn observation(&self) -> Result<Option<FaceObservation>, FaceError> {
        match &self.face {
            None | Some(Value::Null) => Ok(None),
            Some(value) => FaceObservation::deserialize(value)
                .map(Some)
                .map_err(|e| FaceError::Malformed(e.to_string())),
        }
    }

    /// Model output as the pipeline consumes it
    pub fn model_output(&self) -> Result<Option<FaceObservation>, InferenceError> {
        if !self.model_ready {
            return Err(InferenceError::ModelUnavailable(
                "face model not loaded".to_string(),
            ));
        }
        Ok(self.observation()?)
    }

    pub fn context(&self) -> FrameContext {
        FrameContext::at(self.timestamp).busy(self.consumer_busy)
    }

    /// Structural check of the face payload
    pub fn validate(&self) -> Result<(), FaceError> {
        match self.observation()? {
            Some(face) => face.validate(),
            None => Ok(()),
        }
    }
}

/// Validation failure of one record
#[derive(Debug)]
pub struct ValidationResult {
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    pub result: Option<FaceError>,
}

/// Reader for frame-record streams
pub struct FrameRecordReader;

impl FrameRecordReader {
    /// Parse a JSON array of records
    pub fn parse_array(json: &str) -> Result<Vec<FrameRecord>, InferenceError> {
        let records: Vec<FrameRecord> = serde_json::from_str(json)?;
        Ok(records)
    }

    /// Parse newline-delimited records; blank lines are skipped
    pub fn parse_ndjson(ndjson: &str) -> Result<Vec<FrameRecord>, InferenceError> {
        let mut records = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let record = serde_json::from_str::<FrameRecord>(trimmed).map_err(|e| {
                InferenceError::Parse(format!("Failed to parse line {}: {}", line_num + 1, e))
            })?;
            records.push(record);
        }
        Ok(records)
    }

    /// Validate records, returning only the failures
    pub fn validate_records(records: &[FrameRecord]) -> Vec<ValidationResult> {
        records
            .iter()
            .enumerate()
            .map(|(index, record)| ValidationResult {
                index,
                timestamp: record.timestamp,
                result: record.validate().err(),
            })
            .filter(|r| r.result.is_some())
            .collect()
    }
}
