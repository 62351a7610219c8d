//! JSON envelope types for CLI output.
//!
//! Every machine-readable result and error is wrapped in an envelope so
//! consumers can dispatch on `event` and `result_type` without guessing the
//! payload shape.

use crate::error::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current spec version for JSON envelope.
pub const SPEC_VERSION: &str = "1.0";

/// JSON envelope wrapping all CLI output events.
#[derive(Debug, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: serde::de::DeserializeOwned"))]
pub struct JsonEnvelope<T> {
    /// API specification version.
    pub spec_version: String,
    /// Event timestamp.
    pub timestamp: DateTime<Utc>,
    /// Event type.
    pub event: EventType,
    /// Event-specific payload.
    pub payload: T,
}

impl<T: Serialize> JsonEnvelope<T> {
    /// Create a new envelope with the current timestamp.
    pub fn new(event: EventType, payload: T) -> Self {
        Self {
            spec_version: SPEC_VERSION.to_string(),
            timestamp: Utc::now(),
            event,
            payload,
        }
    }
}

/// Event types for JSON output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Command result.
    Result,
    /// Command failure.
    Error,
}

/// Kinds of command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultType {
    /// Classification of one recording.
    Prediction,
    /// Recent predictions.
    PredictionList,
    /// Finished training run.
    Training,
    /// One notifiable class.
    NotifiableClass,
    /// Several notifiable classes.
    NotifiableClassList,
    /// Created alert.
    Alert,
    /// Alerts near a location.
    NearbyAlerts,
    /// Recorded evaluation.
    Evaluation,
    /// Evaluation statistics.
    EvaluationStats,
    /// Effective configuration.
    Config,
}

/// Result payload tagged with its type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultPayload<T> {
    /// Kind of result.
    pub result_type: ResultType,
    /// Result body.
    pub data: T,
}

/// Error payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Stable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Whether retrying later may succeed.
    pub retryable: bool,
}

impl From<&Error> for ErrorPayload {
    fn from(error: &Error) -> Self {
        Self {
            code: error_code(error).to_string(),
            message: error.to_string(),
            retryable: error.is_retryable(),
        }
    }
}

/// Stable code for an error kind.
pub const fn error_code(error: &Error) -> &'static str {
    match error {
        Error::InvalidInput { .. }
        | Error::InvalidLatitude { .. }
        | Error::InvalidLongitude { .. }
        | Error::InvalidRadius { .. }
        | Error::InvalidConfidence { .. }
        | Error::UnsupportedAudioFormat { .. } => "invalid_input",
        Error::ModelNotReady { .. } => "model_not_ready",
        Error::ModelLoad { .. } | Error::LabelMismatch { .. } => "model_load",
        Error::AudioOpen { .. }
        | Error::AudioDecode { .. }
        | Error::NoAudioTracks { .. }
        | Error::Resample { .. }
        | Error::Spectrogram { .. }
        | Error::Inference { .. } => "pipeline",
        Error::AlertRejected { .. } => "alert_rejected",
        Error::DuplicateClass { .. } => "duplicate_class",
        Error::NotFound { .. } => "not_found",
        Error::Training { .. } => "training_failed",
        Error::Storage(_) => "storage",
        Error::ConfigDirNotFound
        | Error::DataDirNotFound
        | Error::ConfigRead { .. }
        | Error::ConfigParse { .. }
        | Error::ConfigValidation { .. }
        | Error::ConfigWrite { .. }
        | Error::ConfigSerialize { .. } => "config",
        Error::Io(_) | Error::Json { .. } | Error::Internal { .. } => "internal",
    }
}

/// Emit a JSON result event to stdout.
pub fn emit_json_result<T: Serialize>(result_type: ResultType, data: &T) {
    emit(EventType::Result, ResultPayload { result_type, data });
}

/// Emit a JSON error event to stdout.
pub fn emit_json_error(error: &Error) {
    emit(EventType::Error, ErrorPayload::from(error));
}

fn emit<T: Serialize>(event: EventType, payload: T) {
    let envelope = JsonEnvelope::new(event, payload);
    match serde_json::to_string(&envelope) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            // stderr keeps the stdout stream parseable
            eprintln!("error: failed to serialize JSON output: {e}");
        }
    }
}
