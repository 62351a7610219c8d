//! Error types for earshot.

use std::fmt;
use std::path::PathBuf;

/// Result type alias for earshot operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why an alert creation request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    /// The notifiable class is switched off.
    ClassInactive,
    /// The reported confidence is under the class threshold.
    BelowThreshold,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClassInactive => write!(f, "class is not active"),
            Self::BelowThreshold => write!(f, "confidence below class threshold"),
        }
    }
}

/// Top-level error type for earshot.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration directory could not be determined.
    #[error("could not determine configuration directory for this platform")]
    ConfigDirNotFound,

    /// Data directory could not be determined.
    #[error("could not determine data directory for this platform")]
    DataDirNotFound,

    /// Failed to read configuration file.
    #[error("failed to read config file '{path}'")]
    ConfigRead {
        /// Path to the config file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("failed to parse config file '{path}'")]
    ConfigParse {
        /// Path to the config file.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: toml::de::Error,
    },

    /// Configuration validation failed.
    #[error("configuration validation failed: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    /// Failed to write configuration file.
    #[error("failed to write config file '{path}'")]
    ConfigWrite {
        /// Path to the config file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to serialize configuration.
    #[error("failed to serialize config")]
    ConfigSerialize {
        /// Underlying serialization error.
        #[source]
        source: toml::ser::Error,
    },

    /// Request parameters are malformed.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// What was wrong with the input.
        message: String,
    },

    /// Invalid latitude value.
    #[error("invalid latitude: {value} (must be -90.0 to 90.0)")]
    InvalidLatitude {
        /// Invalid latitude value.
        value: f64,
    },

    /// Invalid longitude value.
    #[error("invalid longitude: {value} (must be -180.0 to 180.0)")]
    InvalidLongitude {
        /// Invalid longitude value.
        value: f64,
    },

    /// Invalid search radius.
    #[error("invalid radius: {value} km (must be greater than 0)")]
    InvalidRadius {
        /// Invalid radius value.
        value: f64,
    },

    /// Invalid confidence value.
    #[error("invalid confidence: {value} (must be 0.0 to 1.0)")]
    InvalidConfidence {
        /// Invalid confidence value.
        value: f64,
    },

    /// Unsupported audio format.
    #[error("unsupported audio format: {format}")]
    UnsupportedAudioFormat {
        /// The unsupported format.
        format: String,
    },

    /// Failed to open audio file.
    #[error("failed to open audio file '{path}'")]
    AudioOpen {
        /// Path to the audio file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Failed to decode audio.
    #[error("failed to decode audio from '{path}'")]
    AudioDecode {
        /// Path to the audio file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// No audio tracks found.
    #[error("no audio tracks found in '{path}'")]
    NoAudioTracks {
        /// Path to the audio file.
        path: PathBuf,
    },

    /// Failed to resample audio.
    #[error("failed to resample audio: {reason}")]
    Resample {
        /// Description of the resampling failure.
        reason: String,
    },

    /// Spectrogram generation failed.
    #[error("spectrogram generation failed: {reason}")]
    Spectrogram {
        /// Description of the failure.
        reason: String,
    },

    /// Models are still loading or failed to load.
    #[error("model not ready (state: {state})")]
    ModelNotReady {
        /// Lifecycle state at the time of the request.
        state: String,
    },

    /// Failed to load a model artifact.
    #[error("failed to load model: {reason}")]
    ModelLoad {
        /// Description of the load failure.
        reason: String,
    },

    /// Classifier output width does not match the configured labels.
    #[error("classifier outputs {actual} classes but {expected} labels are configured")]
    LabelMismatch {
        /// Number of configured labels.
        expected: usize,
        /// Classifier output width.
        actual: usize,
    },

    /// Feature extraction or classification failed.
    #[error("inference failed: {reason}")]
    Inference {
        /// Description of the inference failure.
        reason: String,
    },

    /// Alert creation refused by the class gate.
    #[error("alert rejected: {reason}")]
    AlertRejected {
        /// Why the alert was refused.
        reason: RejectionReason,
    },

    /// A notifiable class with this name already exists.
    #[error("notifiable class '{name}' already exists")]
    DuplicateClass {
        /// Conflicting class name.
        name: String,
    },

    /// Requested record does not exist.
    #[error("{what} not found")]
    NotFound {
        /// Description of the missing record.
        what: String,
    },

    /// Training pipeline failed.
    #[error("training failed: {message}")]
    Training {
        /// Description of the failure.
        message: String,
    },

    /// Database operation failed.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Failed to read or write a JSON document.
    #[error("failed to process JSON '{path}'")]
    Json {
        /// Path to the JSON file.
        path: PathBuf,
        /// Underlying serialization error.
        #[source]
        source: serde_json::Error,
    },

    /// Internal error (for unexpected failures).
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

impl Error {
    /// Whether the same request may succeed if retried later.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ModelNotReady { .. })
    }

    /// Whether the error was caused by the caller's input.
    pub const fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput { .. }
                | Self::InvalidLatitude { .. }
                | Self::InvalidLongitude { .. }
                | Self::InvalidRadius { .. }
                | Self::InvalidConfidence { .. }
                | Self::UnsupportedAudioFormat { .. }
        )
    }

    pub(crate) fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }
}

impl From<candle_core::Error> for Error {
    fn from(e: candle_core::Error) -> Self {
        Self::Inference {
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_not_ready_is_retryable() {
        let not_ready = Error::ModelNotReady {
            state: "loading".to_string(),
        };
        assert!(not_ready.is_retryable());
        assert!(
            !Error::ModelLoad {
                reason: "missing".to_string()
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_rejection_reason_in_message() {
        let err = Error::AlertRejected {
            reason: RejectionReason::BelowThreshold,
        };
        assert_eq!(
            err.to_string(),
            "alert rejected: confidence below class threshold"
        );
        assert!(!err.is_input_error());
    }

    #[test]
    fn test_coordinate_errors_are_input_errors() {
        assert!(Error::InvalidLatitude { value: 91.0 }.is_input_error());
        assert!(Error::InvalidRadius { value: 0.0 }.is_input_error());
    }
}
