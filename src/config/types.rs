//! Configuration type definitions.

use crate::constants::{
    DEFAULT_ALLOWED_EXTENSIONS, DEFAULT_LABELS, alerts, model, spectrogram, storage, training,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backbone and classifier settings.
    pub model: ModelConfig,

    /// Spectrogram generation settings.
    pub spectrogram: SpectrogramConfig,

    /// Training pipeline settings.
    pub training: TrainingConfig,

    /// Alert settings.
    pub alerts: AlertsConfig,

    /// Persistence and upload staging settings.
    pub storage: StorageConfig,
}

/// Inference device configuration.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InferenceDevice {
    /// Automatically select (GPU if available, else CPU).
    #[default]
    Auto,
    /// Force GPU (CUDA), fail if unavailable.
    Gpu,
    /// Force CPU inference.
    Cpu,
}

/// Backbone and classifier configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Path to the ONNX feature backbone (default: data dir).
    pub backbone: Option<PathBuf>,

    /// Path to the classifier weights (default: data dir).
    pub classifier: Option<PathBuf>,

    /// Ordered class labels. Index `i` is classifier output `i`.
    pub labels: Vec<String>,

    /// Backbone output shape for a single image.
    pub embedding_shape: Vec<usize>,

    /// Classifier hidden layer widths.
    pub hidden_sizes: Vec<usize>,

    /// Device used by the backbone.
    pub device: InferenceDevice,

    /// ONNX Runtime intra-op threads (0 lets the runtime decide).
    pub intra_threads: usize,

    /// ONNX Runtime shared library to load (default: `ORT_DYLIB_PATH` or system search).
    pub runtime_library: Option<PathBuf>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            backbone: None,
            classifier: None,
            labels: DEFAULT_LABELS.iter().map(ToString::to_string).collect(),
            embedding_shape: model::EMBEDDING_SHAPE.to_vec(),
            hidden_sizes: model::HIDDEN_SIZES.to_vec(),
            device: InferenceDevice::default(),
            intra_threads: 0,
            runtime_library: None,
        }
    }
}

/// Spectrogram generation parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpectrogramConfig {
    /// Analysis sample rate in Hz.
    pub sample_rate: u32,
    /// FFT window length.
    pub n_fft: usize,
    /// Hop length between frames.
    pub hop_length: usize,
    /// Number of mel bands.
    pub n_mels: usize,
    /// Dynamic range below peak in dB.
    pub top_db: f32,
    /// Side of the intermediate render canvas.
    pub render_size: u32,
    /// Side of the output image.
    pub image_size: u32,
}

impl Default for SpectrogramConfig {
    fn default() -> Self {
        Self {
            sample_rate: spectrogram::SAMPLE_RATE,
            n_fft: spectrogram::N_FFT,
            hop_length: spectrogram::HOP_LENGTH,
            n_mels: spectrogram::N_MELS,
            top_db: spectrogram::TOP_DB,
            render_size: spectrogram::RENDER_SIZE,
            image_size: spectrogram::IMAGE_SIZE,
        }
    }
}

/// Training pipeline parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrainingConfig {
    /// Chunk length for clips longer than one chunk, in seconds.
    pub chunk_duration_secs: f32,
    /// Fraction of samples held out for testing.
    pub test_ratio: f64,
    /// Spectrogram worker threads.
    pub workers: usize,
    /// Maximum epochs.
    pub epochs: usize,
    /// Mini-batch size.
    pub batch_size: usize,
    /// Shuffle seed.
    pub seed: u64,
    /// Adam learning rate.
    pub learning_rate: f64,
    /// L2 penalty on hidden kernels.
    pub l2: f64,
    /// Dropout rate.
    pub dropout: f32,
    /// Early stopping patience in epochs.
    pub early_stopping_patience: usize,
    /// Learning rate reduction patience in epochs.
    pub lr_patience: usize,
    /// Learning rate reduction factor.
    pub lr_factor: f64,
    /// Learning rate floor.
    pub min_lr: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            chunk_duration_secs: training::CHUNK_DURATION_SECS,
            test_ratio: training::TEST_RATIO,
            workers: training::WORKERS,
            epochs: training::EPOCHS,
            batch_size: training::BATCH_SIZE,
            seed: training::SEED,
            learning_rate: training::LEARNING_RATE,
            l2: model::L2,
            dropout: model::DROPOUT,
            early_stopping_patience: training::EARLY_STOPPING_PATIENCE,
            lr_patience: training::LR_PATIENCE,
            lr_factor: training::LR_FACTOR,
            min_lr: training::MIN_LR,
        }
    }
}

/// Alert settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlertsConfig {
    /// Hours an alert stays valid after creation.
    pub validity_hours: i64,
    /// Search radius used when none is given, in km.
    pub default_radius_km: f64,
    /// Minimum confidence for newly created notifiable classes.
    pub default_min_confidence: f64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            validity_hours: alerts::VALIDITY_HOURS,
            default_radius_km: alerts::DEFAULT_RADIUS_KM,
            default_min_confidence: alerts::DEFAULT_MIN_CONFIDENCE,
        }
    }
}

/// Persistence and upload staging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    /// `SQLite` database path (default: data dir).
    pub database: Option<PathBuf>,
    /// Upload staging directory (default: data dir).
    pub upload_dir: Option<PathBuf>,
    /// Staged files kept before rotation.
    pub max_stored_files: usize,
    /// Predictions kept before eviction.
    pub prediction_retention: usize,
    /// Keep staged uploads after processing (debugging aid).
    pub keep_uploads: bool,
    /// Accepted audio extensions, lowercase without dot.
    pub allowed_extensions: Vec<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: None,
            upload_dir: None,
            max_stored_files: storage::MAX_STORED_FILES,
            prediction_retention: storage::PREDICTION_RETENTION,
            keep_uploads: false,
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

impl StorageConfig {
    /// Whether `path` has one of the allowed extensions (case-insensitive).
    pub fn is_allowed(&self, path: &std::path::Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| {
                self.allowed_extensions
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(ext))
            })
    }
}
