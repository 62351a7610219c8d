//! Application-wide constants.
//!
//! All magic numbers and strings are defined here to ensure consistency
//! and make changes easy to track.

/// Application name used for config directories and user-facing messages.
pub const APP_NAME: &str = "earshot";

/// Default ordered label set of the shipped classifier.
pub const DEFAULT_LABELS: [&str; 12] = [
    "background",
    "emergency_vehicle",
    "horn",
    "alarm_clock",
    "baby",
    "cat",
    "dog",
    "fire_alarm",
    "thunder",
    "car_crash",
    "explosion",
    "gun",
];

/// Audio file extensions accepted for upload and training.
pub const DEFAULT_ALLOWED_EXTENSIONS: [&str; 1] = ["wav"];

/// Spectrogram generation defaults.
pub mod spectrogram {
    /// Analysis sample rate in Hz. Input audio is resampled to this rate.
    pub const SAMPLE_RATE: u32 = 22_050;
    /// FFT window length in samples.
    pub const N_FFT: usize = 2048;
    /// Hop between successive frames in samples.
    pub const HOP_LENGTH: usize = 512;
    /// Number of mel bands.
    pub const N_MELS: usize = 128;
    /// Dynamic range kept below the peak, in dB.
    pub const TOP_DB: f32 = 80.0;
    /// Floor applied to power values before taking the logarithm.
    pub const AMIN: f32 = 1e-10;
    /// Side of the intermediate render canvas in pixels.
    pub const RENDER_SIZE: u32 = 300;
    /// Side of the image fed to the backbone in pixels.
    pub const IMAGE_SIZE: u32 = 224;
    /// Channels of the backbone input image.
    pub const CHANNELS: usize = 3;
}

/// Backbone and classifier head defaults.
pub mod model {
    /// Embedding shape produced by `MobileNetV2` (alpha 0.75) at 224x224.
    pub const EMBEDDING_SHAPE: [usize; 3] = [7, 7, 1280];
    /// Hidden layer widths of the classifier head.
    pub const HIDDEN_SIZES: [usize; 2] = [512, 256];
    /// Dropout rate between hidden layers.
    pub const DROPOUT: f32 = 0.5;
    /// L2 penalty on hidden layer kernels.
    pub const L2: f64 = 0.001;
    /// Batch-norm epsilon.
    pub const BATCH_NORM_EPS: f64 = 1e-3;
    /// Batch-norm running statistics momentum.
    pub const BATCH_NORM_MOMENTUM: f64 = 0.01;
    /// Default classifier artifact file name.
    pub const CLASSIFIER_FILE: &str = "classifier.safetensors";
    /// Default backbone file name.
    pub const BACKBONE_FILE: &str = "mobilenet_v2_0.75_224_notop.onnx";
    /// Extension of the classifier architecture sidecar.
    pub const SIDECAR_EXTENSION: &str = "json";
}

/// Training defaults.
pub mod training {
    /// Chunk length for long clips in seconds.
    pub const CHUNK_DURATION_SECS: f32 = 5.0;
    /// Fraction of samples held out for testing.
    pub const TEST_RATIO: f64 = 0.3;
    /// Spectrogram worker threads.
    pub const WORKERS: usize = 4;
    /// Maximum training epochs.
    pub const EPOCHS: usize = 100;
    /// Mini-batch size.
    pub const BATCH_SIZE: usize = 8;
    /// Shuffle seed for the split and mini-batches.
    pub const SEED: u64 = 42;
    /// Adam learning rate.
    pub const LEARNING_RATE: f64 = 0.001;
    /// Epochs without validation improvement before stopping.
    pub const EARLY_STOPPING_PATIENCE: usize = 10;
    /// Epochs without validation improvement before reducing the learning rate.
    pub const LR_PATIENCE: usize = 5;
    /// Learning rate multiplier on plateau.
    pub const LR_FACTOR: f64 = 0.2;
    /// Learning rate floor.
    pub const MIN_LR: f64 = 1e-5;
}

/// Alert defaults.
pub mod alerts {
    /// Alert validity window in hours.
    pub const VALIDITY_HOURS: i64 = 1;
    /// Longest allowed alert validity window in hours (one year).
    pub const MAX_VALIDITY_HOURS: i64 = 8760;
    /// Default search radius in kilometres.
    pub const DEFAULT_RADIUS_KM: f64 = 1.0;
    /// Default minimum confidence for a new notifiable class.
    pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.7;
}

/// Geodesy constants.
pub mod geo {
    /// Mean Earth radius in kilometres.
    pub const EARTH_RADIUS_KM: f64 = 6371.0;
    /// Approximate kilometres per degree of latitude.
    pub const KM_PER_DEGREE: f64 = 111.0;
    /// Latitude bounds.
    pub const MAX_LATITUDE: f64 = 90.0;
    /// Longitude bounds.
    pub const MAX_LONGITUDE: f64 = 180.0;
}

/// Notifiable class field limits.
pub mod classes {
    /// Minimum class name length.
    pub const NAME_MIN_LEN: usize = 2;
    /// Maximum class name length.
    pub const NAME_MAX_LEN: usize = 100;
    /// Maximum description length.
    pub const DESCRIPTION_MAX_LEN: usize = 255;
}

/// Storage defaults.
pub mod storage {
    /// Predictions kept before the oldest is evicted.
    pub const PREDICTION_RETENTION: usize = 100;
    /// Staged upload files kept before the oldest is removed.
    pub const MAX_STORED_FILES: usize = 100;
    /// Database file name inside the data directory.
    pub const DATABASE_FILE: &str = "earshot.db";
    /// Upload directory name inside the data directory.
    pub const UPLOAD_DIR: &str = "uploads";
    /// Subdirectory for uploads moved after evaluation.
    pub const EVALUATED_DIR: &str = "evaluated";
}

/// Confidence value bounds.
pub mod confidence {
    /// Minimum valid confidence value.
    pub const MIN: f64 = 0.0;
    /// Maximum valid confidence value.
    pub const MAX: f64 = 1.0;
}
