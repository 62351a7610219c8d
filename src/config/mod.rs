//! Configuration loading and management.

mod file;
mod paths;
mod types;
mod validate;

pub use file::{load_config_file, load_default_config, save_config};
pub use paths::{ResolvedPaths, config_dir, config_file_path, data_dir, resolve_paths};
pub use types::{
    AlertsConfig, Config, InferenceDevice, ModelConfig, SpectrogramConfig, StorageConfig,
    TrainingConfig,
};
pub use validate::validate_config;
