//! Platform-specific configuration and data paths.

use crate::config::Config;
use crate::constants::{APP_NAME, model, storage};
use crate::error::{Error, Result};
use directories::ProjectDirs;
use std::path::PathBuf;

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", APP_NAME)
}

/// Get the configuration directory for the current platform.
///
/// - Linux: `~/.config/earshot/`
/// - macOS: `~/Library/Application Support/earshot/`
/// - Windows: `%APPDATA%\earshot\`
pub fn config_dir() -> Result<PathBuf> {
    project_dirs()
        .map(|dirs| dirs.config_dir().to_path_buf())
        .ok_or(Error::ConfigDirNotFound)
}

/// Get the full path to the config file.
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// Get the data directory holding models, the database and uploads.
pub fn data_dir() -> Result<PathBuf> {
    project_dirs()
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or(Error::DataDirNotFound)
}

/// Resolved filesystem locations for a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    /// ONNX backbone file.
    pub backbone: PathBuf,
    /// Classifier weights file.
    pub classifier: PathBuf,
    /// `SQLite` database file.
    pub database: PathBuf,
    /// Upload staging directory.
    pub upload_dir: PathBuf,
}

/// Resolve every optional path in `config`, falling back to the data directory.
///
/// The data directory is only looked up when at least one path is unset.
pub fn resolve_paths(config: &Config) -> Result<ResolvedPaths> {
    let fallback = |explicit: &Option<PathBuf>, name: &str| -> Result<PathBuf> {
        explicit
            .clone()
            .map_or_else(|| Ok(data_dir()?.join(name)), Ok)
    };

    Ok(ResolvedPaths {
        backbone: fallback(&config.model.backbone, model::BACKBONE_FILE)?,
        classifier: fallback(&config.model.classifier, model::CLASSIFIER_FILE)?,
        database: fallback(&config.storage.database, storage::DATABASE_FILE)?,
        upload_dir: fallback(&config.storage.upload_dir, storage::UPLOAD_DIR)?,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dir_returns_path() {
        let result = config_dir();
        assert!(result.is_ok());
        let path = result.unwrap();
        assert!(path.to_string_lossy().contains("earshot"));
    }

    #[test]
    fn test_config_file_path_ends_with_toml() {
        let path = config_file_path().unwrap();
        assert!(path.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn test_explicit_paths_are_kept() {
        let mut config = Config::default();
        config.model.backbone = Some(PathBuf::from("/models/backbone.onnx"));
        config.model.classifier = Some(PathBuf::from("/models/head.safetensors"));
        config.storage.database = Some(PathBuf::from("/var/lib/earshot.db"));
        config.storage.upload_dir = Some(PathBuf::from("/tmp/uploads"));

        let paths = resolve_paths(&config).unwrap();
        assert_eq!(paths.backbone, PathBuf::from("/models/backbone.onnx"));
        assert_eq!(paths.database, PathBuf::from("/var/lib/earshot.db"));
        assert_eq!(paths.upload_dir, PathBuf::from("/tmp/uploads"));
    }

    #[test]
    fn test_unset_paths_fall_back_to_data_dir() {
        let paths = resolve_paths(&Config::default()).unwrap();
        assert!(paths.database.ends_with("earshot.db"));
        assert!(paths.classifier.ends_with("classifier.safetensors"));
    }
}
