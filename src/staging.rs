//! Temporary storage for uploaded recordings.

use crate::config::{Config, StorageConfig, resolve_paths};
use crate::constants::storage::EVALUATED_DIR;
use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A recording written to the upload directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    /// Location of the staged copy.
    pub path: PathBuf,
    /// Name the recording was uploaded under.
    pub original_name: String,
}

/// Directory-backed staging with oldest-first rotation.
#[derive(Debug, Clone)]
pub struct UploadStaging {
    upload_dir: PathBuf,
    evaluated_dir: PathBuf,
    storage: StorageConfig,
}

impl UploadStaging {
    /// Staging rooted at `upload_dir`; evaluated recordings go to a subdirectory.
    pub fn new(upload_dir: PathBuf, storage: StorageConfig) -> Self {
        let evaluated_dir = upload_dir.join(EVALUATED_DIR);
        Self {
            upload_dir,
            evaluated_dir,
            storage,
        }
    }

    /// Staging at the configured upload directory.
    pub fn from_config(config: &Config) -> Result<Self> {
        let paths = resolve_paths(config)?;
        Ok(Self::new(paths.upload_dir, config.storage.clone()))
    }

    /// Upload directory.
    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Write `bytes` under a fresh name keeping the source extension.
    pub fn stage(&self, source_name: &str, bytes: &[u8]) -> Result<StagedFile> {
        let source = Path::new(source_name);
        if !self.storage.is_allowed(source) {
            return Err(Error::UnsupportedAudioFormat {
                format: source
                    .extension()
                    .map_or_else(|| "(none)".to_string(), |e| e.to_string_lossy().into_owned()),
            });
        }
        let extension = source
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        fs::create_dir_all(&self.upload_dir)?;
        let path = self
            .upload_dir
            .join(format!("{}.{extension}", Uuid::new_v4()));
        fs::write(&path, bytes)?;
        debug!("Staged {source_name} as {}", path.display());

        self.rotate()?;

        Ok(StagedFile {
            path,
            original_name: source_name.to_string(),
        })
    }

    /// Delete oldest staged files above the configured cap.
    pub fn rotate(&self) -> Result<usize> {
        let mut files = staged_files(&self.upload_dir)?;
        if files.len() <= self.storage.max_stored_files {
            return Ok(0);
        }

        files.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        let excess = files.len() - self.storage.max_stored_files;
        let mut removed = 0;
        for (_, path) in files.into_iter().take(excess) {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to rotate {}: {e}", path.display()),
            }
        }
        info!("Rotated {removed} staged file(s)");
        Ok(removed)
    }

    /// Remove a staged file unless uploads are kept for debugging.
    pub fn release(&self, path: &Path) -> Result<()> {
        if self.storage.keep_uploads {
            info!("Keeping upload: {}", path.display());
            return Ok(());
        }
        match fs::remove_file(path) {
            Ok(()) => {
                debug!("Removed upload: {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Best-effort lookup of a recording by file name or stem.
    pub fn find_by_recording_name(&self, name: &str) -> Result<PathBuf> {
        let wanted = Path::new(name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::invalid_input("recording name is empty"))?;
        let wanted_stem = Path::new(&wanted)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        for dir in [&self.upload_dir, &self.evaluated_dir] {
            let Ok(files) = staged_files(dir) else {
                continue;
            };
            if let Some((_, path)) = files.into_iter().find(|(_, path)| {
                path.file_name().is_some_and(|n| n.to_string_lossy() == wanted)
                    || path
                        .file_stem()
                        .is_some_and(|s| s.to_string_lossy() == wanted_stem)
            }) {
                return Ok(path);
            }
        }

        Err(Error::NotFound {
            what: format!("recording '{name}'"),
        })
    }

    /// Move a recording into the evaluated directory, named after the recording.
    pub fn move_to_evaluated(&self, path: &Path, recording_name: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.evaluated_dir)?;
        let file_name = Path::new(recording_name)
            .file_name()
            .map_or_else(|| Uuid::new_v4().to_string(), |n| n.to_string_lossy().into_owned());

        let mut destination = self.evaluated_dir.join(&file_name);
        if destination.exists() {
            destination = self
                .evaluated_dir
                .join(format!("{}_{file_name}", Uuid::new_v4()));
        }

        fs::rename(path, &destination)?;
        info!("Moved evaluated recording to {}", destination.display());
        Ok(destination)
    }
}

fn staged_files(dir: &Path) -> Result<Vec<(SystemTime, PathBuf)>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_file() {
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            files.push((modified, entry.path()));
        }
    }
    Ok(files)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn staging(dir: &Path, max: usize, keep: bool) -> UploadStaging {
        UploadStaging::new(
            dir.join("uploads"),
            StorageConfig {
                max_stored_files: max,
                keep_uploads: keep,
                ..StorageConfig::default()
            },
        )
    }

    #[test]
    fn test_stage_uses_uuid_name() {
        let tmp = TempDir::new().unwrap();
        let staging = staging(tmp.path(), 10, false);
        let staged = staging.stage("Recording.WAV", b"RIFF").unwrap();

        assert!(staged.path.exists());
        assert_eq!(staged.original_name, "Recording.WAV");
        assert_eq!(staged.path.extension().unwrap(), "wav");
        let stem = staged.path.file_stem().unwrap().to_string_lossy().into_owned();
        assert!(Uuid::parse_str(&stem).is_ok());
    }

    #[test]
    fn test_stage_rejects_other_extensions() {
        let tmp = TempDir::new().unwrap();
        let err = staging(tmp.path(), 10, false)
            .stage("clip.mp3", b"ID3")
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedAudioFormat { .. }));
    }

    #[test]
    fn test_rotation_removes_oldest() {
        let tmp = TempDir::new().unwrap();
        let staging = staging(tmp.path(), 2, false);
        let first = staging.stage("a.wav", b"a").unwrap();
        std::thread::sleep(Duration::from_millis(20));
        let second = staging.stage("b.wav", b"b").unwrap();
        std::thread::sleep(Duration::from_millis(20));
        let third = staging.stage("c.wav", b"c").unwrap();

        assert!(!first.path.exists());
        assert!(second.path.exists());
        assert!(third.path.exists());
    }

    #[test]
    fn test_release_respects_keep_uploads() {
        let tmp = TempDir::new().unwrap();
        let keep = staging(tmp.path(), 10, true);
        let staged = keep.stage("a.wav", b"a").unwrap();
        keep.release(&staged.path).unwrap();
        assert!(staged.path.exists());

        let drop = staging(tmp.path(), 10, false);
        drop.release(&staged.path).unwrap();
        assert!(!staged.path.exists());
        // Releasing twice is fine.
        drop.release(&staged.path).unwrap();
    }

    #[test]
    fn test_find_and_move_to_evaluated() {
        let tmp = TempDir::new().unwrap();
        let staging = staging(tmp.path(), 10, false);
        fs::create_dir_all(staging.upload_dir()).unwrap();
        let recording = staging.upload_dir().join("rec-001.wav");
        fs::write(&recording, b"data").unwrap();

        let found = staging.find_by_recording_name("rec-001.wav").unwrap();
        assert_eq!(found, recording);

        let moved = staging.move_to_evaluated(&found, "rec-001.wav").unwrap();
        assert!(moved.exists());
        assert!(!recording.exists());
        assert!(moved.starts_with(tmp.path().join("uploads").join(EVALUATED_DIR)));

        // Still findable after the move.
        assert_eq!(staging.find_by_recording_name("rec-001").unwrap(), moved);
    }

    #[test]
    fn test_find_missing_recording() {
        let tmp = TempDir::new().unwrap();
        let err = staging(tmp.path(), 10, false)
            .find_by_recording_name("nothing.wav")
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
