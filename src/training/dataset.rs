//! Training requests and spectrogram sample preparation.

use crate::audio::{chunk_for_training, load_clip};
use crate::config::{StorageConfig, TrainingConfig};
use crate::error::{Error, Result};
use crate::spectrogram::{SpectrogramGenerator, normalize_for_backbone};
use indicatif::ProgressBar;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// What to train on and where to write the result.
#[derive(Debug, Clone)]
pub struct TrainingRequest {
    /// Labelled recordings.
    pub audio_paths: Vec<PathBuf>,
    /// Class index for each recording.
    pub labels: Vec<usize>,
    /// Class names, index `i` is label `i`.
    pub class_names: Vec<String>,
    /// Maximum epochs.
    pub epochs: usize,
    /// Mini-batch size.
    pub batch_size: usize,
    /// Weights file to write; the sidecar goes next to it.
    pub output_path: PathBuf,
}

impl TrainingRequest {
    /// Reject malformed requests before any work starts.
    pub fn validate(&self, storage: &StorageConfig) -> Result<()> {
        if self.class_names.is_empty() {
            return Err(Error::invalid_input("at least one class name is required"));
        }
        if let Some(name) = self.class_names.iter().find(|n| n.trim().is_empty()) {
            return Err(Error::invalid_input(format!(
                "class names must not be blank: '{name}'"
            )));
        }
        if self.audio_paths.is_empty() {
            return Err(Error::invalid_input("at least one audio file is required"));
        }
        if self.audio_paths.len() != self.labels.len() {
            return Err(Error::invalid_input(format!(
                "{} audio files but {} labels",
                self.audio_paths.len(),
                self.labels.len()
            )));
        }
        if let Some(label) = self.labels.iter().find(|&&l| l >= self.class_names.len()) {
            return Err(Error::invalid_input(format!(
                "label {label} is out of range for {} classes",
                self.class_names.len()
            )));
        }
        if let Some(path) = self.audio_paths.iter().find(|p| !storage.is_allowed(p)) {
            return Err(Error::invalid_input(format!(
                "file must be one of [{}]: {}",
                storage.allowed_extensions.join(", "),
                path.display()
            )));
        }
        if self.epochs == 0 {
            return Err(Error::invalid_input("epochs must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(Error::invalid_input("batch size must be at least 1"));
        }
        Ok(())
    }

    /// Build a request from a directory with one subdirectory per class.
    ///
    /// Class names are the subdirectory names in sorted order. Recordings are
    /// collected recursively; files with other extensions are ignored.
    pub fn from_directory(
        dataset: &Path,
        storage: &StorageConfig,
        epochs: usize,
        batch_size: usize,
        output_path: PathBuf,
    ) -> Result<Self> {
        let mut class_dirs = Vec::new();
        for entry in std::fs::read_dir(dataset)? {
            let path = entry?.path();
            if path.is_dir() {
                class_dirs.push(path);
            }
        }
        class_dirs.sort();

        let mut request = Self {
            audio_paths: Vec::new(),
            labels: Vec::new(),
            class_names: Vec::with_capacity(class_dirs.len()),
            epochs,
            batch_size,
            output_path,
        };
        for dir in class_dirs {
            let label = request.class_names.len();
            let mut files = Vec::new();
            collect_audio_files(&dir, storage, &mut files)?;
            files.sort();
            if files.is_empty() {
                warn!("Skipping class directory without recordings: {}", dir.display());
                continue;
            }
            request
                .class_names
                .push(dir.file_name().map_or_else(String::new, |n| n.to_string_lossy().into_owned()));
            request.labels.extend(std::iter::repeat_n(label, files.len()));
            request.audio_paths.extend(files);
        }

        info!(
            "Found {} recording(s) in {} class(es) under {}",
            request.audio_paths.len(),
            request.class_names.len(),
            dataset.display()
        );
        Ok(request)
    }
}

/// Recursively collect allowed audio files from a directory.
fn collect_audio_files(dir: &Path, storage: &StorageConfig, files: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_audio_files(&path, storage, files)?;
        } else if storage.is_allowed(&path) {
            files.push(path);
        }
    }
    Ok(())
}

/// One normalized spectrogram with its class.
#[derive(Debug, Clone)]
pub struct Sample {
    /// Backbone input, NHWC in [-1, 1].
    pub image: Vec<f32>,
    /// Class index.
    pub label: usize,
}

fn file_samples(
    path: &Path,
    label: usize,
    generator: &SpectrogramGenerator,
    chunk_duration: f32,
) -> Result<Vec<Sample>> {
    let clip = load_clip(path, generator.sample_rate())?;
    let chunks = chunk_for_training(&clip.samples, clip.sample_rate, chunk_duration);
    debug!(
        "{}: {:.2}s -> {} chunk(s)",
        path.display(),
        clip.duration_secs(),
        chunks.len()
    );

    chunks
        .iter()
        .map(|chunk| {
            let image = generator.generate(&chunk.samples, clip.sample_rate)?;
            Ok(Sample {
                image: normalize_for_backbone(&image),
                label,
            })
        })
        .collect()
}

/// Chunk every file and render spectrograms on a bounded worker pool.
///
/// Files that fail to load or render are logged and skipped. Output order
/// follows input order.
pub fn prepare_samples(
    request: &TrainingRequest,
    generator: &SpectrogramGenerator,
    training: &TrainingConfig,
    progress: Option<&ProgressBar>,
) -> Result<Vec<Sample>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(training.workers.max(1))
        .thread_name(|i| format!("earshot-spectrogram-{i}"))
        .build()
        .map_err(|e| Error::Training {
            message: format!("failed to start worker pool: {e}"),
        })?;

    let per_file: Vec<Option<Vec<Sample>>> = pool.install(|| {
        request
            .audio_paths
            .par_iter()
            .zip(request.labels.par_iter())
            .map(|(path, &label)| {
                let result = file_samples(path, label, generator, training.chunk_duration_secs);
                if let Some(pb) = progress {
                    pb.inc(1);
                }
                match result {
                    Ok(samples) => Some(samples),
                    Err(e) => {
                        warn!("Skipping {}: {e}", path.display());
                        None
                    }
                }
            })
            .collect()
    });

    let skipped = per_file.iter().filter(|f| f.is_none()).count();
    let samples: Vec<Sample> = per_file.into_iter().flatten().flatten().collect();
    info!(
        "Prepared {} spectrogram(s) from {} file(s), {skipped} skipped",
        samples.len(),
        request.audio_paths.len() - skipped
    );

    if samples.is_empty() {
        return Err(Error::Training {
            message: "no valid spectrograms were produced".to_string(),
        });
    }
    Ok(samples)
}
