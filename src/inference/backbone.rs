//! Frozen image-feature backbone run through ONNX Runtime.

use crate::config::{InferenceDevice, ModelConfig};
use crate::error::{Error, Result};
use ort::ep;
use ort::session::Session;
use ort::value::Tensor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Turns batches of normalized spectrogram images into embeddings.
pub trait FeatureExtractor: Send + Sync {
    /// Shape of one embedding, e.g. `[7, 7, 1280]`.
    fn embedding_shape(&self) -> &[usize];

    /// Extract embeddings for `count` images laid out NHWC in `batch`.
    ///
    /// Returns `count * prod(embedding_shape)` values.
    fn extract(&self, batch: &[f32], count: usize) -> Result<Vec<f32>>;

    /// Number of values in one embedding.
    fn embedding_len(&self) -> usize {
        self.embedding_shape().iter().product()
    }
}

/// Produces the feature extractor when the service loads its models.
pub trait BackboneLoader: Send + Sync {
    /// Load the extractor. Failures are fatal for the service.
    fn load(&self) -> Result<Arc<dyn FeatureExtractor>>;
}

/// `MobileNetV2` (or any NHWC image model without top) exported to ONNX.
pub struct OnnxBackbone {
    session: Mutex<Session>,
    embedding_shape: Vec<usize>,
    image_size: usize,
}

impl std::fmt::Debug for OnnxBackbone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxBackbone")
            .field("embedding_shape", &self.embedding_shape)
            .field("image_size", &self.image_size)
            .finish_non_exhaustive()
    }
}

fn load_error(context: &str, e: impl std::fmt::Display) -> Error {
    Error::ModelLoad {
        reason: format!("{context}: {e}"),
    }
}

impl OnnxBackbone {
    /// Open the ONNX model at `path`.
    pub fn open(path: &Path, model: &ModelConfig, image_size: u32) -> Result<Self> {
        if !path.exists() {
            return Err(Error::ModelLoad {
                reason: format!("backbone file does not exist: {}", path.display()),
            });
        }

        let mut builder =
            Session::builder().map_err(|e| load_error("failed to create session builder", e))?;

        if model.intra_threads > 0 {
            builder = builder
                .with_intra_threads(model.intra_threads)
                .map_err(|e| load_error("failed to set intra-op threads", e))?;
        }

        builder = match model.device {
            InferenceDevice::Cpu => {
                info!("Requested device: CPU");
                builder
            }
            InferenceDevice::Auto => {
                info!("Auto mode: attempting CUDA with silent CPU fallback");
                builder
                    .with_execution_providers([ep::CUDA::default().build()])
                    .map_err(|e| load_error("failed to register CUDA provider", e))?
            }
            InferenceDevice::Gpu => {
                info!("Requested device: GPU (CUDA)");
                builder
                    .with_execution_providers([ep::CUDA::default().build().error_on_failure()])
                    .map_err(|e| load_error("CUDA execution provider unavailable", e))?
            }
        };

        let session = builder
            .commit_from_file(path)
            .map_err(|e| load_error(&format!("failed to load {}", path.display()), e))?;

        info!("Loaded backbone: {}", path.display());

        Ok(Self {
            session: Mutex::new(session),
            embedding_shape: model.embedding_shape.clone(),
            image_size: image_size as usize,
        })
    }
}

impl FeatureExtractor for OnnxBackbone {
    fn embedding_shape(&self) -> &[usize] {
        &self.embedding_shape
    }

    fn extract(&self, batch: &[f32], count: usize) -> Result<Vec<f32>> {
        let image_len = self.image_size * self.image_size * 3;
        if count == 0 || batch.len() != count * image_len {
            return Err(Error::Inference {
                reason: format!(
                    "expected {count} images of {image_len} values, got {} values",
                    batch.len()
                ),
            });
        }

        let input = Tensor::from_array((
            [count, self.image_size, self.image_size, 3],
            batch.to_vec(),
        ))
        .map_err(|e| Error::Inference {
            reason: format!("failed to create input tensor: {e}"),
        })?;

        let mut session = self.session.lock().map_err(|_| Error::Internal {
            message: "backbone session lock poisoned".to_string(),
        })?;

        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| Error::Inference {
                reason: format!("backbone run failed: {e}"),
            })?;

        let (_shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| Error::Inference {
                reason: format!("failed to read backbone output: {e}"),
            })?;

        let expected = count * self.embedding_len();
        if data.len() != expected {
            return Err(Error::Inference {
                reason: format!(
                    "backbone produced {} values, expected {expected} for shape {:?}",
                    data.len(),
                    self.embedding_shape
                ),
            });
        }

        debug!("Extracted {count} embedding(s)");
        Ok(data.to_vec())
    }
}

/// Loads [`OnnxBackbone`] from configuration.
#[derive(Debug, Clone)]
pub struct OnnxBackboneLoader {
    path: PathBuf,
    model: ModelConfig,
    image_size: u32,
}

impl OnnxBackboneLoader {
    /// Loader for the backbone at `path`.
    pub fn new(path: PathBuf, model: ModelConfig, image_size: u32) -> Self {
        Self {
            path,
            model,
            image_size,
        }
    }
}

impl BackboneLoader for OnnxBackboneLoader {
    fn load(&self) -> Result<Arc<dyn FeatureExtractor>> {
        if let Some(library) = &self.model.runtime_library {
            let committed = ort::init_from(library)
                .map_err(|e| load_error("failed to load ONNX Runtime library", e))?
                .commit();
            if !committed {
                warn!("ONNX Runtime already initialized, ignoring runtime_library");
            }
        }

        let backbone = OnnxBackbone::open(&self.path, &self.model, self.image_size)?;
        Ok(Arc::new(backbone))
    }
}
