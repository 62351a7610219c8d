//! Model lifecycle and the audio to prediction pipeline.

use super::backbone::{BackboneLoader, FeatureExtractor, OnnxBackboneLoader};
use super::head::{ClassifierHead, HeadOrigin, HeadSpec};
use super::prediction::ClassPrediction;
use crate::audio::load_clip;
use crate::config::{Config, resolve_paths};
use crate::error::{Error, Result};
use crate::spectrogram::{SpectrogramGenerator, normalize_for_backbone};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Lifecycle of the loaded models.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelState {
    /// `load()` has not been called.
    Unloaded,
    /// Background load in progress.
    Loading,
    /// Backbone and trained classifier loaded.
    Ready,
    /// Backbone loaded, classifier running on untrained weights.
    ReadyDegraded,
    /// Loading failed; `reload()` may retry.
    Failed {
        /// Why loading failed.
        reason: String,
    },
}

impl ModelState {
    /// Whether predictions are served.
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready | Self::ReadyDegraded)
    }

    /// Whether loading has finished, successfully or not.
    pub const fn is_settled(&self) -> bool {
        !matches!(self, Self::Unloaded | Self::Loading)
    }
}

impl fmt::Display for ModelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unloaded => write!(f, "unloaded"),
            Self::Loading => write!(f, "loading"),
            Self::Ready => write!(f, "ready"),
            Self::ReadyDegraded => write!(f, "ready (degraded)"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// Observes one load operation.
#[derive(Debug, Clone)]
pub struct LoadHandle {
    rx: watch::Receiver<ModelState>,
}

impl LoadHandle {
    /// Current state without waiting.
    pub fn state(&self) -> ModelState {
        self.rx.borrow().clone()
    }

    /// Wait until loading settles and return the final state.
    pub async fn wait(mut self) -> ModelState {
        let settled = self
            .rx
            .wait_for(ModelState::is_settled)
            .await
            .map(|state| state.clone());
        settled.unwrap_or_else(|_| self.rx.borrow().clone())
    }
}

struct Models {
    backbone: Arc<dyn FeatureExtractor>,
    head: ClassifierHead,
}

struct Inner {
    generator: SpectrogramGenerator,
    head_spec: HeadSpec,
    classifier_path: PathBuf,
    loader: Arc<dyn BackboneLoader>,
    state: watch::Sender<ModelState>,
    models: OnceLock<Models>,
}

/// Runs spectrogram generation, feature extraction and classification.
///
/// Cheap to clone; clones share models and state.
#[derive(Clone)]
pub struct InferenceService {
    inner: Arc<Inner>,
}

impl fmt::Debug for InferenceService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InferenceService")
            .field("state", &*self.inner.state.borrow())
            .field("classifier_path", &self.inner.classifier_path)
            .finish_non_exhaustive()
    }
}

impl InferenceService {
    /// Service with an explicit backbone loader.
    pub fn new(config: &Config, classifier_path: PathBuf, loader: Arc<dyn BackboneLoader>) -> Self {
        let (state, _) = watch::channel(ModelState::Unloaded);
        Self {
            inner: Arc::new(Inner {
                generator: SpectrogramGenerator::new(&config.spectrogram),
                head_spec: HeadSpec::from_config(&config.model, config.training.dropout),
                classifier_path,
                loader,
                state,
                models: OnceLock::new(),
            }),
        }
    }

    /// Service using the ONNX backbone and paths from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let paths = resolve_paths(config)?;
        let loader = OnnxBackboneLoader::new(
            paths.backbone,
            config.model.clone(),
            config.spectrogram.image_size,
        );
        Ok(Self::new(config, paths.classifier, Arc::new(loader)))
    }

    /// Start loading in the background.
    ///
    /// Only the first call starts work; every call observes the same load.
    pub fn load(&self) -> LoadHandle {
        let started = self.inner.state.send_if_modified(|state| {
            if *state == ModelState::Unloaded {
                *state = ModelState::Loading;
                true
            } else {
                false
            }
        });
        if started {
            self.spawn_load();
        }
        self.handle()
    }

    /// Retry loading after a failure.
    pub fn reload(&self) -> Result<LoadHandle> {
        let mut current = ModelState::Unloaded;
        let restarted = self.inner.state.send_if_modified(|state| {
            if matches!(state, ModelState::Failed { .. } | ModelState::Unloaded) {
                *state = ModelState::Loading;
                true
            } else {
                current = state.clone();
                false
            }
        });
        if !restarted {
            return Err(Error::invalid_input(format!(
                "reload is only allowed after a failed load (state: {current})"
            )));
        }
        self.spawn_load();
        Ok(self.handle())
    }

    fn handle(&self) -> LoadHandle {
        LoadHandle {
            rx: self.inner.state.subscribe(),
        }
    }

    fn spawn_load(&self) {
        let inner = Arc::clone(&self.inner);
        let spawned = std::thread::Builder::new()
            .name("earshot-model-load".to_string())
            .spawn(move || inner.run_load());
        if let Err(e) = spawned {
            error!("Failed to start model loading thread: {e}");
            self.inner.state.send_replace(ModelState::Failed {
                reason: format!("failed to start loading thread: {e}"),
            });
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ModelState {
        self.inner.state.borrow().clone()
    }

    /// Whether predictions are served.
    pub fn is_ready(&self) -> bool {
        self.inner.state.borrow().is_ready()
    }

    /// Whether the classifier runs on untrained weights.
    pub fn is_degraded(&self) -> bool {
        *self.inner.state.borrow() == ModelState::ReadyDegraded
    }

    /// Configured output labels.
    pub fn labels(&self) -> &[String] {
        &self.inner.head_spec.labels
    }

    fn ready_models(&self) -> Result<&Models> {
        let state = self.state();
        if !state.is_ready() {
            return Err(Error::ModelNotReady {
                state: state.to_string(),
            });
        }
        self.inner.models.get().ok_or_else(|| Error::ModelNotReady {
            state: state.to_string(),
        })
    }

    /// Classify an audio file.
    ///
    /// Fails fast with [`Error::ModelNotReady`] while models are not loaded.
    pub fn predict(&self, path: &Path) -> Result<ClassPrediction> {
        self.ready_models()?;
        let clip = load_clip(path, self.inner.generator.sample_rate())?;
        self.predict_samples(&clip.samples, clip.sample_rate)
    }

    /// Classify a mono waveform.
    pub fn predict_samples(&self, samples: &[f32], sample_rate: u32) -> Result<ClassPrediction> {
        let models = self.ready_models()?;
        let image = self.inner.generator.generate(samples, sample_rate)?;
        let input = normalize_for_backbone(&image);
        let prediction = models.classify(&input)?;
        debug!(
            "Predicted {} ({:.3})",
            prediction.top().label,
            prediction.top().confidence
        );
        Ok(prediction)
    }
}

impl Models {
    fn classify(&self, input: &[f32]) -> Result<ClassPrediction> {
        let embedding = self.backbone.extract(input, 1)?;
        let probabilities = self.head.predict_proba(&embedding, 1)?;
        let row = probabilities.first().ok_or_else(|| Error::Inference {
            reason: "classifier returned no rows".to_string(),
        })?;
        ClassPrediction::new(self.head.labels(), row)
    }
}

impl Inner {
    fn fail(&self, reason: String) {
        error!("Model loading failed: {reason}");
        self.state.send_replace(ModelState::Failed { reason });
    }

    fn run_load(&self) {
        info!("Loading models");

        let backbone = match self.loader.load() {
            Ok(backbone) => backbone,
            Err(e) => return self.fail(e.to_string()),
        };
        if backbone.embedding_shape() != self.head_spec.embedding_shape.as_slice() {
            return self.fail(format!(
                "backbone embedding shape {:?} differs from configured {:?}",
                backbone.embedding_shape(),
                self.head_spec.embedding_shape
            ));
        }

        let (head, origin) = match ClassifierHead::load_or_init(&self.classifier_path, &self.head_spec)
        {
            Ok(loaded) => loaded,
            Err(e) => return self.fail(e.to_string()),
        };
        let degraded = match origin {
            HeadOrigin::Fresh { reason } => {
                warn!(
                    "Classifier weights unavailable ({reason}); predictions use untrained weights"
                );
                true
            }
            HeadOrigin::Artifact | HeadOrigin::WeightsOnly => false,
        };

        let models = Models { backbone, head };

        let size = self.generator.image_size() as usize;
        let zeros = vec![0.0; size * size * 3];
        if let Err(e) = models.classify(&zeros) {
            warn!("Warm-up inference failed: {e}");
        }

        // A previous attempt can only have failed before this point.
        if self.models.set(models).is_err() {
            debug!("Models already installed");
        }

        let state = if degraded {
            ModelState::ReadyDegraded
        } else {
            ModelState::Ready
        };
        info!("Models {state}");
        self.state.send_replace(state);
    }
}
