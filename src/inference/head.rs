//! Dense classifier head on top of backbone embeddings.

use crate::config::ModelConfig;
use crate::constants::model;
use crate::error::{Error, Result};
use candle_core::{DType, Device, Module, ModuleT, Tensor, Var};
use candle_nn::{BatchNorm, BatchNormConfig, Dropout, Linear, VarBuilder, VarMap};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Architecture description stored next to the weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadSpec {
    /// Backbone output shape for one image.
    pub embedding_shape: Vec<usize>,
    /// Hidden layer widths.
    pub hidden_sizes: Vec<usize>,
    /// Output labels, index `i` is logit `i`.
    pub labels: Vec<String>,
    /// Dropout rate applied after every hidden block during training.
    pub dropout: f32,
}

impl HeadSpec {
    /// Architecture described by the model configuration.
    pub fn from_config(model: &ModelConfig, dropout: f32) -> Self {
        Self {
            embedding_shape: model.embedding_shape.clone(),
            hidden_sizes: model.hidden_sizes.clone(),
            labels: model.labels.clone(),
            dropout,
        }
    }

    /// Flattened embedding length.
    pub fn input_len(&self) -> usize {
        self.embedding_shape.iter().product()
    }

    /// Sidecar location for a weights file.
    pub fn sidecar_path(artifact: &Path) -> PathBuf {
        artifact.with_extension(model::SIDECAR_EXTENSION)
    }

    /// Read a sidecar file.
    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|source| Error::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write a sidecar file.
    pub fn write(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self).map_err(|source| Error::Json {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// How a head came to be when loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeadOrigin {
    /// Weights and sidecar loaded.
    Artifact,
    /// Sidecar unusable; architecture rebuilt from configuration, weights loaded.
    WeightsOnly,
    /// No usable weights; freshly initialized.
    Fresh {
        /// Why the stored weights were not used.
        reason: String,
    },
}

struct HiddenBlock {
    dense: Linear,
    norm: BatchNorm,
}

/// Trained tensors captured for later restore.
pub struct WeightSnapshot(HashMap<String, Tensor>);

/// Flatten, `[dense, relu, batch-norm, dropout]` per hidden size, dense logits.
pub struct ClassifierHead {
    varmap: VarMap,
    hidden: Vec<HiddenBlock>,
    output: Linear,
    dropout: Dropout,
    spec: HeadSpec,
    device: Device,
}

impl std::fmt::Debug for ClassifierHead {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassifierHead")
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

fn lock_error() -> Error {
    Error::Internal {
        message: "classifier variable map lock poisoned".to_string(),
    }
}

fn load_error(context: &str, e: impl std::fmt::Display) -> Error {
    Error::ModelLoad {
        reason: format!("{context}: {e}"),
    }
}

impl ClassifierHead {
    /// Create a freshly initialized head.
    pub fn new(spec: HeadSpec) -> Result<Self> {
        if spec.labels.is_empty() {
            return Err(Error::invalid_input("classifier needs at least one label"));
        }
        if spec.input_len() == 0 {
            return Err(Error::invalid_input("embedding shape must not be empty"));
        }

        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let norm_config = BatchNormConfig {
            eps: model::BATCH_NORM_EPS,
            momentum: model::BATCH_NORM_MOMENTUM,
            ..BatchNormConfig::default()
        };

        let mut hidden = Vec::with_capacity(spec.hidden_sizes.len());
        let mut width = spec.input_len();
        for (i, &size) in spec.hidden_sizes.iter().enumerate() {
            let block_vb = vb.pp(format!("hidden.{i}"));
            let dense = candle_nn::linear(width, size, block_vb.pp("dense"))?;
            let norm = candle_nn::batch_norm(size, norm_config, block_vb.pp("norm"))?;
            hidden.push(HiddenBlock { dense, norm });
            width = size;
        }
        let output = candle_nn::linear(width, spec.labels.len(), vb.pp("output"))?;

        Ok(Self {
            varmap,
            hidden,
            output,
            dropout: Dropout::new(spec.dropout),
            spec,
            device,
        })
    }

    /// Load a head, falling back step by step.
    ///
    /// 1. sidecar plus weights
    /// 2. architecture from `expected`, weights only
    /// 3. fresh initialization
    ///
    /// A stored output width that disagrees with `expected.labels` is fatal.
    pub fn load_or_init(artifact: &Path, expected: &HeadSpec) -> Result<(Self, HeadOrigin)> {
        let sidecar = HeadSpec::sidecar_path(artifact);
        let sidecar_failure = match Self::load_with_sidecar(artifact, &sidecar, expected) {
            Ok(head) => {
                info!("Loaded classifier: {}", artifact.display());
                return Ok((head, HeadOrigin::Artifact));
            }
            Err(e @ Error::LabelMismatch { .. }) => return Err(e),
            Err(e) => e,
        };
        debug!("Sidecar load failed: {sidecar_failure}");

        let weights_failure = match Self::load_weights_only(artifact, expected) {
            Ok(head) => {
                info!(
                    "Loaded classifier weights with configured architecture: {}",
                    artifact.display()
                );
                return Ok((head, HeadOrigin::WeightsOnly));
            }
            Err(e @ Error::LabelMismatch { .. }) => return Err(e),
            Err(e) => e,
        };

        let head = Self::new(expected.clone())?;
        Ok((
            head,
            HeadOrigin::Fresh {
                reason: weights_failure.to_string(),
            },
        ))
    }

    fn load_with_sidecar(artifact: &Path, sidecar: &Path, expected: &HeadSpec) -> Result<Self> {
        let stored = HeadSpec::read(sidecar)?;
        if stored.labels.len() != expected.labels.len() {
            return Err(Error::LabelMismatch {
                expected: expected.labels.len(),
                actual: stored.labels.len(),
            });
        }
        if stored.embedding_shape != expected.embedding_shape {
            return Err(Error::ModelLoad {
                reason: format!(
                    "sidecar embedding shape {:?} differs from backbone shape {:?}",
                    stored.embedding_shape, expected.embedding_shape
                ),
            });
        }

        // Labels come from configuration, architecture from the sidecar.
        let spec = HeadSpec {
            labels: expected.labels.clone(),
            ..stored
        };
        let mut head = Self::new(spec)?;
        head.varmap
            .load(artifact)
            .map_err(|e| load_error(&format!("failed to load {}", artifact.display()), e))?;
        Ok(head)
    }

    fn load_weights_only(artifact: &Path, expected: &HeadSpec) -> Result<Self> {
        if !artifact.exists() {
            return Err(Error::ModelLoad {
                reason: format!("classifier weights not found: {}", artifact.display()),
            });
        }

        let tensors = candle_core::safetensors::load(artifact, &Device::Cpu)
            .map_err(|e| load_error(&format!("failed to read {}", artifact.display()), e))?;
        let width = tensors
            .get("output.weight")
            .map(|w| w.dims().first().copied().unwrap_or(0))
            .ok_or_else(|| Error::ModelLoad {
                reason: "weights have no output layer".to_string(),
            })?;
        if width != expected.labels.len() {
            return Err(Error::LabelMismatch {
                expected: expected.labels.len(),
                actual: width,
            });
        }

        let mut head = Self::new(expected.clone())?;
        head.varmap
            .load(artifact)
            .map_err(|e| load_error("weights do not match configured architecture", e))?;
        Ok(head)
    }

    /// Architecture of this head.
    pub const fn spec(&self) -> &HeadSpec {
        &self.spec
    }

    /// Output labels.
    pub fn labels(&self) -> &[String] {
        &self.spec.labels
    }

    /// Device the head runs on.
    pub const fn device(&self) -> &Device {
        &self.device
    }

    /// Raw logits for `[N, ...embedding]` input.
    pub fn forward_t(&self, xs: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let mut xs = xs.flatten_from(1)?;
        for block in &self.hidden {
            xs = block.dense.forward(&xs)?.relu()?;
            xs = block.norm.forward_t(&xs, train)?;
            xs = self.dropout.forward_t(&xs, train)?;
        }
        self.output.forward(&xs)
    }

    /// Class probabilities for `count` flattened embeddings, evaluation mode.
    pub fn predict_proba(&self, embeddings: &[f32], count: usize) -> Result<Vec<Vec<f32>>> {
        let input_len = self.spec.input_len();
        if count == 0 || embeddings.len() != count * input_len {
            return Err(Error::Inference {
                reason: format!(
                    "expected {count} embeddings of {input_len} values, got {} values",
                    embeddings.len()
                ),
            });
        }

        let xs = Tensor::from_slice(embeddings, (count, input_len), &self.device)?;
        let logits = self.forward_t(&xs, false)?;
        let probs = candle_nn::ops::softmax(&logits, 1)?;
        Ok(probs.to_vec2::<f32>()?)
    }

    /// `factor * sum(W^2)` over hidden dense kernels.
    pub fn l2_penalty(&self, factor: f64) -> candle_core::Result<Tensor> {
        let mut total = Tensor::zeros((), DType::F32, &self.device)?;
        for block in &self.hidden {
            total = (total + block.dense.weight().sqr()?.sum_all()?)?;
        }
        total * factor
    }

    /// Variables updated by the optimizer (batch-norm running statistics excluded).
    pub fn trainable_vars(&self) -> Result<Vec<Var>> {
        let data = self.varmap.data().lock().map_err(|_| lock_error())?;
        let mut named: Vec<_> = data
            .iter()
            .filter(|(name, _)| !name.contains("running_"))
            .collect();
        named.sort_by(|a, b| a.0.cmp(b.0));
        Ok(named.into_iter().map(|(_, var)| var.clone()).collect())
    }

    /// Copy every tensor, running statistics included.
    pub fn snapshot(&self) -> Result<WeightSnapshot> {
        let data = self.varmap.data().lock().map_err(|_| lock_error())?;
        let mut tensors = HashMap::with_capacity(data.len());
        for (name, var) in data.iter() {
            tensors.insert(name.clone(), var.as_tensor().copy()?);
        }
        Ok(WeightSnapshot(tensors))
    }

    /// Restore tensors captured by [`Self::snapshot`].
    pub fn restore(&self, snapshot: &WeightSnapshot) -> Result<()> {
        let data = self.varmap.data().lock().map_err(|_| lock_error())?;
        for (name, var) in data.iter() {
            let tensor = snapshot.0.get(name).ok_or_else(|| Error::Internal {
                message: format!("snapshot is missing '{name}'"),
            })?;
            var.set(tensor)?;
        }
        Ok(())
    }

    /// Write weights to `artifact` and the architecture to its sidecar.
    pub fn save(&self, artifact: &Path) -> Result<()> {
        if let Some(parent) = artifact.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        self.varmap.save(artifact).map_err(|e| Error::Training {
            message: format!("failed to save {}: {e}", artifact.display()),
        })?;
        self.spec.write(&HeadSpec::sidecar_path(artifact))?;

        info!("Saved classifier: {}", artifact.display());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::cast_precision_loss)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn small_spec(labels: &[&str]) -> HeadSpec {
        HeadSpec {
            embedding_shape: vec![2, 2, 3],
            hidden_sizes: vec![8, 4],
            labels: labels.iter().map(ToString::to_string).collect(),
            dropout: 0.5,
        }
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let head = ClassifierHead::new(small_spec(&["a", "b", "c"])).unwrap();
        let embeddings: Vec<f32> = (0..24).map(|i| (i as f32 * 0.37).sin()).collect();
        let probs = head.predict_proba(&embeddings, 2).unwrap();
        assert_eq!(probs.len(), 2);
        for row in probs {
            assert_eq!(row.len(), 3);
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5);
            assert!(row.iter().all(|p| (0.0..=1.0).contains(p)));
        }
    }

    #[test]
    fn test_eval_mode_is_deterministic() {
        let head = ClassifierHead::new(small_spec(&["a", "b"])).unwrap();
        let embeddings = vec![0.5; 12];
        let first = head.predict_proba(&embeddings, 1).unwrap();
        let second = head.predict_proba(&embeddings, 1).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_wrong_embedding_length_rejected() {
        let head = ClassifierHead::new(small_spec(&["a", "b"])).unwrap();
        assert!(matches!(
            head.predict_proba(&[0.0; 5], 1),
            Err(Error::Inference { .. })
        ));
    }

    #[test]
    fn test_save_then_load_restores_outputs() {
        let tmp = TempDir::new().unwrap();
        let artifact = tmp.path().join("models/head.safetensors");
        let spec = small_spec(&["a", "b"]);
        let head = ClassifierHead::new(spec.clone()).unwrap();
        head.save(&artifact).unwrap();
        assert!(artifact.with_extension("json").exists());

        let (loaded, origin) = ClassifierHead::load_or_init(&artifact, &spec).unwrap();
        assert_eq!(origin, HeadOrigin::Artifact);

        let embeddings = vec![0.25; 12];
        assert_eq!(
            head.predict_proba(&embeddings, 1).unwrap(),
            loaded.predict_proba(&embeddings, 1).unwrap()
        );
    }

    #[test]
    fn test_missing_sidecar_loads_weights_only() {
        let tmp = TempDir::new().unwrap();
        let artifact = tmp.path().join("head.safetensors");
        let spec = small_spec(&["a", "b"]);
        ClassifierHead::new(spec.clone()).unwrap().save(&artifact).unwrap();
        std::fs::remove_file(artifact.with_extension("json")).unwrap();

        let (_, origin) = ClassifierHead::load_or_init(&artifact, &spec).unwrap();
        assert_eq!(origin, HeadOrigin::WeightsOnly);
    }

    #[test]
    fn test_missing_artifact_falls_back_to_fresh() {
        let tmp = TempDir::new().unwrap();
        let artifact = tmp.path().join("absent.safetensors");
        let (head, origin) =
            ClassifierHead::load_or_init(&artifact, &small_spec(&["a", "b"])).unwrap();
        assert!(matches!(origin, HeadOrigin::Fresh { .. }));
        assert_eq!(head.labels().len(), 2);
    }

    #[test]
    fn test_label_mismatch_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let artifact = tmp.path().join("head.safetensors");
        ClassifierHead::new(small_spec(&["a", "b", "c"]))
            .unwrap()
            .save(&artifact)
            .unwrap();

        let err = ClassifierHead::load_or_init(&artifact, &small_spec(&["a", "b"])).unwrap_err();
        assert!(matches!(
            err,
            Error::LabelMismatch {
                expected: 2,
                actual: 3
            }
        ));

        // Same outcome without the sidecar.
        std::fs::remove_file(artifact.with_extension("json")).unwrap();
        let err = ClassifierHead::load_or_init(&artifact, &small_spec(&["a", "b"])).unwrap_err();
        assert!(matches!(err, Error::LabelMismatch { .. }));
    }

    #[test]
    fn test_snapshot_restore() {
        let head = ClassifierHead::new(small_spec(&["a", "b"])).unwrap();
        let embeddings = vec![0.1; 12];
        let before = head.predict_proba(&embeddings, 1).unwrap();
        let snapshot = head.snapshot().unwrap();

        for var in head.trainable_vars().unwrap() {
            let zeros = var.as_tensor().zeros_like().unwrap();
            var.set(&zeros).unwrap();
        }
        head.restore(&snapshot).unwrap();

        assert_eq!(before, head.predict_proba(&embeddings, 1).unwrap());
    }

    #[test]
    fn test_trainable_vars_exclude_running_stats() {
        let head = ClassifierHead::new(small_spec(&["a", "b"])).unwrap();
        // 2 hidden blocks x (dense w, b, norm w, b) + output w, b
        assert_eq!(head.trainable_vars().unwrap().len(), 10);
    }
}
