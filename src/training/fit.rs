//! Mini-batch training of the classifier head.

use crate::config::TrainingConfig;
use crate::error::{Error, Result};
use crate::inference::ClassifierHead;
use candle_core::{DType, Tensor};
use candle_nn::optim::{AdamW, Optimizer, ParamsAdamW};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::{debug, info};

/// Flattened embeddings with their labels.
#[derive(Debug, Clone)]
pub struct FeatureSet {
    /// `len * dim` values, row-major.
    pub features: Vec<f32>,
    /// One class index per row.
    pub labels: Vec<u32>,
    /// Values per row.
    pub dim: usize,
}

impl FeatureSet {
    /// Number of rows.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether there are no rows.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Metrics after one epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochMetrics {
    /// 1-based epoch number.
    pub epoch: usize,
    /// Mean training loss, L2 included.
    pub loss: f32,
    /// Training accuracy.
    pub accuracy: f32,
    /// Validation loss, L2 included.
    pub val_loss: f32,
    /// Validation accuracy.
    pub val_accuracy: f32,
    /// Learning rate used in this epoch.
    pub learning_rate: f64,
}

/// Per-epoch metrics of a finished fit.
#[derive(Debug, Clone, Default)]
pub struct FitHistory {
    /// One entry per epoch run.
    pub epochs: Vec<EpochMetrics>,
    /// Epoch whose weights were kept.
    pub best_epoch: usize,
    /// Whether early stopping ended training.
    pub stopped_early: bool,
}

impl FitHistory {
    /// Metrics of the last epoch run.
    pub fn last(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }
}

/// Loss and accuracy over a whole set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    /// Cross-entropy plus L2.
    pub loss: f32,
    /// Fraction classified correctly.
    pub accuracy: f32,
}

struct Plateau {
    best: f32,
    wait: usize,
}

fn training_error(context: &str, e: impl std::fmt::Display) -> Error {
    Error::Training {
        message: format!("{context}: {e}"),
    }
}

fn to_tensors(set: &FeatureSet, head: &ClassifierHead) -> candle_core::Result<(Tensor, Tensor)> {
    let xs = Tensor::from_slice(&set.features, (set.len(), set.dim), head.device())?;
    let ys = Tensor::from_slice(&set.labels, set.len(), head.device())?;
    Ok((xs, ys))
}

/// Number of correct predictions in a batch.
fn correct(logits: &Tensor, ys: &Tensor) -> candle_core::Result<f32> {
    logits
        .argmax(1)?
        .eq(ys)?
        .to_dtype(DType::F32)?
        .sum_all()?
        .to_scalar::<f32>()
}

/// Batches of shuffled indices; a trailing single row joins the previous batch.
fn batches(indices: &[u32], batch_size: usize) -> Vec<Vec<u32>> {
    let mut batches: Vec<Vec<u32>> = indices.chunks(batch_size).map(<[u32]>::to_vec).collect();
    if batches.len() > 1 && batches.last().is_some_and(|b| b.len() == 1) {
        if let Some(tail) = batches.pop()
            && let Some(previous) = batches.last_mut()
        {
            previous.extend(tail);
        }
    }
    batches
}

/// Loss and accuracy in evaluation mode.
#[allow(clippy::cast_precision_loss)]
pub fn evaluate(
    head: &ClassifierHead,
    set: &FeatureSet,
    batch_size: usize,
    l2: f64,
) -> Result<Evaluation> {
    if set.is_empty() {
        return Err(Error::Training {
            message: "cannot evaluate an empty set".to_string(),
        });
    }

    let (xs, ys) = to_tensors(set, head)?;
    let mut loss_sum = 0.0_f32;
    let mut correct_sum = 0.0_f32;
    let batch_size = batch_size.max(1);
    let mut start = 0;
    while start < set.len() {
        let len = batch_size.min(set.len() - start);
        let batch_x = xs.narrow(0, start, len)?;
        let batch_y = ys.narrow(0, start, len)?;
        let logits = head.forward_t(&batch_x, false)?;
        let loss = candle_nn::loss::cross_entropy(&logits, &batch_y)?.to_scalar::<f32>()?;
        loss_sum += loss * len as f32;
        correct_sum += correct(&logits, &batch_y)?;
        start += len;
    }

    let penalty = head.l2_penalty(l2)?.to_scalar::<f32>()?;
    let n = set.len() as f32;
    Ok(Evaluation {
        loss: loss_sum / n + penalty,
        accuracy: correct_sum / n,
    })
}

/// Train `head` in place with `AdamW` (no weight decay), categorical
/// cross-entropy plus L2, early stopping on validation loss with the best
/// weights restored, and learning-rate reduction on plateau.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
pub fn fit(
    head: &ClassifierHead,
    train: &FeatureSet,
    validation: &FeatureSet,
    config: &TrainingConfig,
    epochs: usize,
    batch_size: usize,
    mut on_epoch: impl FnMut(&EpochMetrics),
) -> Result<FitHistory> {
    if train.len() < 2 {
        return Err(Error::Training {
            message: format!("need at least 2 training samples, got {}", train.len()),
        });
    }
    if validation.is_empty() {
        return Err(Error::Training {
            message: "validation set is empty".to_string(),
        });
    }

    let mut optimizer = AdamW::new(
        head.trainable_vars()?,
        ParamsAdamW {
            lr: config.learning_rate,
            weight_decay: 0.0,
            ..ParamsAdamW::default()
        },
    )
    .map_err(|e| training_error("failed to create optimizer", e))?;

    let (xs, ys) = to_tensors(train, head)?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut order: Vec<u32> = (0..train.len() as u32).collect();

    let mut history = FitHistory::default();
    let mut best_snapshot = None;
    let mut stopping = Plateau {
        best: f32::INFINITY,
        wait: 0,
    };
    let mut lr_plateau = Plateau {
        best: f32::INFINITY,
        wait: 0,
    };

    for epoch in 1..=epochs {
        order.shuffle(&mut rng);
        let learning_rate = optimizer.learning_rate();

        let mut loss_sum = 0.0_f32;
        let mut correct_sum = 0.0_f32;
        for batch in batches(&order, batch_size) {
            let idx = Tensor::from_slice(&batch, batch.len(), head.device())?;
            let batch_x = xs.index_select(&idx, 0)?;
            let batch_y = ys.index_select(&idx, 0)?;

            let logits = head.forward_t(&batch_x, true)?;
            let data_loss = candle_nn::loss::cross_entropy(&logits, &batch_y)?;
            let loss = (&data_loss + head.l2_penalty(config.l2)?)?;
            optimizer
                .backward_step(&loss)
                .map_err(|e| training_error("optimizer step failed", e))?;

            loss_sum += loss.to_scalar::<f32>()? * batch.len() as f32;
            correct_sum += correct(&logits, &batch_y)?;
        }

        let n = train.len() as f32;
        let val = evaluate(head, validation, batch_size, config.l2)?;
        let metrics = EpochMetrics {
            epoch,
            loss: loss_sum / n,
            accuracy: correct_sum / n,
            val_loss: val.loss,
            val_accuracy: val.accuracy,
            learning_rate,
        };
        if !metrics.loss.is_finite() || !metrics.val_loss.is_finite() {
            return Err(Error::Training {
                message: format!("loss diverged at epoch {epoch}"),
            });
        }
        debug!(
            "Epoch {epoch}: loss {:.4} acc {:.3} val_loss {:.4} val_acc {:.3} lr {learning_rate:e}",
            metrics.loss, metrics.accuracy, metrics.val_loss, metrics.val_accuracy
        );
        history.epochs.push(metrics);
        on_epoch(&metrics);

        if val.loss < stopping.best {
            stopping.best = val.loss;
            stopping.wait = 0;
            history.best_epoch = epoch;
            best_snapshot = Some(head.snapshot()?);
        } else {
            stopping.wait += 1;
        }

        if val.loss < lr_plateau.best - 1e-4 {
            lr_plateau.best = val.loss;
            lr_plateau.wait = 0;
        } else {
            lr_plateau.wait += 1;
            if lr_plateau.wait >= config.lr_patience && learning_rate > config.min_lr {
                let reduced = (learning_rate * config.lr_factor).max(config.min_lr);
                optimizer.set_learning_rate(reduced);
                lr_plateau.wait = 0;
                info!("Epoch {epoch}: reducing learning rate to {reduced:e}");
            }
        }

        if stopping.wait >= config.early_stopping_patience {
            info!(
                "Early stopping at epoch {epoch}, best epoch {}",
                history.best_epoch
            );
            history.stopped_early = true;
            break;
        }
    }

    if let Some(snapshot) = best_snapshot {
        head.restore(&snapshot)?;
    }
    Ok(history)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::cast_precision_loss)]
mod tests {
    use super::*;
    use crate::inference::HeadSpec;

    fn head(labels: usize) -> ClassifierHead {
        ClassifierHead::new(HeadSpec {
            embedding_shape: vec![4],
            hidden_sizes: vec![8],
            labels: (0..labels).map(|i| format!("class{i}")).collect(),
            dropout: 0.0,
        })
        .unwrap()
    }

    /// Two well separated clusters.
    fn clusters(per_class: usize) -> FeatureSet {
        let mut features = Vec::new();
        let mut labels = Vec::new();
        for i in 0..per_class {
            let jitter = i as f32 * 0.01;
            features.extend([1.0 + jitter, 1.0, -1.0, -1.0 - jitter]);
            labels.push(0);
            features.extend([-1.0 - jitter, -1.0, 1.0, 1.0 + jitter]);
            labels.push(1);
        }
        FeatureSet {
            features,
            labels,
            dim: 4,
        }
    }

    #[test]
    fn test_batches_merge_single_tail() {
        let indices: Vec<u32> = (0..9).collect();
        let batches = batches(&indices, 4);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].len(), 5);

        let batches = super::batches(&indices[..8], 4);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].len(), 4);
    }

    #[test]
    fn test_fit_learns_separable_data() {
        let head = head(2);
        let train = clusters(8);
        let validation = clusters(2);
        let config = TrainingConfig {
            learning_rate: 0.01,
            ..TrainingConfig::default()
        };

        let mut seen = 0;
        let history = fit(&head, &train, &validation, &config, 40, 4, |_| seen += 1).unwrap();
        assert_eq!(seen, history.epochs.len());
        assert!(history.best_epoch >= 1);

        let result = evaluate(&head, &validation, 4, config.l2).unwrap();
        assert!(result.accuracy > 0.99, "accuracy {}", result.accuracy);
    }

    #[test]
    fn test_early_stopping_restores_best_epoch() {
        let head = head(2);
        let train = clusters(4);
        let validation = clusters(2);
        let config = TrainingConfig {
            early_stopping_patience: 2,
            ..TrainingConfig::default()
        };
        let history = fit(&head, &train, &validation, &config, 200, 4, |_| {}).unwrap();
        if history.stopped_early {
            assert_eq!(history.epochs.len(), history.best_epoch + 2);
        }

        let restored = evaluate(&head, &validation, 4, config.l2).unwrap();
        let best = &history.epochs[history.best_epoch - 1];
        assert!((restored.loss - best.val_loss).abs() < 1e-4);
    }

    #[test]
    fn test_too_few_training_samples() {
        let head = head(2);
        let one = FeatureSet {
            features: vec![0.0; 4],
            labels: vec![0],
            dim: 4,
        };
        assert!(fit(&head, &one, &clusters(1), &TrainingConfig::default(), 1, 8, |_| {}).is_err());
    }
}
