//! Classifier training on labelled recordings.
//!
//! A training run chunks every recording, renders spectrograms on a worker
//! pool, splits the samples per class, embeds both splits with the frozen
//! backbone and fits a fresh classifier head. Runs happen on a background
//! thread; callers poll or await the returned [`TrainingHandle`].

mod dataset;
mod fit;
mod split;
mod task;

pub use dataset::{Sample, TrainingRequest, prepare_samples};
pub use fit::{EpochMetrics, Evaluation, FeatureSet, FitHistory, evaluate, fit};
pub use split::{Split, stratified_split};
pub use task::{TrainingHandle, TrainingReport, TrainingStatus, TrainingTasks};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::inference::{ClassifierHead, FeatureExtractor, HeadSpec};
use crate::output::progress;
use crate::spectrogram::SpectrogramGenerator;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use uuid::Uuid;

/// Validate `request` and start training on a background thread.
///
/// Malformed requests fail here with an input error; every later failure is
/// reported through [`TrainingStatus::Failed`].
pub fn train(
    request: TrainingRequest,
    config: &Config,
    extractor: Arc<dyn FeatureExtractor>,
    show_progress: bool,
) -> Result<TrainingHandle> {
    request.validate(&config.storage)?;

    let id = Uuid::new_v4();
    let (tx, rx) = watch::channel(TrainingStatus::Initializing);
    let config = config.clone();

    std::thread::Builder::new()
        .name(format!("earshot-train-{id}"))
        .spawn(move || {
            let status = match run_training(&request, &config, extractor.as_ref(), &tx, show_progress)
            {
                Ok(report) => {
                    info!(
                        "Training {id} completed: test accuracy {:.3}",
                        report.test_accuracy
                    );
                    TrainingStatus::Completed { report }
                }
                Err(e) => {
                    error!("Training {id} failed: {e}");
                    TrainingStatus::Failed {
                        message: e.to_string(),
                    }
                }
            };
            tx.send_replace(status);
        })
        .map_err(|e| Error::Training {
            message: format!("failed to start training thread: {e}"),
        })?;

    info!("Started training task {id}");
    Ok(TrainingHandle::new(id, rx))
}

fn stage(tx: &watch::Sender<TrainingStatus>, name: &str) {
    info!("Training stage: {name}");
    tx.send_replace(TrainingStatus::Processing {
        stage: name.to_string(),
    });
}

/// Run every training stage synchronously.
pub fn run_training(
    request: &TrainingRequest,
    config: &Config,
    extractor: &dyn FeatureExtractor,
    tx: &watch::Sender<TrainingStatus>,
    show_progress: bool,
) -> Result<TrainingReport> {
    stage(tx, "processing audio");
    let generator = SpectrogramGenerator::new(&config.spectrogram);
    let pb = progress::create_file_progress(request.audio_paths.len(), show_progress);
    let samples = prepare_samples(request, &generator, &config.training, pb.as_ref())?;
    progress::finish_progress(pb, "spectrograms ready");

    let labels: Vec<usize> = samples.iter().map(|s| s.label).collect();
    let split = stratified_split(
        &labels,
        request.class_names.len(),
        config.training.test_ratio,
        config.training.seed,
    )
    .map_err(|e| Error::Training {
        message: e.to_string(),
    })?;
    info!(
        "Split {} sample(s): {} train, {} test",
        samples.len(),
        split.train.len(),
        split.test.len()
    );

    stage(tx, "extracting features");
    let train_set = extract_features(
        extractor,
        &samples,
        &split.train,
        request.batch_size,
        "train",
        show_progress,
    )?;
    let test_set = extract_features(
        extractor,
        &samples,
        &split.test,
        request.batch_size,
        "test",
        show_progress,
    )?;

    stage(tx, "training");
    let head = ClassifierHead::new(HeadSpec {
        embedding_shape: extractor.embedding_shape().to_vec(),
        hidden_sizes: config.model.hidden_sizes.clone(),
        labels: request.class_names.clone(),
        dropout: config.training.dropout,
    })?;
    let pb = progress::create_epoch_progress(request.epochs, show_progress);
    let history = fit(
        &head,
        &train_set,
        &test_set,
        &config.training,
        request.epochs,
        request.batch_size,
        |metrics| {
            if let Some(pb) = pb.as_ref() {
                pb.set_message(format!(
                    "loss {:.4} val_loss {:.4} val_acc {:.3}",
                    metrics.loss, metrics.val_loss, metrics.val_accuracy
                ));
                pb.inc(1);
            }
        },
    )?;
    progress::finish_progress(pb, "fitted");

    let test = evaluate(&head, &test_set, request.batch_size, config.training.l2)?;
    let last = history.last().ok_or_else(|| Error::Training {
        message: "no epoch was run".to_string(),
    })?;

    stage(tx, "saving model");
    head.save(&request.output_path)?;

    Ok(TrainingReport {
        classes: request.class_names.clone(),
        num_training_samples: train_set.len(),
        num_test_samples: test_set.len(),
        num_epochs: history.epochs.len(),
        training_accuracy: last.accuracy,
        validation_accuracy: last.val_accuracy,
        test_accuracy: test.accuracy,
        test_loss: test.loss,
        model_path: request.output_path.clone(),
    })
}

/// Embed the selected samples in batches.
fn extract_features(
    extractor: &dyn FeatureExtractor,
    samples: &[Sample],
    indices: &[usize],
    batch_size: usize,
    split: &str,
    show_progress: bool,
) -> Result<FeatureSet> {
    let dim = extractor.embedding_len();
    let batch_size = batch_size.max(1);
    let pb = progress::create_batch_progress(indices.len().div_ceil(batch_size), split, show_progress);

    let mut features = Vec::with_capacity(indices.len() * dim);
    let mut labels = Vec::with_capacity(indices.len());
    for batch in indices.chunks(batch_size) {
        let mut input = Vec::new();
        for &i in batch {
            let sample = samples.get(i).ok_or_else(|| Error::Internal {
                message: format!("sample index {i} out of range"),
            })?;
            input.extend_from_slice(&sample.image);
            labels.push(u32::try_from(sample.label).map_err(|_| Error::Internal {
                message: format!("label {} does not fit in u32", sample.label),
            })?);
        }

        let embeddings = extractor
            .extract(&input, batch.len())
            .map_err(|e| Error::Training {
                message: format!("feature extraction failed: {e}"),
            })?;
        features.extend(embeddings);
        progress::inc_progress(pb.as_ref());
    }
    progress::finish_progress(pb, "features extracted");

    Ok(FeatureSet {
        features,
        labels,
        dim,
    })
}
