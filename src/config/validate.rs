//! Configuration validation.

use crate::config::Config;
use crate::constants::{alerts, confidence};
use crate::error::{Error, Result};
use std::collections::HashSet;

/// Validate the entire configuration.
pub fn validate_config(config: &Config) -> Result<()> {
    validate_model(config)?;
    validate_spectrogram(config)?;
    validate_training(config)?;
    validate_alerts(config)?;
    validate_storage(config)?;
    Ok(())
}

fn invalid(message: String) -> Error {
    Error::ConfigValidation { message }
}

fn validate_model(config: &Config) -> Result<()> {
    let model = &config.model;

    if model.labels.len() < 2 {
        return Err(invalid(format!(
            "at least 2 labels are required, got {}",
            model.labels.len()
        )));
    }

    let mut seen = HashSet::new();
    if let Some(dup) = model.labels.iter().find(|l| !seen.insert(l.as_str())) {
        return Err(invalid(format!("duplicate label '{dup}'")));
    }

    if model.embedding_shape.is_empty() || model.embedding_shape.contains(&0) {
        return Err(invalid(format!(
            "embedding_shape must be non-empty with positive dimensions, got {:?}",
            model.embedding_shape
        )));
    }

    if model.hidden_sizes.contains(&0) {
        return Err(invalid("hidden_sizes must all be positive".to_string()));
    }

    Ok(())
}

fn validate_spectrogram(config: &Config) -> Result<()> {
    let spec = &config.spectrogram;

    if spec.sample_rate == 0 || spec.n_fft == 0 || spec.hop_length == 0 || spec.n_mels == 0 {
        return Err(invalid(
            "sample_rate, n_fft, hop_length and n_mels must be positive".to_string(),
        ));
    }

    if spec.top_db <= 0.0 {
        return Err(invalid(format!("top_db must be positive, got {}", spec.top_db)));
    }

    if spec.image_size == 0 || spec.render_size == 0 {
        return Err(invalid("image sizes must be positive".to_string()));
    }

    Ok(())
}

fn validate_training(config: &Config) -> Result<()> {
    let training = &config.training;

    if training.chunk_duration_secs <= 0.0 {
        return Err(invalid(format!(
            "chunk_duration_secs must be positive, got {}",
            training.chunk_duration_secs
        )));
    }

    if !(training.test_ratio > 0.0 && training.test_ratio < 1.0) {
        return Err(invalid(format!(
            "test_ratio must be between 0 and 1 (exclusive), got {}",
            training.test_ratio
        )));
    }

    if training.workers == 0 || training.batch_size == 0 || training.epochs == 0 {
        return Err(invalid(
            "workers, batch_size and epochs must be at least 1".to_string(),
        ));
    }

    if !(0.0..1.0).contains(&training.dropout) {
        return Err(invalid(format!(
            "dropout must be in [0, 1), got {}",
            training.dropout
        )));
    }

    if training.learning_rate <= 0.0 || training.min_lr < 0.0 {
        return Err(invalid("learning rates must be positive".to_string()));
    }

    Ok(())
}

fn validate_alerts(config: &Config) -> Result<()> {
    let section = &config.alerts;

    if !(1..=alerts::MAX_VALIDITY_HOURS).contains(&section.validity_hours) {
        return Err(invalid(format!(
            "validity_hours must be between 1 and {}, got {}",
            alerts::MAX_VALIDITY_HOURS,
            section.validity_hours
        )));
    }

    if section.default_radius_km <= 0.0 {
        return Err(Error::InvalidRadius {
            value: section.default_radius_km,
        });
    }

    if !(confidence::MIN..=confidence::MAX).contains(&section.default_min_confidence) {
        return Err(Error::InvalidConfidence {
            value: section.default_min_confidence,
        });
    }

    Ok(())
}

fn validate_storage(config: &Config) -> Result<()> {
    let storage = &config.storage;

    if storage.max_stored_files == 0 || storage.prediction_retention == 0 {
        return Err(invalid(
            "max_stored_files and prediction_retention must be at least 1".to_string(),
        ));
    }

    if storage.allowed_extensions.is_empty() {
        return Err(invalid("allowed_extensions must not be empty".to_string()));
    }

    Ok(())
}
