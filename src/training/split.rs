//! Stratified train/test split.

use crate::error::{Error, Result};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// Sample indices for each side of a split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    /// Training indices.
    pub train: Vec<usize>,
    /// Held-out indices.
    pub test: Vec<usize>,
}

/// Split sample indices so every class appears on both sides.
///
/// Each class with `n` samples contributes `round(n * test_ratio)` test
/// samples, clamped to `[1, n - 1]`. Classes with fewer than two samples are
/// rejected. The same seed always produces the same split.
pub fn stratified_split(
    labels: &[usize],
    num_classes: usize,
    test_ratio: f64,
    seed: u64,
) -> Result<Split> {
    let mut by_class: Vec<Vec<usize>> = vec![Vec::new(); num_classes];
    for (index, &label) in labels.iter().enumerate() {
        let bucket = by_class.get_mut(label).ok_or_else(|| {
            Error::invalid_input(format!("label {label} is out of range for {num_classes} classes"))
        })?;
        bucket.push(index);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut split = Split {
        train: Vec::with_capacity(labels.len()),
        test: Vec::new(),
    };

    for (class, mut indices) in by_class.into_iter().enumerate() {
        let n = indices.len();
        if n < 2 {
            return Err(Error::invalid_input(format!(
                "class {class} has {n} sample(s); at least 2 are needed for a stratified split"
            )));
        }

        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let test_count = ((n as f64 * test_ratio).round() as usize).clamp(1, n - 1);

        indices.shuffle(&mut rng);
        let train = indices.split_off(test_count);
        split.test.extend(indices);
        split.train.extend(train);
    }

    split.train.shuffle(&mut rng);
    split.test.shuffle(&mut rng);
    Ok(split)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn count(indices: &[usize], labels: &[usize], class: usize) -> usize {
        indices.iter().filter(|&&i| labels[i] == class).count()
    }

    #[test]
    fn test_every_class_on_both_sides() {
        let labels = vec![0, 0, 0, 1, 1, 1];
        let split = stratified_split(&labels, 2, 0.3, 42).unwrap();
        assert_eq!(split.test.len(), 2);
        assert_eq!(split.train.len(), 4);
        for class in 0..2 {
            assert_eq!(count(&split.test, &labels, class), 1);
            assert_eq!(count(&split.train, &labels, class), 2);
        }
    }

    #[test]
    fn test_ratio_is_respected_per_class() {
        let labels: Vec<usize> = (0..20).map(|i| usize::from(i >= 10)).collect();
        let split = stratified_split(&labels, 2, 0.3, 7).unwrap();
        assert_eq!(count(&split.test, &labels, 0), 3);
        assert_eq!(count(&split.test, &labels, 1), 3);
    }

    #[test]
    fn test_clamps_to_keep_training_samples() {
        let labels = vec![0, 0];
        let split = stratified_split(&labels, 1, 0.9, 1).unwrap();
        assert_eq!(split.test.len(), 1);
        assert_eq!(split.train.len(), 1);
    }

    #[test]
    fn test_same_seed_same_split() {
        let labels: Vec<usize> = (0..30).map(|i| i % 3).collect();
        let a = stratified_split(&labels, 3, 0.3, 42).unwrap();
        let b = stratified_split(&labels, 3, 0.3, 42).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_partition_is_complete() {
        let labels: Vec<usize> = (0..17).map(|i| i % 2).collect();
        let split = stratified_split(&labels, 2, 0.3, 42).unwrap();
        let mut all: Vec<usize> = split.train.iter().chain(&split.test).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..17).collect::<Vec<_>>());
    }

    #[test]
    fn test_single_sample_class_rejected() {
        let err = stratified_split(&[0, 0, 1], 2, 0.3, 42).unwrap_err();
        assert!(err.is_input_error());
    }

    #[test]
    fn test_empty_class_rejected() {
        assert!(stratified_split(&[0, 0, 0], 2, 0.3, 42).is_err());
    }
}
