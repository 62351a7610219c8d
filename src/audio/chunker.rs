//! Splitting clips into fixed-length training chunks.

/// A chunk of audio with its time offset.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Audio samples for this chunk.
    pub samples: Vec<f32>,
    /// Start time in seconds.
    pub start_time: f32,
    /// End time in seconds.
    pub end_time: f32,
}

/// Chunk a clip for training.
///
/// A clip no longer than `chunk_duration` is returned whole. Longer clips are
/// cut into back-to-back chunks of exactly `chunk_duration`; the trailing
/// partial chunk is discarded.
pub fn chunk_for_training(
    samples: &[f32],
    sample_rate: u32,
    chunk_duration: f32,
) -> Vec<AudioChunk> {
    if samples.is_empty() || sample_rate == 0 {
        return Vec::new();
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let chunk_samples = (chunk_duration * sample_rate as f32) as usize;

    #[allow(clippy::cast_precision_loss)]
    let seconds = |n: usize| n as f32 / sample_rate as f32;

    if chunk_samples == 0 || samples.len() <= chunk_samples {
        return vec![AudioChunk {
            samples: samples.to_vec(),
            start_time: 0.0,
            end_time: seconds(samples.len()),
        }];
    }

    samples
        .chunks_exact(chunk_samples)
        .enumerate()
        .map(|(i, chunk)| AudioChunk {
            samples: chunk.to_vec(),
            start_time: seconds(i * chunk_samples),
            end_time: seconds((i + 1) * chunk_samples),
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_short_clip_kept_whole() {
        let samples = vec![0.1; 30_000];
        let chunks = chunk_for_training(&samples, 10_000, 5.0);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].samples.len(), 30_000);
        assert_eq!(chunks[0].end_time, 3.0);
    }

    #[test]
    fn test_exact_length_is_one_chunk() {
        let samples = vec![0.0; 50_000];
        let chunks = chunk_for_training(&samples, 10_000, 5.0);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_partial_tail_discarded() {
        let samples = vec![0.0; 125_000]; // 12.5 s
        let chunks = chunk_for_training(&samples, 10_000, 5.0);
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.samples.len() == 50_000));
        assert_eq!(chunks[1].start_time, 5.0);
        assert_eq!(chunks[1].end_time, 10.0);
    }

    #[test]
    fn test_just_over_one_chunk_drops_remainder() {
        let samples = vec![0.0; 50_001];
        let chunks = chunk_for_training(&samples, 10_000, 5.0);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].samples.len(), 50_000);
    }

    #[test]
    fn test_empty_input() {
        assert!(chunk_for_training(&[], 10_000, 5.0).is_empty());
    }
}
