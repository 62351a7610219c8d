//! Audio loading: decode, down-mix, resample, chunk.

mod chunker;
mod decode;
mod resample;

pub use chunker::{AudioChunk, chunk_for_training};
pub use decode::{DecodedAudio, decode_audio_bytes, decode_audio_file};
pub use resample::resample;

use crate::error::Result;
use std::path::Path;
use tracing::debug;

/// Mono waveform at a known sample rate.
#[derive(Debug, Clone)]
pub struct AudioClip {
    /// Samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl AudioClip {
    /// Duration in seconds.
    #[allow(clippy::cast_precision_loss)]
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Decode `path` and resample it to `target_rate`.
pub fn load_clip(path: &Path, target_rate: u32) -> Result<AudioClip> {
    let decoded = decode_audio_file(path)?;
    debug!(
        "Decoded {}: {:.2}s at {} Hz",
        path.display(),
        decoded.duration_secs,
        decoded.sample_rate
    );

    let samples = resample(decoded.samples, decoded.sample_rate, target_rate)?;
    Ok(AudioClip {
        samples,
        sample_rate: target_rate,
    })
}
