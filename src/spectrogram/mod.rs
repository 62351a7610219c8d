//! Audio to fixed-size RGB spectrogram images.
//!
//! The image is the only representation the feature backbone accepts, so
//! every clip goes through the same chain: resample, mel power spectrum,
//! decibel compression, colour-mapped rendering, Lanczos resize.

mod colormap;
mod mel;
mod render;

pub use colormap::magma;
pub use mel::{DbSpectrogram, MelSpectrogram, hann_window, hz_to_mel, mel_filterbank, mel_to_hz};
pub use render::ensure_rgb;

use crate::audio::resample;
use crate::config::SpectrogramConfig;
use crate::error::{Error, Result};
use image::RgbImage;
use tracing::debug;

/// Converts waveforms into backbone-ready spectrogram images.
#[derive(Debug)]
pub struct SpectrogramGenerator {
    config: SpectrogramConfig,
    mel: MelSpectrogram,
}

impl SpectrogramGenerator {
    /// Build a generator for the given parameters.
    pub fn new(config: &SpectrogramConfig) -> Self {
        let mel = MelSpectrogram::new(
            config.sample_rate,
            config.n_fft,
            config.hop_length,
            config.n_mels,
            config.top_db,
        );
        Self {
            config: config.clone(),
            mel,
        }
    }

    /// Side of the produced image in pixels.
    pub const fn image_size(&self) -> u32 {
        self.config.image_size
    }

    /// Analysis sample rate in Hz.
    pub const fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    /// Produce an `image_size x image_size` RGB spectrogram.
    ///
    /// Audio at another rate is resampled first. Deterministic for identical input.
    pub fn generate(&self, samples: &[f32], sample_rate: u32) -> Result<RgbImage> {
        if samples.is_empty() {
            return Err(Error::Spectrogram {
                reason: "audio is empty".to_string(),
            });
        }
        if sample_rate == 0 {
            return Err(Error::Spectrogram {
                reason: "sample rate is zero".to_string(),
            });
        }
        if samples.iter().any(|s| !s.is_finite()) {
            return Err(Error::Spectrogram {
                reason: "audio contains non-finite samples".to_string(),
            });
        }

        let resampled;
        let samples = if sample_rate == self.config.sample_rate {
            samples
        } else {
            resampled = resample(samples.to_vec(), sample_rate, self.config.sample_rate)?;
            resampled.as_slice()
        };

        let db = self.mel.compute_db(samples)?;
        debug!(
            "Spectrogram: {} samples -> {} mel bands x {} frames",
            samples.len(),
            db.n_mels,
            db.n_frames
        );

        let canvas = render::render(&db, self.config.render_size);
        Ok(render::resize(canvas, self.config.image_size))
    }
}

/// Scale 8-bit pixels to the backbone's [-1, 1] input range, NHWC order.
pub fn normalize_for_backbone(image: &RgbImage) -> Vec<f32> {
    image
        .as_raw()
        .iter()
        .map(|&p| f32::from(p) / 127.5 - 1.0)
        .collect()
}
