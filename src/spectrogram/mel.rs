//! Mel power spectrogram and decibel scaling.

use crate::constants::spectrogram::AMIN;
use crate::error::{Error, Result};
use realfft::{RealFftPlanner, RealToComplex};
use std::sync::Arc;

/// Slaney mel scale: linear below 1 kHz, logarithmic above.
const F_SP: f64 = 200.0 / 3.0;
const MIN_LOG_HZ: f64 = 1000.0;
const MIN_LOG_MEL: f64 = MIN_LOG_HZ / F_SP;

fn log_step() -> f64 {
    6.4f64.ln() / 27.0
}

/// Convert Hz to Slaney mel.
pub fn hz_to_mel(hz: f64) -> f64 {
    if hz >= MIN_LOG_HZ {
        MIN_LOG_MEL + (hz / MIN_LOG_HZ).ln() / log_step()
    } else {
        hz / F_SP
    }
}

/// Convert Slaney mel to Hz.
pub fn mel_to_hz(mel: f64) -> f64 {
    if mel >= MIN_LOG_MEL {
        MIN_LOG_HZ * (log_step() * (mel - MIN_LOG_MEL)).exp()
    } else {
        F_SP * mel
    }
}

/// Triangular mel filters with Slaney area normalization, `n_mels x (n_fft/2 + 1)`.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
pub fn mel_filterbank(sample_rate: u32, n_fft: usize, n_mels: usize) -> Vec<Vec<f32>> {
    let n_bins = n_fft / 2 + 1;
    let nyquist = f64::from(sample_rate) / 2.0;

    let fft_freqs: Vec<f64> = (0..n_bins)
        .map(|k| k as f64 * nyquist / (n_bins - 1) as f64)
        .collect();

    let max_mel = hz_to_mel(nyquist);
    let mel_points: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(max_mel * i as f64 / (n_mels + 1) as f64))
        .collect();

    (0..n_mels)
        .map(|m| {
            let (left, center, right) = (mel_points[m], mel_points[m + 1], mel_points[m + 2]);
            let norm = 2.0 / (right - left);
            fft_freqs
                .iter()
                .map(|&f| {
                    let lower = (f - left) / (center - left);
                    let upper = (right - f) / (right - center);
                    (lower.min(upper).max(0.0) * norm) as f32
                })
                .collect()
        })
        .collect()
}

/// Periodic Hann window.
#[allow(clippy::cast_precision_loss)]
pub fn hann_window(len: usize) -> Vec<f32> {
    (0..len)
        .map(|n| {
            let phase = 2.0 * std::f64::consts::PI * n as f64 / len as f64;
            #[allow(clippy::cast_possible_truncation)]
            let w = (0.5 - 0.5 * phase.cos()) as f32;
            w
        })
        .collect()
}

/// Log-scaled mel spectrogram, row-major by mel band (band 0 is the lowest).
#[derive(Debug, Clone)]
pub struct DbSpectrogram {
    /// Number of mel bands (rows).
    pub n_mels: usize,
    /// Number of frames (columns).
    pub n_frames: usize,
    /// Decibel values relative to the loudest cell.
    pub data: Vec<f32>,
}

impl DbSpectrogram {
    /// Value at `(band, frame)`.
    pub fn get(&self, band: usize, frame: usize) -> f32 {
        self.data[band * self.n_frames + frame]
    }

    /// Minimum and maximum over all cells.
    pub fn range(&self) -> (f32, f32) {
        self.data
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            })
    }
}

/// Short-time Fourier transform followed by mel projection.
pub struct MelSpectrogram {
    n_fft: usize,
    hop_length: usize,
    top_db: f32,
    window: Vec<f32>,
    filters: Vec<Vec<f32>>,
    fft: Arc<dyn RealToComplex<f32>>,
}

impl std::fmt::Debug for MelSpectrogram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MelSpectrogram")
            .field("n_fft", &self.n_fft)
            .field("hop_length", &self.hop_length)
            .field("n_mels", &self.filters.len())
            .finish_non_exhaustive()
    }
}

impl MelSpectrogram {
    /// Plan the transform for the given parameters.
    pub fn new(
        sample_rate: u32,
        n_fft: usize,
        hop_length: usize,
        n_mels: usize,
        top_db: f32,
    ) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        Self {
            n_fft,
            hop_length,
            top_db,
            window: hann_window(n_fft),
            filters: mel_filterbank(sample_rate, n_fft, n_mels),
            fft: planner.plan_fft_forward(n_fft),
        }
    }

    /// Number of centred frames produced for `len` samples.
    pub const fn frame_count(&self, len: usize) -> usize {
        1 + len / self.hop_length
    }

    /// Mel power spectrogram in decibels, floored `top_db` below the peak.
    pub fn compute_db(&self, samples: &[f32]) -> Result<DbSpectrogram> {
        let power = self.power_mel(samples)?;
        Ok(self.power_to_db(power))
    }

    fn power_mel(&self, samples: &[f32]) -> Result<DbSpectrogram> {
        let pad = self.n_fft / 2;
        let mut padded = vec![0.0f32; samples.len() + 2 * pad];
        padded[pad..pad + samples.len()].copy_from_slice(samples);

        let n_frames = self.frame_count(samples.len());
        let n_mels = self.filters.len();
        let mut data = vec![0.0f32; n_mels * n_frames];

        let mut frame = self.fft.make_input_vec();
        let mut spectrum = self.fft.make_output_vec();
        let mut power = vec![0.0f32; spectrum.len()];

        for t in 0..n_frames {
            let start = t * self.hop_length;
            for ((dst, &src), &w) in frame
                .iter_mut()
                .zip(&padded[start..start + self.n_fft])
                .zip(&self.window)
            {
                *dst = src * w;
            }

            self.fft
                .process(&mut frame, &mut spectrum)
                .map_err(|e| Error::Spectrogram {
                    reason: format!("FFT failed: {e}"),
                })?;

            for (p, c) in power.iter_mut().zip(&spectrum) {
                *p = c.norm_sqr();
            }

            for (m, filter) in self.filters.iter().enumerate() {
                data[m * n_frames + t] = filter.iter().zip(&power).map(|(w, p)| w * p).sum();
            }
        }

        Ok(DbSpectrogram {
            n_mels,
            n_frames,
            data,
        })
    }

    fn power_to_db(&self, mut spec: DbSpectrogram) -> DbSpectrogram {
        let peak = spec.data.iter().copied().fold(0.0f32, f32::max);
        let reference = 10.0 * peak.max(AMIN).log10();

        for v in &mut spec.data {
            *v = 10.0 * v.max(AMIN).log10() - reference;
        }

        let ceiling = spec.data.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let floor = ceiling - self.top_db;
        for v in &mut spec.data {
            *v = v.max(floor);
        }
        spec
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp, clippy::cast_precision_loss)]
mod tests {
    use super::*;

    #[test]
    fn test_mel_scale_round_trip_and_breakpoint() {
        assert!((hz_to_mel(1000.0) - 15.0).abs() < 1e-9);
        for hz in [0.0, 440.0, 1000.0, 4000.0, 11_025.0] {
            assert!((mel_to_hz(hz_to_mel(hz)) - hz).abs() < 1e-6);
        }
    }

    #[test]
    fn test_filterbank_shape_and_non_negative() {
        let fb = mel_filterbank(22_050, 2048, 128);
        assert_eq!(fb.len(), 128);
        assert!(fb.iter().all(|row| row.len() == 1025));
        assert!(fb.iter().flatten().all(|&w| w >= 0.0));
        assert!(fb.iter().all(|row| row.iter().any(|&w| w > 0.0)));
    }

    #[test]
    fn test_hann_window_is_periodic() {
        let w = hann_window(8);
        assert_eq!(w[0], 0.0);
        assert!((w[4] - 1.0).abs() < 1e-6);
        assert!((w[1] - w[7]).abs() < 1e-6);
    }

    #[test]
    fn test_frame_count_matches_centred_stft() {
        let mel = MelSpectrogram::new(22_050, 2048, 512, 128, 80.0);
        assert_eq!(mel.frame_count(22_050), 44);
        assert_eq!(mel.frame_count(1), 1);
    }

    #[test]
    fn test_db_peak_is_zero_and_floor_applied() {
        let mel = MelSpectrogram::new(22_050, 2048, 512, 128, 80.0);
        let tone: Vec<f32> = (0..22_050)
            .map(|i| (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / 22_050.0).sin())
            .collect();
        let db = mel.compute_db(&tone).unwrap();
        let (lo, hi) = db.range();
        assert!(hi.abs() < 1e-4);
        assert!(lo >= -80.0 - 1e-4);
        assert_eq!(db.n_mels, 128);
    }

    #[test]
    fn test_silence_is_flat() {
        let mel = MelSpectrogram::new(22_050, 2048, 512, 128, 80.0);
        let db = mel.compute_db(&vec![0.0; 4096]).unwrap();
        let (lo, hi) = db.range();
        assert_eq!(lo, hi);
    }
}
