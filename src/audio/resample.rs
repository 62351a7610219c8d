//! Audio resampling using rubato.

use crate::error::{Error, Result};
use rubato::{FftFixedIn, Resampler};

/// Input block length fed to the FFT resampler.
const BLOCK_FRAMES: usize = 1024;

/// Resample mono audio to the target sample rate.
///
/// Returns the input unchanged if already at the target rate. The output
/// holds `ceil(len * to / from)` samples.
pub fn resample(samples: Vec<f32>, from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == 0 || to_rate == 0 {
        return Err(Error::Resample {
            reason: format!("invalid sample rates {from_rate} -> {to_rate}"),
        });
    }
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples);
    }

    let mut resampler =
        FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, BLOCK_FRAMES, 1, 1)
            .map_err(|e| Error::Resample {
                reason: e.to_string(),
            })?;

    let block = resampler.input_frames_next();
    let expected = expected_len(samples.len(), from_rate, to_rate);
    let mut output = Vec::with_capacity(expected + BLOCK_FRAMES);

    let mut padded: Vec<f32> = Vec::with_capacity(block);
    for chunk in samples.chunks(block) {
        let input = if chunk.len() == block {
            chunk
        } else {
            padded.clear();
            padded.extend_from_slice(chunk);
            padded.resize(block, 0.0);
            padded.as_slice()
        };
        process_block(&mut resampler, input, &mut output)?;
    }

    // The FFT resampler delays its output; flush until the expected length is covered.
    let silence = vec![0.0; block];
    while output.len() < expected + resampler.output_delay() {
        process_block(&mut resampler, &silence, &mut output)?;
    }

    let delay = resampler.output_delay().min(output.len());
    output.drain(..delay);
    output.truncate(expected);
    Ok(output)
}

fn process_block(
    resampler: &mut FftFixedIn<f32>,
    input: &[f32],
    output: &mut Vec<f32>,
) -> Result<()> {
    let resampled = resampler
        .process(&[input], None)
        .map_err(|e| Error::Resample {
            reason: e.to_string(),
        })?;

    if let Some(channel) = resampled.first() {
        output.extend_from_slice(channel);
    }
    Ok(())
}

#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn expected_len(input_len: usize, from_rate: u32, to_rate: u32) -> usize {
    (input_len as f64 * f64::from(to_rate) / f64::from(from_rate)).ceil() as usize
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[allow(clippy::cast_precision_loss)]
    fn tone(len: usize, rate: u32, freq: f32) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin())
            .collect()
    }

    #[test]
    fn test_resample_same_rate_returns_input() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(resample(samples.clone(), 22_050, 22_050).unwrap(), samples);
    }

    #[test]
    fn test_resample_empty_input() {
        assert!(resample(Vec::new(), 44_100, 22_050).unwrap().is_empty());
    }

    #[test]
    fn test_resample_zero_rate_is_error() {
        assert!(matches!(
            resample(vec![0.0; 10], 0, 22_050),
            Err(Error::Resample { .. })
        ));
    }

    #[test]
    fn test_resample_44100_to_22050_exact_length() {
        let output = resample(tone(44_100, 44_100, 440.0), 44_100, 22_050).unwrap();
        assert_eq!(output.len(), 22_050);
    }

    #[test]
    fn test_resample_16000_to_22050_exact_length() {
        let output = resample(tone(8_000, 16_000, 440.0), 16_000, 22_050).unwrap();
        assert_eq!(output.len(), 11_025);
    }

    #[test]
    fn test_resample_preserves_signal_energy() {
        let output = resample(tone(48_000, 48_000, 440.0), 48_000, 22_050).unwrap();
        let mid = &output[2_000..20_000];
        #[allow(clippy::cast_precision_loss)]
        let rms = (mid.iter().map(|s| s * s).sum::<f32>() / mid.len() as f32).sqrt();
        assert!((rms - std::f32::consts::FRAC_1_SQRT_2).abs() < 0.05, "rms {rms}");
    }
}
