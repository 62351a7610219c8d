//! Perceptual "magma" colour map.
//!
//! Sixth-degree polynomial fit of the matplotlib map, accurate to within a
//! couple of 8-bit steps across the whole range.

const COEFFS: [[f32; 3]; 7] = [
    [-0.002_136_485, -0.000_749_655, -0.005_386_128],
    [0.251_660_54, 0.677_523_2, 2.494_026_6],
    [8.353_717, -3.577_719_5, 0.314_467_9],
    [-27.668_733, 14.264_731, -13.649_213],
    [52.176_14, -27.943_605, 12.944_169],
    [-50.768_524, 29.046_583, 4.234_153],
    [18.655_705, -11.489_773, -5.601_961_5],
];

/// Map `t` in [0, 1] to an RGB triple. Values outside the range are clamped.
pub fn magma(t: f32) -> [u8; 3] {
    let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
    let mut rgb = [0u8; 3];
    for (channel, out) in rgb.iter_mut().enumerate() {
        let value = COEFFS
            .iter()
            .rev()
            .fold(0.0f32, |acc, c| acc.mul_add(t, c[channel]));
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        {
            *out = (value.clamp(0.0, 1.0) * 255.0).round() as u8;
        }
    }
    rgb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints() {
        let low = magma(0.0);
        assert!(low.iter().all(|&c| c <= 4));

        let high = magma(1.0);
        assert!(high[0] >= 245 && high[1] >= 240);
        assert!((180..=200).contains(&high[2]));
    }

    #[test]
    fn test_out_of_range_is_clamped() {
        assert_eq!(magma(-3.0), magma(0.0));
        assert_eq!(magma(7.0), magma(1.0));
        assert_eq!(magma(f32::NAN), magma(0.0));
    }

    #[test]
    fn test_brightness_increases() {
        let luma = |c: [u8; 3]| u32::from(c[0]) + u32::from(c[1]) + u32::from(c[2]);
        let mut previous = 0;
        for i in 0..=10u8 {
            let current = luma(magma(f32::from(i) / 10.0));
            assert!(current >= previous);
            previous = current;
        }
    }
}
