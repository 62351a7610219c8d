//! Rasterize a decibel spectrogram into an RGB image.

use super::colormap::magma;
use super::mel::DbSpectrogram;
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};

/// Draw `spec` flat onto a `canvas x canvas` image, lowest band at the bottom.
///
/// Colours are normalized between the matrix minimum and maximum; a constant
/// matrix maps to the bottom of the colour map.
pub fn render(spec: &DbSpectrogram, canvas: u32) -> RgbImage {
    let (lo, hi) = spec.range();
    let span = hi - lo;
    let scale = |v: f32| if span > 0.0 { (v - lo) / span } else { 0.0 };

    let width = canvas as usize;
    let columns: Vec<usize> = (0..width).map(|x| x * spec.n_frames / width).collect();

    RgbImage::from_fn(canvas, canvas, |x, y| {
        let row = (canvas - 1 - y) as usize * spec.n_mels / canvas as usize;
        let frame = columns[x as usize];
        Rgb(magma(scale(spec.get(row, frame))))
    })
}

/// Resample to `size x size` with a Lanczos filter.
pub fn resize(image: RgbImage, size: u32) -> RgbImage {
    if image.width() == size && image.height() == size {
        return image;
    }
    ensure_rgb(DynamicImage::ImageRgb8(image).resize_exact(size, size, FilterType::Lanczos3))
}

/// Force three colour channels: alpha is dropped, grayscale is replicated.
pub fn ensure_rgb(image: DynamicImage) -> RgbImage {
    match image {
        DynamicImage::ImageRgb8(rgb) => rgb,
        other => other.to_rgb8(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgba, RgbaImage};

    fn ramp(n_mels: usize, n_frames: usize) -> DbSpectrogram {
        #[allow(clippy::cast_precision_loss)]
        let data = (0..n_mels)
            .flat_map(|band| std::iter::repeat_n(band as f32, n_frames))
            .collect();
        DbSpectrogram {
            n_mels,
            n_frames,
            data,
        }
    }

    #[test]
    fn test_low_bands_render_at_bottom() {
        let image = render(&ramp(4, 3), 8);
        assert_eq!(image.dimensions(), (8, 8));
        assert_eq!(image.get_pixel(0, 7).0, magma(0.0));
        assert_eq!(image.get_pixel(0, 0).0, magma(1.0));
    }

    #[test]
    fn test_constant_matrix_uses_bottom_colour() {
        let flat = DbSpectrogram {
            n_mels: 2,
            n_frames: 2,
            data: vec![-80.0; 4],
        };
        let image = render(&flat, 4);
        assert!(image.pixels().all(|p| p.0 == magma(0.0)));
    }

    #[test]
    fn test_resize_to_target() {
        let image = resize(render(&ramp(16, 10), 300), 224);
        assert_eq!(image.dimensions(), (224, 224));
    }

    #[test]
    fn test_ensure_rgb_drops_alpha() {
        let rgba = RgbaImage::from_pixel(2, 2, Rgba([10, 20, 30, 0]));
        let rgb = ensure_rgb(DynamicImage::ImageRgba8(rgba));
        assert_eq!(rgb.get_pixel(1, 1).0, [10, 20, 30]);
    }

    #[test]
    fn test_ensure_rgb_replicates_grayscale() {
        let gray = GrayImage::from_pixel(2, 2, Luma([77]));
        let rgb = ensure_rgb(DynamicImage::ImageLuma8(gray));
        assert_eq!(rgb.get_pixel(0, 0).0, [77, 77, 77]);
    }
}
