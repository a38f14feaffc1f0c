//! Deterministic image downscale + iterative JPEG quality reduction to hit
//! a soft byte budget before an image is shipped to a vision provider.

use image::{codecs::jpeg::JpegEncoder, imageops::FilterType};
use std::io::Cursor;
use thiserror::Error;

/// Lowest quality the iterative reduction will reach. The byte budget is
/// soft: output may still exceed `target_bytes` once the floor is hit.
const QUALITY_FLOOR: u8 = 20;
const QUALITY_STEP: u8 = 10;

const DEFAULT_MAX_DIMENSION: u32 = 1024;
const DEFAULT_QUALITY: u8 = 80;
const DEFAULT_TARGET_BYTES: usize = 100 * 1024;

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("image decode/encode failed: {0}")]
    Codec(#[from] image::ImageError),
}

#[derive(Clone, Debug)]
pub struct CompressOptions {
    pub max_width: u32,
    pub max_height: u32,
    pub quality: u8,
    pub target_bytes: usize,
}

impl Default for CompressOptions {
    fn default() -> Self {
        Self {
            max_width: DEFAULT_MAX_DIMENSION,
            max_height: DEFAULT_MAX_DIMENSION,
            quality: DEFAULT_QUALITY,
            target_bytes: DEFAULT_TARGET_BYTES,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CompressedImage {
    /// JPEG-encoded output.
    pub buffer: Vec<u8>,
    pub original_size: usize,
    pub compressed_size: usize,
    /// original_size / compressed_size.
    pub ratio: f64,
    pub width: u32,
    pub height: u32,
}

/// Compress an encoded image down to (at most) the configured dimensions
/// and iteratively reduce JPEG quality toward the byte budget.
///
/// Deterministic for a given input and option set. Each re-encode starts
/// from the once-decoded source pixels, never from an earlier JPEG pass, so
/// artifacts do not compound. Dimensions are never upscaled; a source that
/// already fits keeps its size and only goes through one re-encode.
///
/// CPU-bound and synchronous — callers on an async runtime should wrap this
/// in `spawn_blocking`.
pub fn compress(input: &[u8], opts: &CompressOptions) -> Result<CompressedImage, TranscodeError> {
    let original_size = input.len();
    let source = image::load_from_memory(input)?;

    let (width, height) = fit_dimensions(
        source.width(),
        source.height(),
        opts.max_width,
        opts.max_height,
    );
    let resized = if (width, height) == (source.width(), source.height()) {
        source
    } else {
        source.resize(width, height, FilterType::Lanczos3)
    };
    // JPEG has no alpha channel; normalize once before the encode loop.
    let pixels = resized.to_rgb8();

    let mut quality = opts.quality.clamp(QUALITY_FLOOR, 100);
    let mut buffer = encode_jpeg(&pixels, quality)?;
    while buffer.len() > opts.target_bytes && quality > QUALITY_FLOOR {
        quality = quality.saturating_sub(QUALITY_STEP).max(QUALITY_FLOOR);
        buffer = encode_jpeg(&pixels, quality)?;
    }

    let compressed_size = buffer.len();
    Ok(CompressedImage {
        buffer,
        original_size,
        compressed_size,
        ratio: original_size as f64 / compressed_size.max(1) as f64,
        width: pixels.width(),
        height: pixels.height(),
    })
}

/// Largest dimensions fitting within the maxima while preserving aspect
/// ratio. Sources that already fit are returned unchanged (no upscaling).
fn fit_dimensions(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width <= max_width && height <= max_height {
        return (width, height);
    }
    let width_ratio = max_width as f64 / width as f64;
    let height_ratio = max_height as f64 / height as f64;
    let ratio = width_ratio.min(height_ratio);
    (
        ((width as f64 * ratio).round() as u32).max(1),
        ((height as f64 * ratio).round() as u32).max(1),
    )
}

fn encode_jpeg(pixels: &image::RgbImage, quality: u8) -> Result<Vec<u8>, TranscodeError> {
    let mut out = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut out, quality);
    pixels.write_with_encoder(encoder)?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

    /// Deterministic high-frequency pattern; compresses poorly, so it
    /// actually exercises the quality-reduction loop.
    fn noisy_png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([
                ((x.wrapping_mul(31) + y.wrapping_mul(7)) % 256) as u8,
                ((x.wrapping_mul(13) + y.wrapping_mul(23)) % 256) as u8,
                ((x.wrapping_mul(7) + y.wrapping_mul(3)) % 256) as u8,
            ])
        });
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn small_image_keeps_its_dimensions() {
        let input = noisy_png(100, 80);
        let result = compress(&input, &CompressOptions::default()).unwrap();
        assert_eq!((result.width, result.height), (100, 80));
    }

    #[test]
    fn oversized_image_is_scaled_preserving_aspect_ratio() {
        let input = noisy_png(2048, 1024);
        let result = compress(&input, &CompressOptions::default()).unwrap();
        assert_eq!((result.width, result.height), (1024, 512));
    }

    #[test]
    fn output_is_deterministic() {
        let input = noisy_png(640, 480);
        let a = compress(&input, &CompressOptions::default()).unwrap();
        let b = compress(&input, &CompressOptions::default()).unwrap();
        assert_eq!(a.buffer, b.buffer);
    }

    #[test]
    fn unreachable_target_stops_at_quality_floor() {
        let input = noisy_png(640, 480);
        let opts = CompressOptions {
            target_bytes: 1,
            ..CompressOptions::default()
        };
        let result = compress(&input, &opts).unwrap();
        // The budget is soft: the loop must terminate with usable output
        // even though one byte is unreachable.
        assert!(!result.buffer.is_empty());
        assert!(result.compressed_size > opts.target_bytes);
    }

    #[test]
    fn reducing_quality_never_grows_the_output() {
        let input = noisy_png(640, 480);
        let relaxed = compress(
            &input,
            &CompressOptions {
                target_bytes: usize::MAX,
                ..CompressOptions::default()
            },
        )
        .unwrap();
        let floored = compress(
            &input,
            &CompressOptions {
                target_bytes: 1,
                ..CompressOptions::default()
            },
        )
        .unwrap();
        assert!(floored.compressed_size <= relaxed.compressed_size);
    }

    #[test]
    fn reports_sizes_and_ratio() {
        let input = noisy_png(1600, 1200);
        let result = compress(&input, &CompressOptions::default()).unwrap();
        assert_eq!(result.original_size, input.len());
        assert_eq!(result.compressed_size, result.buffer.len());
        assert!(result.ratio > 0.0);
    }

    #[test]
    fn garbage_input_is_a_codec_error() {
        let err = compress(b"definitely not an image", &CompressOptions::default()).unwrap_err();
        assert!(matches!(err, TranscodeError::Codec(_)));
    }
}
