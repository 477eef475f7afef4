//! Image derivatives: orientation-corrected WebP thumbnail and placeholder.

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageDecoder, ImageReader};
use std::io::Cursor;

/// Target widths and WebP qualities for the two image derivatives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageDerivativeOptions {
    pub thumbnail_width: u32,
    pub thumbnail_quality: f32,
    pub placeholder_width: u32,
    pub placeholder_quality: f32,
}

impl Default for ImageDerivativeOptions {
    fn default() -> Self {
        Self {
            thumbnail_width: 800,
            thumbnail_quality: 80.0,
            placeholder_width: 20,
            placeholder_quality: 20.0,
        }
    }
}

impl ImageDerivativeOptions {
    pub fn from_config(config: &mediaflow_core::Config) -> Self {
        Self {
            thumbnail_width: config.thumbnail_width,
            thumbnail_quality: config.thumbnail_quality,
            placeholder_width: config.placeholder_width,
            placeholder_quality: config.placeholder_quality,
        }
    }
}

/// Encoded derivatives plus the dimensions of the upright source image.
#[derive(Debug, Clone)]
pub struct ImageDerivatives {
    pub thumbnail: Vec<u8>,
    pub placeholder: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Decode `data` and apply its EXIF orientation, so the result is displayed upright.
pub fn decode_upright(data: &[u8]) -> Result<DynamicImage> {
    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .context("Failed to detect image format")?;
    let mut decoder = reader.into_decoder().context("Unsupported image format")?;
    let orientation = decoder
        .orientation()
        .context("Failed to read image orientation")?;
    let mut img = DynamicImage::from_decoder(decoder).context("Failed to decode image")?;
    img.apply_orientation(orientation);
    Ok(img)
}

/// Height that keeps the aspect ratio of a `width`×`height` image scaled to `target_width`.
pub fn scaled_height(width: u32, height: u32, target_width: u32) -> u32 {
    if width == 0 {
        return 1;
    }
    let h = (height as f64 * target_width as f64 / width as f64).round() as u32;
    h.max(1)
}

/// Resize to exactly `target_width`, preserving aspect ratio, and encode as lossy WebP.
pub fn encode_webp(img: &DynamicImage, target_width: u32, quality: f32) -> Result<Vec<u8>> {
    if target_width == 0 {
        return Err(anyhow!("Target width must be positive"));
    }
    let (width, height) = img.dimensions();
    let target_height = scaled_height(width, height, target_width);
    let resized = img.resize_exact(target_width, target_height, FilterType::Lanczos3);

    let rgba = resized.to_rgba8();
    let encoder = webp::Encoder::from_rgba(&rgba, target_width, target_height);
    let webp_data = encoder.encode(quality.clamp(0.0, 100.0));
    Ok(webp_data.to_vec())
}

/// Decode the source once and render both derivatives. CPU-bound; run it on the
/// blocking pool.
pub fn render_derivatives(data: &[u8], options: ImageDerivativeOptions) -> Result<ImageDerivatives> {
    let img = decode_upright(data)?;
    let (width, height) = img.dimensions();

    let thumbnail = encode_webp(&img, options.thumbnail_width, options.thumbnail_quality)
        .context("Failed to encode thumbnail")?;
    let placeholder = encode_webp(&img, options.placeholder_width, options.placeholder_quality)
        .context("Failed to encode placeholder")?;

    tracing::debug!(
        width = width,
        height = height,
        thumbnail_bytes = thumbnail.len(),
        placeholder_bytes = placeholder.len(),
        "Image derivatives rendered"
    );

    Ok(ImageDerivatives {
        thumbnail,
        placeholder,
        width,
        height,
    })
}

/// [`render_derivatives`] on the blocking thread pool.
pub async fn render_derivatives_blocking(
    data: Vec<u8>,
    options: ImageDerivativeOptions,
) -> Result<ImageDerivatives> {
    tokio::task::spawn_blocking(move || render_derivatives(&data, options))
        .await
        .map_err(|e| anyhow!("Image rendering task failed: {}", e))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};

    fn create_test_image(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([255, 0, 0, 255]));
        let mut buffer = Vec::new();
        let mut cursor = Cursor::new(&mut buffer);
        img.write_to(&mut cursor, ImageFormat::Png).unwrap();
        buffer
    }

    fn webp_dimensions(data: &[u8]) -> (u32, u32) {
        image::load_from_memory_with_format(data, ImageFormat::WebP)
            .unwrap()
            .dimensions()
    }

    #[test]
    fn test_scaled_height_preserves_aspect_ratio() {
        assert_eq!(scaled_height(1600, 1200, 800), 600);
        assert_eq!(scaled_height(100, 50, 800), 400);
        assert_eq!(scaled_height(4000, 10, 20), 1);
    }

    #[test]
    fn test_render_derivatives_widths() {
        let data = create_test_image(200, 100);
        let derivatives = render_derivatives(&data, ImageDerivativeOptions::default()).unwrap();

        assert_eq!((derivatives.width, derivatives.height), (200, 100));
        assert_eq!(webp_dimensions(&derivatives.thumbnail), (800, 400));
        assert_eq!(webp_dimensions(&derivatives.placeholder), (20, 10));
    }

    #[test]
    fn test_render_derivatives_rejects_garbage() {
        let result = render_derivatives(b"not an image", ImageDerivativeOptions::default());
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_render_on_blocking_pool() {
        let data = create_test_image(40, 40);
        let derivatives = render_derivatives_blocking(data, ImageDerivativeOptions::default())
            .await
            .unwrap();
        assert!(!derivatives.thumbnail.is_empty());
        assert!(derivatives.placeholder.len() < derivatives.thumbnail.len());
    }
}
