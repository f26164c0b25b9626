use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::io::Cursor;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("Failed to load image: {0}")]
    Load(#[from] image::ImageError),
    #[error("Failed to encode processed image: {0}")]
    Encode(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    pub enabled: bool,
    /// Images larger than this on either side are downscaled first.
    pub max_dimension: u32,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self { enabled: true, max_dimension: 2800 }
    }
}

/// Decode image bytes (PNG / JPEG / WEBP / …), normalize, and return PNG bytes.
pub fn preprocess(data: &[u8], config: &PreprocessConfig) -> Result<Vec<u8>, PreprocessError> {
    let img = image::load_from_memory(data)?;
    encode_as_png(normalize(img, config.max_dimension))
}

/// Best-effort variant: any failure hands back the original bytes so that
/// recognition still gets a chance at the untouched screenshot.
pub fn preprocess_or_original<'a>(data: &'a [u8], config: &PreprocessConfig) -> Cow<'a, [u8]> {
    if !config.enabled {
        return Cow::Borrowed(data);
    }
    match preprocess(data, config) {
        Ok(bytes) => Cow::Owned(bytes),
        Err(e) => {
            warn!("Preprocessing failed, using original image: {e}");
            Cow::Borrowed(data)
        }
    }
}

/// Downscale + grayscale + contrast stretch.
fn normalize(img: DynamicImage, max_dimension: u32) -> DynamicImage {
    let img = if img.width() > max_dimension || img.height() > max_dimension {
        img.resize(max_dimension, max_dimension, image::imageops::FilterType::Lanczos3)
    } else {
        img
    };

    let gray: GrayImage = img.to_luma8();

    let (min_px, max_px) = gray
        .pixels()
        .fold((255u8, 0u8), |(mn, mx), p| (mn.min(p[0]), mx.max(p[0])));

    if max_px <= min_px {
        return DynamicImage::ImageLuma8(gray);
    }

    let range = (max_px - min_px) as u32;
    let stretched: GrayImage = ImageBuffer::from_fn(gray.width(), gray.height(), |x, y| {
        let p = gray.get_pixel(x, y)[0];
        Luma([((p - min_px) as u32 * 255 / range) as u8])
    });

    DynamicImage::ImageLuma8(stretched)
}

fn encode_as_png(img: DynamicImage) -> Result<Vec<u8>, PreprocessError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| PreprocessError::Encode(e.to_string()))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_gray(width: u32, height: u32, value: u8) -> DynamicImage {
        DynamicImage::ImageLuma8(ImageBuffer::from_fn(width, height, |_, _| Luma([value])))
    }

    fn png_bytes(img: &DynamicImage) -> Vec<u8> {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png).unwrap();
        buf
    }

    #[test]
    fn uniform_screenshot_survives_normalization() {
        let result = normalize(solid_gray(10, 10, 128), 2800);
        assert_eq!((result.width(), result.height()), (10, 10));
    }

    #[test]
    fn low_contrast_gradient_is_stretched_to_full_range() {
        let img: GrayImage = ImageBuffer::from_fn(100, 1, |x, _| Luma([100 + (x / 2) as u8]));
        let gray = normalize(DynamicImage::ImageLuma8(img), 2800).to_luma8();
        assert_eq!(gray.pixels().map(|p| p[0]).min().unwrap(), 0);
        assert_eq!(gray.pixels().map(|p| p[0]).max().unwrap(), 255);
    }

    #[test]
    fn oversized_image_is_downscaled_to_limit() {
        let result = normalize(solid_gray(400, 100, 200), 200);
        assert!(result.width() <= 200 && result.height() <= 200);
    }

    #[test]
    fn preprocess_outputs_png() {
        let result = preprocess(&png_bytes(&solid_gray(4, 4, 100)), &PreprocessConfig::default()).unwrap();
        assert_eq!(&result[..4], b"\x89PNG");
    }

    #[test]
    fn undecodable_bytes_pass_through_unchanged() {
        let data = b"definitely not an image";
        let out = preprocess_or_original(data, &PreprocessConfig::default());
        assert!(matches!(out, Cow::Borrowed(_)));
        assert_eq!(&*out, data);
        assert!(preprocess(data, &PreprocessConfig::default()).is_err());
    }

    #[test]
    fn disabled_preprocessing_is_a_no_op() {
        let data = png_bytes(&solid_gray(4, 4, 100));
        let cfg = PreprocessConfig { enabled: false, ..PreprocessConfig::default() };
        assert_eq!(&*preprocess_or_original(&data, &cfg), &data[..]);
    }
}
