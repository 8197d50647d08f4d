//! Image loading for vision-capable models.
//!
//! Files are decoded, resized to fit the vision budget while preserving
//! aspect ratio, re-encoded as JPEG, and returned base64-encoded.

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use image::GenericImageView;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use std::path::Path;

/// Images are fit into this square before upload.
pub const MAX_DIMENSION: u32 = 512;

/// JPEG quality used for re-encoding.
pub const JPEG_QUALITY: u8 = 80;

/// File extensions the read tool treats as images.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp"];

/// Whether the path has a recognized image extension.
pub fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let lowered = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&lowered.as_str())
        })
        .unwrap_or(false)
}

/// A processed image ready for a provider payload.
#[derive(Debug, Clone)]
pub struct ProcessedImage {
    pub base64_data: String,
    pub width: u32,
    pub height: u32,
}

impl ProcessedImage {
    /// One-line caption for the tool result text.
    pub fn caption(&self, path: &Path) -> String {
        format!(
            "Read image {} ({}x{}, JPEG)",
            path.display(),
            self.width,
            self.height
        )
    }
}

/// Load an image file, fit it into [`MAX_DIMENSION`]², and re-encode as
/// JPEG quality [`JPEG_QUALITY`].
pub fn load_and_fit(path: &Path) -> Result<ProcessedImage> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read image file {}", path.display()))?;
    let decoded = image::load_from_memory(&bytes)
        .with_context(|| format!("failed to decode image {}", path.display()))?;

    let (width, height) = decoded.dimensions();
    let resized = if width > MAX_DIMENSION || height > MAX_DIMENSION {
        decoded.resize(MAX_DIMENSION, MAX_DIMENSION, FilterType::Triangle)
    } else {
        decoded
    };
    let (out_width, out_height) = resized.dimensions();

    let mut encoded = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut encoded, JPEG_QUALITY);
    resized
        .to_rgb8()
        .write_with_encoder(encoder)
        .with_context(|| format!("failed to encode image {}", path.display()))?;

    Ok(ProcessedImage {
        base64_data: BASE64_STANDARD.encode(&encoded),
        width: out_width,
        height: out_height,
    })
}
