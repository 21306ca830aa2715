//! Image decoding, annotation and EXIF helpers.

pub mod annotate;
pub mod gps;

use image::DynamicImage;

use crate::error::AppError;

/// Decode any supported image format from raw bytes.
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, AppError> {
    if bytes.is_empty() {
        return Err(AppError::Image("empty image data".to_string()));
    }
    image::load_from_memory(bytes).map_err(|e| AppError::Image(format!("decode: {e}")))
}
