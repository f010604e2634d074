use std::io::Cursor;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::imageops::FilterType;
use image::{ImageFormat, RgbaImage};
use log::debug;

use crate::TallerError;

const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

/// Decodes an uploaded photo and scales it to `target_height` pixels, keeping the aspect ratio.
/// When the scaled width would exceed `max_width` the image is shrunk further to fit.
pub fn decode_and_scale(
    bytes: &[u8],
    target_height: u32,
    max_width: u32,
) -> Result<RgbaImage, TallerError> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| TallerError::ImageDecode { source: e })?
        .to_rgba8();
    let (width, height) = decoded.dimensions();
    if width == 0 || height == 0 {
        return Err(TallerError::InvalidImageData {
            reason: "image has no pixels".to_string(),
        });
    }

    let scale = target_height as f64 / height as f64;
    let mut new_width = (width as f64 * scale).round().max(1.) as u32;
    let mut new_height = target_height;
    if new_width > max_width {
        new_width = max_width;
        new_height = ((height as f64 * max_width as f64 / width as f64).round() as u32).max(1);
    }
    debug!(
        "Scaling photo from {}x{} to {}x{}",
        width, height, new_width, new_height
    );

    Ok(image::imageops::resize(
        &decoded,
        new_width,
        new_height,
        FilterType::Triangle,
    ))
}

/// Encodes the buffer as a PNG data URL so it can travel as text through the shared store.
pub fn encode_png_data_url(image: &RgbaImage) -> Result<String, TallerError> {
    let mut png = Cursor::new(Vec::new());
    image
        .write_to(&mut png, ImageFormat::Png)
        .map_err(|e| TallerError::ImageEncode { source: e })?;
    Ok(format!(
        "{}{}",
        PNG_DATA_URL_PREFIX,
        STANDARD.encode(png.into_inner())
    ))
}

pub fn decode_png_data_url(data_url: &str) -> Result<RgbaImage, TallerError> {
    let payload =
        data_url
            .strip_prefix(PNG_DATA_URL_PREFIX)
            .ok_or_else(|| TallerError::InvalidImageData {
                reason: "not a PNG data URL".to_string(),
            })?;
    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| TallerError::InvalidImageData {
            reason: format!("invalid base64 payload: {}", e),
        })?;
    Ok(image::load_from_memory_with_format(&bytes, ImageFormat::Png)
        .map_err(|e| TallerError::ImageDecode { source: e })?
        .to_rgba8())
}
