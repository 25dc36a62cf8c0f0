//! Image preprocessing filters for OCR
//!
//! Embossed card digits are low contrast under camera lighting. The region is
//! converted to grayscale and every pixel is pushed away from mid-gray so the
//! engine sees darker strokes on a lighter ground.

use image::{ImageFormat, RgbaImage};
use std::io::Cursor;

use super::VisionError;

/// Values below this are darkened, values at or above are brightened
pub const CONTRAST_PIVOT: u8 = 128;
/// How far each pixel is pushed away from the pivot
pub const CONTRAST_STEP: u8 = 50;

/// BT.601 luma, rounded to the nearest integer
#[inline]
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    (0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64).round() as u8
}

/// Contrast stretch around [`CONTRAST_PIVOT`], saturating at 0 and 255
#[inline]
pub fn stretch_contrast(value: u8) -> u8 {
    if value < CONTRAST_PIVOT {
        value.saturating_sub(CONTRAST_STEP)
    } else {
        value.saturating_add(CONTRAST_STEP)
    }
}

/// Grayscale + contrast stretch. Alpha is kept as is.
pub fn enhance_for_ocr(region: &RgbaImage) -> RgbaImage {
    let mut output = region.clone();
    for pixel in output.pixels_mut() {
        let value = stretch_contrast(luma(pixel[0], pixel[1], pixel[2]));
        pixel[0] = value;
        pixel[1] = value;
        pixel[2] = value;
    }
    output
}

/// Encode a raster as PNG for the recognition engine
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, VisionError> {
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, ImageFormat::Png)
        .map_err(|e| VisionError::Encode(e.to_string()))?;
    Ok(bytes.into_inner())
}
