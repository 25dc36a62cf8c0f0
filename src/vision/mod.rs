//! Vision Layer
//!
//! Pure per-frame transforms applied before and after recognition:
//! band extraction, OCR preprocessing and card-number validation.

pub mod preprocess;
pub mod region;
pub mod validate;

use thiserror::Error;

pub use preprocess::{encode_png, enhance_for_ocr};
pub use region::extract_band;
pub use validate::validate;

/// Errors raised by frame transforms
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VisionError {
    /// The source frame has no pixels
    #[error("cannot extract a region from a {width}x{height} frame")]
    RegionExtractionInvalid { width: u32, height: u32 },
    /// The band starts at or beyond the bottom edge
    #[error("band start {start} is outside a frame of height {frame_height}")]
    BandOutOfBounds { start: u32, frame_height: u32 },
    #[error("failed to encode region: {0}")]
    Encode(String),
}
