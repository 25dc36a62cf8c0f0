//! Frame snapshot taken from the live video sink

use image::RgbaImage;
use std::time::Instant;

/// A single camera frame, valid for one processing tick
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    /// RGBA pixels at the frame's native size
    pub image: RgbaImage,
    /// When the snapshot was taken
    pub captured_at: Instant,
}

impl FrameBuffer {
    pub fn new(image: RgbaImage) -> Self {
        Self {
            image,
            captured_at: Instant::now(),
        }
    }

    /// Get frame dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}
