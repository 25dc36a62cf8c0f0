//! Card-number band extraction
//!
//! The number on a card held in front of the camera sits in a horizontal band
//! across the middle of the frame. The band is cropped at full frame width.

use image::RgbaImage;

use super::VisionError;

/// Band top, as a fraction of frame height
pub const BAND_START: f64 = 0.4;
/// Band height, as a fraction of frame height
pub const BAND_HEIGHT: f64 = 0.3;

/// Vertical extent of a band in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Band {
    pub y: u32,
    pub height: u32,
}

/// Compute the band for a frame, shrinking it to fit when it overflows
pub fn band_bounds(
    frame_width: u32,
    frame_height: u32,
    start_fraction: f64,
    height_fraction: f64,
) -> Result<Band, VisionError> {
    if frame_width == 0 || frame_height == 0 {
        return Err(VisionError::RegionExtractionInvalid {
            width: frame_width,
            height: frame_height,
        });
    }

    let y = (frame_height as f64 * start_fraction).round().max(0.0) as u32;
    if y >= frame_height {
        return Err(VisionError::BandOutOfBounds {
            start: y,
            frame_height,
        });
    }

    let requested = (frame_height as f64 * height_fraction).round().max(0.0) as u32;
    let height = requested.min(frame_height - y);
    if height == 0 {
        return Err(VisionError::BandOutOfBounds {
            start: y,
            frame_height,
        });
    }

    Ok(Band { y, height })
}

/// Crop a full-width band from the frame
pub fn extract_band(
    frame: &RgbaImage,
    start_fraction: f64,
    height_fraction: f64,
) -> Result<RgbaImage, VisionError> {
    let (width, height) = frame.dimensions();
    let band = band_bounds(width, height, start_fraction, height_fraction)?;
    Ok(image::imageops::crop_imm(frame, 0, band.y, width, band.height).to_image())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_band_for_720p() {
        let band = band_bounds(1280, 720, BAND_START, BAND_HEIGHT).unwrap();
        assert_eq!(band, Band { y: 288, height: 216 });
    }

    #[test]
    fn test_default_band_copies_rows() {
        let frame = RgbaImage::from_fn(100, 200, |x, y| Rgba([x as u8, y as u8, 0, 255]));
        let region = extract_band(&frame, BAND_START, BAND_HEIGHT).unwrap();

        assert_eq!(region.dimensions(), (100, 60));
        // Top-left pixel comes from row 80 of the frame
        assert_eq!(region.get_pixel(0, 0)[1], 80);
        assert_eq!(region.get_pixel(99, 59)[0], 99);
        assert_eq!(region.get_pixel(99, 59)[1], 139);
    }

    #[test]
    fn test_overflowing_band_is_shrunk() {
        let band = band_bounds(100, 100, 0.9, 0.3).unwrap();
        assert_eq!(band, Band { y: 90, height: 10 });

        let frame = RgbaImage::new(100, 100);
        let region = extract_band(&frame, 0.9, 0.3).unwrap();
        assert_eq!(region.dimensions(), (100, 10));
    }

    #[test]
    fn test_start_outside_frame_is_an_error() {
        let err = band_bounds(100, 100, 1.0, 0.3).unwrap_err();
        assert_eq!(
            err,
            VisionError::BandOutOfBounds {
                start: 100,
                frame_height: 100
            }
        );
    }

    #[test]
    fn test_zero_area_frame_is_an_error() {
        let frame = RgbaImage::new(0, 0);
        let err = extract_band(&frame, BAND_START, BAND_HEIGHT).unwrap_err();
        assert_eq!(
            err,
            VisionError::RegionExtractionInvalid {
                width: 0,
                height: 0
            }
        );

        assert!(band_bounds(640, 0, BAND_START, BAND_HEIGHT).is_err());
        assert!(band_bounds(0, 480, BAND_START, BAND_HEIGHT).is_err());
    }

    #[test]
    fn test_tiny_frame_still_yields_a_row() {
        let band = band_bounds(4, 2, BAND_START, BAND_HEIGHT).unwrap();
        assert_eq!(band, Band { y: 1, height: 1 });
    }
}
