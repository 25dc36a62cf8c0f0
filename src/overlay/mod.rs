//! Overlay Presentation Layer
//!
//! Draws the detection confirmation layer: a stroked rectangle over the number
//! band and an optional confidence label. The canvas is a transparent RGBA
//! raster the size of the video frame, composited over it by the presenter.

use ab_glyph::FontVec;
use anyhow::{Context, Result};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::config::OverlaySettings;

/// Stroke color for confident detections
pub const HIGH_CONFIDENCE_COLOR: Rgba<u8> = Rgba([0, 200, 83, 255]);
/// Stroke color for everything else
pub const LOW_CONFIDENCE_COLOR: Rgba<u8> = Rgba([255, 171, 0, 255]);

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);
/// Gap between the label baseline area and the rectangle
const LABEL_GAP: i32 = 4;

/// Rectangle placement as fractions of the canvas
const RECT_LEFT: f64 = 0.1;
const RECT_WIDTH: f64 = 0.8;
const RECT_TOP: f64 = 0.4;
const RECT_HEIGHT: f64 = 0.3;

/// Drawing parameters
#[derive(Clone)]
pub struct OverlayStyle {
    /// Confidence strictly above this is drawn green
    pub high_confidence: f32,
    pub stroke_width: u32,
    /// Label font; without one the label is skipped
    pub font: Option<Arc<FontVec>>,
    pub font_scale: f32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            high_confidence: 80.0,
            stroke_width: 3,
            font: None,
            font_scale: 24.0,
        }
    }
}

impl std::fmt::Debug for OverlayStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayStyle")
            .field("high_confidence", &self.high_confidence)
            .field("stroke_width", &self.stroke_width)
            .field("font", &self.font.is_some())
            .field("font_scale", &self.font_scale)
            .finish()
    }
}

impl OverlayStyle {
    /// Build from settings, loading the label font if one is configured
    pub fn from_settings(settings: &OverlaySettings) -> Result<Self> {
        let font = match &settings.font_path {
            Some(path) => Some(Arc::new(load_font(path)?)),
            None => None,
        };
        Ok(Self {
            high_confidence: settings.high_confidence,
            stroke_width: settings.stroke_width.max(1),
            font,
            font_scale: settings.font_scale,
        })
    }

    fn color_for(&self, confidence: f32) -> Rgba<u8> {
        if confidence > self.high_confidence {
            HIGH_CONFIDENCE_COLOR
        } else {
            LOW_CONFIDENCE_COLOR
        }
    }
}

/// Load a TTF/OTF font for labels
pub fn load_font(path: &Path) -> Result<FontVec> {
    let data = std::fs::read(path)
        .with_context(|| format!("Failed to read font: {}", path.display()))?;
    FontVec::try_from_vec(data)
        .map_err(|_| anyhow::anyhow!("Failed to parse font file: {}", path.display()))
}

/// Rectangle geometry in canvas pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OverlayRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// What was drawn, returned for presenters and tests
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayLayout {
    pub rect: OverlayRect,
    pub color: Rgba<u8>,
    pub label: String,
    pub label_origin: (i32, i32),
    pub label_drawn: bool,
    pub number: String,
}

/// Band rectangle for a canvas of the given size
pub fn overlay_rect(width: u32, height: u32) -> OverlayRect {
    let scale = |len: u32, fraction: f64| (len as f64 * fraction).round() as u32;
    OverlayRect {
        x: scale(width, RECT_LEFT),
        y: scale(height, RECT_TOP),
        width: scale(width, RECT_WIDTH),
        height: scale(height, RECT_HEIGHT),
    }
}

/// Clear the canvas and draw the detection box and confidence label
pub fn render_overlay(
    canvas: &mut RgbaImage,
    number: &str,
    confidence: f32,
    style: &OverlayStyle,
) -> OverlayLayout {
    for pixel in canvas.pixels_mut() {
        *pixel = TRANSPARENT;
    }

    let (width, height) = canvas.dimensions();
    let rect = overlay_rect(width, height);
    let color = style.color_for(confidence);

    // Stroke grows inward so the outline never leaves the band
    for t in 0..style.stroke_width {
        let inset_w = rect.width.saturating_sub(2 * t);
        let inset_h = rect.height.saturating_sub(2 * t);
        if inset_w == 0 || inset_h == 0 {
            break;
        }
        let r = Rect::at((rect.x + t) as i32, (rect.y + t) as i32).of_size(inset_w, inset_h);
        draw_hollow_rect_mut(canvas, r, color);
    }

    let label = format!("{:.0}%", confidence);
    // Pinned to the top edge on short frames, where it may overlap the rectangle
    let label_origin = (
        rect.x as i32,
        (rect.y as i32 - style.font_scale.ceil() as i32 - LABEL_GAP).max(0),
    );

    let label_drawn = match &style.font {
        Some(font) if width > 0 && height > 0 => {
            draw_text_mut(
                canvas,
                color,
                label_origin.0,
                label_origin.1,
                style.font_scale,
                font.as_ref(),
                &label,
            );
            true
        }
        _ => false,
    };

    debug!(?rect, %label, label_drawn, "overlay rendered");

    OverlayLayout {
        rect,
        color,
        label,
        label_origin,
        label_drawn,
        number: number.to_string(),
    }
}
