//! Runtime status snapshot shown to the operator

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::capture::Readiness;
use crate::ocr::EngineStatus;
use crate::overlay::OverlayRect;
use crate::scan::ScanStats;

/// Point-in-time view of every subsystem
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub readiness: Readiness,
    pub camera_error: Option<String>,
    pub frame_size: (u32, u32),
    pub diagnostics: BTreeMap<String, serde_json::Value>,
    pub engine: EngineStatus,
    pub scanning: bool,
    pub processing: bool,
    /// Detected number as currently displayed (masked unless revealed)
    pub detected: Option<String>,
    pub detected_confidence: Option<f32>,
    /// Where the last detection box was drawn
    pub overlay: Option<OverlayRect>,
    pub stats: ScanStats,
}

impl StatusReport {
    /// One-line operator message for whatever is currently wrong, if anything
    pub fn problem(&self) -> Option<&str> {
        self.camera_error
            .as_deref()
            .or(self.engine.last_error.as_deref())
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (width, height) = self.frame_size;
        writeln!(f, "camera:   {} ({}x{})", self.readiness, width, height)?;
        if let Some(err) = &self.camera_error {
            writeln!(f, "          {err}")?;
        }

        let engine_state = if self.engine.ready {
            "ready"
        } else if self.engine.initializing {
            "initializing"
        } else if self.engine.disposed {
            "disposed"
        } else {
            "unavailable"
        };
        write!(f, "ocr:      {engine_state}")?;
        if let Some(tier) = &self.engine.active_tier {
            write!(f, " [{tier}, retries {}]", self.engine.retry_count)?;
        }
        writeln!(f)?;
        if let Some(err) = &self.engine.last_error {
            writeln!(f, "          {err}")?;
        }

        writeln!(
            f,
            "scan:     {}{} (ticks {}, detected {}, rejected {}, skipped {}, failed {})",
            if self.scanning { "scanning" } else { "idle" },
            if self.processing { ", processing" } else { "" },
            self.stats.ticks,
            self.stats.detected,
            self.stats.rejected,
            self.stats.skipped,
            self.stats.failed,
        )?;

        if let Some(rect) = &self.overlay {
            writeln!(
                f,
                "overlay:  {}x{} at ({}, {})",
                rect.width, rect.height, rect.x, rect.y
            )?;
        }

        match (&self.detected, self.detected_confidence) {
            (Some(number), Some(confidence)) => write!(f, "card:     {number} ({confidence:.0}%)"),
            _ => write!(f, "card:     none"),
        }
    }
}
