//! Camera request constraints
//!
//! Mirrors the constraint object handed to the platform's media-capture call:
//! a preferred facing mode plus ideal/minimum frame dimensions.

use serde::{Deserialize, Serialize};

/// Which physical camera to prefer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacingMode {
    /// Rear-facing ("environment") camera, the one pointed at a card
    #[default]
    Environment,
    /// Front-facing ("user") camera
    User,
}

impl FacingMode {
    /// Name used by media-capture APIs
    pub fn as_str(&self) -> &'static str {
        match self {
            FacingMode::Environment => "environment",
            FacingMode::User => "user",
        }
    }
}

/// Ideal/minimum bound for one frame dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionRange {
    pub ideal: u32,
    pub min: u32,
}

/// Full constraint set for a camera request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConstraints {
    pub facing_mode: FacingMode,
    pub width: DimensionRange,
    pub height: DimensionRange,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            facing_mode: FacingMode::Environment,
            width: DimensionRange { ideal: 1920, min: 640 },
            height: DimensionRange { ideal: 1080, min: 480 },
        }
    }
}

impl CaptureConstraints {
    /// Apply caller overrides on top of these constraints
    pub fn merged(&self, overrides: &ConstraintOverrides) -> Self {
        Self {
            facing_mode: overrides.facing_mode.unwrap_or(self.facing_mode),
            width: overrides.width.unwrap_or(self.width),
            height: overrides.height.unwrap_or(self.height),
        }
    }

    /// JSON form recorded in session diagnostics
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "facingMode": self.facing_mode.as_str(),
            "width": { "ideal": self.width.ideal, "min": self.width.min },
            "height": { "ideal": self.height.ideal, "min": self.height.min },
        })
    }
}

/// Caller-supplied partial constraints; unset fields keep the defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConstraintOverrides {
    pub facing_mode: Option<FacingMode>,
    pub width: Option<DimensionRange>,
    pub height: Option<DimensionRange>,
}

/// What is actually sent to the media devices
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaRequest {
    /// Request with explicit constraints
    Constrained(CaptureConstraints),
    /// Any video device, platform defaults (`video: true`)
    Unconstrained,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_constraints_prefer_rear_camera() {
        let c = CaptureConstraints::default();
        assert_eq!(c.facing_mode, FacingMode::Environment);
        assert_eq!(c.width, DimensionRange { ideal: 1920, min: 640 });
        assert_eq!(c.height, DimensionRange { ideal: 1080, min: 480 });
    }

    #[test]
    fn test_merge_keeps_unset_fields() {
        let overrides = ConstraintOverrides {
            facing_mode: Some(FacingMode::User),
            ..Default::default()
        };
        let merged = CaptureConstraints::default().merged(&overrides);
        assert_eq!(merged.facing_mode, FacingMode::User);
        assert_eq!(merged.width, CaptureConstraints::default().width);
    }

    #[test]
    fn test_constraints_json_shape() {
        let json = CaptureConstraints::default().to_json();
        assert_eq!(json["facingMode"], "environment");
        assert_eq!(json["width"]["ideal"], 1920);
        assert_eq!(json["height"]["min"], 480);
    }
}
