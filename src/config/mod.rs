//! Application Configuration
//!
//! Scanner settings stored in TOML format. Every section falls back to its
//! defaults, so a partial file (or none at all) is valid.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capture::CaptureConstraints;
use crate::ocr::tiers::{default_tiers, WorkerTier};
use crate::vision::region::{BAND_HEIGHT, BAND_START};
use crate::vision::validate::MIN_CONFIDENCE;

/// Config file name inside the per-user config directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Scanner settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Default camera request
    pub capture: CaptureConstraints,
    /// OCR engine bootstrap
    pub engine: EngineSettings,
    /// Sampling loop
    pub scan: ScanSettings,
    /// Detection overlay
    pub overlay: OverlaySettings,
}

/// OCR engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Recognition language (tessdata model name)
    pub language: String,
    /// Maximum concurrent engine processes
    pub worker_count: usize,
    /// Automatic retries after the first failed attempt
    pub max_retries: u32,
    /// Delay between attempts in milliseconds
    pub retry_backoff_ms: u64,
    /// Timeout for asset reachability probes in milliseconds
    pub probe_timeout_ms: u64,
    /// Engine executable, looked up on PATH when relative
    pub tesseract_binary: PathBuf,
    /// Where downloaded and staged assets live; per-user cache dir when unset
    pub asset_cache_dir: Option<PathBuf>,
    /// Ordered fallback tiers
    pub tiers: Vec<WorkerTier>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            language: "eng".to_string(),
            worker_count: 1,
            max_retries: 3,
            retry_backoff_ms: 2000,
            probe_timeout_ms: 5000,
            tesseract_binary: PathBuf::from("tesseract"),
            asset_cache_dir: None,
            tiers: default_tiers(),
        }
    }
}

impl EngineSettings {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Sampling loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Timer period in milliseconds
    pub interval_ms: u64,
    /// Band top as a fraction of frame height
    pub band_start: f64,
    /// Band height as a fraction of frame height
    pub band_height: f64,
    /// Confidence must be strictly above this to accept a number
    pub min_confidence: f32,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            band_start: BAND_START,
            band_height: BAND_HEIGHT,
            min_confidence: MIN_CONFIDENCE,
        }
    }
}

impl ScanSettings {
    pub fn interval(&self) -> Duration {
        // A zero period would spin the timer
        Duration::from_millis(self.interval_ms.max(1))
    }
}

/// Overlay settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlaySettings {
    /// Confidence above this is drawn green, amber otherwise
    pub high_confidence: f32,
    /// Rectangle stroke in pixels
    pub stroke_width: u32,
    /// TTF/OTF font for the confidence label; no label without one
    pub font_path: Option<PathBuf>,
    /// Label size in pixels
    pub font_scale: f32,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            high_confidence: 80.0,
            stroke_width: 3,
            font_path: None,
            font_scale: 24.0,
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<ScannerConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    let config: ScannerConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config: {}", path.display()))?;
    Ok(config)
}

/// Load configuration, falling back to defaults when the file is missing
pub fn load_or_default(path: &Path) -> Result<ScannerConfig> {
    if path.exists() {
        load_config(path)
    } else {
        Ok(ScannerConfig::default())
    }
}

/// Save configuration to file
pub fn save_config(config: &ScannerConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write config: {}", path.display()))?;
    Ok(())
}

/// Default config location in the per-user config directory
pub fn default_config_path() -> Result<PathBuf> {
    Ok(crate::storage::get_config_dir()?.join(CONFIG_FILE_NAME))
}
