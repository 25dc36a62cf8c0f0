//! OCR Engine Layer
//!
//! Recognition runs behind [`OcrBackend`]; [`RecognitionEngineManager`] owns
//! its lifecycle (tiered fallback, reachability probes, bounded retry).

pub mod assets;
pub mod manager;
pub mod probe;
pub mod tesseract;
#[cfg(test)]
pub mod testing;
pub mod tiers;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

pub use manager::{EngineStatus, RecognitionEngineManager};
pub use probe::{AssetProbe, HttpProbe};
pub use tesseract::TesseractFactory;
pub use tiers::WorkerTier;

/// Text and confidence reported for one image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recognition {
    pub text: String,
    /// Mean word confidence, 0-100
    pub confidence: f32,
}

/// Progress reported by a backend while it loads or recognizes
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub status: String,
    /// 0.0 to 1.0
    pub progress: f32,
}

/// Receives backend progress events
pub type ProgressLogger = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Options handed to a backend constructor, taken from one tier
#[derive(Clone, Default)]
pub struct BackendOptions {
    pub worker_asset_path: Option<String>,
    pub core_asset_path: Option<String>,
    pub lang_data_path: Option<String>,
    pub extra_options: BTreeMap<String, String>,
    pub logger: Option<ProgressLogger>,
}

impl BackendOptions {
    pub fn from_tier(tier: &WorkerTier, logger: Option<ProgressLogger>) -> Self {
        Self {
            worker_asset_path: tier.worker_asset_path.clone(),
            core_asset_path: tier.core_asset_path.clone(),
            lang_data_path: tier.lang_data_path.clone(),
            extra_options: tier.extra_options.clone(),
            logger,
        }
    }

    /// Forward a progress event to the logger, if any
    pub fn report(&self, status: &str, progress: f32) {
        if let Some(logger) = &self.logger {
            logger(&ProgressEvent {
                status: status.to_string(),
                progress: progress.clamp(0.0, 1.0),
            });
        }
    }
}

impl std::fmt::Debug for BackendOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendOptions")
            .field("worker_asset_path", &self.worker_asset_path)
            .field("core_asset_path", &self.core_asset_path)
            .field("lang_data_path", &self.lang_data_path)
            .field("extra_options", &self.extra_options)
            .field("logger", &self.logger.is_some())
            .finish()
    }
}

/// A constructed recognition engine
#[async_trait]
pub trait OcrBackend: Send + Sync {
    /// Recognize text in an encoded image
    async fn recognize(&self, image: &[u8]) -> anyhow::Result<Recognition>;
    /// Release engine resources; later calls to `recognize` fail
    fn terminate(&self);
}

/// Builds backends from tier options
#[async_trait]
pub trait OcrBackendFactory: Send + Sync {
    async fn create(
        &self,
        language: &str,
        worker_count: usize,
        options: BackendOptions,
    ) -> anyhow::Result<Arc<dyn OcrBackend>>;
}

/// Engine lifecycle and recognition errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("OCR asset unreachable: {uri} ({reason})")]
    AssetUnreachable { uri: String, reason: String },
    #[error("OCR engine construction failed: {0}")]
    ConstructionFailed(String),
    #[error("OCR engine failed to initialize after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
    #[error("OCR engine is not ready")]
    NotReady,
    #[error("OCR engine initialization already in progress")]
    InProgress,
    #[error("OCR engine has been disposed")]
    Disposed,
    #[error("Recognition failed: {0}")]
    RecognitionFailed(String),
}
