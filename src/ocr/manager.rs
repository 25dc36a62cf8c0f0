//! Recognition engine lifecycle
//!
//! Initialization walks the fallback tiers: each attempt probes the tier's
//! remote assets, then constructs a backend. Failures back off and move to the
//! next tier until `max_retries` is spent. A backend that finishes building
//! after the manager was disposed is terminated instead of installed.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::tiers::{default_tiers, tier_index, WorkerTier};
use super::{AssetProbe, BackendOptions, EngineError, OcrBackend, OcrBackendFactory, ProgressLogger, Recognition};
use crate::config::EngineSettings;

/// Snapshot of the engine lifecycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    pub ready: bool,
    pub initializing: bool,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub active_tier: Option<String>,
    pub disposed: bool,
}

#[derive(Default)]
struct EngineState {
    backend: Option<Arc<dyn OcrBackend>>,
    initializing: bool,
    retry_count: u32,
    last_error: Option<String>,
    active_tier: Option<String>,
    disposed: bool,
    /// Bumped by retry/dispose; an attempt from an older generation is stale
    generation: u64,
}

impl EngineState {
    fn status(&self) -> EngineStatus {
        EngineStatus {
            ready: self.backend.is_some(),
            initializing: self.initializing,
            retry_count: self.retry_count,
            last_error: self.last_error.clone(),
            active_tier: self.active_tier.clone(),
            disposed: self.disposed,
        }
    }

    fn stale_error(&self) -> EngineError {
        if self.disposed {
            EngineError::Disposed
        } else {
            EngineError::InProgress
        }
    }
}

struct EngineShared {
    factory: Arc<dyn OcrBackendFactory>,
    probe: Arc<dyn AssetProbe>,
    settings: EngineSettings,
    tiers: Vec<WorkerTier>,
    logger: ProgressLogger,
    state: Mutex<EngineState>,
    status_tx: watch::Sender<EngineStatus>,
}

/// OCR engine manager
#[derive(Clone)]
pub struct RecognitionEngineManager {
    shared: Arc<EngineShared>,
}

impl RecognitionEngineManager {
    pub fn new(
        factory: Arc<dyn OcrBackendFactory>,
        probe: Arc<dyn AssetProbe>,
        settings: EngineSettings,
    ) -> Self {
        let tiers = if settings.tiers.is_empty() {
            warn!("no OCR tiers configured, using built-in tiers");
            default_tiers()
        } else {
            settings.tiers.clone()
        };

        let logger: ProgressLogger = Arc::new(|event| {
            debug!(status = %event.status, progress = event.progress, "ocr progress");
        });

        let (status_tx, _) = watch::channel(EngineStatus::default());
        Self {
            shared: Arc::new(EngineShared {
                factory,
                probe,
                settings,
                tiers,
                logger,
                state: Mutex::new(EngineState::default()),
                status_tx,
            }),
        }
    }

    /// Bring the engine up, walking the tiers with backoff between attempts
    pub async fn initialize(&self) -> Result<(), EngineError> {
        let generation = {
            let mut state = self.shared.state.lock();
            if state.disposed {
                return Err(EngineError::Disposed);
            }
            if state.backend.is_some() {
                return Ok(());
            }
            if state.initializing {
                return Err(EngineError::InProgress);
            }
            state.initializing = true;
            state.last_error = None;
            self.publish(&state);
            state.generation
        };

        self.run_attempts(generation).await
    }

    /// Drop any installed engine, reset the retry bookkeeping and start over
    pub async fn retry(&self) -> Result<(), EngineError> {
        let (previous, generation) = {
            let mut state = self.shared.state.lock();
            if state.disposed {
                return Err(EngineError::Disposed);
            }
            if state.initializing {
                return Err(EngineError::InProgress);
            }
            state.generation += 1;
            state.retry_count = 0;
            state.last_error = None;
            state.active_tier = None;
            state.initializing = true;
            let previous = state.backend.take();
            self.publish(&state);
            (previous, state.generation)
        };

        if let Some(previous) = previous {
            previous.terminate();
            info!("terminated previous OCR engine");
        }
        info!("retrying OCR engine initialization");

        self.run_attempts(generation).await
    }

    /// Run `initialize` in the background; failures are logged
    pub fn spawn_initialize(&self) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.initialize().await {
                debug!(error = %e, "background OCR initialization ended");
            }
        })
    }

    async fn run_attempts(&self, generation: u64) -> Result<(), EngineError> {
        let max_retries = self.shared.settings.max_retries;
        let backoff = self.shared.settings.retry_backoff();

        loop {
            let (attempt, tier) = {
                let mut state = self.shared.state.lock();
                if state.generation != generation {
                    return Err(state.stale_error());
                }
                let tier = self.shared.tiers[tier_index(state.retry_count, self.shared.tiers.len())].clone();
                state.active_tier = Some(tier.name.clone());
                self.publish(&state);
                (state.retry_count + 1, tier)
            };

            info!(tier = %tier.name, attempt, "initializing OCR engine");

            let failure = match self.attempt(&tier).await {
                Ok(backend) => {
                    let mut state = self.shared.state.lock();
                    if state.generation != generation {
                        let err = state.stale_error();
                        drop(state);
                        info!(tier = %tier.name, "OCR engine finished after teardown, releasing it");
                        backend.terminate();
                        return Err(err);
                    }
                    state.backend = Some(backend);
                    state.initializing = false;
                    state.last_error = None;
                    self.publish(&state);
                    info!(tier = %tier.name, retries = state.retry_count, "OCR engine ready");
                    return Ok(());
                }
                Err(failure) => failure,
            };

            {
                let mut state = self.shared.state.lock();
                if state.generation != generation {
                    return Err(state.stale_error());
                }
                if state.retry_count >= max_retries {
                    let err = EngineError::Exhausted {
                        attempts: state.retry_count + 1,
                        last: failure.to_string(),
                    };
                    state.initializing = false;
                    state.last_error = Some(err.to_string());
                    self.publish(&state);
                    error!(error = %err, "OCR engine unavailable");
                    return Err(err);
                }
            }

            warn!(
                tier = %tier.name,
                attempt,
                error = %failure,
                backoff_ms = backoff.as_millis() as u64,
                "OCR engine attempt failed, retrying"
            );
            tokio::time::sleep(backoff).await;

            let mut state = self.shared.state.lock();
            if state.generation != generation {
                return Err(state.stale_error());
            }
            state.retry_count += 1;
            self.publish(&state);
        }
    }

    async fn attempt(&self, tier: &WorkerTier) -> Result<Arc<dyn OcrBackend>, EngineError> {
        for uri in tier.remote_assets() {
            self.shared
                .probe
                .check(uri)
                .await
                .map_err(|reason| EngineError::AssetUnreachable {
                    uri: uri.to_string(),
                    reason,
                })?;
        }

        let options = BackendOptions::from_tier(tier, Some(Arc::clone(&self.shared.logger)));
        self.shared
            .factory
            .create(
                &self.shared.settings.language,
                self.shared.settings.worker_count.max(1),
                options,
            )
            .await
            .map_err(|e| EngineError::ConstructionFailed(format!("{e:#}")))
    }

    /// Recognize text in an encoded image
    pub async fn recognize(&self, image: &[u8]) -> Result<Recognition, EngineError> {
        let backend = {
            let state = self.shared.state.lock();
            if state.disposed {
                return Err(EngineError::Disposed);
            }
            state.backend.clone().ok_or(EngineError::NotReady)?
        };

        backend
            .recognize(image)
            .await
            .map_err(|e| EngineError::RecognitionFailed(format!("{e:#}")))
    }

    /// Terminate the engine and refuse further work. Idempotent.
    pub fn dispose(&self) {
        let backend = {
            let mut state = self.shared.state.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.generation += 1;
            state.initializing = false;
            let backend = state.backend.take();
            self.publish(&state);
            backend
        };

        if let Some(backend) = backend {
            backend.terminate();
        }
        info!("OCR engine disposed");
    }

    fn publish(&self, state: &EngineState) {
        self.shared.status_tx.send_replace(state.status());
    }

    pub fn is_ready(&self) -> bool {
        self.shared.state.lock().backend.is_some()
    }

    pub fn status(&self) -> EngineStatus {
        self.shared.state.lock().status()
    }

    /// Subscribe to status changes
    pub fn subscribe(&self) -> watch::Receiver<EngineStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Tiers in fallback order
    pub fn tiers(&self) -> &[WorkerTier] {
        &self.shared.tiers
    }
}
