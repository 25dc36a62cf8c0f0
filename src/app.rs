//! Application Coordinator
//!
//! Builds the capture, engine and scan components from configuration and
//! routes operator actions to them. Dropping the coordinator shuts
//! everything down.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::capture::{CaptureSessionManager, ConstraintOverrides, MediaDevices, VideoSink};
use crate::config::ScannerConfig;
use crate::ocr::{AssetProbe, EngineError, OcrBackendFactory, RecognitionEngineManager};
use crate::overlay::OverlayStyle;
use crate::scan::ScanOrchestrator;
use crate::shared::{OperatorAction, StatusReport};

/// Main application coordinator
pub struct CardScannerApp {
    scanner: ScanOrchestrator,
    /// Background engine initialization or retry
    engine_task: Mutex<Option<JoinHandle<()>>>,
}

impl CardScannerApp {
    /// Create a coordinator around the given platform boundaries
    pub fn new(
        config: ScannerConfig,
        devices: Arc<dyn MediaDevices>,
        sink: Arc<dyn VideoSink>,
        factory: Arc<dyn OcrBackendFactory>,
        probe: Arc<dyn AssetProbe>,
    ) -> Result<Self> {
        let style = OverlayStyle::from_settings(&config.overlay)
            .context("Failed to prepare overlay style")?;
        let capture = CaptureSessionManager::new(devices, sink, config.capture.clone());
        let engine = RecognitionEngineManager::new(factory, probe, config.engine.clone());
        let scanner = ScanOrchestrator::new(capture, engine, config.scan, style);

        Ok(Self {
            scanner,
            engine_task: Mutex::new(None),
        })
    }

    /// Start OCR engine initialization in the background
    pub fn start_engine(&self) {
        let handle = self.scanner.engine().spawn_initialize();
        self.replace_engine_task(handle);
    }

    fn replace_engine_task(&self, handle: JoinHandle<()>) {
        // A refused run ends on its own; an in-flight one must not be cut off
        drop(self.engine_task.lock().replace(handle));
    }

    /// Handle one operator action, returning a message for the operator
    pub async fn dispatch(&self, action: OperatorAction) -> Result<String> {
        info!(?action, "operator action");
        let capture = self.scanner.capture();

        let message = match action {
            OperatorAction::ToggleScan => {
                if self.scanner.toggle_scan()? {
                    "Scanning started".to_string()
                } else {
                    "Scanning stopped".to_string()
                }
            }
            OperatorAction::StartCamera => {
                capture.start(&ConstraintOverrides::default()).await?;
                "Camera started".to_string()
            }
            OperatorAction::StopCamera => {
                self.scanner.stop_scan();
                capture.stop();
                "Camera stopped".to_string()
            }
            OperatorAction::RetryOcr => {
                let status = self.scanner.engine().status();
                if status.disposed {
                    return Err(EngineError::Disposed.into());
                }
                if status.initializing {
                    return Err(EngineError::InProgress.into());
                }
                let engine = self.scanner.engine().clone();
                let handle = tokio::spawn(async move {
                    if let Err(e) = engine.retry().await {
                        warn!(error = %e, "OCR retry failed");
                    }
                });
                self.replace_engine_task(handle);
                "Retrying OCR engine initialization".to_string()
            }
            OperatorAction::ForcePlay => {
                capture.force_play().await?;
                "Playback started".to_string()
            }
            OperatorAction::ToggleReveal => {
                if self.scanner.toggle_reveal() {
                    "Showing full card number".to_string()
                } else {
                    "Card number masked".to_string()
                }
            }
        };

        Ok(message)
    }

    /// Snapshot of every subsystem
    pub fn status(&self) -> StatusReport {
        let capture = self.scanner.capture();
        let detected = self.scanner.detected();
        StatusReport {
            readiness: capture.readiness(),
            camera_error: capture.last_error(),
            frame_size: capture.frame_dimensions(),
            diagnostics: capture.diagnostics(),
            engine: self.scanner.engine().status(),
            scanning: self.scanner.is_scanning(),
            processing: self.scanner.is_processing(),
            detected: self.scanner.display_number(),
            detected_confidence: detected.map(|card| card.confidence),
            overlay: self.scanner.overlay().map(|layout| layout.rect),
            stats: self.scanner.stats(),
        }
    }

    pub fn scanner(&self) -> &ScanOrchestrator {
        &self.scanner
    }

    /// Stop scanning, release the camera and terminate the engine
    pub fn shutdown(&self) {
        if let Some(task) = self.engine_task.lock().take() {
            task.abort();
        }
        self.scanner.shutdown();
    }
}

impl Drop for CardScannerApp {
    fn drop(&mut self) {
        self.shutdown();
    }
}
