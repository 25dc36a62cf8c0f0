//! Scan Orchestrator
//!
//! Drives the capture-to-detection pipeline. While scanning, a fixed-period
//! timer attempts a tick; each tick snapshots the frame, crops the number
//! band, preprocesses it, recognizes it and validates the result. A busy flag
//! keeps at most one tick in flight: a firing that finds it set is dropped,
//! never queued.

pub mod card;

use image::RgbaImage;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capture::{CaptureSessionManager, FrameBuffer, Readiness};
use crate::config::ScanSettings;
use crate::ocr::{EngineError, RecognitionEngineManager};
use crate::overlay::{render_overlay, OverlayLayout, OverlayStyle};
use crate::vision::{encode_png, enhance_for_ocr, extract_band, validate, VisionError};

pub use card::DetectedCard;

/// Rejected operator requests
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    #[error("{0}")]
    NotReady(String),
}

/// Failures inside a tick; logged and swallowed at the tick boundary
#[derive(Debug, Error)]
pub enum TickError {
    #[error(transparent)]
    Vision(#[from] VisionError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Why a tick did no work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A previous tick is still in flight
    Busy,
    EngineNotReady,
    /// Not playing, or no frame size yet
    FrameNotReady,
}

/// Result of one tick
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Skipped(SkipReason),
    /// Recognized text did not validate
    Rejected { text: String, confidence: f32 },
    Detected(DetectedCard),
    Failed(String),
}

/// Tick counters. Skipped firings count toward `ticks` as well as `skipped`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    pub ticks: u64,
    pub skipped: u64,
    pub rejected: u64,
    pub detected: u64,
    pub failed: u64,
}

impl ScanStats {
    fn record(&mut self, outcome: &TickOutcome) {
        self.ticks += 1;
        match outcome {
            TickOutcome::Skipped(_) => self.skipped += 1,
            TickOutcome::Rejected { .. } => self.rejected += 1,
            TickOutcome::Detected(_) => self.detected += 1,
            TickOutcome::Failed(_) => self.failed += 1,
        }
    }
}

/// Holds the busy flag for the duration of a tick
struct BusyGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> BusyGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

struct ScanTimer {
    token: CancellationToken,
    _handle: JoinHandle<()>,
}

#[derive(Default)]
struct ScanState {
    scanning: bool,
    reveal: bool,
    timer: Option<ScanTimer>,
    overlay: Option<OverlayLayout>,
    overlay_canvas: Option<RgbaImage>,
    stats: ScanStats,
    shut_down: bool,
}

struct ScanShared {
    capture: CaptureSessionManager,
    engine: RecognitionEngineManager,
    settings: ScanSettings,
    style: OverlayStyle,
    busy: AtomicBool,
    state: Mutex<ScanState>,
    detection_tx: watch::Sender<Option<DetectedCard>>,
}

/// Top-level scan loop
#[derive(Clone)]
pub struct ScanOrchestrator {
    shared: Arc<ScanShared>,
}

impl ScanOrchestrator {
    pub fn new(
        capture: CaptureSessionManager,
        engine: RecognitionEngineManager,
        settings: ScanSettings,
        style: OverlayStyle,
    ) -> Self {
        let (detection_tx, _) = watch::channel(None);
        Self {
            shared: Arc::new(ScanShared {
                capture,
                engine,
                settings,
                style,
                busy: AtomicBool::new(false),
                state: Mutex::new(ScanState::default()),
                detection_tx,
            }),
        }
    }

    /// Start scanning when idle, stop when scanning. Returns the new state.
    pub fn toggle_scan(&self) -> Result<bool, ScanError> {
        if self.is_scanning() {
            self.stop_scan();
            return Ok(false);
        }
        self.start_scan()?;
        Ok(true)
    }

    /// Start the sampling timer; requires a playing camera with a frame size
    pub fn start_scan(&self) -> Result<(), ScanError> {
        let readiness = self.shared.capture.readiness();
        if readiness != Readiness::Playing {
            return Err(ScanError::NotReady(format!(
                "Camera is not playing yet ({readiness}). Start the camera first."
            )));
        }
        let (width, height) = self.shared.capture.frame_dimensions();
        if width == 0 || height == 0 {
            return Err(ScanError::NotReady(
                "Camera has not reported a frame size yet.".to_string(),
            ));
        }

        let mut state = self.shared.state.lock();
        if state.shut_down {
            return Err(ScanError::NotReady("Scanner has shut down.".to_string()));
        }
        if state.scanning {
            return Ok(());
        }

        let token = CancellationToken::new();
        let handle = self.spawn_timer(token.clone());
        state.timer = Some(ScanTimer {
            token,
            _handle: handle,
        });
        state.scanning = true;
        info!(
            interval_ms = self.shared.settings.interval_ms,
            width, height, "scanning started"
        );
        Ok(())
    }

    /// Cancel future timer firings; an in-flight tick runs to completion
    pub fn stop_scan(&self) {
        let timer = {
            let mut state = self.shared.state.lock();
            state.scanning = false;
            state.timer.take()
        };
        if let Some(timer) = timer {
            timer.token.cancel();
            info!("scanning stopped");
        }
    }

    fn spawn_timer(&self, token: CancellationToken) -> JoinHandle<()> {
        let orchestrator = self.clone();
        let period = self.shared.settings.interval();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        if !orchestrator.shared.capture.has_stream() {
                            debug!("no camera stream, timer firing ignored");
                            continue;
                        }
                        let ticker = orchestrator.clone();
                        tokio::spawn(async move {
                            ticker.tick().await;
                        });
                    }
                }
            }
            debug!("scan timer stopped");
        })
    }

    /// Run one pipeline pass
    pub async fn tick(&self) -> TickOutcome {
        let outcome = self.run_tick().await;
        self.shared.state.lock().stats.record(&outcome);
        outcome
    }

    async fn run_tick(&self) -> TickOutcome {
        let Some(_guard) = BusyGuard::try_acquire(&self.shared.busy) else {
            debug!("previous tick still running, skipping");
            return TickOutcome::Skipped(SkipReason::Busy);
        };

        if !self.shared.engine.is_ready() {
            debug!("OCR engine not ready, skipping tick");
            return TickOutcome::Skipped(SkipReason::EngineNotReady);
        }

        let Some(frame) = self.shared.capture.snapshot() else {
            debug!("no frame available, skipping tick");
            return TickOutcome::Skipped(SkipReason::FrameNotReady);
        };

        match self.process(frame).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "scan tick failed");
                TickOutcome::Failed(e.to_string())
            }
        }
    }

    async fn process(&self, frame: FrameBuffer) -> Result<TickOutcome, TickError> {
        let settings = &self.shared.settings;
        let region = extract_band(&frame.image, settings.band_start, settings.band_height)?;
        let enhanced = enhance_for_ocr(&region);
        let png = encode_png(&enhanced)?;

        let recognition = self.shared.engine.recognize(&png).await?;
        debug!(
            text = %recognition.text,
            confidence = recognition.confidence,
            elapsed_ms = frame.captured_at.elapsed().as_millis() as u64,
            "frame recognized"
        );

        match validate(&recognition.text, recognition.confidence, settings.min_confidence) {
            Some(candidate) => {
                let card = DetectedCard::new(candidate.number, candidate.confidence);
                self.accept(&card, frame.dimensions());
                Ok(TickOutcome::Detected(card))
            }
            None => Ok(TickOutcome::Rejected {
                text: recognition.text,
                confidence: recognition.confidence,
            }),
        }
    }

    fn accept(&self, card: &DetectedCard, (width, height): (u32, u32)) {
        let mut canvas = RgbaImage::new(width, height);
        let layout = render_overlay(&mut canvas, &card.number, card.confidence, &self.shared.style);
        {
            let mut state = self.shared.state.lock();
            state.overlay = Some(layout);
            state.overlay_canvas = Some(canvas);
        }
        self.shared.detection_tx.send_replace(Some(card.clone()));
        info!(
            card = %card.masked(),
            confidence = card.confidence,
            "card number detected"
        );
    }

    /// Flip between masked and full display; returns the new reveal state
    pub fn toggle_reveal(&self) -> bool {
        let mut state = self.shared.state.lock();
        state.reveal = !state.reveal;
        state.reveal
    }

    /// Detected number as it should be shown right now
    pub fn display_number(&self) -> Option<String> {
        let reveal = self.shared.state.lock().reveal;
        self.detected().map(|card| card.display(reveal))
    }

    /// Stop the timer, the camera and the engine. Runs once.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.shut_down {
                return;
            }
            state.shut_down = true;
        }
        self.stop_scan();
        self.shared.capture.stop();
        self.shared.engine.dispose();
        info!("scanner shut down");
    }

    pub fn detected(&self) -> Option<DetectedCard> {
        self.shared.detection_tx.borrow().clone()
    }

    /// Subscribe to detections
    pub fn subscribe(&self) -> watch::Receiver<Option<DetectedCard>> {
        self.shared.detection_tx.subscribe()
    }

    pub fn overlay(&self) -> Option<OverlayLayout> {
        self.shared.state.lock().overlay.clone()
    }

    /// Last rendered overlay raster, sized to the frame
    pub fn overlay_canvas(&self) -> Option<RgbaImage> {
        self.shared.state.lock().overlay_canvas.clone()
    }

    pub fn is_scanning(&self) -> bool {
        self.shared.state.lock().scanning
    }

    /// True while a tick is in flight
    pub fn is_processing(&self) -> bool {
        self.shared.busy.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> ScanStats {
        self.shared.state.lock().stats
    }

    pub fn capture(&self) -> &CaptureSessionManager {
        &self.shared.capture
    }

    pub fn engine(&self) -> &RecognitionEngineManager {
        &self.shared.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::mock::SyntheticCamera;
    use crate::capture::{CaptureConstraints, ConstraintOverrides};
    use crate::config::EngineSettings;
    use crate::ocr::testing::{FakeProbe, ScriptedFactory};
    use crate::overlay::LOW_CONFIDENCE_COLOR;
    use std::time::Duration;

    struct Fixture {
        scanner: ScanOrchestrator,
        camera: Arc<SyntheticCamera>,
        factory: Arc<ScriptedFactory>,
    }

    fn build(camera: Arc<SyntheticCamera>, factory: Arc<ScriptedFactory>) -> Fixture {
        let capture = CaptureSessionManager::new(
            camera.clone(),
            camera.clone(),
            CaptureConstraints::default(),
        );
        let engine = RecognitionEngineManager::new(
            factory.clone(),
            Arc::new(FakeProbe::reachable()),
            EngineSettings::default(),
        );
        let scanner = ScanOrchestrator::new(
            capture,
            engine,
            ScanSettings::default(),
            OverlayStyle::default(),
        );
        Fixture {
            scanner,
            camera,
            factory,
        }
    }

    async fn ready_scanner(text: &str, confidence: f32) -> Fixture {
        let fixture = build(
            Arc::new(SyntheticCamera::new(1280, 720)),
            Arc::new(ScriptedFactory::replying(text, confidence)),
        );
        let capture = fixture.scanner.capture();
        capture.start(&ConstraintOverrides::default()).await.unwrap();
        let mut rx = capture.subscribe();
        rx.wait_for(|r| *r == Readiness::Playing).await.unwrap();
        fixture.scanner.engine().initialize().await.unwrap();
        fixture
    }

    #[tokio::test]
    async fn test_grouped_number_is_detected() {
        let f = ready_scanner("4111 1111 1111 1111", 75.0).await;

        let outcome = f.scanner.tick().await;

        let card = match outcome {
            TickOutcome::Detected(card) => card,
            other => panic!("expected detection, got {other:?}"),
        };
        assert_eq!(card.number, "4111111111111111");
        assert_eq!(card.confidence, 75.0);
        assert_eq!(f.scanner.detected().unwrap().number, "4111111111111111");
        assert_eq!(f.scanner.display_number().as_deref(), Some("**** **** **** 1111"));

        assert!(f.scanner.toggle_reveal());
        assert_eq!(f.scanner.display_number().as_deref(), Some("4111 1111 1111 1111"));

        let overlay = f.scanner.overlay().unwrap();
        assert_eq!(overlay.rect.x, 128);
        assert_eq!(overlay.rect.y, 288);
        assert_eq!(overlay.color, LOW_CONFIDENCE_COLOR);
        assert_eq!(overlay.label, "75%");
        assert_eq!(f.scanner.overlay_canvas().unwrap().dimensions(), (1280, 720));
        assert!(!f.scanner.is_processing());
    }

    #[tokio::test]
    async fn test_confidence_at_threshold_is_rejected() {
        let f = ready_scanner("4111111111111111", 60.0).await;

        let outcome = f.scanner.tick().await;

        assert!(matches!(outcome, TickOutcome::Rejected { .. }));
        assert!(f.scanner.detected().is_none());
        assert!(f.scanner.overlay().is_none());
    }

    #[tokio::test]
    async fn test_malformed_grouping_is_rejected() {
        let f = ready_scanner("411 1111111111111", 95.0).await;

        let outcome = f.scanner.tick().await;

        assert_eq!(
            outcome,
            TickOutcome::Rejected {
                text: "411 1111111111111".to_string(),
                confidence: 95.0
            }
        );
        assert!(f.scanner.detected().is_none());
    }

    #[tokio::test]
    async fn test_toggle_requires_playing_camera() {
        let f = build(
            Arc::new(SyntheticCamera::new(1280, 720).without_autoplay()),
            Arc::new(ScriptedFactory::new()),
        );

        // Camera never started
        let err = f.scanner.toggle_scan().unwrap_err();
        assert!(matches!(err, ScanError::NotReady(_)));
        assert!(!f.scanner.is_scanning());

        // Started but stuck before playback
        let capture = f.scanner.capture();
        capture.start(&ConstraintOverrides::default()).await.unwrap();
        let mut rx = capture.subscribe();
        rx.wait_for(|r| *r == Readiness::CanPlay).await.unwrap();

        assert!(f.scanner.toggle_scan().is_err());
        assert!(!f.scanner.is_scanning());
        assert_eq!(f.scanner.stats(), ScanStats::default());
        assert!(f.scanner.detected().is_none());
    }

    #[tokio::test]
    async fn test_tick_skips_without_engine() {
        let f = build(
            Arc::new(SyntheticCamera::new(640, 480)),
            Arc::new(ScriptedFactory::replying("4111 1111 1111 1111", 90.0)),
        );
        let capture = f.scanner.capture();
        capture.start(&ConstraintOverrides::default()).await.unwrap();
        let mut rx = capture.subscribe();
        rx.wait_for(|r| *r == Readiness::Playing).await.unwrap();

        let outcome = f.scanner.tick().await;

        assert_eq!(outcome, TickOutcome::Skipped(SkipReason::EngineNotReady));
        assert_eq!(f.factory.call_count(), 0);
        assert!(!f.scanner.is_processing());
        assert_eq!(
            f.scanner.stats(),
            ScanStats {
                ticks: 1,
                skipped: 1,
                ..ScanStats::default()
            }
        );
    }

    #[tokio::test]
    async fn test_tick_skips_without_frame() {
        let f = ready_scanner("4111 1111 1111 1111", 90.0).await;
        f.scanner.capture().stop();

        let outcome = f.scanner.tick().await;

        assert_eq!(outcome, TickOutcome::Skipped(SkipReason::FrameNotReady));
        assert_eq!(f.factory.last_created().unwrap().calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_guard_drops_overlapping_tick() {
        let f = ready_scanner("4111 1111 1111 1111", 90.0).await;
        let backend = f.factory.last_created().unwrap();
        backend.set_delay(Duration::from_secs(5));

        let first = {
            let scanner = f.scanner.clone();
            tokio::spawn(async move { scanner.tick().await })
        };
        while backend.calls() == 0 {
            tokio::task::yield_now().await;
        }

        assert!(f.scanner.is_processing());
        assert_eq!(f.scanner.tick().await, TickOutcome::Skipped(SkipReason::Busy));

        let outcome = first.await.unwrap();
        assert!(matches!(outcome, TickOutcome::Detected(_)));
        assert!(!f.scanner.is_processing());
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_tick_releases_guard() {
        let f = ready_scanner("4111 1111 1111 1111", 90.0).await;
        let backend = f.factory.last_created().unwrap();
        backend.fail_with("engine crashed");

        let outcome = f.scanner.tick().await;
        assert!(matches!(outcome, TickOutcome::Failed(msg) if msg.contains("engine crashed")));
        assert!(!f.scanner.is_processing());

        backend.set_reply("4111 1111 1111 1111", 90.0);
        assert!(matches!(f.scanner.tick().await, TickOutcome::Detected(_)));
    }

    #[tokio::test]
    async fn test_degenerate_frame_fails_tick_only() {
        let f = ready_scanner("4111 1111 1111 1111", 90.0).await;
        // One row: the band rounds to zero height
        f.camera.set_frame(RgbaImage::new(8, 1));

        let outcome = f.scanner.tick().await;
        assert!(matches!(outcome, TickOutcome::Failed(_)));
        assert!(!f.scanner.is_processing());

        f.camera.set_frame(RgbaImage::new(640, 480));
        assert!(matches!(f.scanner.tick().await, TickOutcome::Detected(_)));
    }

    #[tokio::test]
    async fn test_new_detection_replaces_previous() {
        let f = ready_scanner("4111 1111 1111 1111", 90.0).await;
        let mut rx = f.scanner.subscribe();

        f.scanner.tick().await;
        assert_eq!(f.scanner.detected().unwrap().number, "4111111111111111");

        f.factory
            .last_created()
            .unwrap()
            .set_reply("5500 0000 0000 0004", 85.0);
        f.scanner.tick().await;

        assert_eq!(f.scanner.detected().unwrap().number, "5500000000000004");
        rx.wait_for(|card| card.as_ref().is_some_and(|c| c.number == "5500000000000004"))
            .await
            .unwrap();
        assert_eq!(f.scanner.stats().detected, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_ticks_while_scanning() {
        let f = ready_scanner("4111 1111 1111 1111", 90.0).await;
        let backend = f.factory.last_created().unwrap();

        assert!(f.scanner.toggle_scan().unwrap());
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(backend.calls(), 3);
        assert!(f.scanner.detected().is_some());

        assert!(!f.scanner.toggle_scan().unwrap());
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_recognition_skips_firings() {
        let f = ready_scanner("4111 1111 1111 1111", 90.0).await;
        let backend = f.factory.last_created().unwrap();
        backend.set_delay(Duration::from_millis(2500));

        f.scanner.toggle_scan().unwrap();
        // Ticks start at 1s and 4s; firings at 2s, 3s and 5s find the guard set
        tokio::time::sleep(Duration::from_millis(5500)).await;

        assert_eq!(backend.calls(), 2);
        assert_eq!(f.scanner.stats().skipped, 3);
        f.scanner.stop_scan();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_does_not_cancel_inflight_tick() {
        let f = ready_scanner("4111 1111 1111 1111", 90.0).await;
        let backend = f.factory.last_created().unwrap();
        backend.set_delay(Duration::from_secs(2));

        f.scanner.toggle_scan().unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(f.scanner.is_processing());

        f.scanner.stop_scan();
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert!(f.scanner.detected().is_some());
        assert!(!f.scanner.is_processing());
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_releases_everything_once() {
        let f = ready_scanner("4111 1111 1111 1111", 90.0).await;
        let backend = f.factory.last_created().unwrap();
        f.scanner.toggle_scan().unwrap();

        f.scanner.shutdown();
        f.scanner.shutdown();

        assert!(!f.scanner.is_scanning());
        assert_eq!(f.camera.live_streams(), 0);
        assert!(backend.is_terminated());
        assert!(f.scanner.engine().status().disposed);
        assert!(f.scanner.toggle_scan().is_err());
    }
}
