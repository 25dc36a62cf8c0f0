//! Camera Capture Layer
//!
//! Owns the camera stream lifecycle: capability check, constrained request with
//! a single relaxed-constraint fallback, playback readiness tracking and
//! teardown. Platform camera access plugs in through [`MediaDevices`],
//! [`MediaStream`] and [`VideoSink`].

pub mod constraints;
pub mod frame;
#[cfg(any(test, feature = "backend-mock"))]
pub mod mock;

use async_trait::async_trait;
use image::RgbaImage;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use constraints::{CaptureConstraints, ConstraintOverrides, MediaRequest};
pub use frame::FrameBuffer;

/// Playback progress of the attached video
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub enum Readiness {
    #[default]
    NotStarted,
    Requesting,
    StreamObtained,
    MetadataLoaded,
    CanPlay,
    Playing,
}

impl std::fmt::Display for Readiness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Readiness::NotStarted => write!(f, "NotStarted"),
            Readiness::Requesting => write!(f, "Requesting"),
            Readiness::StreamObtained => write!(f, "StreamObtained"),
            Readiness::MetadataLoaded => write!(f, "MetadataLoaded"),
            Readiness::CanPlay => write!(f, "CanPlay"),
            Readiness::Playing => write!(f, "Playing"),
        }
    }
}

/// Events raised by the video sink while it loads and plays a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    LoadedMetadata,
    CanPlay,
    Playing,
    Error(String),
}

/// Settings reported by one media track
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrackSettings {
    pub label: String,
    pub device_id: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<f64>,
    pub facing_mode: Option<String>,
}

/// Errors raised by the platform media-capture call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    #[error("permission denied: {0}")]
    NotAllowed(String),
    #[error("no device: {0}")]
    NotFound(String),
    #[error("device not readable: {0}")]
    NotReadable(String),
    #[error("constraint cannot be satisfied: {constraint}")]
    OverConstrained { constraint: String },
    #[error("{0}")]
    Other(String),
}

/// Operator-facing capture failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("Camera permission denied. Allow camera access and try again.")]
    PermissionDenied,
    #[error("No camera found on this device.")]
    DeviceMissing,
    #[error("The camera is already in use by another application.")]
    DeviceBusy,
    #[error("The camera does not support the requested settings ({0}).")]
    ConstraintsUnsupported(String),
    #[error("Camera capture is not supported on this platform.")]
    Unsupported,
    #[error("Video playback failed: {0}")]
    Playback(String),
    #[error("Camera request was superseded before it completed.")]
    Superseded,
    #[error("Camera error: {0}")]
    Other(String),
}

impl From<MediaError> for CaptureError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::NotAllowed(_) => CaptureError::PermissionDenied,
            MediaError::NotFound(_) => CaptureError::DeviceMissing,
            MediaError::NotReadable(_) => CaptureError::DeviceBusy,
            MediaError::OverConstrained { constraint } => {
                CaptureError::ConstraintsUnsupported(constraint)
            }
            MediaError::Other(msg) => CaptureError::Other(msg),
        }
    }
}

/// A live camera stream
pub trait MediaStream: Send + Sync {
    /// Stream identifier
    fn id(&self) -> String;
    /// Per-track settings negotiated by the platform
    fn track_settings(&self) -> Vec<TrackSettings>;
    /// Stop every track of the stream
    fn stop(&self);
}

/// Platform camera acquisition
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Whether camera capture exists at all
    fn is_supported(&self) -> bool;
    /// Request a camera stream
    async fn get_user_media(&self, request: &MediaRequest) -> Result<Arc<dyn MediaStream>, MediaError>;
}

/// The element a stream is played into and frames are read from
#[async_trait]
pub trait VideoSink: Send + Sync {
    /// Attach a stream; playback progress is reported through `events`
    fn attach(&self, stream: Arc<dyn MediaStream>, events: mpsc::UnboundedSender<PlaybackEvent>);
    /// Detach the current stream, if any
    fn detach(&self);
    /// Start playback
    async fn play(&self) -> Result<(), String>;
    /// Current video dimensions, (0, 0) before metadata is known
    fn dimensions(&self) -> (u32, u32);
    /// Copy of the current frame at native size
    fn snapshot(&self) -> Option<RgbaImage>;
}

/// Session state, owned by [`CaptureSessionManager`]
#[derive(Default)]
struct SessionState {
    stream: Option<Arc<dyn MediaStream>>,
    readiness: Readiness,
    last_error: Option<String>,
    diagnostics: BTreeMap<String, serde_json::Value>,
    /// Bumped by every start/stop; late results from an older request are dropped
    generation: u64,
    event_pump: Option<JoinHandle<()>>,
}

struct CaptureShared {
    devices: Arc<dyn MediaDevices>,
    sink: Arc<dyn VideoSink>,
    defaults: CaptureConstraints,
    state: Mutex<SessionState>,
    readiness_tx: watch::Sender<Readiness>,
}

/// Camera session manager
#[derive(Clone)]
pub struct CaptureSessionManager {
    shared: Arc<CaptureShared>,
}

impl CaptureSessionManager {
    pub fn new(
        devices: Arc<dyn MediaDevices>,
        sink: Arc<dyn VideoSink>,
        defaults: CaptureConstraints,
    ) -> Self {
        let (readiness_tx, _) = watch::channel(Readiness::NotStarted);
        Self {
            shared: Arc::new(CaptureShared {
                devices,
                sink,
                defaults,
                state: Mutex::new(SessionState::default()),
                readiness_tx,
            }),
        }
    }

    /// Request the camera and attach it to the video sink
    pub async fn start(&self, overrides: &ConstraintOverrides) -> Result<(), CaptureError> {
        if !self.shared.devices.is_supported() {
            let err = CaptureError::Unsupported;
            self.shared.state.lock().last_error = Some(err.to_string());
            warn!("camera capture unsupported");
            return Err(err);
        }

        // A running session is replaced, never duplicated
        if self.has_stream() {
            info!("restarting camera session");
            self.stop();
        }

        let generation = {
            let mut state = self.shared.state.lock();
            state.generation += 1;
            state.last_error = None;
            state.diagnostics.clear();
            self.set_readiness(&mut state, Readiness::Requesting);
            state.generation
        };

        let constraints = self.shared.defaults.merged(overrides);
        info!(constraints = %constraints.to_json(), "requesting camera");

        let mut relaxed = false;
        let result = match self
            .shared
            .devices
            .get_user_media(&MediaRequest::Constrained(constraints.clone()))
            .await
        {
            Err(MediaError::OverConstrained { constraint }) => {
                warn!(%constraint, "camera rejected constraints, retrying unconstrained");
                relaxed = true;
                self.shared
                    .devices
                    .get_user_media(&MediaRequest::Unconstrained)
                    .await
            }
            other => other,
        };

        let stream = match result {
            Ok(stream) => stream,
            Err(media_err) => {
                let err = CaptureError::from(media_err.clone());
                let mut state = self.shared.state.lock();
                if state.generation == generation {
                    state.last_error = Some(err.to_string());
                    self.set_readiness(&mut state, Readiness::NotStarted);
                }
                warn!(error = %media_err, "camera request failed");
                return Err(err);
            }
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        {
            let mut state = self.shared.state.lock();
            if state.generation != generation {
                drop(state);
                info!("camera session stopped while requesting, releasing late stream");
                stream.stop();
                return Err(CaptureError::Superseded);
            }

            let tracks = stream.track_settings();
            state
                .diagnostics
                .insert("stream_id".to_string(), serde_json::json!(stream.id()));
            state
                .diagnostics
                .insert("constraints".to_string(), constraints.to_json());
            state
                .diagnostics
                .insert("relaxed_constraints".to_string(), serde_json::json!(relaxed));
            state
                .diagnostics
                .insert("track_count".to_string(), serde_json::json!(tracks.len()));
            if let Some(track) = tracks.first() {
                state.diagnostics.insert(
                    "track".to_string(),
                    serde_json::to_value(track).unwrap_or_default(),
                );
                info!(
                    label = %track.label,
                    width = ?track.width,
                    height = ?track.height,
                    facing = ?track.facing_mode,
                    "camera stream obtained"
                );
            }

            state.stream = Some(Arc::clone(&stream));
            self.set_readiness(&mut state, Readiness::StreamObtained);
            state.event_pump = Some(self.spawn_event_pump(generation, events_rx));
        }

        self.shared.sink.attach(stream, events_tx);

        // Autoplay can be refused by the platform; force_play() covers that case
        if let Err(e) = self.shared.sink.play().await {
            warn!(error = %e, "autoplay rejected, waiting for manual play");
        }

        Ok(())
    }

    /// Stop every track and reset the session
    pub fn stop(&self) {
        let (stream, pump) = {
            let mut state = self.shared.state.lock();
            state.generation += 1;
            self.set_readiness(&mut state, Readiness::NotStarted);
            state.diagnostics.clear();
            (state.stream.take(), state.event_pump.take())
        };

        if let Some(pump) = pump {
            pump.abort();
        }
        self.shared.sink.detach();

        if let Some(stream) = stream {
            stream.stop();
            info!(stream_id = %stream.id(), "camera stopped");
        }
    }

    /// Manually start playback, for platforms that block autoplay
    pub async fn force_play(&self) -> Result<(), CaptureError> {
        if !self.has_stream() {
            let err = CaptureError::Playback("no camera stream".to_string());
            self.shared.state.lock().last_error = Some(err.to_string());
            return Err(err);
        }

        match self.shared.sink.play().await {
            Ok(()) => {
                info!("manual playback started");
                Ok(())
            }
            Err(msg) => {
                let err = CaptureError::Playback(msg);
                warn!(error = %err, "manual playback failed");
                self.shared.state.lock().last_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    fn apply_event(&self, generation: u64, event: PlaybackEvent) {
        let mut state = self.shared.state.lock();
        if state.generation != generation || state.stream.is_none() {
            debug!(?event, "ignoring playback event for inactive stream");
            return;
        }

        let target = match event {
            PlaybackEvent::LoadedMetadata => Readiness::MetadataLoaded,
            PlaybackEvent::CanPlay => Readiness::CanPlay,
            PlaybackEvent::Playing => Readiness::Playing,
            PlaybackEvent::Error(msg) => {
                warn!(error = %msg, "video element error");
                state.last_error = Some(CaptureError::Playback(msg).to_string());
                return;
            }
        };

        // Readiness only moves forward
        if target > state.readiness {
            if target == Readiness::MetadataLoaded {
                let (width, height) = self.shared.sink.dimensions();
                state
                    .diagnostics
                    .insert("video_width".to_string(), serde_json::json!(width));
                state
                    .diagnostics
                    .insert("video_height".to_string(), serde_json::json!(height));
            }
            self.set_readiness(&mut state, target);
        }
    }

    fn spawn_event_pump(
        &self,
        generation: u64,
        mut events: mpsc::UnboundedReceiver<PlaybackEvent>,
    ) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                manager.apply_event(generation, event);
            }
        })
    }

    fn set_readiness(&self, state: &mut SessionState, next: Readiness) {
        if state.readiness != next {
            debug!(from = %state.readiness, to = %next, "camera readiness");
        }
        state.readiness = next;
        self.shared.readiness_tx.send_replace(next);
    }

    /// Current readiness
    pub fn readiness(&self) -> Readiness {
        self.shared.state.lock().readiness
    }

    /// Subscribe to readiness changes
    pub fn subscribe(&self) -> watch::Receiver<Readiness> {
        self.shared.readiness_tx.subscribe()
    }

    pub fn has_stream(&self) -> bool {
        self.shared.state.lock().stream.is_some()
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.state.lock().last_error.clone()
    }

    pub fn diagnostics(&self) -> BTreeMap<String, serde_json::Value> {
        self.shared.state.lock().diagnostics.clone()
    }

    /// Live video dimensions
    pub fn frame_dimensions(&self) -> (u32, u32) {
        self.shared.sink.dimensions()
    }

    /// True when playing with a non-empty frame
    pub fn is_frame_ready(&self) -> bool {
        let (width, height) = self.frame_dimensions();
        self.readiness() == Readiness::Playing && width > 0 && height > 0
    }

    /// Snapshot the current frame if the video is playing
    pub fn snapshot(&self) -> Option<FrameBuffer> {
        if !self.is_frame_ready() {
            return None;
        }
        self.shared
            .sink
            .snapshot()
            .filter(|img| img.width() > 0 && img.height() > 0)
            .map(FrameBuffer::new)
    }
}
