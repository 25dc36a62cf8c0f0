//! Synthetic camera backend
//!
//! Produces generated frames and the usual playback event sequence without
//! any hardware. Failures can be scripted to exercise the session manager.

use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::{MediaDevices, MediaError, MediaRequest, MediaStream, PlaybackEvent, TrackSettings, VideoSink};

/// Stream handed out by [`SyntheticCamera`]
pub struct SyntheticStream {
    id: String,
    settings: TrackSettings,
    stopped: AtomicBool,
}

impl SyntheticStream {
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl MediaStream for SyntheticStream {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn track_settings(&self) -> Vec<TrackSettings> {
        vec![self.settings.clone()]
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

struct Attached {
    events: mpsc::UnboundedSender<PlaybackEvent>,
}

/// Camera double implementing both the device and the sink side
pub struct SyntheticCamera {
    width: u32,
    height: u32,
    supported: bool,
    play_allowed: AtomicBool,
    failures: Mutex<VecDeque<MediaError>>,
    requests: Mutex<Vec<MediaRequest>>,
    streams: Mutex<Vec<Arc<SyntheticStream>>>,
    attached: Mutex<Option<Attached>>,
    frame_override: Mutex<Option<RgbaImage>>,
    frame_index: AtomicU64,
}

impl SyntheticCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            supported: true,
            play_allowed: AtomicBool::new(true),
            failures: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            streams: Mutex::new(Vec::new()),
            attached: Mutex::new(None),
            frame_override: Mutex::new(None),
            frame_index: AtomicU64::new(0),
        }
    }

    /// Report that no capture capability exists
    pub fn unsupported(mut self) -> Self {
        self.supported = false;
        self
    }

    /// Refuse `play()` until [`allow_play`](Self::allow_play) is called
    pub fn without_autoplay(self) -> Self {
        self.play_allowed.store(false, Ordering::SeqCst);
        self
    }

    pub fn allow_play(&self, allowed: bool) {
        self.play_allowed.store(allowed, Ordering::SeqCst);
    }

    /// Queue an error for the next device request
    pub fn fail_next(&self, err: MediaError) {
        self.failures.lock().push_back(err);
    }

    /// Serve this exact image instead of generated frames
    pub fn set_frame(&self, frame: RgbaImage) {
        *self.frame_override.lock() = Some(frame);
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<MediaRequest> {
        self.requests.lock().clone()
    }

    /// Streams handed out and not yet stopped
    pub fn live_streams(&self) -> usize {
        self.streams.lock().iter().filter(|s| !s.is_stopped()).count()
    }

    fn generate_frame(&self) -> RgbaImage {
        let index = self.frame_index.fetch_add(1, Ordering::Relaxed);
        let (w, h) = (self.width, self.height);
        let band_top = h * 2 / 5;
        let band_bottom = band_top + h * 3 / 10;
        RgbaImage::from_fn(w, h, |x, y| {
            if y >= band_top && y < band_bottom {
                // Alternating light blocks on a dark band, loosely digit-shaped
                let cell = (x * 16 / w.max(1)) as u64;
                let value = if (cell + index) % 2 == 0 { 220 } else { 40 };
                Rgba([value, value, value, 255])
            } else {
                let shade = ((x + y) as u64 + index) % 256;
                Rgba([shade as u8, (shade / 2) as u8, 96, 255])
            }
        })
    }
}

#[async_trait]
impl MediaDevices for SyntheticCamera {
    fn is_supported(&self) -> bool {
        self.supported
    }

    async fn get_user_media(
        &self,
        request: &MediaRequest,
    ) -> Result<Arc<dyn MediaStream>, MediaError> {
        self.requests.lock().push(request.clone());

        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }

        let facing_mode = match request {
            MediaRequest::Constrained(c) => Some(c.facing_mode.as_str().to_string()),
            MediaRequest::Unconstrained => None,
        };

        let id = {
            let streams = self.streams.lock();
            format!("synthetic-{}", streams.len())
        };
        let stream = Arc::new(SyntheticStream {
            id,
            settings: TrackSettings {
                label: "Synthetic Camera".to_string(),
                device_id: Some("synthetic0".to_string()),
                width: Some(self.width),
                height: Some(self.height),
                frame_rate: Some(30.0),
                facing_mode,
            },
            stopped: AtomicBool::new(false),
        });
        self.streams.lock().push(Arc::clone(&stream));
        Ok(stream)
    }
}

#[async_trait]
impl VideoSink for SyntheticCamera {
    fn attach(&self, _stream: Arc<dyn MediaStream>, events: mpsc::UnboundedSender<PlaybackEvent>) {
        let _ = events.send(PlaybackEvent::LoadedMetadata);
        let _ = events.send(PlaybackEvent::CanPlay);
        *self.attached.lock() = Some(Attached { events });
    }

    fn detach(&self) {
        *self.attached.lock() = None;
    }

    async fn play(&self) -> Result<(), String> {
        let attached = self.attached.lock();
        let Some(attached) = attached.as_ref() else {
            return Err("no stream attached".to_string());
        };
        if !self.play_allowed.load(Ordering::SeqCst) {
            return Err("play() blocked: autoplay is not allowed".to_string());
        }
        let _ = attached.events.send(PlaybackEvent::Playing);
        Ok(())
    }

    fn dimensions(&self) -> (u32, u32) {
        if self.attached.lock().is_none() {
            return (0, 0);
        }
        match self.frame_override.lock().as_ref() {
            Some(frame) => frame.dimensions(),
            None => (self.width, self.height),
        }
    }

    fn snapshot(&self) -> Option<RgbaImage> {
        if self.attached.lock().is_none() {
            return None;
        }
        if let Some(frame) = self.frame_override.lock().as_ref() {
            return Some(frame.clone());
        }
        Some(self.generate_frame())
    }
}
