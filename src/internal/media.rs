use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use webrtc::track::track_local::TrackLocal;

use crate::internal::data_types::TrackKind;
use crate::internal::error::CallError;

/// a locally captured track. enablement and stop state are only ever mutated
/// here; peer connections merely reference the underlying track
pub struct LocalTrack {
    kind: TrackKind,
    rtc: Arc<dyn TrackLocal + Send + Sync>,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl LocalTrack {
    pub fn new(kind: TrackKind, rtc: Arc<dyn TrackLocal + Send + Sync>) -> Self {
        Self {
            kind,
            rtc,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn rtc(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.rtc.clone()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// releases the capture device; a stopped track never comes back
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("kind", &self.kind)
            .field("id", &self.rtc.id())
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// one capture stream (camera+mic, or display)
#[derive(Debug, Default, Clone)]
pub struct LocalStream {
    pub audio: Option<Arc<LocalTrack>>,
    pub video: Option<Arc<LocalTrack>>,
}

impl LocalStream {
    pub fn stop_all(&self) {
        if let Some(t) = &self.audio {
            t.stop();
        }
        if let Some(t) = &self.video {
            t.stop();
        }
    }

    pub fn has_live_audio(&self) -> bool {
        self.audio.as_ref().map_or(false, |t| !t.is_stopped())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaEvent {
    /// the user stopped sharing via platform UI
    ScreenShareEnded,
}

/// platform capture primitives, treated as a black box
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// combined audio+video capture.
    /// errors: `MediaAccessDenied`, `MediaDeviceUnavailable`
    async fn open_camera(&self) -> Result<LocalStream, CallError>;

    /// display capture (video, optionally audio). implementations must send
    /// `MediaEvent::ScreenShareEnded` on `ended` when sharing stops outside
    /// our control. errors: `ScreenShareDenied`, `ScreenShareUnsupported`
    async fn open_screen(
        &self,
        ended: mpsc::UnboundedSender<MediaEvent>,
    ) -> Result<LocalStream, CallError>;
}

/// owns local capture streams and the enabled/sharing flags.
/// screen share takes priority over the camera as the outbound video source
pub struct MediaSourceManager {
    devices: Arc<dyn MediaDevices>,
    media_events: mpsc::UnboundedSender<MediaEvent>,
    camera: Option<LocalStream>,
    screen: Option<LocalStream>,
    mic_enabled: bool,
    camera_enabled: bool,
    screen_sharing: bool,
}

impl MediaSourceManager {
    pub fn new(
        devices: Arc<dyn MediaDevices>,
        media_events: mpsc::UnboundedSender<MediaEvent>,
    ) -> Self {
        Self {
            devices,
            media_events,
            camera: None,
            screen: None,
            mic_enabled: false,
            camera_enabled: false,
            screen_sharing: false,
        }
    }

    /// requests camera+mic capture. a prior camera stream is stopped only
    /// after the new one is acquired, so a denied request leaves outbound
    /// media untouched
    pub async fn acquire_camera(&mut self) -> Result<(), CallError> {
        let stream = self.devices.open_camera().await?;
        if let Some(old) = self.camera.take() {
            old.stop_all();
        }
        self.camera = Some(stream);
        self.mic_enabled = true;
        self.camera_enabled = true;
        Ok(())
    }

    /// requests display capture. the camera video track is disabled, not
    /// stopped, so resuming after the share ends is cheap
    pub async fn acquire_screen(&mut self) -> Result<(), CallError> {
        if self.screen_sharing {
            return Ok(());
        }
        let stream = self.devices.open_screen(self.media_events.clone()).await?;
        if let Some(cam) = self.camera.as_ref().and_then(|s| s.video.as_ref()) {
            cam.set_enabled(false);
        }
        self.screen = Some(stream);
        self.screen_sharing = true;
        Ok(())
    }

    /// stops and discards the screen stream and restores the camera video
    /// track to its pre-share enablement
    pub fn release_screen(&mut self) {
        if let Some(screen) = self.screen.take() {
            screen.stop_all();
        }
        if let Some(cam) = self.camera.as_ref().and_then(|s| s.video.as_ref()) {
            cam.set_enabled(self.camera_enabled);
        }
        self.screen_sharing = false;
    }

    /// no-op when no stream carries audio
    pub fn set_mic_enabled(&mut self, enabled: bool) {
        self.mic_enabled = enabled;
        for stream in [self.camera.as_ref(), self.screen.as_ref()]
            .into_iter()
            .flatten()
        {
            if let Some(t) = stream.audio.as_ref() {
                t.set_enabled(enabled);
            }
        }
    }

    /// while sharing, only the flag changes; the camera track stays dark until
    /// the share is released
    pub fn set_camera_enabled(&mut self, enabled: bool) {
        self.camera_enabled = enabled;
        if self.screen_sharing {
            return;
        }
        if let Some(t) = self.camera.as_ref().and_then(|s| s.video.as_ref()) {
            t.set_enabled(enabled);
        }
    }

    /// the screen stream while sharing, else the camera stream, else none
    pub fn active_outbound(&self) -> Option<&LocalStream> {
        if self.screen_sharing {
            self.screen.as_ref()
        } else {
            self.camera.as_ref()
        }
    }

    pub fn active_video_track(&self) -> Option<Arc<LocalTrack>> {
        self.active_outbound().and_then(|s| s.video.clone())
    }

    /// stream to attach to newly created connections: the active video
    /// source, with the camera's audio when the active stream carries none
    /// (a display capture usually has no microphone)
    pub fn outbound_stream(&self) -> Option<LocalStream> {
        let active = self.active_outbound()?;
        if active.audio.is_some() {
            return Some(active.clone());
        }
        Some(LocalStream {
            audio: self.camera.as_ref().and_then(|s| s.audio.clone()),
            video: active.video.clone(),
        })
    }

    pub fn release_all(&mut self) {
        if let Some(camera) = self.camera.take() {
            camera.stop_all();
        }
        if let Some(screen) = self.screen.take() {
            screen.stop_all();
        }
        self.mic_enabled = false;
        self.camera_enabled = false;
        self.screen_sharing = false;
    }

    pub fn mic_enabled(&self) -> bool {
        self.mic_enabled
    }

    pub fn camera_enabled(&self) -> bool {
        self.camera_enabled
    }

    pub fn screen_sharing(&self) -> bool {
        self.screen_sharing
    }

    pub fn has_live_audio(&self) -> bool {
        self.camera.as_ref().map_or(false, |s| s.has_live_audio())
    }
}
