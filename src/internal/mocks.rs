//! in-process fakes for the platform collaborators, used by the unit tests to
//! simulate multiple participants without real devices or a network

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::internal::captions::{CaptionEvent, SpeechRecognizer};
use crate::internal::data_types::{PeerId, TrackKind};
use crate::internal::error::CallError;
use crate::internal::media::{LocalStream, LocalTrack, MediaDevices, MediaEvent};
use crate::internal::signaling::{IceCandidate, SessionDescription};
use crate::internal::transport::{PeerTransport, TransportError, TransportEvent, TransportFactory};

pub fn audio_track(id: &str, stream_id: &str) -> Arc<LocalTrack> {
    let rtc = Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            ..Default::default()
        },
        id.to_owned(),
        stream_id.to_owned(),
    ));
    Arc::new(LocalTrack::new(TrackKind::Audio, rtc))
}

pub fn video_track(id: &str, stream_id: &str) -> Arc<LocalTrack> {
    let rtc = Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            ..Default::default()
        },
        id.to_owned(),
        stream_id.to_owned(),
    ));
    Arc::new(LocalTrack::new(TrackKind::Video, rtc))
}

pub fn camera_stream() -> LocalStream {
    LocalStream {
        audio: Some(audio_track("mic", "camera")),
        video: Some(video_track("cam", "camera")),
    }
}

#[derive(Default)]
pub struct MockTransportState {
    pub local_description: Option<SessionDescription>,
    pub remote_description: Option<SessionDescription>,
    pub applied_candidates: Vec<IceCandidate>,
    pub attached: HashMap<TrackKind, String>,
    pub replaced: Vec<(TrackKind, Option<String>)>,
    pub closed: bool,
    pub fail_candidates_after: Option<usize>,
}

pub struct MockTransport {
    pub remote: PeerId,
    pub events: mpsc::UnboundedSender<TransportEvent>,
    pub state: Mutex<MockTransportState>,
}

impl MockTransport {
    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.state.lock().unwrap().applied_candidates.clone()
    }

    pub fn replaced(&self) -> Vec<(TrackKind, Option<String>)> {
        self.state.lock().unwrap().replaced.clone()
    }

    pub fn closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// candidate applications beyond `n` fail with a generic transport error
    pub fn fail_candidates_after(&self, n: usize) {
        self.state.lock().unwrap().fail_candidates_after = Some(n);
    }
}

#[async_trait]
impl PeerTransport for MockTransport {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        Ok(SessionDescription(serde_json::json!({
            "type": "offer",
            "from": self.remote.clone(),
        })))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        Ok(SessionDescription(serde_json::json!({
            "type": "answer",
            "from": self.remote.clone(),
        })))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        self.state.lock().unwrap().local_description = Some(desc);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        // standards-conformant transports reject a remote offer while a local
        // offer is still unanswered (have-local-offer)
        let incoming_offer = desc.0.get("type").and_then(|t| t.as_str()) == Some("offer");
        let local_offer_pending = state.remote_description.is_none()
            && state
                .local_description
                .as_ref()
                .and_then(|d| d.0.get("type"))
                .and_then(|t| t.as_str())
                == Some("offer");
        if incoming_offer && local_offer_pending {
            return Err(TransportError::InvalidState(
                "remote offer arrived while a local offer is pending".into(),
            ));
        }
        state.remote_description = Some(desc);
        Ok(())
    }

    async fn has_remote_description(&self) -> bool {
        self.state.lock().unwrap().remote_description.is_some()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        if let Some(limit) = state.fail_candidates_after {
            if state.applied_candidates.len() >= limit {
                return Err(TransportError::Failed("ice agent unavailable".into()));
            }
        }
        if state.applied_candidates.contains(&candidate) {
            return Err(TransportError::DuplicateCandidate);
        }
        state.applied_candidates.push(candidate);
        Ok(())
    }

    async fn attach_track(
        &self,
        kind: TrackKind,
        track: Arc<dyn TrackLocal + Send + Sync>,
    ) -> Result<(), TransportError> {
        self.state
            .lock()
            .unwrap()
            .attached
            .insert(kind, track.id().to_owned());
        Ok(())
    }

    async fn replace_track(
        &self,
        kind: TrackKind,
        track: Option<Arc<dyn TrackLocal + Send + Sync>>,
    ) -> Result<(), TransportError> {
        let id = track.map(|t| t.id().to_owned());
        let mut state = self.state.lock().unwrap();
        if let Some(id) = id.clone() {
            state.attached.insert(kind, id);
        }
        state.replaced.push((kind, id));
        Ok(())
    }

    async fn close(&self) {
        self.state.lock().unwrap().closed = true;
    }
}

#[derive(Default)]
pub struct MockFactory {
    pub created: Mutex<Vec<Arc<MockTransport>>>,
    pub fail_create: AtomicBool,
}

impl MockFactory {
    pub fn transport_for(&self, remote: &str) -> Option<Arc<MockTransport>> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.remote == remote)
            .cloned()
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }
}

#[async_trait]
impl TransportFactory for MockFactory {
    async fn create(
        &self,
        remote: PeerId,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Arc<dyn PeerTransport>, TransportError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(TransportError::Failed("factory offline".into()));
        }
        let transport = Arc::new(MockTransport {
            remote,
            events,
            state: Mutex::new(MockTransportState::default()),
        });
        self.created.lock().unwrap().push(transport.clone());
        Ok(transport)
    }
}

#[derive(Default)]
pub struct MockDevices {
    deny_camera: AtomicBool,
    deny_screen: AtomicBool,
    screen_ended_tx: Mutex<Option<mpsc::UnboundedSender<MediaEvent>>>,
}

impl MockDevices {
    pub fn deny_camera(&self) {
        self.deny_camera.store(true, Ordering::SeqCst);
    }

    pub fn deny_screen(&self) {
        self.deny_screen.store(true, Ordering::SeqCst);
    }

    /// simulates the user ending the share from platform UI
    pub fn end_screen_share(&self) {
        if let Some(tx) = self.screen_ended_tx.lock().unwrap().take() {
            let _ = tx.send(MediaEvent::ScreenShareEnded);
        }
    }
}

#[async_trait]
impl MediaDevices for MockDevices {
    async fn open_camera(&self) -> Result<LocalStream, CallError> {
        if self.deny_camera.load(Ordering::SeqCst) {
            return Err(CallError::MediaAccessDenied);
        }
        Ok(camera_stream())
    }

    async fn open_screen(
        &self,
        ended: mpsc::UnboundedSender<MediaEvent>,
    ) -> Result<LocalStream, CallError> {
        if self.deny_screen.load(Ordering::SeqCst) {
            return Err(CallError::ScreenShareDenied);
        }
        *self.screen_ended_tx.lock().unwrap() = Some(ended);
        Ok(LocalStream {
            audio: None,
            video: Some(video_track("display", "screen")),
        })
    }
}

#[derive(Default)]
pub struct MockRecognizer {
    starts: AtomicUsize,
    stops: AtomicUsize,
    fail_start: AtomicBool,
    pub events: Mutex<Option<mpsc::UnboundedSender<CaptionEvent>>>,
}

impl MockRecognizer {
    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn fail_next_start(&self) {
        self.fail_start.store(true, Ordering::SeqCst);
    }

    pub fn emit(&self, event: CaptionEvent) {
        if let Some(tx) = self.events.lock().unwrap().as_ref() {
            let _ = tx.send(event);
        }
    }
}

impl SpeechRecognizer for MockRecognizer {
    fn start(&self, events: mpsc::UnboundedSender<CaptionEvent>) -> Result<(), CallError> {
        if self.fail_start.swap(false, Ordering::SeqCst) {
            return Err(CallError::CaptionUnavailable);
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        *self.events.lock().unwrap() = Some(events);
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}
