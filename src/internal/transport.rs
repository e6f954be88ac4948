use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use derive_more::Display;
use tokio::sync::{mpsc, Mutex};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::internal::data_types::{PeerId, TrackKind};
use crate::internal::signaling::{IceCandidate, SessionDescription};

/// classified negotiation-layer failures. `DuplicateCandidate` and
/// `InvalidState` are tolerated by the registry instead of being fatal
#[derive(Debug, Display)]
pub enum TransportError {
    #[display(fmt = "operation against an invalid negotiation state: {}", _0)]
    InvalidState(String),
    #[display(fmt = "candidate was already applied")]
    DuplicateCandidate,
    #[display(fmt = "{}", _0)]
    Failed(String),
}

impl std::error::Error for TransportError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Connected,
    Failed,
    Disconnected,
    Closed,
}

/// callbacks from the negotiation layer, forwarded into the session loop
pub enum TransportEvent {
    /// a locally discovered candidate that must be relayed to the remote side.
    /// terminal (null) candidate notifications are never forwarded
    LocalCandidate {
        peer: PeerId,
        candidate: IceCandidate,
    },
    Connectivity {
        peer: PeerId,
        state: ConnectivityState,
    },
    RemoteTrack {
        peer: PeerId,
        track: Arc<TrackRemote>,
    },
}

/// the underlying transport/negotiation object, opaque to the registry beyond
/// these operations
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn create_offer(&self) -> std::result::Result<SessionDescription, TransportError>;
    async fn create_answer(&self) -> std::result::Result<SessionDescription, TransportError>;
    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> std::result::Result<(), TransportError>;
    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> std::result::Result<(), TransportError>;
    async fn has_remote_description(&self) -> bool;
    async fn add_ice_candidate(
        &self,
        candidate: IceCandidate,
    ) -> std::result::Result<(), TransportError>;
    async fn attach_track(
        &self,
        kind: TrackKind,
        track: Arc<dyn TrackLocal + Send + Sync>,
    ) -> std::result::Result<(), TransportError>;
    /// replace the outbound track for `kind` in place, preserving the existing
    /// negotiation; adds a new sender if none exists yet and a track is supplied
    async fn replace_track(
        &self,
        kind: TrackKind,
        track: Option<Arc<dyn TrackLocal + Send + Sync>>,
    ) -> std::result::Result<(), TransportError>;
    async fn close(&self);
}

#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        remote: PeerId,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> std::result::Result<Arc<dyn PeerTransport>, TransportError>;
}

/// production factory over webrtc-rs
pub struct WebRtcFactory {
    api: webrtc::api::API,
    ice_servers: Vec<String>,
}

impl WebRtcFactory {
    pub fn new(ice_servers: Vec<String>) -> Result<Self> {
        Ok(Self {
            api: create_api()?,
            ice_servers,
        })
    }
}

#[async_trait]
impl TransportFactory for WebRtcFactory {
    async fn create(
        &self,
        remote: PeerId,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> std::result::Result<Arc<dyn PeerTransport>, TransportError> {
        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let pc = Arc::new(
            self.api
                .new_peer_connection(config)
                .await
                .map_err(|e| TransportError::Failed(e.to_string()))?,
        );

        // forward locally discovered candidates to the session loop
        let tx = events.clone();
        let dest = remote.clone();
        pc.on_ice_candidate(Box::new(move |c: Option<RTCIceCandidate>| {
            let tx = tx.clone();
            let dest = dest.clone();
            Box::pin(async move {
                if let Some(candidate) = c {
                    let candidate = match candidate.to_json() {
                        Ok(init) => init.candidate,
                        Err(e) => {
                            log::error!("failed to serialize local candidate for {}: {}", dest, e);
                            return;
                        }
                    };
                    let payload = serde_json::json!({ "candidate": candidate });
                    if let Err(e) = tx.send(TransportEvent::LocalCandidate {
                        peer: dest.clone(),
                        candidate: IceCandidate(payload),
                    }) {
                        log::error!("failed to forward candidate for {}: {}", dest, e);
                    }
                }
            })
        }));

        let tx = events.clone();
        let dest = remote.clone();
        pc.on_ice_connection_state_change(Box::new(
            move |connection_state: RTCIceConnectionState| {
                log::info!("connection state for {} changed: {}", dest, connection_state);
                let state = match connection_state {
                    RTCIceConnectionState::Connected => Some(ConnectivityState::Connected),
                    RTCIceConnectionState::Failed => Some(ConnectivityState::Failed),
                    RTCIceConnectionState::Disconnected => Some(ConnectivityState::Disconnected),
                    RTCIceConnectionState::Closed => Some(ConnectivityState::Closed),
                    _ => None,
                };
                if let Some(state) = state {
                    if let Err(e) = tx.send(TransportEvent::Connectivity {
                        peer: dest.clone(),
                        state,
                    }) {
                        log::error!("failed to forward connectivity change for {}: {}", dest, e);
                    }
                }
                Box::pin(async {})
            },
        ));

        let tx = events;
        let dest = remote;
        pc.on_track(Box::new(
            move |track: Option<Arc<TrackRemote>>, _receiver: Option<Arc<RTCRtpReceiver>>| {
                if let Some(track) = track {
                    if let Err(e) = tx.send(TransportEvent::RemoteTrack {
                        peer: dest.clone(),
                        track,
                    }) {
                        log::error!("failed to forward remote track for {}: {}", dest, e);
                    }
                }
                Box::pin(async {})
            },
        ));

        Ok(Arc::new(WebRtcTransport {
            pc,
            senders: Mutex::new(HashMap::new()),
        }))
    }
}

struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
    senders: Mutex<HashMap<TrackKind, Arc<RTCRtpSender>>>,
}

fn classify(e: webrtc::Error) -> TransportError {
    let msg = e.to_string();
    match e {
        webrtc::Error::ErrNoRemoteDescription => TransportError::InvalidState(msg),
        _ => TransportError::Failed(msg),
    }
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    async fn create_offer(&self) -> std::result::Result<SessionDescription, TransportError> {
        let offer = self.pc.create_offer(None).await.map_err(classify)?;
        let payload = serde_json::to_value(&offer).map_err(|e| TransportError::Failed(e.to_string()))?;
        Ok(SessionDescription(payload))
    }

    async fn create_answer(&self) -> std::result::Result<SessionDescription, TransportError> {
        let answer = self.pc.create_answer(None).await.map_err(classify)?;
        let payload =
            serde_json::to_value(&answer).map_err(|e| TransportError::Failed(e.to_string()))?;
        Ok(SessionDescription(payload))
    }

    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> std::result::Result<(), TransportError> {
        let sdp: RTCSessionDescription =
            serde_json::from_value(desc.0).map_err(|e| TransportError::Failed(e.to_string()))?;
        self.pc.set_local_description(sdp).await.map_err(classify)
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> std::result::Result<(), TransportError> {
        let sdp: RTCSessionDescription =
            serde_json::from_value(desc.0).map_err(|e| TransportError::Failed(e.to_string()))?;
        self.pc.set_remote_description(sdp).await.map_err(classify)
    }

    async fn has_remote_description(&self) -> bool {
        self.pc.remote_description().await.is_some()
    }

    async fn add_ice_candidate(
        &self,
        candidate: IceCandidate,
    ) -> std::result::Result<(), TransportError> {
        let candidate = candidate
            .0
            .get("candidate")
            .and_then(|c| c.as_str())
            .ok_or_else(|| TransportError::Failed("candidate payload missing".into()))?
            .to_owned();
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate,
                ..Default::default()
            })
            .await
            .map_err(classify)
    }

    async fn attach_track(
        &self,
        kind: TrackKind,
        track: Arc<dyn TrackLocal + Send + Sync>,
    ) -> std::result::Result<(), TransportError> {
        let sender = self.pc.add_track(track).await.map_err(classify)?;
        self.senders.lock().await.insert(kind, sender);
        Ok(())
    }

    async fn replace_track(
        &self,
        kind: TrackKind,
        track: Option<Arc<dyn TrackLocal + Send + Sync>>,
    ) -> std::result::Result<(), TransportError> {
        let mut senders = self.senders.lock().await;
        if let Some(sender) = senders.get(&kind) {
            sender.replace_track(track).await.map_err(classify)
        } else if let Some(track) = track {
            let sender = self.pc.add_track(track).await.map_err(classify)?;
            senders.insert(kind, sender);
            Ok(())
        } else {
            Ok(())
        }
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            log::error!("error closing peer connection: {}", e);
        }
    }
}

fn create_api() -> Result<webrtc::api::API> {
    let mut media = MediaEngine::default();
    media.register_default_codecs()?;

    // webrtc-rs requires an interceptor registry per manually managed peer
    // connection; the default set provides NACKs and RTCP reports
    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media)?;

    Ok(APIBuilder::new()
        .with_media_engine(media)
        .with_interceptor_registry(registry)
        .build())
}
