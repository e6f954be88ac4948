use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use derive_more::Display;

use crate::internal::signaling::IceCandidate;
use crate::internal::transport::PeerTransport;

/// uniquely identifies peers. assigned by the relay per connection session
pub type PeerId = String;

/// short human-shareable room code
pub type RoomId = String;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    #[display(fmt = "audio")]
    Audio,
    #[display(fmt = "video")]
    Video,
}

/// which side creates the first offer. decided once at entry creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationRole {
    Initiator,
    Responder,
}

/// per-entry lifecycle; closed entries are removed from the registry, not retained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Created,
    Negotiating,
    Connected,
}

/// one registry entry per remote participant while in a room
pub struct PeerEntry {
    pub remote_id: PeerId,
    pub transport: Arc<dyn PeerTransport>,
    pub role: NegotiationRole,
    pub state: PeerState,
    /// remote candidates that arrived before the remote description; drained FIFO
    pub pending_candidates: VecDeque<IceCandidate>,
    pub remote_name: String,
}

#[derive(Debug, Clone)]
pub struct CallConfig {
    pub display_name: String,
    /// candidate-gathering (STUN) server urls
    pub ice_servers: Vec<String>,
    pub captions_enabled: bool,
    pub screen_share_enabled: bool,
    pub caption_max_retries: u32,
    pub caption_retry_base_delay: Duration,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            display_name: "Guest".into(),
            ice_servers: vec![
                "stun:stun.l.google.com:19302".into(),
                "stun:stun1.l.google.com:19302".into(),
            ],
            captions_enabled: true,
            screen_share_enabled: true,
            caption_max_retries: 2,
            caption_retry_base_delay: Duration::from_secs(3),
        }
    }
}
