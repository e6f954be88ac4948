use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::internal::data_types::{PeerId, RoomId};

/// opaque session-description blob. the core forwards it between the relay and
/// the negotiation layer without parsing it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDescription(pub serde_json::Value);

/// opaque network-candidate descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceCandidate(pub serde_json::Value);

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    #[display(fmt = "offer")]
    Offer,
    #[display(fmt = "answer")]
    Answer,
    #[display(fmt = "candidate")]
    Candidate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomUser {
    pub sid: PeerId,
    #[serde(default)]
    pub name: String,
}

/// client → relay messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ClientMessage {
    Join {
        room: RoomId,
        name: String,
    },
    Leave {
        room: RoomId,
    },
    /// point-to-point signaling envelope; the relay forwards it to `target_sid` only
    Signal {
        target_sid: PeerId,
        #[serde(rename = "type")]
        kind: SignalKind,
        payload: serde_json::Value,
        name: String,
    },
    /// fire-and-forget broadcast of finalized caption text to the room
    SubtitleText {
        text: String,
        sender_sid: PeerId,
        room: RoomId,
        name: String,
    },
}

/// relay → client messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ServerEvent {
    JoinedRoom {
        room_id: RoomId,
        sid: PeerId,
    },
    /// roster snapshot at join time
    OtherUsers {
        users: Vec<RoomUser>,
    },
    UserJoined {
        sid: PeerId,
        #[serde(default)]
        name: String,
    },
    UserLeft {
        sid: PeerId,
        #[serde(default)]
        name: String,
    },
    Signal {
        sender_sid: PeerId,
        #[serde(rename = "type")]
        kind: SignalKind,
        payload: serde_json::Value,
        #[serde(default)]
        name: String,
    },
    NewSubtitle {
        text: String,
        sender_sid: PeerId,
        #[serde(default)]
        name: String,
    },
    LeftRoomAck {
        room_id: RoomId,
        #[serde(default)]
        message: String,
    },
    Error {
        message: String,
    },
}

/// what the relay connection task feeds into the session loop. loss of the
/// channel does not auto-rejoin: the controller treats it as a full leave
#[derive(Debug, Clone)]
pub enum RelayEvent {
    Connected { sid: PeerId },
    Disconnected,
    Message(ServerEvent),
}
