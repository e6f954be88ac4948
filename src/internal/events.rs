use std::sync::Arc;

use webrtc::track::track_remote::TrackRemote;

use crate::internal::data_types::{PeerId, RoomId};
use crate::internal::error::CallError;

/// notifications for the embedding application. rendering (video elements,
/// caption overlays, panels) is the receiver's responsibility
#[derive(Clone)]
pub enum EmittedEvents {
    RelayConnected {
        sid: PeerId,
    },
    RelayDisconnected,
    JoinedRoom {
        room: RoomId,
        sid: PeerId,
    },
    /// a remote media track arrived for the given participant
    RemoteTrack {
        peer: PeerId,
        name: String,
        track: Arc<TrackRemote>,
    },
    /// the participant's visual element should be removed
    ParticipantRemoved {
        peer: PeerId,
    },
    CaptionReceived {
        peer: PeerId,
        name: String,
        text: String,
    },
    /// a finalized local transcript segment, for local rendering
    LocalCaption {
        text: String,
    },
    CaptionStatus(CaptionStatus),
    /// a failure that blocks a requested action; must be surfaced, not merely logged
    CallError(CallError),
    /// relay-reported application error, non-fatal notice
    ServerNotice {
        message: String,
    },
    /// all in-room state was torn down (leave or relay loss)
    SessionReset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptionStatus {
    Started,
    Stopped,
    RetryScheduled { attempt: u32 },
}
