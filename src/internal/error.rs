use derive_more::Display;

use crate::internal::data_types::PeerId;

/// Failure taxonomy for the call session.
///
/// Per-peer failures close and remove only the affected registry entry;
/// local-resource failures block the requested action without touching the
/// rest of the session; caption failures never affect media flow.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum CallError {
    #[display(fmt = "camera/microphone access was denied")]
    MediaAccessDenied,
    #[display(fmt = "no usable capture device: {}", _0)]
    MediaDeviceUnavailable(String),
    #[display(fmt = "screen share was denied")]
    ScreenShareDenied,
    #[display(fmt = "screen capture is not supported on this platform")]
    ScreenShareUnsupported,
    #[display(fmt = "no local media available for an outbound connection")]
    NoLocalMedia,
    #[display(fmt = "offer negotiation with {} failed: {}", peer, reason)]
    OfferNegotiationFailed { peer: PeerId, reason: String },
    #[display(fmt = "signal for {} could not be applied: {}", peer, reason)]
    SignalHandling { peer: PeerId, reason: String },
    #[display(fmt = "captions are not available")]
    CaptionUnavailable,
    #[display(fmt = "caption permission was denied")]
    CaptionPermissionDenied,
    #[display(fmt = "caption restart retries exhausted")]
    CaptionRetriesExhausted,
}

impl std::error::Error for CallError {}
