use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::internal::data_types::{NegotiationRole, PeerEntry, PeerId, PeerState, TrackKind};
use crate::internal::error::CallError;
use crate::internal::events::EmittedEvents;
use crate::internal::media::{LocalStream, LocalTrack};
use crate::internal::signaling::{ClientMessage, IceCandidate, SessionDescription, SignalKind};
use crate::internal::transport::{
    ConnectivityState, PeerTransport, TransportError, TransportEvent, TransportFactory,
};

/// One connection per remote participant.
///
/// Owns creation, negotiation-role assignment, candidate buffering, track
/// attachment and teardown. Failures are isolated per entry: they close and
/// remove only the affected connection, never the session.
pub struct PeerRegistry {
    factory: Arc<dyn TransportFactory>,
    /// cloned into every created transport so its observers reach the session loop
    transport_events: mpsc::UnboundedSender<TransportEvent>,
    sig_tx: mpsc::UnboundedSender<ClientMessage>,
    emitted: mpsc::UnboundedSender<EmittedEvents>,
    local_name: String,
    peers: HashMap<PeerId, PeerEntry>,
}

impl PeerRegistry {
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        transport_events: mpsc::UnboundedSender<TransportEvent>,
        sig_tx: mpsc::UnboundedSender<ClientMessage>,
        emitted: mpsc::UnboundedSender<EmittedEvents>,
        local_name: String,
    ) -> Self {
        Self {
            factory,
            transport_events,
            sig_tx,
            emitted,
            local_name,
            peers: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn contains(&self, remote: &str) -> bool {
        self.peers.contains_key(remote)
    }

    pub fn entry(&self, remote: &str) -> Option<&PeerEntry> {
        self.peers.get(remote)
    }

    /// Idempotent entry creation. An existing entry only has its display name
    /// refreshed. A new initiator entry begins offer negotiation immediately;
    /// an initiator created with no outbound stream aborts without leaving a
    /// half-open entry behind.
    pub async fn get_or_create(
        &mut self,
        remote: &PeerId,
        role: NegotiationRole,
        name: &str,
        outbound: Option<&LocalStream>,
    ) -> Result<(), CallError> {
        if let Some(entry) = self.peers.get_mut(remote) {
            if !name.is_empty() {
                entry.remote_name = name.to_owned();
            }
            return Ok(());
        }

        if role == NegotiationRole::Initiator && outbound.is_none() {
            return Err(CallError::NoLocalMedia);
        }

        log::info!(
            "creating peer connection to {} as {:?}",
            remote,
            role
        );
        let transport = self
            .factory
            .create(remote.clone(), self.transport_events.clone())
            .await
            .map_err(|e| creation_error(role, remote, &e))?;

        if let Some(stream) = outbound {
            if let Err(e) = attach_enabled_tracks(&*transport, stream).await {
                transport.close().await;
                return Err(creation_error(role, remote, &e));
            }
        }

        self.peers.insert(
            remote.clone(),
            PeerEntry {
                remote_id: remote.clone(),
                transport,
                role,
                state: PeerState::Created,
                pending_candidates: VecDeque::new(),
                remote_name: name.to_owned(),
            },
        );

        if role == NegotiationRole::Initiator {
            if let Err(e) = self.negotiate_offer(remote).await {
                self.close_and_discard(remote).await;
                return Err(CallError::OfferNegotiationFailed {
                    peer: remote.clone(),
                    reason: e.to_string(),
                });
            }
        }
        Ok(())
    }

    /// create a local offer, set it, send it to the remote side
    async fn negotiate_offer(&mut self, remote: &PeerId) -> Result<(), TransportError> {
        let transport = match self.peers.get(remote) {
            Some(entry) => entry.transport.clone(),
            None => return Ok(()),
        };
        let offer = transport.create_offer().await?;
        transport.set_local_description(offer.clone()).await?;

        // the entry may have been torn down while negotiation was suspended
        let entry = match self.peers.get_mut(remote) {
            Some(entry) => entry,
            None => return Ok(()),
        };
        entry.state = PeerState::Negotiating;
        self.send_signal(remote, SignalKind::Offer, offer.0);
        log::info!("sent offer to {}", remote);
        Ok(())
    }

    /// Inbound signaling envelope for `sender`. Malformed or out-of-order
    /// signals are logged and dropped, never fatal.
    pub async fn handle_signal(
        &mut self,
        sender: &PeerId,
        kind: SignalKind,
        payload: serde_json::Value,
        name: &str,
        outbound: Option<&LocalStream>,
    ) {
        match kind {
            SignalKind::Offer => {
                if let Err(e) = self
                    .get_or_create(sender, NegotiationRole::Responder, name, outbound)
                    .await
                {
                    log::error!("could not create responder entry for {}: {}", sender, e);
                    return;
                }
                if let Err(e) = self
                    .apply_remote_description(sender, SessionDescription(payload))
                    .await
                {
                    log::error!(
                        "{}",
                        CallError::SignalHandling {
                            peer: sender.clone(),
                            reason: e.to_string(),
                        }
                    );
                    return;
                }
                self.answer(sender).await;
            }
            SignalKind::Answer => {
                // an answer for a connection we never offered; ignore
                if !self.peers.contains_key(sender) {
                    log::warn!("answer from unknown peer {}; dropping", sender);
                    return;
                }
                if let Err(e) = self
                    .apply_remote_description(sender, SessionDescription(payload))
                    .await
                {
                    log::error!(
                        "{}",
                        CallError::SignalHandling {
                            peer: sender.clone(),
                            reason: e.to_string(),
                        }
                    );
                } else {
                    log::info!("processed answer from {}", sender);
                }
            }
            SignalKind::Candidate => {
                let entry = match self.peers.get_mut(sender) {
                    Some(entry) => entry,
                    None => {
                        log::warn!("candidate from unknown peer {}; dropping", sender);
                        return;
                    }
                };
                let candidate = IceCandidate(payload);
                if entry.transport.has_remote_description().await {
                    match entry.transport.add_ice_candidate(candidate).await {
                        Ok(()) => {}
                        Err(TransportError::DuplicateCandidate) => {
                            log::debug!("duplicate candidate from {}; ignoring", sender);
                        }
                        Err(e) => {
                            log::error!("failed to apply candidate from {}: {}", sender, e);
                        }
                    }
                } else {
                    // the network layer raced ahead of negotiation; a candidate
                    // must never be applied before a remote description exists
                    entry.pending_candidates.push_back(candidate);
                    log::debug!("buffered candidate from {}", sender);
                }
            }
        }
    }

    /// create and send an answer for an already-applied remote offer
    async fn answer(&mut self, remote: &PeerId) {
        let transport = match self.peers.get(remote) {
            Some(entry) => entry.transport.clone(),
            None => return,
        };
        let answer = match transport.create_answer().await {
            Ok(answer) => answer,
            Err(e) => {
                log::error!("failed to create answer for {}: {}", remote, e);
                return;
            }
        };
        if let Err(e) = transport.set_local_description(answer.clone()).await {
            log::error!("failed to set local answer for {}: {}", remote, e);
            return;
        }
        if let Some(entry) = self.peers.get_mut(remote) {
            entry.state = PeerState::Negotiating;
        }
        self.send_signal(remote, SignalKind::Answer, answer.0);
        log::info!("sent answer to {}", remote);
    }

    /// set the remote description, then drain buffered candidates, as one step
    pub async fn apply_remote_description(
        &mut self,
        remote: &PeerId,
        desc: SessionDescription,
    ) -> Result<(), TransportError> {
        let transport = match self.peers.get(remote) {
            Some(entry) => entry.transport.clone(),
            None => return Ok(()),
        };
        transport.set_remote_description(desc).await?;
        self.drain_pending_candidates(remote).await;
        Ok(())
    }

    /// apply buffered candidates in arrival order. an intermediate failure
    /// stops the drain and keeps the remainder buffered
    async fn drain_pending_candidates(&mut self, remote: &PeerId) {
        loop {
            let (transport, candidate) = match self.peers.get_mut(remote) {
                Some(entry) => match entry.pending_candidates.pop_front() {
                    Some(candidate) => (entry.transport.clone(), candidate),
                    None => return,
                },
                // entry torn down mid-drain
                None => return,
            };
            match transport.add_ice_candidate(candidate.clone()).await {
                Ok(()) => {}
                Err(TransportError::DuplicateCandidate) => {
                    log::debug!("duplicate buffered candidate for {}; ignoring", remote);
                }
                Err(e) => {
                    log::warn!("stopped draining candidates for {}: {}", remote, e);
                    if let Some(entry) = self.peers.get_mut(remote) {
                        entry.pending_candidates.push_front(candidate);
                    }
                    return;
                }
            }
        }
    }

    /// observer callbacks from the negotiation layer
    pub async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::LocalCandidate { peer, candidate } => {
                if !self.peers.contains_key(&peer) {
                    return;
                }
                self.send_signal(&peer, SignalKind::Candidate, candidate.0);
            }
            TransportEvent::Connectivity { peer, state } => match state {
                ConnectivityState::Connected => {
                    if let Some(entry) = self.peers.get_mut(&peer) {
                        entry.state = PeerState::Connected;
                        log::info!("peer {} connected", peer);
                    }
                }
                ConnectivityState::Failed
                | ConnectivityState::Disconnected
                | ConnectivityState::Closed => {
                    log::info!("connection to {} lost ({:?}); cleaning up", peer, state);
                    self.remove(&peer).await;
                }
            },
            TransportEvent::RemoteTrack { peer, track } => {
                let entry = match self.peers.get(&peer) {
                    Some(entry) => entry,
                    None => return,
                };
                log::info!("received remote track from {}", peer);
                let _ = self.emitted.send(EmittedEvents::RemoteTrack {
                    peer: peer.clone(),
                    name: entry.remote_name.clone(),
                    track,
                });
            }
        }
    }

    /// closes and removes one entry and tells the renderer to drop its element.
    /// terminal: no automatic reconnection is attempted for a single peer
    pub async fn remove(&mut self, remote: &PeerId) {
        if let Some(entry) = self.peers.remove(remote) {
            entry.transport.close().await;
            let _ = self.emitted.send(EmittedEvents::ParticipantRemoved {
                peer: remote.clone(),
            });
            log::info!("removed peer {}", remote);
        }
    }

    async fn close_and_discard(&mut self, remote: &PeerId) {
        if let Some(entry) = self.peers.remove(remote) {
            entry.transport.close().await;
        }
    }

    /// swap the outbound track of `kind` on every connection in place,
    /// preserving each connection's negotiation
    pub async fn replace_outbound_track(&mut self, kind: TrackKind, track: Option<Arc<LocalTrack>>) {
        let rtc = track.map(|t| t.rtc());
        for (peer, entry) in &self.peers {
            if let Err(e) = entry.transport.replace_track(kind, rtc.clone()).await {
                log::error!("failed to update {} track for {}: {}", kind, peer, e);
            }
        }
    }

    /// room leave: close every connection and drop every entry
    pub async fn close_all(&mut self) {
        for (_, entry) in self.peers.drain() {
            entry.transport.close().await;
        }
    }

    fn send_signal(&self, target: &PeerId, kind: SignalKind, payload: serde_json::Value) {
        if let Err(e) = self.sig_tx.send(ClientMessage::Signal {
            target_sid: target.clone(),
            kind,
            payload,
            name: self.local_name.clone(),
        }) {
            log::error!("failed to send {} signal for {}: {}", kind, target, e);
        }
    }
}

fn creation_error(role: NegotiationRole, remote: &PeerId, e: &TransportError) -> CallError {
    match role {
        NegotiationRole::Initiator => CallError::OfferNegotiationFailed {
            peer: remote.clone(),
            reason: e.to_string(),
        },
        NegotiationRole::Responder => CallError::SignalHandling {
            peer: remote.clone(),
            reason: e.to_string(),
        },
    }
}

/// attach the currently-enabled tracks of the active outbound stream
async fn attach_enabled_tracks(
    transport: &dyn PeerTransport,
    stream: &LocalStream,
) -> Result<(), TransportError> {
    if let Some(video) = stream.video.as_ref().filter(|t| t.is_enabled()) {
        transport.attach_track(TrackKind::Video, video.rtc()).await?;
    }
    if let Some(audio) = stream.audio.as_ref().filter(|t| t.is_enabled()) {
        transport.attach_track(TrackKind::Audio, audio.rtc()).await?;
    }
    Ok(())
}
