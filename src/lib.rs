//! room-call
//! Coordinates a multi-party video call on top of the
//! [webrtc-rs](https://github.com/webrtc-rs/webrtc) library: one peer
//! connection per remote participant, negotiated over an out-of-band relay
//! that forwards point-to-point signaling envelopes and room membership
//! events.
//!
//! The relay connection itself and all rendering are the embedding
//! application's responsibility. The application feeds `RelayEvent`s in,
//! issues `SessionCommand`s, and receives `EmittedEvents` describing what to
//! render. Media capture and speech recognition are reached through the
//! `MediaDevices` and `SpeechRecognizer` traits so the platform layer stays
//! swappable.

use std::sync::Arc;

use tokio::sync::mpsc;

mod internal;

pub use internal::captions::{CaptionEvent, CaptionPipeline, RecognizerErrorKind, SpeechRecognizer};
pub use internal::data_types::{
    CallConfig, NegotiationRole, PeerEntry, PeerId, PeerState, RoomId, TrackKind,
};
pub use internal::error::CallError;
pub use internal::events::{CaptionStatus, EmittedEvents};
pub use internal::media::{
    LocalStream, LocalTrack, MediaDevices, MediaEvent, MediaSourceManager,
};
pub use internal::registry::PeerRegistry;
pub use internal::signaling::{
    ClientMessage, IceCandidate, RelayEvent, RoomUser, ServerEvent, SessionDescription, SignalKind,
};
pub use internal::transport::{
    ConnectivityState, PeerTransport, TransportError, TransportEvent, TransportFactory,
    WebRtcFactory,
};

/// requests from the embedding application, applied in arrival order
#[derive(Debug, Clone)]
pub enum SessionCommand {
    /// acquire camera+mic, then ask the relay for room membership
    JoinRoom { room: RoomId },
    LeaveRoom,
    SetMicEnabled(bool),
    SetCameraEnabled(bool),
    StartScreenShare,
    StopScreenShare,
    SetCaptionsEnabled(bool),
    /// stop the session loop
    Quit,
}

// a lazy version of the builder pattern
pub struct InitArgs {
    pub config: CallConfig,
    pub factory: Arc<dyn TransportFactory>,
    pub devices: Arc<dyn MediaDevices>,
    pub recognizer: Arc<dyn SpeechRecognizer>,
    /// outbound relay messages; the embedding application owns the socket
    pub sig_tx: mpsc::UnboundedSender<ClientMessage>,
    /// inbound relay events
    pub relay_rx: mpsc::UnboundedReceiver<RelayEvent>,
    /// used to emit events
    pub emitted_event_chan: mpsc::UnboundedSender<EmittedEvents>,
}

/// returned by `SessionController::init`; the application's side of the loop
pub struct SessionHandles {
    pub command_tx: mpsc::UnboundedSender<SessionCommand>,
}

/// Single-task session coordinator. All state lives here and is only touched
/// from `run`, so handlers never race each other; each inbound event is
/// handled to completion before the next is taken.
pub struct SessionController {
    config: CallConfig,
    registry: PeerRegistry,
    media: MediaSourceManager,
    captions: CaptionPipeline,
    sig_tx: mpsc::UnboundedSender<ClientMessage>,
    emitted_event_chan: mpsc::UnboundedSender<EmittedEvents>,
    command_rx: mpsc::UnboundedReceiver<SessionCommand>,
    relay_rx: mpsc::UnboundedReceiver<RelayEvent>,
    transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    media_rx: mpsc::UnboundedReceiver<MediaEvent>,
    caption_rx: mpsc::UnboundedReceiver<CaptionEvent>,
    /// relay-assigned id for this client; None until the relay confirms
    local_sid: Option<PeerId>,
    /// room the relay has confirmed membership of
    room: Option<RoomId>,
}

impl SessionController {
    pub fn init(args: InitArgs) -> (Self, SessionHandles) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (media_tx, media_rx) = mpsc::unbounded_channel();
        let (caption_tx, caption_rx) = mpsc::unbounded_channel();

        let registry = PeerRegistry::new(
            args.factory,
            transport_tx,
            args.sig_tx.clone(),
            args.emitted_event_chan.clone(),
            args.config.display_name.clone(),
        );
        let media = MediaSourceManager::new(args.devices, media_tx);
        let captions = CaptionPipeline::new(
            args.recognizer,
            args.config.caption_max_retries,
            args.config.caption_retry_base_delay,
            caption_tx,
            args.emitted_event_chan.clone(),
        );

        (
            Self {
                config: args.config,
                registry,
                media,
                captions,
                sig_tx: args.sig_tx,
                emitted_event_chan: args.emitted_event_chan,
                command_rx,
                relay_rx: args.relay_rx,
                transport_rx,
                media_rx,
                caption_rx,
                local_sid: None,
                room: None,
            },
            SessionHandles { command_tx },
        )
    }

    /// the session loop. returns when the application drops its command
    /// sender or sends `Quit`
    pub async fn run(&mut self) {
        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => match cmd {
                    Some(SessionCommand::Quit) | None => break,
                    Some(cmd) => self.handle_command(cmd).await,
                },
                Some(ev) = self.relay_rx.recv() => self.handle_relay_event(ev).await,
                Some(ev) = self.transport_rx.recv() => {
                    self.registry.handle_transport_event(ev).await;
                }
                Some(ev) = self.media_rx.recv() => self.handle_media_event(ev).await,
                Some(ev) = self.caption_rx.recv() => self.handle_caption_event(ev),
            }
        }
        self.teardown().await;
    }

    async fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::JoinRoom { room } => self.join_room(room).await,
            SessionCommand::LeaveRoom => self.leave_room().await,
            SessionCommand::SetMicEnabled(enabled) => {
                self.media.set_mic_enabled(enabled);
            }
            SessionCommand::SetCameraEnabled(enabled) => {
                self.media.set_camera_enabled(enabled);
            }
            SessionCommand::StartScreenShare => self.start_screen_share().await,
            SessionCommand::StopScreenShare => self.stop_screen_share().await,
            SessionCommand::SetCaptionsEnabled(enabled) => self.set_captions(enabled),
            SessionCommand::Quit => unreachable!("handled by the loop"),
        }
    }

    /// media first: a denied capture aborts the join before the relay ever
    /// learns about it
    async fn join_room(&mut self, room: RoomId) {
        if self.room.is_some() {
            log::warn!("join requested while already in a room; ignoring");
            return;
        }
        if let Err(e) = self.media.acquire_camera().await {
            log::error!("cannot join {}: {}", room, e);
            self.emit(EmittedEvents::CallError(e));
            return;
        }
        log::info!("requesting membership of room {}", room);
        self.send_relay(ClientMessage::Join {
            room,
            name: self.config.display_name.clone(),
        });
    }

    async fn leave_room(&mut self) {
        let room = match self.room.take() {
            Some(room) => room,
            None => return,
        };
        log::info!("leaving room {}", room);
        self.send_relay(ClientMessage::Leave { room });
        self.reset_session().await;
    }

    async fn start_screen_share(&mut self) {
        if !self.config.screen_share_enabled {
            self.emit(EmittedEvents::CallError(CallError::ScreenShareUnsupported));
            return;
        }
        if let Err(e) = self.media.acquire_screen().await {
            log::error!("screen share failed: {}", e);
            self.emit(EmittedEvents::CallError(e));
            return;
        }
        let track = self.media.active_video_track();
        self.registry
            .replace_outbound_track(TrackKind::Video, track)
            .await;
    }

    async fn stop_screen_share(&mut self) {
        if !self.media.screen_sharing() {
            return;
        }
        self.media.release_screen();
        let track = self.media.active_video_track();
        self.registry
            .replace_outbound_track(TrackKind::Video, track)
            .await;
    }

    fn set_captions(&mut self, enabled: bool) {
        if enabled && !self.config.captions_enabled {
            self.emit(EmittedEvents::CallError(CallError::CaptionUnavailable));
            return;
        }
        let mic_active = self.media.mic_enabled() && self.media.has_live_audio();
        if let Err(e) = self.captions.set_enabled(enabled, mic_active) {
            log::warn!("caption toggle rejected: {}", e);
            self.emit(EmittedEvents::CallError(e));
        }
    }

    async fn handle_relay_event(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::Connected { sid } => {
                log::info!("relay connected, assigned sid {}", sid);
                self.local_sid = Some(sid.clone());
                self.emit(EmittedEvents::RelayConnected { sid });
            }
            RelayEvent::Disconnected => {
                log::warn!("relay connection lost; tearing down session");
                self.local_sid = None;
                self.emit(EmittedEvents::RelayDisconnected);
                self.reset_session().await;
            }
            RelayEvent::Message(ev) => self.handle_server_event(ev).await,
        }
    }

    async fn handle_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::JoinedRoom { room_id, sid } => {
                log::info!("joined room {} as {}", room_id, sid);
                self.room = Some(room_id.clone());
                self.local_sid = Some(sid.clone());
                self.emit(EmittedEvents::JoinedRoom { room: room_id, sid });
            }
            ServerEvent::OtherUsers { users } => {
                // one initiator entry per existing member; a failed peer never
                // blocks the rest of the roster
                let outbound = self.media.outbound_stream();
                for user in users {
                    if self.is_self(&user.sid) {
                        continue;
                    }
                    if let Err(e) = self
                        .registry
                        .get_or_create(
                            &user.sid,
                            NegotiationRole::Initiator,
                            &user.name,
                            outbound.as_ref(),
                        )
                        .await
                    {
                        log::error!("failed to connect to {}: {}", user.sid, e);
                        self.emit(EmittedEvents::CallError(e));
                    }
                }
            }
            ServerEvent::UserJoined { sid, name } => {
                if self.is_self(&sid) {
                    return;
                }
                // the newcomer sees us in its roster snapshot and initiates;
                // offering from this side too would collide in have-local-offer
                log::info!("{} ({}) joined the room; awaiting their offer", sid, name);
            }
            ServerEvent::UserLeft { sid, name } => {
                log::info!("{} ({}) left the room", sid, name);
                self.registry.remove(&sid).await;
            }
            ServerEvent::Signal {
                sender_sid,
                kind,
                payload,
                name,
            } => {
                if self.is_self(&sender_sid) {
                    return;
                }
                let outbound = self.media.outbound_stream();
                self.registry
                    .handle_signal(&sender_sid, kind, payload, &name, outbound.as_ref())
                    .await;
            }
            ServerEvent::NewSubtitle {
                text,
                sender_sid,
                name,
            } => {
                // our own broadcasts come back; local rendering already happened
                if self.is_self(&sender_sid) {
                    return;
                }
                self.emit(EmittedEvents::CaptionReceived {
                    peer: sender_sid,
                    name,
                    text,
                });
            }
            ServerEvent::LeftRoomAck { room_id, message } => {
                log::info!("relay confirmed leaving {}: {}", room_id, message);
            }
            ServerEvent::Error { message } => {
                log::warn!("relay error: {}", message);
                self.emit(EmittedEvents::ServerNotice { message });
            }
        }
    }

    async fn handle_media_event(&mut self, event: MediaEvent) {
        match event {
            // the platform ended the share (browser chrome, window closed)
            MediaEvent::ScreenShareEnded => self.stop_screen_share().await,
        }
    }

    fn handle_caption_event(&mut self, event: CaptionEvent) {
        if let Some(text) = self.captions.handle_event(event) {
            self.emit(EmittedEvents::LocalCaption { text: text.clone() });
            match (&self.room, &self.local_sid) {
                (Some(room), Some(sid)) => {
                    self.send_relay(ClientMessage::SubtitleText {
                        text,
                        sender_sid: sid.clone(),
                        room: room.clone(),
                        name: self.config.display_name.clone(),
                    });
                }
                _ => log::debug!("dropping transcript produced outside a room"),
            }
        }
    }

    /// tears down all in-room state: connections, captures, recognition.
    /// used for both voluntary leave and relay loss
    async fn reset_session(&mut self) {
        self.registry.close_all().await;
        self.captions.reset();
        self.media.release_all();
        self.room = None;
        self.emit(EmittedEvents::SessionReset);
    }

    async fn teardown(&mut self) {
        if self.room.is_some() {
            self.leave_room().await;
        } else {
            self.registry.close_all().await;
            self.captions.reset();
            self.media.release_all();
        }
    }

    fn is_self(&self, sid: &str) -> bool {
        self.local_sid.as_deref() == Some(sid)
    }

    fn emit(&self, event: EmittedEvents) {
        if let Err(e) = self.emitted_event_chan.send(event) {
            log::error!("failed to emit event: {}", e);
        }
    }

    fn send_relay(&self, msg: ClientMessage) {
        if let Err(e) = self.sig_tx.send(msg) {
            log::error!("failed to send relay message: {}", e);
        }
    }
}
