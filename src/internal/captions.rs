use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::internal::error::CallError;
use crate::internal::events::{CaptionStatus, EmittedEvents};

/// error classes reported by the recognition session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognizerErrorKind {
    /// transient; retried with linear backoff while budget remains
    Network,
    /// never retried
    NotAllowed,
    /// never retried
    ServiceNotAllowed,
    NoSpeech,
    AudioCapture,
    Aborted,
    Other(String),
}

#[derive(Debug, Clone)]
pub enum CaptionEvent {
    Started,
    Transcript { text: String, is_final: bool },
    Error(RecognizerErrorKind),
    Ended,
    /// internal: a scheduled restart timer fired. stale generations are ignored
    RetryDue { generation: u64 },
}

/// continuous speech recognition session, treated as a black box.
/// implementations push `Started`/`Transcript`/`Error`/`Ended` into the
/// channel supplied to `start`
pub trait SpeechRecognizer: Send + Sync {
    fn start(&self, events: mpsc::UnboundedSender<CaptionEvent>) -> Result<(), CallError>;
    fn stop(&self);
}

/// drives the recognition session: `Idle → Starting → Active`, with bounded
/// automatic restart on transient network errors. losing captions never
/// affects call media
pub struct CaptionPipeline {
    recognizer: Arc<dyn SpeechRecognizer>,
    events_tx: mpsc::UnboundedSender<CaptionEvent>,
    emitted: mpsc::UnboundedSender<EmittedEvents>,
    /// user intent; forced off on permission errors or retry exhaustion
    enabled: bool,
    recognizing: bool,
    retries: u32,
    max_retries: u32,
    base_delay: Duration,
    /// bumped on every manual toggle and reset so stale retry timers are abandoned
    generation: u64,
}

impl CaptionPipeline {
    pub fn new(
        recognizer: Arc<dyn SpeechRecognizer>,
        max_retries: u32,
        base_delay: Duration,
        events_tx: mpsc::UnboundedSender<CaptionEvent>,
        emitted: mpsc::UnboundedSender<EmittedEvents>,
    ) -> Self {
        Self {
            recognizer,
            events_tx,
            emitted,
            enabled: false,
            recognizing: false,
            retries: 0,
            max_retries,
            base_delay,
            generation: 0,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn recognizing(&self) -> bool {
        self.recognizing
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// manual toggle. either direction resets the retry budget. turning on
    /// requires an active microphone, otherwise intent stays off
    pub fn set_enabled(&mut self, enabled: bool, mic_active: bool) -> Result<(), CallError> {
        self.generation += 1;
        self.retries = 0;

        if !enabled {
            if self.recognizing {
                self.recognizer.stop();
            }
            if self.enabled || self.recognizing {
                let _ = self
                    .emitted
                    .send(EmittedEvents::CaptionStatus(CaptionStatus::Stopped));
            }
            self.enabled = false;
            self.recognizing = false;
            return Ok(());
        }

        if !mic_active {
            return Err(CallError::CaptionUnavailable);
        }
        self.enabled = true;
        if let Err(e) = self.recognizer.start(self.events_tx.clone()) {
            self.enabled = false;
            return Err(e);
        }
        Ok(())
    }

    /// advances the state machine. returns a finalized transcript segment
    /// when one should be broadcast
    pub fn handle_event(&mut self, event: CaptionEvent) -> Option<String> {
        match event {
            CaptionEvent::Started => {
                self.recognizing = true;
                self.retries = 0;
                let _ = self
                    .emitted
                    .send(EmittedEvents::CaptionStatus(CaptionStatus::Started));
                log::info!("speech recognition started");
                None
            }
            CaptionEvent::Transcript { text, is_final } => {
                if is_final && self.enabled && !text.trim().is_empty() {
                    Some(text)
                } else {
                    None
                }
            }
            CaptionEvent::Error(kind) => {
                self.handle_error(kind);
                None
            }
            CaptionEvent::Ended => {
                log::info!("speech recognition session ended");
                self.recognizing = false;
                None
            }
            CaptionEvent::RetryDue { generation } => {
                if generation != self.generation || !self.enabled {
                    log::debug!("caption retry cancelled");
                    return None;
                }
                log::info!("restarting speech recognition");
                if let Err(e) = self.recognizer.start(self.events_tx.clone()) {
                    log::error!("caption restart failed: {}", e);
                    self.enabled = false;
                    self.recognizing = false;
                    let _ = self
                        .emitted
                        .send(EmittedEvents::CaptionStatus(CaptionStatus::Stopped));
                }
                None
            }
        }
    }

    fn handle_error(&mut self, kind: RecognizerErrorKind) {
        match kind {
            RecognizerErrorKind::Network => {
                self.recognizing = false;
                if self.enabled && self.retries < self.max_retries {
                    self.retries += 1;
                    let attempt = self.retries;
                    let delay = self.base_delay * attempt;
                    log::warn!(
                        "caption network error; restart attempt {}/{} in {:?}",
                        attempt,
                        self.max_retries,
                        delay
                    );
                    let _ = self.emitted.send(EmittedEvents::CaptionStatus(
                        CaptionStatus::RetryScheduled { attempt },
                    ));
                    let tx = self.events_tx.clone();
                    let generation = self.generation;
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = tx.send(CaptionEvent::RetryDue { generation });
                    });
                } else if self.enabled {
                    log::warn!("caption restart budget exhausted; turning captions off");
                    self.enabled = false;
                    let _ = self
                        .emitted
                        .send(EmittedEvents::CallError(CallError::CaptionRetriesExhausted));
                    let _ = self
                        .emitted
                        .send(EmittedEvents::CaptionStatus(CaptionStatus::Stopped));
                }
            }
            RecognizerErrorKind::NotAllowed | RecognizerErrorKind::ServiceNotAllowed => {
                self.enabled = false;
                self.recognizing = false;
                self.recognizer.stop();
                let _ = self
                    .emitted
                    .send(EmittedEvents::CallError(CallError::CaptionPermissionDenied));
                let _ = self
                    .emitted
                    .send(EmittedEvents::CaptionStatus(CaptionStatus::Stopped));
            }
            other => {
                log::warn!("speech recognition error: {:?}", other);
                self.enabled = false;
                self.recognizing = false;
                let _ = self
                    .emitted
                    .send(EmittedEvents::CaptionStatus(CaptionStatus::Stopped));
            }
        }
    }

    /// room leave / relay loss. stops the session and invalidates any
    /// scheduled restart
    pub fn reset(&mut self) {
        self.generation += 1;
        self.retries = 0;
        if self.recognizing {
            self.recognizer.stop();
        }
        self.enabled = false;
        self.recognizing = false;
    }
}
