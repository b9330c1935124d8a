use std::fmt;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::audio::{AudioFrame, InboundPayload};
use crate::error::{PipelineError, Result};
use crate::session::PersonaConfig;

/// Events delivered by the remote session, in arrival order
#[derive(Debug)]
pub enum RemoteEvent {
    /// One chunk of synthesized speech
    Audio(InboundPayload),
    /// The user spoke over the model; queued playback must be discarded
    Interrupted,
    /// The model finished its turn
    TurnComplete,
    /// Remote closed the session
    Closed { reason: Option<String> },
    /// Transport failure mid-call
    Error(PipelineError),
}

/// Why an outbound frame was not accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("outbound queue is full")]
    Full,
    #[error("remote link is closed")]
    Closed,
}

/// Non-blocking outbound side of a remote link
///
/// Frames go into a bounded queue drained by the transport's writer task.
/// A full queue drops the frame instead of waiting.
pub struct FrameSink {
    tx: Mutex<Option<mpsc::Sender<AudioFrame>>>,
}

impl FrameSink {
    pub fn new(tx: mpsc::Sender<AudioFrame>) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
        }
    }

    pub fn send(&self, frame: AudioFrame) -> std::result::Result<(), SendError> {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = tx.as_ref() else {
            return Err(SendError::Closed);
        };

        tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => SendError::Full,
            TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Stop accepting frames; the writer task drains and closes the connection
    pub fn close(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    pub fn is_closed(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(true, |tx| tx.is_closed())
    }
}

/// An open duplex connection: outbound frames and inbound events
pub struct RemoteLink {
    pub sink: FrameSink,
    pub events: mpsc::Receiver<RemoteEvent>,
}

/// The transport-facing ends of a new link
pub struct LinkEnds {
    /// Frames the session wants transmitted
    pub frames: mpsc::Receiver<AudioFrame>,
    /// Where the transport delivers inbound events
    pub events: mpsc::Sender<RemoteEvent>,
}

impl RemoteLink {
    /// Create a link and the ends a transport drives it with
    pub fn channel(outbound_depth: usize, event_depth: usize) -> (RemoteLink, LinkEnds) {
        let (frame_tx, frame_rx) = mpsc::channel(outbound_depth.max(1));
        let (event_tx, event_rx) = mpsc::channel(event_depth.max(1));

        (
            RemoteLink {
                sink: FrameSink::new(frame_tx),
                events: event_rx,
            },
            LinkEnds {
                frames: frame_rx,
                events: event_tx,
            },
        )
    }
}

/// API credential for the remote model
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Blank credentials are rejected
    pub fn new(secret: impl Into<String>) -> Result<Self> {
        let secret = secret.into();
        if secret.trim().is_empty() {
            return Err(PipelineError::Auth("credential is empty".to_string()));
        }
        Ok(Self(secret))
    }

    /// Read the credential from an environment variable
    pub fn from_env(var: &str) -> Result<Self> {
        let secret = std::env::var(var)
            .map_err(|_| PipelineError::Auth(format!("environment variable {} is not set", var)))?;
        Self::new(secret)
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Duplex connection to a remote speech model
#[async_trait::async_trait]
pub trait LiveTransport: Send + Sync {
    /// Open a session for the persona
    ///
    /// Fails with `Auth` when the credential is rejected and `Network` when
    /// the handshake fails.
    async fn open(&self, persona: &PersonaConfig, credential: &Credential) -> Result<RemoteLink>;

    /// Get transport name for logging
    fn name(&self) -> &str;
}
