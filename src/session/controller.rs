use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tracing::{info, warn};

use super::config::{PersonaConfig, SessionConfig};
use super::session::{ConversationSession, SessionParts};
use super::state::{SessionEvent, SessionState};
use super::stats::SessionStats;
use crate::error::{PipelineError, Result};

/// Builds the devices and transport for each new session
pub trait SessionFactory: Send + Sync {
    fn create(&self) -> Result<SessionParts>;
}

impl<F> SessionFactory for F
where
    F: Fn() -> Result<SessionParts> + Send + Sync,
{
    fn create(&self) -> Result<SessionParts> {
        self()
    }
}

/// Snapshot reported by the controller
#[derive(Debug, Clone, Serialize)]
pub struct ConversationStatus {
    #[serde(flatten)]
    pub state: SessionState,
    pub muted: bool,
    /// Stats of the current or most recent session
    pub stats: Option<SessionStats>,
}

/// Single owner of the active conversation
///
/// At most one session is connecting, open, or closing at a time. Each
/// start builds a fresh session; a finished one is kept only so its final
/// status can be read.
pub struct ConversationController {
    factory: Arc<dyn SessionFactory>,
    config: SessionConfig,
    current: Mutex<Option<Arc<ConversationSession>>>,
}

impl ConversationController {
    pub fn new(config: SessionConfig, factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            factory,
            config,
            current: Mutex::new(None),
        }
    }

    /// Start a new conversation
    ///
    /// Rejected with `Busy` while another session is still live.
    pub async fn start(&self, persona: &PersonaConfig) -> Result<Arc<ConversationSession>> {
        let session = {
            let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);

            if let Some(existing) = current.as_ref() {
                if !existing.state().is_terminal() {
                    warn!("Rejecting start: session {} is {}", existing.id(), existing.state());
                    return Err(PipelineError::Busy);
                }
            }

            let parts = self.factory.create()?;
            let session = Arc::new(ConversationSession::new(self.config.clone(), parts));
            *current = Some(Arc::clone(&session));
            session
        };

        // Connect outside the lock so stop() can cancel it
        session.connect(persona).await?;

        Ok(session)
    }

    /// Disconnect the current session, if any
    pub async fn stop(&self) -> Option<SessionStats> {
        let session = self.current()?;
        session.disconnect().await;
        Some(session.stats())
    }

    pub fn set_muted(&self, muted: bool) -> Result<()> {
        match self.live() {
            Some(session) => {
                session.set_muted(muted);
                Ok(())
            }
            None => Err(PipelineError::InvalidState("no active conversation".to_string())),
        }
    }

    pub fn status(&self) -> ConversationStatus {
        match self.current() {
            Some(session) => ConversationStatus {
                state: session.state(),
                muted: session.is_muted(),
                stats: Some(session.stats()),
            },
            None => ConversationStatus {
                state: SessionState::Idle,
                muted: false,
                stats: None,
            },
        }
    }

    /// Events of the current session
    pub fn subscribe(&self) -> Option<broadcast::Receiver<SessionEvent>> {
        self.live().map(|session| session.subscribe())
    }

    /// Neutral (all zero) when no session is live
    pub fn input_spectrum(&self) -> Vec<u8> {
        match self.current() {
            Some(session) => session.input_spectrum(),
            None => vec![0; self.config.monitor.bins()],
        }
    }

    pub fn output_spectrum(&self) -> Vec<u8> {
        match self.current() {
            Some(session) => session.output_spectrum(),
            None => vec![0; self.config.monitor.bins()],
        }
    }

    /// Release the current session for shutdown
    pub async fn shutdown(&self) {
        let session = self.current.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(session) = session {
            info!("Shutting down session {}", session.id());
            session.disconnect().await;
        }
    }

    fn current(&self) -> Option<Arc<ConversationSession>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn live(&self) -> Option<Arc<ConversationSession>> {
        self.current().filter(|session| !session.state().is_terminal())
    }
}
