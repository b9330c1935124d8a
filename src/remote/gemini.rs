//! Gemini Live bidirectional WebSocket session

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, info, warn};

use super::messages::{ClientMessage, ServerMessage};
use super::transport::{Credential, LinkEnds, LiveTransport, RemoteEvent, RemoteLink};
use crate::audio::AudioFrame;
use crate::error::{PipelineError, Result};
use crate::session::PersonaConfig;

pub const DEFAULT_ENDPOINT: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-12-2025";

/// Connection settings for the live API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub setup_timeout_secs: u64,
    /// Frames buffered for the writer before new ones are dropped
    pub outbound_queue_depth: usize,
    pub event_queue_depth: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key_env: "API_KEY".to_string(),
            setup_timeout_secs: 10,
            outbound_queue_depth: 16,
            event_queue_depth: 256,
        }
    }
}

impl RemoteConfig {
    pub fn setup_timeout(&self) -> Duration {
        Duration::from_secs(self.setup_timeout_secs.max(1))
    }
}

/// Live transport over the Gemini bidirectional streaming endpoint
pub struct GeminiLiveTransport {
    config: RemoteConfig,
}

impl GeminiLiveTransport {
    pub fn new(config: RemoteConfig) -> Self {
        Self { config }
    }

    fn url(&self, credential: &Credential) -> String {
        let separator = if self.config.endpoint.contains('?') { '&' } else { '?' };
        format!("{}{}key={}", self.config.endpoint, separator, credential.expose())
    }
}

#[async_trait::async_trait]
impl LiveTransport for GeminiLiveTransport {
    async fn open(&self, persona: &PersonaConfig, credential: &Credential) -> Result<RemoteLink> {
        info!("Connecting to {} ({})", self.config.endpoint, self.config.model);

        let (ws, _response) = tokio_tungstenite::connect_async(self.url(credential))
            .await
            .map_err(handshake_error)?;

        let (mut write, mut read) = ws.split();

        let setup = serde_json::to_string(&ClientMessage::setup(&self.config.model, persona))?;
        write
            .send(Message::Text(setup))
            .await
            .map_err(|e| PipelineError::Network(format!("failed to send setup: {}", e)))?;

        debug!("Setup sent (voice {})", persona.voice);

        // Nothing else is valid until the server acknowledges setup
        let acknowledged = tokio::time::timeout(self.config.setup_timeout(), async {
            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        if ServerMessage::parse(text.as_bytes())?.is_setup_complete() {
                            return Ok(());
                        }
                    }
                    Ok(Message::Binary(bytes)) => {
                        if ServerMessage::parse(&bytes)?.is_setup_complete() {
                            return Ok(());
                        }
                    }
                    Ok(Message::Close(frame)) => return Err(setup_close_error(frame)),
                    Ok(_) => {}
                    Err(e) => return Err(PipelineError::Network(e.to_string())),
                }
            }
            Err(PipelineError::Network("connection ended during setup".to_string()))
        })
        .await
        .map_err(|_| PipelineError::Network("timed out waiting for setup to complete".to_string()))?;
        acknowledged?;

        info!("Session opened");

        let (link, LinkEnds { frames, events }) =
            RemoteLink::channel(self.config.outbound_queue_depth, self.config.event_queue_depth);

        tokio::spawn(write_frames(write, frames));
        tokio::spawn(read_events(read, events));

        Ok(link)
    }

    fn name(&self) -> &str {
        "gemini-live"
    }
}

async fn write_frames<S>(mut write: S, mut frames: mpsc::Receiver<AudioFrame>)
where
    S: futures::Sink<Message, Error = WsError> + Unpin,
{
    while let Some(frame) = frames.recv().await {
        let text = match serde_json::to_string(&ClientMessage::audio(&frame)) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode frame {}: {}", frame.sequence(), e);
                continue;
            }
        };

        if let Err(e) = write.send(Message::Text(text)).await {
            debug!("Outbound stream ended: {}", e);
            return;
        }
    }

    // The session dropped its sink
    let _ = write.send(Message::Close(None)).await;
    let _ = write.close().await;
    debug!("Outbound stream closed");
}

async fn read_events<S>(mut read: S, events: mpsc::Sender<RemoteEvent>)
where
    S: futures::Stream<Item = std::result::Result<Message, WsError>> + Unpin,
{
    while let Some(message) = read.next().await {
        let bytes = match message {
            Ok(Message::Text(text)) => text.into_bytes(),
            Ok(Message::Binary(bytes)) => bytes,
            Ok(Message::Close(frame)) => {
                let reason = frame.map(|f| f.reason.into_owned()).filter(|r| !r.is_empty());
                info!("Session closed");
                let _ = events.send(RemoteEvent::Closed { reason }).await;
                return;
            }
            Ok(_) => continue,
            Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => {
                let _ = events.send(RemoteEvent::Closed { reason: None }).await;
                return;
            }
            Err(e) => {
                error!("Live session error: {}", e);
                let _ = events
                    .send(RemoteEvent::Error(PipelineError::Network(e.to_string())))
                    .await;
                return;
            }
        };

        let server_message = match ServerMessage::parse(&bytes) {
            Ok(message) => message,
            Err(e) => {
                error!("Undecodable server message: {}", e);
                let _ = events.send(RemoteEvent::Error(e)).await;
                return;
            }
        };

        if let Some(go_away) = &server_message.go_away {
            warn!("Server is going away (time left: {:?})", go_away.time_left);
        }

        match server_message.into_events() {
            Ok(batch) => {
                for event in batch {
                    if events.send(event).await.is_err() {
                        debug!("Event receiver dropped, stopping reader");
                        return;
                    }
                }
            }
            Err(e) => warn!("Ignoring server message: {}", e),
        }
    }

    let _ = events.send(RemoteEvent::Closed { reason: None }).await;
}

fn handshake_error(error: WsError) -> PipelineError {
    match error {
        WsError::Http(response) => {
            let status = response.status();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                PipelineError::Auth(format!("credential rejected ({})", status))
            } else {
                PipelineError::Network(format!("handshake failed ({})", status))
            }
        }
        other => PipelineError::Network(other.to_string()),
    }
}

/// The server closes during setup when the key or model is refused
fn setup_close_error(frame: Option<CloseFrame<'static>>) -> PipelineError {
    let Some(frame) = frame else {
        return PipelineError::Network("connection closed during setup".to_string());
    };

    let reason = frame.reason.to_string();
    if frame.code == CloseCode::Policy || reason.to_ascii_lowercase().contains("api key") {
        PipelineError::Auth(reason)
    } else {
        PipelineError::Network(format!("closed during setup ({}): {}", u16::from(frame.code), reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_close_is_auth_error() {
        let frame = CloseFrame {
            code: CloseCode::Policy,
            reason: "API key not valid".into(),
        };
        assert!(matches!(setup_close_error(Some(frame)), PipelineError::Auth(_)));

        let frame = CloseFrame {
            code: CloseCode::Away,
            reason: "".into(),
        };
        assert!(matches!(setup_close_error(Some(frame)), PipelineError::Network(_)));
        assert!(matches!(setup_close_error(None), PipelineError::Network(_)));
    }

    #[test]
    fn test_url_appends_key() {
        let transport = GeminiLiveTransport::new(RemoteConfig {
            endpoint: "ws://localhost:9000/live".to_string(),
            ..RemoteConfig::default()
        });
        let credential = Credential::new("abc").unwrap();
        assert_eq!(transport.url(&credential), "ws://localhost:9000/live?key=abc");
    }
}
