use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::transport::RemoteEvent;
use crate::audio::{AudioFrame, InboundPayload, RENDER_SAMPLE_RATE};
use crate::error::{PipelineError, Result};
use crate::session::PersonaConfig;

/// MIME type of outbound audio
pub const OUTBOUND_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// Message sent to the live API
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
}

impl ClientMessage {
    /// Session setup for a persona
    pub fn setup(model: &str, persona: &PersonaConfig) -> Self {
        let system_instruction = if persona.system_instruction.trim().is_empty() {
            None
        } else {
            Some(Content {
                role: None,
                parts: vec![Part::text(persona.system_instruction.clone())],
            })
        };

        ClientMessage::Setup(Setup {
            model: model.to_string(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: persona.voice.to_string(),
                        },
                    },
                },
            },
            system_instruction,
        })
    }

    /// One captured frame as realtime input
    pub fn audio(frame: &AudioFrame) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![Blob {
                mime_type: OUTBOUND_MIME_TYPE.to_string(),
                data: base64::engine::general_purpose::STANDARD.encode(frame.to_le_bytes()),
            }],
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

impl Part {
    pub fn text(text: String) -> Self {
        Self {
            text: Some(text),
            inline_data: None,
        }
    }
}

/// Base64 payload with its MIME type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

/// Message received from the live API
///
/// Only the fields this pipeline acts on are modelled; anything else is
/// ignored by serde.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub go_away: Option<GoAway>,
    #[serde(default)]
    pub usage_metadata: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub generation_complete: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

impl ServerMessage {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Pipeline events carried by this message, in delivery order
    ///
    /// Audio parts come first, then the interruption, then turn completion.
    /// Inline parts that are not PCM audio are logged and skipped. A message
    /// that carries nothing this pipeline knows about is a protocol error.
    pub fn into_events(self) -> Result<Vec<RemoteEvent>> {
        let mut events = Vec::new();
        let mut recognised = self.setup_complete.is_some() || self.usage_metadata.is_some() || self.go_away.is_some();

        if let Some(content) = self.server_content {
            recognised = true;

            let parts = content.model_turn.map(|turn| turn.parts).unwrap_or_default();
            for part in parts {
                let Some(blob) = part.inline_data else {
                    continue;
                };

                // Skip the part, keep the rest of the message
                if !blob.mime_type.starts_with("audio/pcm") {
                    warn!("Skipping inline part with unexpected type {}", blob.mime_type);
                    continue;
                }

                events.push(RemoteEvent::Audio(InboundPayload {
                    data: blob.data,
                    sample_rate: mime_rate(&blob.mime_type).unwrap_or(RENDER_SAMPLE_RATE),
                    sample_width: crate::audio::playback::PCM_SAMPLE_WIDTH,
                }));
            }

            if content.interrupted {
                events.push(RemoteEvent::Interrupted);
            }

            if content.turn_complete {
                events.push(RemoteEvent::TurnComplete);
            }
        }

        if recognised {
            Ok(events)
        } else {
            Err(PipelineError::Protocol("message has no recognised content".to_string()))
        }
    }
}

/// `rate=` parameter of an audio MIME type
fn mime_rate(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|rate| rate.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_rate() {
        assert_eq!(mime_rate("audio/pcm;rate=24000"), Some(24000));
        assert_eq!(mime_rate("audio/pcm; rate=16000"), Some(16000));
        assert_eq!(mime_rate("audio/pcm"), None);
    }
}
