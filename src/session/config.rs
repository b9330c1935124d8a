use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::audio::{AudioBackendConfig, MonitorConfig};

/// Prebuilt voices offered by the live API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VoiceName {
    Puck,
    Charon,
    Kore,
    #[default]
    Fenrir,
    Zephyr,
    Aoede,
}

impl VoiceName {
    pub const ALL: [VoiceName; 6] = [
        VoiceName::Puck,
        VoiceName::Charon,
        VoiceName::Kore,
        VoiceName::Fenrir,
        VoiceName::Zephyr,
        VoiceName::Aoede,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VoiceName::Puck => "Puck",
            VoiceName::Charon => "Charon",
            VoiceName::Kore => "Kore",
            VoiceName::Fenrir => "Fenrir",
            VoiceName::Zephyr => "Zephyr",
            VoiceName::Aoede => "Aoede",
        }
    }
}

impl fmt::Display for VoiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VoiceName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VoiceName::ALL
            .into_iter()
            .find(|voice| voice.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown voice '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    #[default]
    Male,
    Female,
}

/// Who the remote model speaks as
///
/// Country, dialect, tone and gender describe the persona for display and
/// logging; `system_instruction` is the prompt actually sent on setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaConfig {
    pub country: String,
    pub dialect: String,
    pub tone: String,
    pub gender: Gender,
    pub voice: VoiceName,
    pub system_instruction: String,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            country: "Saudi Arabia".to_string(),
            dialect: "Najdi".to_string(),
            tone: "News / Media (formal, professional)".to_string(),
            gender: Gender::Male,
            voice: VoiceName::Fenrir,
            system_instruction: String::new(),
        }
    }
}

/// Configuration for one conversation session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub audio: AudioBackendConfig,
    pub monitor: MonitorConfig,
    /// Linear gain applied to model speech
    pub output_gain: f32,
    /// Buffered session events per subscriber
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            audio: AudioBackendConfig::default(),
            monitor: MonitorConfig::default(),
            output_gain: 1.0,
            event_capacity: 256,
        }
    }
}
