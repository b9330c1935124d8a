use anyhow::{Context, Result};
use serde::Deserialize;

use crate::audio::{AudioBackendConfig, MonitorConfig};
use crate::remote::{Credential, RemoteConfig};
use crate::session::{PersonaConfig, SessionConfig};

#[derive(Debug, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub persona: PersonaConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    #[serde(flatten)]
    pub backend: AudioBackendConfig,
    /// Linear gain applied to model speech
    pub output_gain: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            backend: AudioBackendConfig::default(),
            output_gain: 1.0,
        }
    }
}

impl Config {
    /// Load a config file, then apply `NATIQ__SECTION__KEY` environment overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(
                config::Environment::with_prefix("NATIQ")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read config {}", path))?;

        settings.try_deserialize().context("Invalid configuration")
    }

    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            audio: self.audio.backend.clone(),
            monitor: self.monitor,
            output_gain: self.audio.output_gain,
            ..SessionConfig::default()
        }
    }

    /// API key from the configured environment variable
    pub fn credential(&self) -> Option<Credential> {
        Credential::from_env(&self.remote.api_key_env).ok()
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.service.http.bind, self.service.http.port)
    }
}
