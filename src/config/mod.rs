//! Configuration management for the Jarvis client

pub mod file;

use std::path::Path;
use std::time::Duration;

use crate::{Error, Result};

/// Default query (orchestrator) service URL
pub const DEFAULT_ORCHESTRATOR_URL: &str = "http://localhost:8003";

/// Default speech-to-text service URL
pub const DEFAULT_ASR_URL: &str = "http://localhost:8004";

/// Default text-to-speech service URL
pub const DEFAULT_TTS_URL: &str = "http://localhost:8005";

/// Default per-request timeout
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Jarvis client configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Backend service endpoints
    pub endpoints: Endpoints,

    /// Voice configuration
    pub voice: VoiceConfig,

    /// Timeout applied to every remote call (`None` waits indefinitely)
    pub request_timeout: Option<Duration>,
}

/// The three remote collaborators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    /// Query (orchestrator) service
    Query,
    /// Speech-to-text service
    Transcription,
    /// Text-to-speech service
    Synthesis,
}

impl Service {
    /// All services, in pipeline order of first use
    pub const ALL: [Self; 3] = [Self::Transcription, Self::Query, Self::Synthesis];

    /// Short service name used in logs and error messages
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Query => "orchestrator",
            Self::Transcription => "asr",
            Self::Synthesis => "tts",
        }
    }
}

/// Base URLs for the backend services
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// Query service base URL
    pub orchestrator_url: String,

    /// Speech-to-text service base URL
    pub asr_url: String,

    /// Text-to-speech service base URL
    pub tts_url: String,
}

impl Endpoints {
    /// Base URL for a service
    #[must_use]
    pub fn url(&self, service: Service) -> &str {
        match service {
            Service::Query => &self.orchestrator_url,
            Service::Transcription => &self.asr_url,
            Service::Synthesis => &self.tts_url,
        }
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            orchestrator_url: DEFAULT_ORCHESTRATOR_URL.to_string(),
            asr_url: DEFAULT_ASR_URL.to_string(),
            tts_url: DEFAULT_TTS_URL.to_string(),
        }
    }
}

/// Voice processing configuration
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceConfig {
    /// TTS speed multiplier
    pub tts_speed: f32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self { tts_speed: 1.0 }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            voice: VoiceConfig::default(),
            request_timeout: Some(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
        }
    }
}

impl Config {
    /// Load configuration from the environment and the default config file
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid
    pub fn load() -> Result<Self> {
        Self::from_sources(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Load configuration from the environment and an explicit config file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be loaded or a value is invalid
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let fc = file::read_config_file(path)?;
        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Resolve configuration with priority env > toml > default
    ///
    /// # Errors
    ///
    /// Returns error if a URL does not parse or the speed is not positive
    pub fn from_sources(
        fc: file::JarvisConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let endpoints = Endpoints {
            orchestrator_url: env("JARVIS_ORCHESTRATOR_URL")
                .or(fc.endpoints.orchestrator_url)
                .unwrap_or_else(|| DEFAULT_ORCHESTRATOR_URL.to_string()),
            asr_url: env("JARVIS_ASR_URL")
                .or(fc.endpoints.asr_url)
                .unwrap_or_else(|| DEFAULT_ASR_URL.to_string()),
            tts_url: env("JARVIS_TTS_URL")
                .or(fc.endpoints.tts_url)
                .unwrap_or_else(|| DEFAULT_TTS_URL.to_string()),
        };

        for service in Service::ALL {
            validate_url(service, endpoints.url(service))?;
        }

        let tts_speed = env("JARVIS_TTS_SPEED")
            .and_then(|s| s.parse().ok())
            .or(fc.voice.tts_speed)
            .unwrap_or(1.0);
        if !tts_speed.is_finite() || tts_speed <= 0.0 {
            return Err(Error::Config(format!(
                "tts speed must be a positive number, got {tts_speed}"
            )));
        }

        let timeout_secs = env("JARVIS_REQUEST_TIMEOUT_SECS")
            .and_then(|s| s.parse().ok())
            .or(fc.http.timeout_secs)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let request_timeout = (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs));

        let config = Self {
            endpoints,
            voice: VoiceConfig { tts_speed },
            request_timeout,
        };
        tracing::debug!(?config, "resolved configuration");
        Ok(config)
    }
}

fn validate_url(service: Service, raw: &str) -> Result<()> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| Error::Config(format!("invalid {} url {raw:?}: {e}", service.name())))?;

    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(Error::Config(format!(
            "unsupported scheme {other:?} for {} url",
            service.name()
        ))),
    }
}
