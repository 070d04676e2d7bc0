//! TOML configuration file loading
//!
//! Supports `~/.config/jarvis/config.toml` as a persistent config source.
//! All fields are optional, the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct JarvisConfigFile {
    /// Remote service endpoints
    #[serde(default)]
    pub endpoints: EndpointsFileConfig,

    /// Voice/audio configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// HTTP client configuration
    #[serde(default)]
    pub http: HttpFileConfig,
}

/// Base URLs of the three backend services
#[derive(Debug, Default, Deserialize)]
pub struct EndpointsFileConfig {
    /// Query (orchestrator) service, e.g. `http://localhost:8003`
    pub orchestrator_url: Option<String>,

    /// Speech-to-text service
    pub asr_url: Option<String>,

    /// Text-to-speech service
    pub tts_url: Option<String>,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// TTS speed multiplier
    pub tts_speed: Option<f32>,
}

/// HTTP client configuration
#[derive(Debug, Default, Deserialize)]
pub struct HttpFileConfig {
    /// Per-request timeout in seconds (0 disables)
    pub timeout_secs: Option<u64>,
}

/// Load the TOML config file from the standard path
///
/// Returns `JarvisConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> JarvisConfigFile {
    let Some(path) = config_file_path() else {
        return JarvisConfigFile::default();
    };

    if !path.exists() {
        return JarvisConfigFile::default();
    }

    match read_config_file(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            JarvisConfigFile::default()
        }
    }
}

/// Read and parse a config file at an explicit path
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid TOML
pub fn read_config_file(path: &Path) -> Result<JarvisConfigFile> {
    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Return the config file path: `~/.config/jarvis/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("jarvis").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn partial_file_leaves_other_sections_empty() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[endpoints]\nasr_url = \"http://asr.local:9000\"").unwrap();

        let config = read_config_file(file.path()).unwrap();
        assert_eq!(
            config.endpoints.asr_url.as_deref(),
            Some("http://asr.local:9000")
        );
        assert!(config.endpoints.orchestrator_url.is_none());
        assert!(config.voice.tts_speed.is_none());
        assert!(config.http.timeout_secs.is_none());
    }

    #[test]
    fn full_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[endpoints]
orchestrator_url = "http://orchestrator:8003"
asr_url = "http://asr:8004"
tts_url = "http://tts:8005"

[voice]
tts_speed = 1.25

[http]
timeout_secs = 15
"#
        )
        .unwrap();

        let config = read_config_file(file.path()).unwrap();
        assert_eq!(config.voice.tts_speed, Some(1.25));
        assert_eq!(config.http.timeout_secs, Some(15));
        assert_eq!(config.endpoints.tts_url.as_deref(), Some("http://tts:8005"));
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[voice\ntts_speed = ").unwrap();

        assert!(matches!(
            read_config_file(file.path()),
            Err(crate::Error::Toml(_))
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = read_config_file(&dir.path().join("absent.toml"));
        assert!(matches!(result, Err(crate::Error::Io(_))));
    }
}
