//! Error types for the Jarvis client

use thiserror::Error;

/// Result type alias for Jarvis operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the Jarvis client
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Microphone access denied or device failure
    #[error("microphone unavailable: {0}")]
    MicrophoneUnavailable(String),

    /// Stop requested without an active recording
    #[error("no active recording")]
    NoActiveCapture,

    /// Start requested while a recording is active or being finalized
    #[error("a recording is already in progress")]
    CaptureAlreadyInProgress,

    /// Speech-to-text service failure
    #[error("transcription failed: {0}")]
    TranscriptionFailed(String),

    /// Query service failure
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Text-to-speech service failure
    #[error("speech synthesis failed: {0}")]
    SynthesisFailed(String),

    /// Audio playback failure
    #[error("audio playback failed: {0}")]
    PlaybackFailed(String),

    /// Audio encoding/decoding error
    #[error("audio error: {0}")]
    Audio(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether this failure ends the current turn's pipeline
    ///
    /// Synthesis and playback failures leave the text response standing.
    #[must_use]
    pub const fn aborts_turn(&self) -> bool {
        !matches!(self, Self::SynthesisFailed(_) | Self::PlaybackFailed(_))
    }
}
