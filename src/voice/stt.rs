//! Speech-to-text (STT) processing

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Service;
use crate::http::{endpoint, failure_detail};
use crate::voice::AudioClip;
use crate::{Error, Result};

/// Transcription path on the ASR service
const TRANSCRIBE_PATH: &str = "/v1/transcribe";

/// Recognized speech
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    /// Recognized text
    pub text: String,

    /// Detected language code
    #[serde(default)]
    pub language: String,

    /// Audio duration in seconds, when the service reports it
    #[serde(default, rename = "duration")]
    pub duration_seconds: Option<f64>,
}

/// Transcribes finished clips
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe a finished clip
    ///
    /// # Errors
    ///
    /// Returns `TranscriptionFailed` on any service or transport failure
    async fn transcribe(&self, clip: &AudioClip) -> Result<Transcription>;
}

/// HTTP client for the ASR service
pub struct TranscriptionClient {
    client: reqwest::Client,
    base_url: String,
}

impl TranscriptionClient {
    /// Create a client for the service at `base_url`
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl Transcriber for TranscriptionClient {
    async fn transcribe(&self, clip: &AudioClip) -> Result<Transcription> {
        if clip.is_empty() {
            return Err(Error::TranscriptionFailed("audio clip is empty".to_string()));
        }

        let service = Service::Transcription.name();
        tracing::debug!(audio_bytes = clip.bytes().len(), "starting transcription");

        let part = reqwest::multipart::Part::bytes(clip.bytes().to_vec())
            .file_name(clip.file_name())
            .mime_str(clip.mime_type())
            .map_err(|e| Error::TranscriptionFailed(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(endpoint(&self.base_url, TRANSCRIBE_PATH))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "transcription request failed");
                Error::TranscriptionFailed(e.to_string())
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let detail = failure_detail(service, response).await;
            tracing::error!(detail = %detail, "transcription service error");
            return Err(Error::TranscriptionFailed(detail));
        }

        let result: Transcription = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse transcription response");
            Error::TranscriptionFailed(format!("invalid {service} response: {e}"))
        })?;

        tracing::info!(
            transcript = %result.text,
            language = %result.language,
            "transcription complete"
        );
        Ok(result)
    }
}
