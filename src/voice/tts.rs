//! Text-to-speech (TTS) processing

use async_trait::async_trait;

use crate::config::Service;
use crate::http::{endpoint, failure_detail};
use crate::{Error, Result};

/// Synthesis path on the TTS service
const SPEAK_PATH: &str = "/v1/speak";

/// Synthesizes speech from text
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize text to an encoded audio payload
    ///
    /// # Errors
    ///
    /// Returns `SynthesisFailed` on any service or transport failure
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// HTTP client for the TTS service
pub struct SynthesisClient {
    client: reqwest::Client,
    base_url: String,
    speed: f32,
}

impl SynthesisClient {
    /// Create a client for the service at `base_url`
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, speed: f32) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            speed,
        }
    }
}

#[async_trait]
impl Synthesizer for SynthesisClient {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct SpeakRequest<'a> {
            text: &'a str,
            speed: f32,
        }

        if text.trim().is_empty() {
            return Err(Error::SynthesisFailed("nothing to synthesize".to_string()));
        }

        tracing::debug!(chars = text.len(), speed = self.speed, "speaking");

        let request = SpeakRequest {
            text,
            speed: self.speed,
        };

        let response = self
            .client
            .post(endpoint(&self.base_url, SPEAK_PATH))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::SynthesisFailed(e.to_string()))?;

        if !response.status().is_success() {
            let detail = failure_detail(Service::Synthesis.name(), response).await;
            return Err(Error::SynthesisFailed(detail));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| Error::SynthesisFailed(e.to_string()))?;

        tracing::debug!(audio_bytes = audio.len(), "synthesis complete");
        Ok(audio.to_vec())
    }
}
