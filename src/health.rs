//! Backend service health probing

use std::fmt;

use crate::config::{Endpoints, Service};
use crate::http::endpoint;

/// Health of one backend service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceHealth {
    /// Which service was probed
    pub service: Service,
    /// Base URL probed
    pub url: String,
    /// Error text when the probe failed
    pub error: Option<String>,
}

impl ServiceHealth {
    /// Whether the probe succeeded
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        self.error.is_none()
    }
}

impl fmt::Display for ServiceHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            None => write!(f, "{:<12} {:<28} healthy", self.service.name(), self.url),
            Some(e) => write!(f, "{:<12} {:<28} unhealthy ({e})", self.service.name(), self.url),
        }
    }
}

async fn probe(client: &reqwest::Client, service: Service, base_url: &str) -> ServiceHealth {
    let error = match client.get(endpoint(base_url, "/health")).send().await {
        Ok(response) if response.status().is_success() => None,
        Ok(response) => Some(format!("status {}", response.status())),
        Err(e) => Some(e.to_string()),
    };

    tracing::debug!(service = service.name(), healthy = error.is_none(), "health probe");
    ServiceHealth {
        service,
        url: base_url.to_string(),
        error,
    }
}

/// Probe `GET {base}/health` on all three services concurrently
pub async fn check_services(client: &reqwest::Client, endpoints: &Endpoints) -> Vec<ServiceHealth> {
    let (asr, orchestrator, tts) = tokio::join!(
        probe(client, Service::Transcription, &endpoints.asr_url),
        probe(client, Service::Query, &endpoints.orchestrator_url),
        probe(client, Service::Synthesis, &endpoints.tts_url),
    );
    vec![asr, orchestrator, tts]
}
