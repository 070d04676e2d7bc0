//! Shared HTTP plumbing for the backend service clients

use std::time::Duration;

use crate::{Error, Result};

/// Build a client with the configured per-request timeout
///
/// # Errors
///
/// Returns error if the TLS backend cannot be initialized
pub fn build_client(timeout: Option<Duration>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }

    builder
        .build()
        .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))
}

/// Join a service base URL and a path
#[must_use]
pub fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}{path}", base_url.trim_end_matches('/'))
}

/// Describe a non-success response as `"<service> error <status>: <detail>"`
///
/// Prefers the JSON `detail` field the services return, falling back to the raw body.
pub async fn failure_detail(service: &str, response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    let detail = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(ToString::to_string))
        .unwrap_or(body);

    if detail.trim().is_empty() {
        format!("{service} error {status}")
    } else {
        format!("{service} error {status}: {}", detail.trim())
    }
}
