//! Remote analyzer clients
//!
//! Thin async HTTP wrappers around the collaborating services:
//! - `vision`: frame captioning / assessment
//! - `xai`: patch attribution heatmaps
//! - `agent`: tool-using emergency dispatcher
//! - `phone`: phone bridge liveness probe
//!
//! Every call maps to a typed [`ClientError`]; remote failures are always
//! recovered locally by the caller, never propagated to kill a session.

pub mod agent;
pub mod phone;
pub mod vision;
pub mod xai;

pub use agent::{AgentClient, AgentOutcome};
pub use phone::PhoneStatusClient;
pub use vision::VisionClient;
pub use xai::XaiClient;

use std::time::Duration;

/// Bytes of a remote error body kept for diagnostics.
const ERROR_BODY_LIMIT: usize = 200;

/// Failure modes of a remote analyzer call.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("service unreachable: {0}")]
    Unreachable(String),
    #[error("service returned status {status}: {body}")]
    BadStatus { status: u16, body: String },
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("{0} is disabled")]
    Disabled(&'static str),
}

impl ClientError {
    /// Classify a transport-level reqwest failure.
    pub(crate) fn transport(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            ClientError::Timeout(timeout)
        } else {
            ClientError::Unreachable(err.to_string())
        }
    }

    /// Build a `BadStatus` from a non-success response, keeping a bounded
    /// slice of the body.
    pub(crate) async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        ClientError::BadStatus {
            status,
            body: truncate(&body, ERROR_BODY_LIMIT),
        }
    }
}

/// Build a reqwest client with a fixed per-call timeout.
pub(crate) fn build_http_client(timeout: Duration) -> Result<reqwest::Client, ClientError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ClientError::Unreachable(format!("failed to build HTTP client: {e}")))
}

pub(crate) fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        text.to_string()
    } else {
        text.chars().take(limit).collect()
    }
}
