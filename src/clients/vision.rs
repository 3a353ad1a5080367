//! Vision analyzer client
//!
//! POSTs a frame to the vision service and returns a structured
//! [`EmergencyMetrics`]. The wire contract allows either side to host the
//! hazard parser: a service that parses captions itself returns the
//! metrics object directly, while a bare captioner returns prose that is
//! fed through the local parser.

use std::time::Duration;

use serde::Deserialize;

use super::{build_http_client, ClientError};
use crate::analysis::parser::parse_caption;
use crate::types::{AnalysisRequest, EmergencyMetrics};

/// Timeout for the lightweight `/health` probe used by the aggregate
/// health endpoint.
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct VisionClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

/// Either wire shape the vision service may answer with.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum VisionReply {
    Metrics(EmergencyMetrics),
    Caption(CaptionBody),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct CaptionBody {
    #[serde(alias = "caption", alias = "raw_response")]
    description: String,
}

impl VisionClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        Ok(Self {
            http: build_http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    /// Analyze a single frame.
    pub async fn analyze(&self, request: &AnalysisRequest) -> Result<EmergencyMetrics, ClientError> {
        let response = self
            .http
            .post(format!("{}/analyze", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(|e| ClientError::transport(e, self.timeout))?;

        if !response.status().is_success() {
            return Err(ClientError::from_response(response).await);
        }

        let reply: VisionReply = response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;

        Ok(match reply {
            VisionReply::Metrics(metrics) => metrics,
            VisionReply::Caption(body) => {
                parse_caption(&body.description, &request.timestamp, request.frame_number)
            }
            VisionReply::Text(caption) => {
                parse_caption(&caption, &request.timestamp, request.frame_number)
            }
        })
    }

    /// Probe the service's `/health` endpoint (short timeout, used by the
    /// aggregate health handler).
    pub async fn health(&self) -> Result<serde_json::Value, ClientError> {
        probe_health(&self.http, &self.base_url).await
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Shared `/health` probe used by the vision and agent clients.
pub(crate) async fn probe_health(
    http: &reqwest::Client,
    base_url: &str,
) -> Result<serde_json::Value, ClientError> {
    let response = http
        .get(format!("{base_url}/health"))
        .timeout(HEALTH_PROBE_TIMEOUT)
        .send()
        .await
        .map_err(|e| ClientError::transport(e, HEALTH_PROBE_TIMEOUT))?;

    if !response.status().is_success() {
        return Err(ClientError::from_response(response).await);
    }

    response
        .json()
        .await
        .map_err(|e| ClientError::Decode(e.to_string()))
}
