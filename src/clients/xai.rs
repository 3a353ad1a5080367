//! XAI attribution client
//!
//! Requests a patch-importance heatmap for one frame. Attribution is
//! expensive (one model call per grid cell upstream), so the timeout is
//! generous and the pipeline requests at most one heatmap per session.

use std::time::Duration;

use serde::Serialize;

use super::{build_http_client, ClientError};
use crate::types::{Hazard, XaiResult};

/// Attribution calls fan out to dozens of patch scorings upstream.
const XAI_TIMEOUT: Duration = Duration::from_secs(45);

#[derive(Clone)]
pub struct XaiClient {
    http: reqwest::Client,
    base_url: String,
    enabled: bool,
    grid_size: u32,
}

#[derive(Debug, Serialize)]
struct XaiRequest<'a> {
    image_base64: &'a str,
    frame_number: u64,
    timestamp: &'a str,
    scene_description: &'a str,
    detected_hazards: &'a [Hazard],
    grid_size: u32,
}

impl XaiClient {
    pub fn new(base_url: &str, enabled: bool, grid_size: u32) -> Result<Self, ClientError> {
        Ok(Self {
            http: build_http_client(XAI_TIMEOUT)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            enabled,
            grid_size,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Request a heatmap for one frame.
    ///
    /// Returns [`ClientError::Disabled`] without touching the network when
    /// attribution is switched off.
    pub async fn heatmap(
        &self,
        image_base64: &str,
        frame_number: u64,
        timestamp: &str,
        scene_description: &str,
        detected_hazards: &[Hazard],
    ) -> Result<XaiResult, ClientError> {
        if !self.enabled {
            return Err(ClientError::Disabled("XAI attribution"));
        }

        let request = XaiRequest {
            image_base64,
            frame_number,
            timestamp,
            scene_description,
            detected_hazards,
            grid_size: self.grid_size,
        };

        let response = self
            .http
            .post(format!("{}/analyze", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| ClientError::transport(e, XAI_TIMEOUT))?;

        if !response.status().is_success() {
            return Err(ClientError::from_response(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }
}
