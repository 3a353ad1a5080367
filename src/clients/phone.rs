//! Phone bridge liveness probe
//!
//! The phone bridge is a small HTTP proxy running on a handset. The only
//! contract this client relies on is `GET /health` answering 200 while
//! the bridge can place calls.

use std::time::Duration;

use super::{build_http_client, ClientError};

/// Handsets answer quickly or not at all.
const PHONE_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Clone)]
pub struct PhoneStatusClient {
    http: reqwest::Client,
}

impl PhoneStatusClient {
    pub fn new() -> Result<Self, ClientError> {
        Ok(Self {
            http: build_http_client(PHONE_PROBE_TIMEOUT)?,
        })
    }

    /// Probe the bridge at `base_url` (scheme + host + port, no path).
    pub async fn probe(&self, base_url: &str) -> Result<(), ClientError> {
        let response = self
            .http
            .get(format!("{base_url}/health"))
            .send()
            .await
            .map_err(|e| ClientError::transport(e, PHONE_PROBE_TIMEOUT))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ClientError::from_response(response).await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_bridge_maps_to_unreachable() {
        let client = PhoneStatusClient::new().unwrap();
        let err = client.probe("http://127.0.0.1:9").await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Unreachable(_) | ClientError::Timeout(_)
        ));
    }
}
