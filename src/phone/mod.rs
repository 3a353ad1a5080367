//! Phone bridge state and health monitor
//!
//! A single handset fronts the real-world calling path, so its liveness is
//! process-wide state. [`PhoneState`] holds an atomically swapped snapshot
//! that readers never lock; the [`PhoneMonitor`] background task is the
//! only writer besides the `/phone/update_ip` endpoint.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clients::PhoneStatusClient;

/// Point-in-time view of the phone bridge.
#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct PhoneSnapshot {
    pub connected: bool,
    pub ip: Option<String>,
    pub last_checked: Option<String>,
    pub last_error: Option<String>,
}

/// Process-wide phone bridge state.
pub struct PhoneState {
    snapshot: ArcSwap<PhoneSnapshot>,
}

impl PhoneState {
    pub fn new(initial_ip: Option<String>) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(PhoneSnapshot {
                connected: false,
                ip: initial_ip,
                last_checked: None,
                last_error: None,
            }),
        }
    }

    /// Current snapshot (cheap clone of the swapped value).
    pub fn snapshot(&self) -> PhoneSnapshot {
        self.snapshot.load().as_ref().clone()
    }

    /// Replace the configured bridge address, leaving probe results to the
    /// next probe cycle.
    pub fn set_ip(&self, ip: String) {
        self.snapshot.rcu(|current| PhoneSnapshot {
            ip: Some(ip.clone()),
            ..current.as_ref().clone()
        });
    }

    /// Record the outcome of one probe.
    pub fn record_probe(&self, connected: bool, last_error: Option<String>) {
        let last_checked = Some(Utc::now().to_rfc3339());
        self.snapshot.rcu(|current| PhoneSnapshot {
            connected,
            ip: current.ip.clone(),
            last_checked: last_checked.clone(),
            last_error: last_error.clone(),
        });
    }
}

// ============================================================================
// Address normalization
// ============================================================================

/// Normalize a user-supplied bridge address: strip the scheme and any
/// trailing slash. Returns `None` for blank input.
pub fn normalize_ip(raw: &str) -> Option<String> {
    let mut cleaned = raw.trim();
    if cleaned.is_empty() {
        return None;
    }
    for prefix in ["http://", "https://"] {
        if let Some(rest) = cleaned.strip_prefix(prefix) {
            cleaned = rest;
            break;
        }
    }
    let cleaned = cleaned.trim().trim_end_matches('/');
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// Canonical base URL for a normalized bridge address. A host that already
/// carries a port is used as-is; a bare host gets the default bridge port.
pub fn base_url(ip: &str, default_port: u16) -> String {
    let host = ip.split('/').next().unwrap_or(ip);
    if host.contains(':') {
        format!("http://{}", ip.trim_end_matches('/'))
    } else {
        format!("http://{host}:{default_port}")
    }
}

// ============================================================================
// Monitor
// ============================================================================

/// Background task probing the phone bridge on a fixed cadence.
pub struct PhoneMonitor {
    state: Arc<PhoneState>,
    client: PhoneStatusClient,
    interval: Duration,
    default_port: u16,
}

impl PhoneMonitor {
    pub fn new(
        state: Arc<PhoneState>,
        client: PhoneStatusClient,
        interval: Duration,
        default_port: u16,
    ) -> Self {
        Self {
            state,
            client,
            interval,
            default_port,
        }
    }

    /// Run the probe loop until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs_f64(),
            "Phone health monitor started"
        );
        loop {
            refresh(&self.state, &self.client, self.default_port).await;
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Phone health monitor stopped");
                    return;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}

/// Probe the bridge once and fold the result into the shared state.
///
/// Also called directly by `/phone/update_ip` so a reconfigured address is
/// reflected without waiting a full interval.
pub async fn refresh(state: &PhoneState, client: &PhoneStatusClient, default_port: u16) {
    let Some(ip) = state.snapshot().ip else {
        state.record_probe(false, Some("Phone IP not configured".to_string()));
        return;
    };

    let base = base_url(&ip, default_port);
    match client.probe(&base).await {
        Ok(()) => {
            debug!(ip = ip.as_str(), "Phone bridge reachable");
            state.record_probe(true, None);
        }
        Err(e) => {
            warn!(ip = ip.as_str(), error = %e, "Phone bridge probe failed");
            state.record_probe(false, Some(e.to_string()));
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
