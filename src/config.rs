//! Application configuration
//!
//! All knobs come from the environment (a local `.env` is loaded by the
//! binary before parsing). Service URLs default to the docker-compose
//! hostnames of the companion analyzer containers.

use std::time::Duration;

/// Default sampling interval between extracted frames (seconds).
pub const DEFAULT_SAMPLE_INTERVAL_SECS: f64 = 1.0;

/// Runtime configuration for the orchestrator process.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// HTTP server bind address
    pub server_addr: String,
    /// Vision analyzer base URL
    pub vision_url: String,
    /// Agent executor base URL
    pub agent_url: String,
    /// XAI attributor base URL
    pub xai_url: String,
    /// Whether XAI attribution is requested at all
    pub xai_enabled: bool,
    /// Attribution grid edge length requested from the XAI service
    pub xai_grid: u32,
    /// Per-call timeout for vision analysis
    pub vision_timeout: Duration,
    /// Per-call timeout for agent dispatch
    pub agent_timeout: Duration,
    /// Seconds of video between sampled frames
    pub sample_interval_secs: f64,
    /// Initial phone bridge address (may be reconfigured at runtime)
    pub phone_ip: Option<String>,
    /// Port appended to a bare phone bridge host
    pub phone_bridge_port: u16,
    /// Cadence of the phone bridge health probe
    pub phone_health_interval: Duration,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            server_addr: env_or("VIGIL_SERVER_ADDR", "0.0.0.0:8000"),
            vision_url: env_url("VISION_SERVICE_URL", "http://vision-service:8002"),
            agent_url: env_url("AGENT_SERVICE_URL", "http://agent-service:8001"),
            xai_url: env_url("XAI_SERVICE_URL", "http://xai-service:8004"),
            xai_enabled: env_flag("XAI_ENABLED", true),
            xai_grid: env_parsed("XAI_REQUEST_GRID", 8),
            vision_timeout: Duration::from_secs_f64(env_parsed("VISION_TIMEOUT_SECS", 30.0)),
            agent_timeout: Duration::from_secs_f64(env_parsed("AGENT_TIMEOUT_SECS", 60.0)),
            sample_interval_secs: env_parsed("SAMPLE_INTERVAL_SECS", DEFAULT_SAMPLE_INTERVAL_SECS),
            phone_ip: std::env::var("PHONE_IP")
                .ok()
                .and_then(|raw| crate::phone::normalize_ip(&raw)),
            phone_bridge_port: env_parsed("PHONE_BRIDGE_PORT", 5005),
            phone_health_interval: Duration::from_secs_f64(env_parsed(
                "PHONE_HEALTH_INTERVAL",
                3.0,
            )),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_addr: "0.0.0.0:8000".to_string(),
            vision_url: "http://vision-service:8002".to_string(),
            agent_url: "http://agent-service:8001".to_string(),
            xai_url: "http://xai-service:8004".to_string(),
            xai_enabled: true,
            xai_grid: 8,
            vision_timeout: Duration::from_secs(30),
            agent_timeout: Duration::from_secs(60),
            sample_interval_secs: DEFAULT_SAMPLE_INTERVAL_SECS,
            phone_ip: None,
            phone_bridge_port: 5005,
            phone_health_interval: Duration::from_secs(3),
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Service URLs lose their trailing slash so path joins stay predictable.
fn env_url(name: &str, default: &str) -> String {
    env_or(name, default).trim_end_matches('/').to_string()
}

/// Boolean env flag accepting `1`, `true`, `yes`, `on` (case-insensitive).
pub fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(raw) => matches!(
            raw.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

fn env_parsed<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}
