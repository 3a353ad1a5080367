//! Vigil - Emergency Video Operational Intelligence
//!
//! Real-time orchestrator for incident video triage: decodes uploaded
//! footage, fans frames out to the vision analyzer, classifies hazards
//! and severity, streams assessments to dashboards over SSE, and
//! escalates confirmed emergencies to the tool-using dispatch agent.
//!
//! # Usage
//!
//! ```bash
//! # Run against the default docker-compose service URLs
//! cargo run --release
//!
//! # Point at local mock services
//! VISION_SERVICE_URL=http://localhost:9100/vision \
//! AGENT_SERVICE_URL=http://localhost:9100/agent \
//! XAI_SERVICE_URL=http://localhost:9100/xai \
//! cargo run --release -- --addr 127.0.0.1:8000
//! ```
//!
//! # Environment Variables
//!
//! - `VISION_SERVICE_URL`, `AGENT_SERVICE_URL`, `XAI_SERVICE_URL`
//! - `XAI_ENABLED`, `XAI_REQUEST_GRID`
//! - `PHONE_IP`, `PHONE_BRIDGE_PORT`, `PHONE_HEALTH_INTERVAL`
//! - `VISION_TIMEOUT_SECS`, `AGENT_TIMEOUT_SECS`, `SAMPLE_INTERVAL_SECS`
//! - `RUST_LOG`: logging level (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use vigil::api::create_app;
use vigil::clients::PhoneStatusClient;
use vigil::phone::{self, PhoneMonitor};
use vigil::{AppConfig, AppState};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "vigil")]
#[command(about = "Vigil Emergency Video Orchestrator")]
#[command(version)]
struct CliArgs {
    /// Override the server address (default: "0.0.0.0:8000")
    #[arg(short, long)]
    addr: Option<String>,

    /// Override the phone bridge address (default: PHONE_IP env var)
    #[arg(long, value_name = "HOST[:PORT]")]
    phone_ip: Option<String>,
}

// ============================================================================
// Supervisor
// ============================================================================

/// Task identification for supervisor logging
#[derive(Debug, Clone, Copy)]
enum TaskName {
    HttpServer,
    PhoneMonitor,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::HttpServer => write!(f, "HttpServer"),
            TaskName::PhoneMonitor => write!(f, "PhoneMonitor"),
        }
    }
}

async fn run_server(config: AppConfig, cancel_token: CancellationToken) -> Result<()> {
    let server_addr = config.server_addr.clone();
    let phone_interval = config.phone_health_interval;
    let phone_port = config.phone_bridge_port;

    let state = AppState::from_config(config).context("Failed to initialize service state")?;
    info!("✓ Service state initialized");
    info!("   Vision:  {}", state.vision.base_url());
    info!("   Agent:   {}", state.agent.base_url());
    info!(
        "   XAI:     {}",
        if state.xai.is_enabled() { "enabled" } else { "disabled" }
    );
    match state.phone.snapshot().ip {
        Some(ip) => info!("   Phone:   {}", ip),
        None => info!("   Phone:   not configured"),
    }

    let app = create_app(state.clone());
    let listener = tokio::net::TcpListener::bind(&server_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", server_addr))?;

    info!("✓ HTTP server listening on {}", server_addr);
    info!("");
    info!("🎯 Upload endpoint: http://{}/analyze/video-emergency", server_addr);
    info!("");

    // JoinSet Supervisor Pattern
    info!("🔒 Supervisor: Initializing task monitoring");
    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();

    // Task 1: HTTP Server
    let http_cancel = cancel_token.clone();
    task_set.spawn(async move {
        info!("[HttpServer] Task starting");

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                http_cancel.cancelled().await;
                info!("[HttpServer] Received shutdown signal");
            })
            .await;

        match result {
            Ok(()) => {
                info!("[HttpServer] Graceful shutdown complete");
                Ok(TaskName::HttpServer)
            }
            Err(e) => {
                error!("[HttpServer] Server error: {}", e);
                Err(anyhow::anyhow!("HTTP server error: {}", e))
            }
        }
    });

    // Task 2: Phone Health Monitor
    let monitor_cancel = cancel_token.clone();
    let monitor = PhoneMonitor::new(
        state.phone.clone(),
        PhoneStatusClient::new().context("phone probe client")?,
        phone_interval,
        phone_port,
    );
    task_set.spawn(async move {
        info!("[PhoneMonitor] Task starting");
        monitor.run(monitor_cancel).await;
        Ok(TaskName::PhoneMonitor)
    });

    // Supervisor loop
    info!("🔒 Supervisor: All tasks spawned, monitoring...");

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("🛑 Supervisor: Shutdown signal received");
                break;
            }
            result = task_set.join_next() => {
                match result {
                    Some(Ok(Ok(task_name))) => {
                        info!("🔒 Supervisor: Task {} completed normally", task_name);
                    }
                    Some(Ok(Err(e))) => {
                        error!("🔒 Supervisor: Task failed with error: {}", e);
                        cancel_token.cancel();
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        error!("🔒 Supervisor: Task panicked: {}", e);
                        cancel_token.cancel();
                        return Err(anyhow::anyhow!("Task panicked: {}", e));
                    }
                    None => {
                        info!("🔒 Supervisor: All tasks completed");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // Load a local .env before reading configuration
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let args = CliArgs::parse();

    let mut config = AppConfig::from_env();
    if let Some(addr) = args.addr {
        config.server_addr = addr;
    }
    if let Some(raw) = args.phone_ip {
        config.phone_ip = phone::normalize_ip(&raw);
    }

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  Vigil - Emergency Video Operational Intelligence");
    info!("  Incident Video Triage & Dispatch Orchestrator");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("");

    // Create cancellation token for graceful shutdown
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();

    // Setup signal handlers
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    run_server(config, cancel_token).await?;

    info!("");
    info!("✓ Vigil shutdown complete");
    Ok(())
}
