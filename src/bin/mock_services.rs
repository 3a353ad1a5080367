//! Mock analyzer services for local development
//!
//! Serves stub vision, agent and XAI endpoints on one port so the
//! orchestrator can be exercised without GPUs or API keys:
//!
//! ```bash
//! cargo run --bin mock-services -- --addr 127.0.0.1:9100
//!
//! VISION_SERVICE_URL=http://127.0.0.1:9100/vision \
//! AGENT_SERVICE_URL=http://127.0.0.1:9100/agent \
//! XAI_SERVICE_URL=http://127.0.0.1:9100/xai \
//! cargo run
//! ```
//!
//! The vision stub cycles through canned captions keyed by frame number
//! and runs them through the real hazard parser, so downstream behavior
//! matches production parsing exactly.

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde_json::{json, Value};
use tracing::info;

use vigil::types::{AnalysisRequest, EmergencyMetrics, XaiCell, XaiResult};

#[derive(Parser, Debug)]
#[command(name = "mock-services")]
#[command(about = "Stub vision/agent/XAI services for Vigil development")]
struct CliArgs {
    /// Bind address for all three stubs
    #[arg(short, long, default_value = "127.0.0.1:9100")]
    addr: String,
}

const CAPTIONS: &[&str] = &[
    "A calm street with pedestrians walking. No danger. 3 people.",
    "Thick smoke rising from a building rooftop. People should move away from the area.",
    "Building on fire, flames visible through windows. Injured person on the ground, injury: yes. 2 people.",
    "Emergency crews arriving, scene appears contained. No fire visible anymore.",
];

async fn vision_health() -> Json<Value> {
    Json(json!({"status": "healthy", "vllm_connected": true}))
}

async fn vision_analyze(Json(request): Json<AnalysisRequest>) -> Json<EmergencyMetrics> {
    let caption = CAPTIONS[(request.frame_number as usize) % CAPTIONS.len()];
    Json(vigil::parse_caption(
        caption,
        &request.timestamp,
        request.frame_number,
    ))
}

async fn agent_health() -> Json<Value> {
    Json(json!({"status": "healthy", "agent_ready": true, "service": "emergency-agent"}))
}

/// Returns a raw tool-invocation trace, exercising the orchestrator-side
/// adapter the same way a LangChain-style executor would.
async fn agent_analyze(Json(request): Json<Value>) -> Json<Value> {
    let situation = request
        .get("scene_description")
        .and_then(Value::as_str)
        .unwrap_or("Incident detected");

    let call_output = json!({
        "status": "success",
        "service_type": "fire",
        "service": "Fire Department",
        "urgency": request.get("urgency_level").cloned().unwrap_or(json!("high")),
        "situation": situation,
        "timestamp": "2024-01-01 00:00:00",
        "call_id": "EMERG-MOCK-1",
        "estimated_arrival": "5-10 minutes",
    });
    let sms_output = json!({
        "status": "completed",
        "message": format!("Sent by Monkedh: {situation}"),
        "priority": "high",
        "timestamp": "2024-01-01 00:00:01",
        "call_id": "SMS-MOCK-1",
    });
    let redirect_output = json!({
        "status": "pending",
        "destination": "/chat",
        "priority": "critical",
        "message": "Switch to guided chat for on-site instructions",
        "timestamp": "2024-01-01 00:00:02",
        "call_id": "REDIRECT-MOCK-1",
    });

    Json(json!({
        "output": "Authorities alerted, SMS sent, redirect queued.",
        "intermediate_steps": [
            [
                {"tool": "call_authorities", "tool_input": {"service_type": "fire", "urgency_level": "critical", "situation_description": situation}},
                call_output.to_string()
            ],
            [
                {"tool": "phone_sms_tool", "tool_input": {"message": situation, "priority": "high"}},
                sms_output.to_string()
            ],
            [
                {"tool": "redirect_to_chat_tool", "tool_input": {"message": "Switch to guided chat"}},
                redirect_output.to_string()
            ]
        ]
    }))
}

async fn xai_health() -> Json<Value> {
    Json(json!({"status": "ok", "service": "xai"}))
}

async fn xai_analyze(Json(request): Json<Value>) -> Json<XaiResult> {
    let grid_size = request
        .get("grid_size")
        .and_then(Value::as_u64)
        .unwrap_or(8) as u32;
    let frame_number = request
        .get("frame_number")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let timestamp = request
        .get("timestamp")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    // Single hot cell in the center, everything else cold.
    let center = grid_size / 2;
    let cells = (0..grid_size)
        .flat_map(|row| {
            (0..grid_size).map(move |col| XaiCell {
                row,
                col,
                score: if row == center && col == center { 0.9 } else { 0.1 },
                summary: if row == center && col == center {
                    "dominant hazard region".to_string()
                } else {
                    "background".to_string()
                },
            })
        })
        .collect();

    Json(XaiResult {
        frame_number,
        timestamp,
        grid_size,
        cells,
        max_score: 0.9,
        heatmap_image_base64: "data:image/jpeg;base64,".to_string(),
        explanation: format!("({},{}) score=0.90 dominant hazard region", center + 1, center + 1),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    let app = Router::new()
        .route("/vision/health", get(vision_health))
        .route("/vision/analyze", post(vision_analyze))
        .route("/agent/health", get(agent_health))
        .route("/agent/analyze", post(agent_analyze))
        .route("/xai/health", get(xai_health))
        .route("/xai/analyze", post(xai_analyze));

    let listener = tokio::net::TcpListener::bind(&args.addr)
        .await
        .with_context(|| format!("Failed to bind to {}", args.addr))?;

    info!("Mock analyzer services listening on {}", args.addr);
    info!("  vision: http://{}/vision", args.addr);
    info!("  agent:  http://{}/agent", args.addr);
    info!("  xai:    http://{}/xai", args.addr);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
