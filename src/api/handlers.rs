//! API request handlers

use std::convert::Infallible;

use axum::extract::{Multipart, Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use super::ApiError;
use crate::clients::ClientError;
use crate::phone::{self, PhoneSnapshot};
use crate::pipeline;
use crate::session::{SessionError, SessionEvent};
use crate::state::AppState;
use crate::types::{AnalysisRequest, EmergencyMetrics};

// ============================================================================
// Root & health
// ============================================================================

/// GET / - service banner
pub async fn root() -> Json<Value> {
    Json(json!({
        "message": "Emergency Video Orchestrator",
        "status": "running",
    }))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub services: ServiceStatuses,
    pub llama_server: bool,
    pub phone: PhoneSnapshot,
}

#[derive(Debug, Serialize)]
pub struct ServiceStatuses {
    pub vision: String,
    pub agent: String,
    pub xai: String,
}

/// GET /health - aggregate health of the orchestrator and its collaborators
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let (vision_probe, agent_probe) = tokio::join!(state.vision.health(), state.agent.health());

    let (vision, llama_server) = match vision_probe {
        Ok(body) => (
            "healthy".to_string(),
            body.get("vllm_connected")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        ),
        Err(ClientError::BadStatus { .. }) => ("unhealthy".to_string(), false),
        Err(_) => ("unreachable".to_string(), false),
    };
    let agent = match agent_probe {
        Ok(_) => "healthy".to_string(),
        Err(ClientError::BadStatus { .. }) => "unhealthy".to_string(),
        Err(_) => "unreachable".to_string(),
    };

    let degraded = vision != "healthy" || agent != "healthy";
    Json(HealthResponse {
        status: if degraded { "degraded" } else { "healthy" }.to_string(),
        services: ServiceStatuses {
            vision,
            agent,
            xai: if state.xai.is_enabled() {
                "enabled".to_string()
            } else {
                "disabled".to_string()
            },
        },
        llama_server,
        phone: state.phone.snapshot(),
    })
}

// ============================================================================
// Phone bridge
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PhoneUpdateRequest {
    pub ip: String,
}

/// GET /phone/status - last completed probe of the phone bridge
pub async fn phone_status(State(state): State<AppState>) -> Json<PhoneSnapshot> {
    Json(state.phone.snapshot())
}

/// POST /phone/update_ip - reconfigure the bridge address and probe it now
pub async fn update_phone_ip(
    State(state): State<AppState>,
    Json(request): Json<PhoneUpdateRequest>,
) -> Result<Json<Value>, ApiError> {
    let ip = phone::normalize_ip(&request.ip)
        .ok_or_else(|| ApiError::bad_request("Invalid IP address"))?;

    info!(ip = ip.as_str(), "Phone bridge address updated");
    state.phone.set_ip(ip.clone());
    phone::refresh(
        &state.phone,
        &state.phone_client,
        state.config.phone_bridge_port,
    )
    .await;

    Ok(Json(json!({ "saved": true, "ip": ip })))
}

// ============================================================================
// Analysis
// ============================================================================

/// POST /analyze/frame - synchronous single-frame proxy to the vision service
pub async fn analyze_frame(
    State(state): State<AppState>,
    Json(request): Json<AnalysisRequest>,
) -> Result<Json<EmergencyMetrics>, ApiError> {
    match state.vision.analyze(&request).await {
        Ok(metrics) => Ok(Json(metrics)),
        Err(ClientError::BadStatus { status, body }) => Err(ApiError::upstream(
            status,
            format!("Vision service error: {body}"),
        )),
        Err(e @ (ClientError::Timeout(_) | ClientError::Unreachable(_))) => Err(
            ApiError::unavailable(format!("Vision service unavailable: {e}")),
        ),
        Err(e) => Err(ApiError::internal(e.to_string())),
    }
}

/// POST /analyze/video-emergency - upload a video and start a session
pub async fn analyze_video(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let mut video_bytes = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Malformed multipart body: {e}")))?
    {
        if field.name() == Some("file") {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request(format!("Failed to read upload: {e}")))?;
            video_bytes = Some(bytes);
            break;
        }
    }

    let video_bytes =
        video_bytes.ok_or_else(|| ApiError::bad_request("Missing multipart field 'file'"))?;
    if video_bytes.is_empty() {
        return Err(ApiError::bad_request("Uploaded file is empty"));
    }

    let session_id = pipeline::start_session(&state, &video_bytes)
        .map_err(|e| ApiError::internal(e.to_string()))?;

    Ok(Json(json!({
        "session_id": session_id,
        "status": "processing",
    })))
}

// ============================================================================
// SSE stream
// ============================================================================

/// GET /stream/video/{session_id} - drain a session's event stream
pub async fn stream_video(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let session_id = Uuid::parse_str(&session_id)
        .map_err(|_| ApiError::not_found("Session not found"))?;

    let receiver = state.registry.subscribe(session_id).map_err(|e| match e {
        SessionError::NotFound => ApiError::not_found("Session not found"),
        SessionError::AlreadySubscribed => {
            ApiError::conflict("Session already has a subscriber")
        }
        SessionError::AlreadyRegistered => ApiError::internal(e.to_string()),
    })?;

    // Yield events until the terminal `end` (or until the pipeline drops
    // the channel); the consumer hanging up never stalls the pipeline.
    let stream = futures::stream::unfold(Some(receiver), |receiver| async move {
        let mut receiver = receiver?;
        let event: SessionEvent = receiver.recv().await?;
        let sse = event.to_sse();
        let next = if event.is_end() { None } else { Some(receiver) };
        Some((Ok(sse), next))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
