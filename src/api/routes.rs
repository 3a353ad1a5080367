//! API route definitions
//!
//! The orchestrator keeps the upstream contract's flat paths:
//! - / and /health - banners and aggregate health
//! - /phone/* - phone bridge status and reconfiguration
//! - /analyze/* - single-frame proxy and video session start
//! - /stream/video/:session_id - per-session SSE feed

use axum::routing::{get, post};
use axum::Router;

use super::handlers;
use crate::state::AppState;

/// Create all orchestrator routes.
pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        // Phone bridge
        .route("/phone/status", get(handlers::phone_status))
        .route("/phone/update_ip", post(handlers::update_phone_ip))
        // Analysis
        .route("/analyze/frame", post(handlers::analyze_frame))
        .route("/analyze/video-emergency", post(handlers::analyze_video))
        // Session event stream
        .route("/stream/video/:session_id", get(handlers::stream_video))
        .with_state(state)
}
