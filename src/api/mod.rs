//! REST + SSE API using Axum
//!
//! Endpoints for the emergency-operations dashboard:
//! - `POST /analyze/video-emergency` - upload a video, start a session
//! - `GET /stream/video/{session_id}` - live SSE feed for one session
//! - `POST /analyze/frame` - synchronous single-frame proxy
//! - `GET /health`, `GET /phone/status`, `POST /phone/update_ip`

pub mod handlers;
mod routes;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Upload cap for incident clips.
const MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

/// Create the complete application router.
pub fn create_app(state: AppState) -> Router {
    // CORS is permissive: dashboards are served from other origins.
    Router::new()
        .merge(routes::api_routes(state))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// API error type for consistent error responses
#[derive(Debug)]
pub struct ApiError {
    pub status: axum::http::StatusCode,
    pub message: String,
    pub code: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: axum::http::StatusCode::BAD_REQUEST,
            message: message.into(),
            code: "BAD_REQUEST".to_string(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: axum::http::StatusCode::NOT_FOUND,
            message: message.into(),
            code: "NOT_FOUND".to_string(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self {
            status: axum::http::StatusCode::CONFLICT,
            message: message.into(),
            code: "CONFLICT".to_string(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            code: "INTERNAL".to_string(),
        }
    }

    pub fn upstream(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: axum::http::StatusCode::from_u16(status)
                .unwrap_or(axum::http::StatusCode::BAD_GATEWAY),
            message: message.into(),
            code: "UPSTREAM".to_string(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            status: axum::http::StatusCode::SERVICE_UNAVAILABLE,
            message: message.into(),
            code: "UNAVAILABLE".to_string(),
        }
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({
            "error": {
                "code": self.code,
                "message": self.message,
            }
        });

        (self.status, axum::Json(body)).into_response()
    }
}
