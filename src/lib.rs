//! Vigil: Emergency Video Operational Intelligence
//!
//! Orchestrator for near real-time incident video triage.
//!
//! ## Architecture
//!
//! - **Frame Extractor**: lazy sampled decoding of uploaded videos
//! - **Hazard Parser**: deterministic caption → structured assessment
//! - **Severity Policy**: 0-10 severity index and dispatch decisions
//! - **Pipeline**: one sequential task per session, fanning out to the
//!   vision, XAI and agent services and onto a per-session SSE stream
//! - **Phone Monitor**: background liveness view of the phone bridge

pub mod analysis;
pub mod api;
pub mod clients;
pub mod config;
pub mod dispatch;
pub mod extract;
pub mod phone;
pub mod pipeline;
pub mod session;
pub mod state;
pub mod types;

// Re-export the types most callers need
pub use config::AppConfig;
pub use state::AppState;
pub use types::{
    AnalysisRequest, DispatchRequest, EmergencyMetrics, Frame, Hazard, ServiceType,
    ToolInvocation, UrgencyLevel, VideoInfo,
};

// Re-export the analysis entry points
pub use analysis::{dispatch_required, parse_caption, public_urgency, severity_index};

// Re-export session plumbing
pub use session::{SessionEvent, SessionRegistry};
