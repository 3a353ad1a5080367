//! Shared data structures for the emergency video analysis pipeline
//!
//! This module defines the core types flowing through the orchestrator:
//! - Frame extraction: `Frame`, `VideoInfo`
//! - Vision analysis: `AnalysisRequest`, `EmergencyMetrics`, `UrgencyLevel`, `Hazard`
//! - Agent dispatch: `DispatchRequest`, `ToolInvocation`, `ServiceType`
//! - XAI attribution: `XaiResult`, `XaiCell`

use serde::{Deserialize, Serialize};

// ============================================================================
// Urgency
// ============================================================================

/// Urgency classification for a single analyzed frame.
///
/// `Critical` is an internal-only level: dispatch policy may act on it, but
/// every event published to consumers maps it to `High` first
/// (see [`crate::analysis::severity::public_urgency`]).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "lowercase")]
pub enum UrgencyLevel {
    #[default]
    Low,
    Normal,
    Medium,
    High,
    Critical,
}

impl UrgencyLevel {
    /// Ordering used to pick the dominant label across frames.
    pub fn priority(&self) -> u8 {
        match self {
            UrgencyLevel::Low => 0,
            UrgencyLevel::Normal => 1,
            UrgencyLevel::Medium => 2,
            UrgencyLevel::High => 3,
            UrgencyLevel::Critical => 4,
        }
    }

    /// The four levels that may appear on the wire, in priority order.
    pub const PUBLIC: [UrgencyLevel; 4] = [
        UrgencyLevel::Low,
        UrgencyLevel::Normal,
        UrgencyLevel::Medium,
        UrgencyLevel::High,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UrgencyLevel::Low => "low",
            UrgencyLevel::Normal => "normal",
            UrgencyLevel::Medium => "medium",
            UrgencyLevel::High => "high",
            UrgencyLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for UrgencyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Hazards
// ============================================================================

/// Hazard detected in a frame.
///
/// The eight named variants are the ones the hazard parser produces.
/// `Other` keeps the wire contract open: a remote analyzer that hosts its
/// own parser may report hazards outside the core set, which carry the
/// default severity weight.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Hazard {
    Fire,
    Smoke,
    Water,
    StructuralDamage,
    Gas,
    MedicalEmergency,
    Violence,
    BlockedExit,
    #[serde(untagged)]
    Other(String),
}

impl Hazard {
    /// Contribution of this hazard to the severity index.
    pub fn weight(&self) -> f64 {
        match self {
            Hazard::Fire => 3.0,
            Hazard::MedicalEmergency => 3.0,
            Hazard::Violence => 2.5,
            Hazard::Smoke => 2.0,
            Hazard::StructuralDamage => 2.0,
            Hazard::Gas => 2.0,
            Hazard::Water => 1.2,
            Hazard::BlockedExit => 1.0,
            Hazard::Other(_) => 0.8,
        }
    }

    /// Hazards that force a critical urgency assessment on their own.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Hazard::Fire | Hazard::Violence | Hazard::MedicalEmergency
        )
    }
}

impl std::fmt::Display for Hazard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Hazard::Fire => write!(f, "fire"),
            Hazard::Smoke => write!(f, "smoke"),
            Hazard::Water => write!(f, "water"),
            Hazard::StructuralDamage => write!(f, "structural_damage"),
            Hazard::Gas => write!(f, "gas"),
            Hazard::MedicalEmergency => write!(f, "medical_emergency"),
            Hazard::Violence => write!(f, "violence"),
            Hazard::BlockedExit => write!(f, "blocked_exit"),
            Hazard::Other(name) => write!(f, "{}", name),
        }
    }
}

// ============================================================================
// Frames
// ============================================================================

/// A sampled still frame from an uploaded video.
///
/// `frame_number` is the index in the *source* stream, not the extraction
/// count, so two extractions with different sampling intervals stay
/// comparable. `image_base64` carries a `data:image/jpeg;base64,` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub frame_number: u64,
    pub timestamp: String,
    pub timestamp_seconds: f64,
    pub image_base64: String,
}

/// Container metadata reported by the probe pass and echoed verbatim in
/// the `complete` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoInfo {
    pub fps: f64,
    pub total_frames: u64,
    pub duration_seconds: f64,
    pub width: u32,
    pub height: u32,
    pub duration_formatted: String,
}

/// Format a second offset as a zero-padded `hh:mm:ss` clock string.
pub fn format_timestamp(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    };
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

// ============================================================================
// Vision analysis
// ============================================================================

/// Request body for the vision analyzer (`POST /analyze`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub image_base64: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub frame_number: u64,
}

/// Structured emergency assessment for a single frame.
///
/// Produced either by the local hazard parser or by a vision service that
/// hosts the parser itself; the two are interchangeable by contract.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmergencyMetrics {
    pub timestamp: String,
    pub frame_number: u64,
    pub scene_description: String,
    pub urgency_level: UrgencyLevel,
    pub urgency_score: f64,
    #[serde(default)]
    pub detected_hazards: Vec<Hazard>,
    #[serde(default)]
    pub people_count: Option<u32>,
    #[serde(default)]
    pub visible_injuries: bool,
    #[serde(default)]
    pub environmental_conditions: String,
    #[serde(default)]
    pub accessibility_issues: Vec<String>,
    #[serde(default)]
    pub recommended_action: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub raw_response: String,
}

impl EmergencyMetrics {
    pub fn has_hazard(&self, hazard: &Hazard) -> bool {
        self.detected_hazards.contains(hazard)
    }

    pub fn has_critical_hazard(&self) -> bool {
        self.detected_hazards.iter().any(Hazard::is_critical)
    }
}

// ============================================================================
// XAI attribution
// ============================================================================

/// Importance score for one cell of the attribution grid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct XaiCell {
    pub row: u32,
    pub col: u32,
    pub score: f64,
    #[serde(default)]
    pub summary: String,
}

/// Heatmap attribution for one frame, as returned by the XAI service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct XaiResult {
    #[serde(default)]
    pub frame_number: u64,
    #[serde(default)]
    pub timestamp: String,
    pub grid_size: u32,
    #[serde(default)]
    pub cells: Vec<XaiCell>,
    #[serde(default)]
    pub max_score: f64,
    #[serde(default)]
    pub heatmap_image_base64: String,
    #[serde(default)]
    pub explanation: String,
}

// ============================================================================
// Agent dispatch
// ============================================================================

/// Payload sent to the agent executor when a session escalates.
///
/// This is the only place a raw (possibly `critical`) urgency level leaves
/// the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub urgency_score: f64,
    pub urgency_level: UrgencyLevel,
    pub scene_description: String,
    pub detected_hazards: Vec<Hazard>,
    pub people_count: Option<u32>,
    pub visible_injuries: bool,
    pub timestamp: String,
    pub frame_number: u64,
    pub severity_index: f64,
}

/// Emergency service targeted by a tool invocation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Fire,
    Police,
    Samu,
    Sms,
    Redirect,
}

impl ServiceType {
    /// Human-readable label shown on dispatch dashboards.
    pub fn label(&self) -> &'static str {
        match self {
            ServiceType::Fire => "Fire Department",
            ServiceType::Police => "Police Department",
            ServiceType::Samu => "Ambulance / EMS",
            ServiceType::Sms => "SMS Dispatch",
            ServiceType::Redirect => "Chat Redirect",
        }
    }
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Tools the agent executor is allowed to invoke.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    CallAuthorities,
    PhoneCallTool,
    PhoneSmsTool,
    RedirectToChatTool,
    FallbackVirtualCall,
}

/// Delivery state of a dispatched action.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DispatchStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

/// Delivery channel a tool result travels through.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    #[default]
    FrontendQueue,
    FrontendRedirect,
}

/// One canonicalized action produced by the agent adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool: ToolKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<ServiceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urgency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub situation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub call_id: String,
    #[serde(default)]
    pub channel: Channel,
    #[serde(default)]
    pub requires_manual_dispatch: bool,
    #[serde(default)]
    pub dispatch_status: DispatchStatus,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_arrival: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefill_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<bool>,
    #[serde(default)]
    pub tool_input: serde_json::Value,
    #[serde(default)]
    pub tool_output: serde_json::Value,
}

// ============================================================================
// Tests
// ============================================================================
