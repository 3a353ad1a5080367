//! Typed session events and their SSE wire form
//!
//! Every consumer-visible payload is defined here so the wire contract
//! lives in one place. Event names match the SSE `event:` field; payloads
//! serialize exactly as documented for the dashboard.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::{Hazard, ToolInvocation, UrgencyLevel, VideoInfo, XaiResult};

/// Per-frame assessment event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameEvent {
    pub session_id: Uuid,
    pub frame_number: u64,
    pub timestamp: String,
    pub urgency_level: UrgencyLevel,
    pub scene_description: String,
    pub detected_hazards: Vec<Hazard>,
    pub people_count: Option<u32>,
    pub visible_injuries: bool,
    pub dispatch_recommended: bool,
    pub recommended_action: String,
}

/// An incident entry: published when a frame crosses the incident
/// threshold and kept for the final report, where the optional XAI and
/// agent attachments may be filled in later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub timestamp: String,
    pub frame_number: u64,
    pub urgency_level: UrgencyLevel,
    pub scene_description: String,
    pub detected_hazards: Vec<Hazard>,
    pub people_count: Option<u32>,
    pub visible_injuries: bool,
    pub dispatch_recommended: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xai_analysis: Option<XaiResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions_taken: Option<Vec<Value>>,
}

/// Heatmap attribution for the session's qualifying frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XaiHeatmapEvent {
    pub session_id: Uuid,
    pub frame_number: u64,
    pub timestamp: String,
    pub grid_size: u32,
    pub heatmap_image_base64: String,
    pub cells: Vec<crate::types::XaiCell>,
    pub explanation: String,
    pub max_score: f64,
}

/// Agent run result for the session's dispatched frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCallEvent {
    pub session_id: Uuid,
    pub frame_number: u64,
    pub agent_response: String,
    pub emergency_responses: Vec<ToolInvocation>,
    pub actions_taken: Vec<Value>,
    pub tool_calls: Vec<Value>,
}

/// One canonicalized tool invocation, fanned out after `agent_call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallEvent {
    pub session_id: Uuid,
    pub frame_number: u64,
    #[serde(flatten)]
    pub invocation: ToolInvocation,
}

/// Session-level counters for the final report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub total_frames_analyzed: u64,
    pub threat_level: UrgencyLevel,
    pub dominant_urgency_level: UrgencyLevel,
    pub high_urgency_frames: u64,
    pub medium_urgency_frames: u64,
    pub normal_urgency_frames: u64,
    pub low_urgency_frames: u64,
    pub max_severity_index: f64,
    pub average_severity_index: f64,
    pub unique_hazards_detected: Vec<Hazard>,
    pub total_incidents: usize,
    pub requires_immediate_response: bool,
    pub phone_bridge_connected: bool,
    pub phone_bridge_ip: Option<String>,
}

/// One point of the urgency timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelinePoint {
    pub timestamp: String,
    pub frame_number: u64,
    pub urgency_level: UrgencyLevel,
    pub scene_description: String,
    pub detected_hazards: Vec<Hazard>,
}

/// Final aggregate report, emitted exactly once per successful session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionReport {
    pub session_id: Uuid,
    pub video_info: VideoInfo,
    pub analysis_summary: AnalysisSummary,
    pub emergency_responses: Vec<ToolInvocation>,
    pub critical_incidents: Vec<IncidentRecord>,
    pub urgency_timeline: Vec<TimelinePoint>,
    pub xai_analysis: Option<XaiResult>,
    pub xai_enabled: bool,
}

/// Everything a session may put on its event stream.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Frame(FrameEvent),
    Incident(IncidentRecord),
    XaiHeatmap(XaiHeatmapEvent),
    XaiError {
        frame_number: u64,
        timestamp: String,
        detail: String,
    },
    XaiDisabled {
        frame_number: u64,
        timestamp: String,
        reason: String,
    },
    AgentCall(AgentCallEvent),
    ToolCall(ToolCallEvent),
    Complete(Box<CompletionReport>),
    Error {
        detail: String,
    },
    End {
        session_id: Uuid,
    },
}

impl SessionEvent {
    /// SSE `event:` field.
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Frame(_) => "frame",
            SessionEvent::Incident(_) => "incident",
            SessionEvent::XaiHeatmap(_) => "xai_heatmap",
            SessionEvent::XaiError { .. } => "xai_error",
            SessionEvent::XaiDisabled { .. } => "xai_disabled",
            SessionEvent::AgentCall(_) => "agent_call",
            SessionEvent::ToolCall(_) => "tool_call",
            SessionEvent::Complete(_) => "complete",
            SessionEvent::Error { .. } => "error",
            SessionEvent::End { .. } => "end",
        }
    }

    /// SSE `data:` payload.
    pub fn payload(&self) -> Value {
        let serialized = match self {
            SessionEvent::Frame(event) => serde_json::to_value(event),
            SessionEvent::Incident(record) => serde_json::to_value(record),
            SessionEvent::XaiHeatmap(event) => serde_json::to_value(event),
            SessionEvent::XaiError {
                frame_number,
                timestamp,
                detail,
            } => Ok(serde_json::json!({
                "frame_number": frame_number,
                "timestamp": timestamp,
                "detail": detail,
            })),
            SessionEvent::XaiDisabled {
                frame_number,
                timestamp,
                reason,
            } => Ok(serde_json::json!({
                "frame_number": frame_number,
                "timestamp": timestamp,
                "reason": reason,
            })),
            SessionEvent::AgentCall(event) => serde_json::to_value(event),
            SessionEvent::ToolCall(event) => serde_json::to_value(event),
            SessionEvent::Complete(report) => serde_json::to_value(report),
            SessionEvent::Error { detail } => Ok(serde_json::json!({ "detail": detail })),
            SessionEvent::End { session_id } => {
                Ok(serde_json::json!({ "session_id": session_id }))
            }
        };
        serialized.unwrap_or_else(|e| serde_json::json!({ "detail": e.to_string() }))
    }

    /// Whether this event terminates the stream.
    pub fn is_end(&self) -> bool {
        matches!(self, SessionEvent::End { .. })
    }

    /// Render as an axum SSE event.
    pub fn to_sse(&self) -> axum::response::sse::Event {
        let data = self.payload().to_string();
        axum::response::sse::Event::default().event(self.name()).data(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_match_wire_contract() {
        let id = Uuid::new_v4();
        assert_eq!(SessionEvent::Error { detail: String::new() }.name(), "error");
        assert_eq!(SessionEvent::End { session_id: id }.name(), "end");
        assert!(SessionEvent::End { session_id: id }.is_end());
        assert!(!SessionEvent::Error { detail: String::new() }.is_end());
    }

    #[test]
    fn incident_attachments_are_omitted_until_present() {
        let record = IncidentRecord {
            timestamp: "00:00:03".to_string(),
            frame_number: 3,
            urgency_level: UrgencyLevel::High,
            scene_description: "Smoke".to_string(),
            detected_hazards: vec![Hazard::Smoke],
            people_count: None,
            visible_injuries: false,
            dispatch_recommended: false,
            xai_analysis: None,
            agent_response: None,
            actions_taken: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("xai_analysis").is_none());
        assert!(json.get("agent_response").is_none());
    }

    #[test]
    fn tool_call_flattens_invocation_fields() {
        let event = ToolCallEvent {
            session_id: Uuid::new_v4(),
            frame_number: 12,
            invocation: crate::dispatch::adapter::fallback_invocation(
                &crate::types::DispatchRequest {
                    urgency_score: 9.5,
                    urgency_level: UrgencyLevel::Critical,
                    scene_description: "fire".to_string(),
                    detected_hazards: vec![Hazard::Fire],
                    people_count: None,
                    visible_injuries: false,
                    timestamp: "00:00:12".to_string(),
                    frame_number: 12,
                    severity_index: 6.8,
                },
            ),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["tool"], "fallback_virtual_call");
        assert_eq!(json["frame_number"], 12);
        assert_eq!(json["service_type"], "fire");
    }

    #[test]
    fn error_payload_shape() {
        let event = SessionEvent::Error {
            detail: "boom".to_string(),
        };
        assert_eq!(event.payload(), serde_json::json!({"detail": "boom"}));
    }
}
