//! Canonicalizes raw agent tool calls into `ToolInvocation` records
//!
//! The agent executor returns `output` text plus a list of
//! `(action, output_text)` intermediate steps. Each recognized tool maps
//! to a canonical invocation; unrecognized or malformed steps are skipped
//! with a warning. Field resolution order: the tool's JSON output, then
//! the tool input, then synthesized defaults.

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::types::{
    Channel, DispatchRequest, DispatchStatus, Hazard, ServiceType, ToolInvocation, ToolKind,
};

/// SMS alerts are branded so receivers can tell automated traffic apart.
const SMS_PREFIX: &str = "Sent by Monkedh:";

// ============================================================================
// Trace wire format
// ============================================================================

/// Raw result of an agent executor run.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentTrace {
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub intermediate_steps: Vec<TraceStep>,
}

/// One `(action, output_text)` pair from the executor's scratchpad.
#[derive(Debug, Clone, Deserialize)]
pub struct TraceStep(pub TraceAction, pub String);

#[derive(Debug, Clone, Deserialize)]
pub struct TraceAction {
    pub tool: String,
    #[serde(default)]
    pub tool_input: Value,
}

// ============================================================================
// Service normalization
// ============================================================================

const SERVICE_ALIASES: &[(&str, ServiceType)] = &[
    ("fire", ServiceType::Fire),
    ("fire dept", ServiceType::Fire),
    ("fire department", ServiceType::Fire),
    ("firefighters", ServiceType::Fire),
    ("flames", ServiceType::Fire),
    ("smoke", ServiceType::Fire),
    ("explosion", ServiceType::Fire),
    ("police", ServiceType::Police),
    ("police department", ServiceType::Police),
    ("law enforcement", ServiceType::Police),
    ("security", ServiceType::Police),
    ("sheriff", ServiceType::Police),
    ("911", ServiceType::Samu),
    ("medical", ServiceType::Samu),
    ("medical emergency", ServiceType::Samu),
    ("ambulance", ServiceType::Samu),
    ("ambulance/ems", ServiceType::Samu),
    ("ems", ServiceType::Samu),
    ("paramedics", ServiceType::Samu),
    ("injury", ServiceType::Samu),
    ("samu", ServiceType::Samu),
];

const FIRE_TOKENS: &[&str] = &["fire", "flame", "smoke", "explosion", "burn", "incendie"];
const MEDICAL_TOKENS: &[&str] = &[
    "medical",
    "injury",
    "bleeding",
    "victim",
    "heart",
    "respiration",
    "samu",
    "ambulance",
];
const POLICE_TOKENS: &[&str] = &[
    "weapon", "assault", "violence", "police", "attack", "threat", "agression", "kidnap",
];

/// Normalize a free-text service name to its canonical emergency service.
///
/// Unknown names fall back to SAMU: a misrouted medical call is the least
/// harmful default.
pub fn normalize_service(raw: &str) -> ServiceType {
    let key = raw
        .trim()
        .to_lowercase()
        .replace(['-', '_'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    if let Some((_, service)) = SERVICE_ALIASES.iter().find(|(alias, _)| *alias == key) {
        return *service;
    }
    if key.contains("fire") || key.contains("flame") || key.contains("smoke") {
        return ServiceType::Fire;
    }
    if ["police", "law", "security", "sheriff", "officer"]
        .iter()
        .any(|token| key.contains(token))
    {
        return ServiceType::Police;
    }
    ServiceType::Samu
}

// ============================================================================
// Trace parsing
// ============================================================================

/// Parse an agent trace into canonical invocations plus the raw
/// `actions_taken` echoes for the event stream.
pub fn parse_trace(trace: &AgentTrace) -> (Vec<ToolInvocation>, Vec<Value>) {
    let mut emergency_calls = Vec::new();
    let mut actions_taken = Vec::new();

    for TraceStep(action, output) in &trace.intermediate_steps {
        actions_taken.push(serde_json::json!({
            "tool": action.tool,
            "input": action.tool_input,
            "output": output,
        }));

        let parsed = serde_json::from_str::<Value>(output).unwrap_or(Value::Null);

        let invocation = match action.tool.as_str() {
            "call_authorities" => Some(call_authorities(action, &parsed)),
            "phone_call_tool" => phone_call(action, &parsed),
            "phone_sms_tool" => phone_sms(action, &parsed),
            "redirect_to_chat_tool" => Some(redirect_to_chat(action, &parsed)),
            other => {
                warn!(tool = other, "Skipping unrecognized agent tool");
                None
            }
        };

        if let Some(invocation) = invocation {
            emergency_calls.push(invocation);
        }
    }

    (emergency_calls, actions_taken)
}

fn call_authorities(action: &TraceAction, parsed: &Value) -> ToolInvocation {
    let requested = str_field(parsed, "service_type")
        .or_else(|| str_field(&action.tool_input, "service_type"))
        .unwrap_or_default();
    let service = normalize_service(&requested);
    let situation = str_field(parsed, "situation")
        .or_else(|| str_field(&action.tool_input, "situation_description"));
    let timestamp = str_field(parsed, "timestamp").unwrap_or_else(clock);

    ToolInvocation {
        tool: ToolKind::CallAuthorities,
        service_type: Some(service),
        service_label: Some(
            str_field(parsed, "service").unwrap_or_else(|| service.label().to_string()),
        ),
        urgency: str_field(parsed, "urgency")
            .or_else(|| str_field(&action.tool_input, "urgency_level")),
        message: str_field(parsed, "message").or_else(|| situation.clone()),
        situation,
        call_id: str_field(parsed, "call_id")
            .unwrap_or_else(|| format!("EMERG-{}", compact_clock(&timestamp))),
        timestamp,
        channel: Channel::FrontendQueue,
        requires_manual_dispatch: bool_field(parsed, "requires_manual_dispatch").unwrap_or(true),
        dispatch_status: DispatchStatus::Pending,
        status: str_field(parsed, "status").unwrap_or_else(|| "queued".to_string()),
        estimated_arrival: str_field(parsed, "estimated_arrival"),
        destination: None,
        priority: None,
        confirmation_prompt: None,
        prefill_message: None,
        fallback: None,
        tool_input: action.tool_input.clone(),
        tool_output: parsed.clone(),
    }
}

fn phone_call(action: &TraceAction, parsed: &Value) -> Option<ToolInvocation> {
    let hazard = str_field(parsed, "hazard_type")
        .or_else(|| str_field(&action.tool_input, "hazard_type"))
        .unwrap_or_default()
        .trim()
        .to_lowercase();
    if hazard != "fire" && hazard != "medical" {
        warn!(
            hazard = hazard.as_str(),
            "Rejecting phone_call_tool: only fire or medical hazards may place real calls"
        );
        return None;
    }

    let requested = str_field(parsed, "service_type")
        .or_else(|| str_field(&action.tool_input, "service"))
        .unwrap_or_default();
    let service = normalize_service(&requested);
    let situation = str_field(parsed, "situation_summary")
        .or_else(|| str_field(&action.tool_input, "situation_summary"));
    let timestamp = str_field(parsed, "timestamp").unwrap_or_else(clock);

    Some(ToolInvocation {
        tool: ToolKind::PhoneCallTool,
        service_type: Some(service),
        service_label: Some(
            str_field(parsed, "service_label").unwrap_or_else(|| service.label().to_string()),
        ),
        urgency: str_field(parsed, "urgency"),
        message: str_field(parsed, "message").or_else(|| situation.clone()),
        situation,
        call_id: str_field(parsed, "call_id")
            .unwrap_or_else(|| format!("CALL-{}", compact_clock(&timestamp))),
        timestamp,
        channel: Channel::FrontendQueue,
        requires_manual_dispatch: false,
        dispatch_status: DispatchStatus::Completed,
        status: str_field(parsed, "status").unwrap_or_else(|| "completed".to_string()),
        estimated_arrival: str_field(parsed, "estimated_arrival"),
        destination: None,
        priority: None,
        confirmation_prompt: None,
        prefill_message: None,
        fallback: None,
        tool_input: action.tool_input.clone(),
        tool_output: parsed.clone(),
    })
}

fn phone_sms(action: &TraceAction, parsed: &Value) -> Option<ToolInvocation> {
    let raw_message = str_field(parsed, "message")
        .or_else(|| str_field(&action.tool_input, "message"))
        .unwrap_or_default();
    if raw_message.trim().is_empty() {
        warn!("Rejecting phone_sms_tool: empty message");
        return None;
    }

    let message = brand_sms(&raw_message);
    let timestamp = str_field(parsed, "timestamp").unwrap_or_else(clock);

    Some(ToolInvocation {
        tool: ToolKind::PhoneSmsTool,
        service_type: Some(ServiceType::Sms),
        service_label: Some(ServiceType::Sms.label().to_string()),
        urgency: str_field(parsed, "priority")
            .or_else(|| str_field(&action.tool_input, "priority")),
        situation: Some(message.clone()),
        message: Some(message),
        call_id: str_field(parsed, "call_id")
            .unwrap_or_else(|| format!("SMS-{}", compact_clock(&timestamp))),
        timestamp,
        channel: Channel::FrontendQueue,
        requires_manual_dispatch: false,
        dispatch_status: DispatchStatus::Completed,
        status: str_field(parsed, "status").unwrap_or_else(|| "completed".to_string()),
        estimated_arrival: None,
        destination: None,
        priority: None,
        confirmation_prompt: None,
        prefill_message: None,
        fallback: None,
        tool_input: action.tool_input.clone(),
        tool_output: parsed.clone(),
    })
}

fn redirect_to_chat(action: &TraceAction, parsed: &Value) -> ToolInvocation {
    let message = str_field(parsed, "message")
        .or_else(|| str_field(&action.tool_input, "message"));
    let timestamp = str_field(parsed, "timestamp").unwrap_or_else(clock);

    ToolInvocation {
        tool: ToolKind::RedirectToChatTool,
        service_type: Some(ServiceType::Redirect),
        service_label: Some(ServiceType::Redirect.label().to_string()),
        urgency: None,
        situation: message.clone(),
        message,
        call_id: str_field(parsed, "call_id")
            .unwrap_or_else(|| format!("REDIRECT-{}", compact_clock(&timestamp))),
        timestamp,
        channel: Channel::FrontendRedirect,
        requires_manual_dispatch: false,
        dispatch_status: DispatchStatus::Pending,
        status: str_field(parsed, "status").unwrap_or_else(|| "pending".to_string()),
        estimated_arrival: None,
        destination: Some(
            str_field(parsed, "destination").unwrap_or_else(|| "/chat".to_string()),
        ),
        priority: Some(
            str_field(parsed, "priority").unwrap_or_else(|| "critical".to_string()),
        ),
        confirmation_prompt: str_field(parsed, "confirmation_prompt"),
        prefill_message: str_field(parsed, "prefill_message"),
        fallback: None,
        tool_input: action.tool_input.clone(),
        tool_output: parsed.clone(),
    }
}

// ============================================================================
// Fallback inference
// ============================================================================

/// Synthesize a single virtual call when the agent made no tool calls.
///
/// The target service is inferred from the dispatched assessment so the
/// operations dashboard always receives at least one actionable entry.
pub fn fallback_invocation(request: &DispatchRequest) -> ToolInvocation {
    let service = infer_service(request);
    let timestamp = clock();

    ToolInvocation {
        tool: ToolKind::FallbackVirtualCall,
        service_type: Some(service),
        service_label: Some(service.label().to_string()),
        urgency: Some(request.urgency_level.to_string()),
        situation: Some(request.scene_description.clone()),
        message: Some(request.scene_description.clone()),
        timestamp,
        call_id: format!("FALLBACK-{}", request.frame_number),
        channel: Channel::FrontendQueue,
        requires_manual_dispatch: true,
        dispatch_status: DispatchStatus::Pending,
        status: "queued".to_string(),
        estimated_arrival: None,
        destination: None,
        priority: None,
        confirmation_prompt: None,
        prefill_message: None,
        fallback: Some(true),
        tool_input: Value::Object(serde_json::Map::new()),
        tool_output: Value::Object(serde_json::Map::new()),
    }
}

fn infer_service(request: &DispatchRequest) -> ServiceType {
    let text = format!(
        "{} {}",
        request.scene_description,
        request
            .detected_hazards
            .iter()
            .map(Hazard::to_string)
            .collect::<Vec<_>>()
            .join(" ")
    )
    .to_lowercase();

    if FIRE_TOKENS.iter().any(|token| text.contains(token)) {
        return ServiceType::Fire;
    }
    if request.visible_injuries || request.people_count.is_some_and(|count| count > 0) {
        return ServiceType::Samu;
    }
    if POLICE_TOKENS.iter().any(|token| text.contains(token)) {
        return ServiceType::Police;
    }
    if MEDICAL_TOKENS.iter().any(|token| text.contains(token)) {
        return ServiceType::Samu;
    }
    ServiceType::Samu
}

// ============================================================================
// Helpers
// ============================================================================

fn brand_sms(message: &str) -> String {
    // Keep the first three phrases so SMS alerts stay short.
    let summary = message
        .split(['.', '!', '?'])
        .map(str::trim)
        .filter(|phrase| !phrase.is_empty())
        .take(3)
        .collect::<Vec<_>>()
        .join(". ");
    let text: &str = if summary.is_empty() {
        message.trim()
    } else {
        summary.as_str()
    };

    if text.to_lowercase().starts_with(&SMS_PREFIX.to_lowercase()) {
        text.to_string()
    } else {
        format!("{SMS_PREFIX} {text}")
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn bool_field(value: &Value, key: &str) -> Option<bool> {
    value.get(key).and_then(Value::as_bool)
}

fn clock() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

fn compact_clock(timestamp: &str) -> String {
    timestamp
        .chars()
        .map(|c| if c == ' ' { '-' } else { c })
        .filter(|c| *c != ':')
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UrgencyLevel;

    fn step(tool: &str, input: Value, output: Value) -> TraceStep {
        TraceStep(
            TraceAction {
                tool: tool.to_string(),
                tool_input: input,
            },
            output.to_string(),
        )
    }

    fn dispatch_request(description: &str, hazards: Vec<Hazard>) -> DispatchRequest {
        DispatchRequest {
            urgency_score: 9.5,
            urgency_level: UrgencyLevel::Critical,
            scene_description: description.to_string(),
            detected_hazards: hazards,
            people_count: None,
            visible_injuries: false,
            timestamp: "00:00:12".to_string(),
            frame_number: 12,
            severity_index: 8.0,
        }
    }

    #[test]
    fn service_aliases_normalize() {
        assert_eq!(normalize_service("Fire Dept"), ServiceType::Fire);
        assert_eq!(normalize_service("fire_department"), ServiceType::Fire);
        assert_eq!(normalize_service("law enforcement"), ServiceType::Police);
        assert_eq!(normalize_service("911"), ServiceType::Samu);
        assert_eq!(normalize_service("Paramedics"), ServiceType::Samu);
        assert_eq!(normalize_service("completely unknown"), ServiceType::Samu);
        assert_eq!(normalize_service("officer on scene"), ServiceType::Police);
    }

    #[test]
    fn call_authorities_is_manual_pending() {
        let trace = AgentTrace {
            output: "Dispatched".to_string(),
            intermediate_steps: vec![step(
                "call_authorities",
                serde_json::json!({"service_type": "fire", "urgency_level": "critical"}),
                serde_json::json!({
                    "service_type": "fire",
                    "service": "Fire Department",
                    "urgency": "critical",
                    "situation": "Warehouse fire",
                    "timestamp": "2024-05-01 10:00:00",
                    "call_id": "EMERG-1",
                    "estimated_arrival": "5-10 minutes",
                    "status": "success",
                }),
            )],
        };

        let (calls, actions) = parse_trace(&trace);
        assert_eq!(calls.len(), 1);
        assert_eq!(actions.len(), 1);
        let call = &calls[0];
        assert_eq!(call.tool, ToolKind::CallAuthorities);
        assert_eq!(call.service_type, Some(ServiceType::Fire));
        assert!(call.requires_manual_dispatch);
        assert_eq!(call.dispatch_status, DispatchStatus::Pending);
        assert_eq!(call.channel, Channel::FrontendQueue);
        assert_eq!(call.estimated_arrival.as_deref(), Some("5-10 minutes"));
    }

    #[test]
    fn phone_call_rejects_non_fire_medical_hazards() {
        let trace = AgentTrace {
            output: String::new(),
            intermediate_steps: vec![step(
                "phone_call_tool",
                serde_json::json!({"service": "POLICE", "hazard_type": "violence"}),
                serde_json::json!({"hazard_type": "violence"}),
            )],
        };
        let (calls, actions) = parse_trace(&trace);
        assert!(calls.is_empty());
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn phone_call_accepts_medical_hazard() {
        let trace = AgentTrace {
            output: String::new(),
            intermediate_steps: vec![step(
                "phone_call_tool",
                serde_json::json!({
                    "service": "SAMU",
                    "hazard_type": "medical",
                    "situation_summary": "Unconscious driver",
                }),
                serde_json::json!({
                    "service_type": "SAMU",
                    "hazard_type": "medical",
                    "situation_summary": "Unconscious driver",
                }),
            )],
        };
        let (calls, _) = parse_trace(&trace);
        assert_eq!(calls.len(), 1);
        let call = &calls[0];
        assert_eq!(call.service_type, Some(ServiceType::Samu));
        assert!(!call.requires_manual_dispatch);
        assert_eq!(call.dispatch_status, DispatchStatus::Completed);
        assert!(call.call_id.starts_with("CALL-"));
    }

    #[test]
    fn sms_gets_branded_prefix() {
        let trace = AgentTrace {
            output: String::new(),
            intermediate_steps: vec![step(
                "phone_sms_tool",
                serde_json::json!({"message": "Fire confirmed at the warehouse. Crews alerted. Stay clear. Fourth phrase dropped."}),
                Value::Null,
            )],
        };
        let (calls, _) = parse_trace(&trace);
        assert_eq!(calls.len(), 1);
        let message = calls[0].message.as_deref().unwrap();
        assert!(message.starts_with("Sent by Monkedh:"), "{message}");
        assert!(!message.contains("Fourth phrase"));
    }

    #[test]
    fn sms_existing_prefix_not_duplicated() {
        let trace = AgentTrace {
            output: String::new(),
            intermediate_steps: vec![step(
                "phone_sms_tool",
                serde_json::json!({"message": "Sent by Monkedh: all clear"}),
                Value::Null,
            )],
        };
        let (calls, _) = parse_trace(&trace);
        let message = calls[0].message.as_deref().unwrap();
        assert_eq!(message.matches("Sent by Monkedh").count(), 1);
    }

    #[test]
    fn empty_sms_is_rejected() {
        let trace = AgentTrace {
            output: String::new(),
            intermediate_steps: vec![step(
                "phone_sms_tool",
                serde_json::json!({"message": "   "}),
                Value::Null,
            )],
        };
        let (calls, _) = parse_trace(&trace);
        assert!(calls.is_empty());
    }

    #[test]
    fn redirect_targets_chat_with_critical_priority() {
        let trace = AgentTrace {
            output: String::new(),
            intermediate_steps: vec![step(
                "redirect_to_chat_tool",
                serde_json::json!({"message": "Switch to guided chat"}),
                serde_json::json!({"message": "Switch to guided chat", "destination": "/chat"}),
            )],
        };
        let (calls, _) = parse_trace(&trace);
        assert_eq!(calls.len(), 1);
        let call = &calls[0];
        assert_eq!(call.tool, ToolKind::RedirectToChatTool);
        assert_eq!(call.destination.as_deref(), Some("/chat"));
        assert_eq!(call.priority.as_deref(), Some("critical"));
        assert_eq!(call.channel, Channel::FrontendRedirect);
        assert_eq!(call.dispatch_status, DispatchStatus::Pending);
    }

    #[test]
    fn unknown_tools_are_skipped() {
        let trace = AgentTrace {
            output: String::new(),
            intermediate_steps: vec![step("launch_confetti", Value::Null, Value::Null)],
        };
        let (calls, actions) = parse_trace(&trace);
        assert!(calls.is_empty());
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn fallback_prefers_fire_tokens() {
        let request = dispatch_request("Flames engulf the building", vec![Hazard::Fire]);
        let call = fallback_invocation(&request);
        assert_eq!(call.tool, ToolKind::FallbackVirtualCall);
        assert_eq!(call.service_type, Some(ServiceType::Fire));
        assert_eq!(call.call_id, "FALLBACK-12");
        assert_eq!(call.fallback, Some(true));
        assert!(call.requires_manual_dispatch);
    }

    #[test]
    fn fallback_injuries_route_to_samu() {
        let mut request = dispatch_request("Crowd gathered on the plaza", vec![]);
        request.visible_injuries = true;
        assert_eq!(
            fallback_invocation(&request).service_type,
            Some(ServiceType::Samu)
        );
    }

    #[test]
    fn fallback_violence_routes_to_police() {
        let request = dispatch_request("An assault in progress", vec![Hazard::Violence]);
        assert_eq!(
            fallback_invocation(&request).service_type,
            Some(ServiceType::Police)
        );
    }

    #[test]
    fn fallback_default_is_samu() {
        let request = dispatch_request("Unclear situation", vec![]);
        assert_eq!(
            fallback_invocation(&request).service_type,
            Some(ServiceType::Samu)
        );
    }
}
