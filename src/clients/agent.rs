//! Agent executor client
//!
//! Escalates a selected frame to the tool-using emergency dispatcher. The
//! executor may answer in either of two shapes: a pre-parsed response with
//! `emergency_calls` already canonicalized, or a raw tool-invocation trace
//! (`output` + `intermediate_steps`) that is run through the adapter here.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use super::vision::probe_health;
use super::{build_http_client, ClientError};
use crate::dispatch::adapter::{parse_trace, AgentTrace};
use crate::types::{DispatchRequest, ToolInvocation};

/// Canonicalized result of one agent run.
#[derive(Debug, Clone, Default)]
pub struct AgentOutcome {
    pub agent_response: String,
    pub emergency_calls: Vec<ToolInvocation>,
    pub actions_taken: Vec<Value>,
}

#[derive(Clone)]
pub struct AgentClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

/// Pre-parsed wire shape (the executor hosts its own adapter).
#[derive(Debug, Deserialize)]
struct ParsedReply {
    #[serde(default)]
    agent_response: String,
    emergency_calls: Vec<ToolInvocation>,
    #[serde(default)]
    actions_taken: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AgentReply {
    Parsed(ParsedReply),
    Trace(AgentTrace),
}

impl AgentClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        Ok(Self {
            http: build_http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    /// Run the agent against a dispatched assessment.
    pub async fn analyze(&self, request: &DispatchRequest) -> Result<AgentOutcome, ClientError> {
        let response = self
            .http
            .post(format!("{}/analyze", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(|e| ClientError::transport(e, self.timeout))?;

        if !response.status().is_success() {
            return Err(ClientError::from_response(response).await);
        }

        let reply: AgentReply = response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;

        Ok(match reply {
            AgentReply::Parsed(parsed) => AgentOutcome {
                agent_response: parsed.agent_response,
                emergency_calls: parsed.emergency_calls,
                actions_taken: parsed.actions_taken,
            },
            AgentReply::Trace(trace) => {
                let (emergency_calls, actions_taken) = parse_trace(&trace);
                AgentOutcome {
                    agent_response: trace.output,
                    emergency_calls,
                    actions_taken,
                }
            }
        })
    }

    /// Probe the executor's `/health` endpoint (short timeout).
    pub async fn health(&self) -> Result<Value, ClientError> {
        probe_health(&self.http, &self.base_url).await
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolKind;

    #[test]
    fn reply_accepts_parsed_shape() {
        let json = serde_json::json!({
            "success": true,
            "agent_response": "Dispatched fire crews",
            "emergency_calls": [{"tool": "call_authorities", "service_type": "fire"}],
            "actions_taken": [],
        });
        let reply: AgentReply = serde_json::from_value(json).unwrap();
        match reply {
            AgentReply::Parsed(parsed) => {
                assert_eq!(parsed.emergency_calls.len(), 1);
                assert_eq!(parsed.emergency_calls[0].tool, ToolKind::CallAuthorities);
            }
            AgentReply::Trace(_) => panic!("expected parsed shape"),
        }
    }

    #[test]
    fn reply_accepts_raw_trace() {
        let json = serde_json::json!({
            "output": "Calling authorities now",
            "intermediate_steps": [
                [
                    {"tool": "call_authorities", "tool_input": {"service_type": "police"}},
                    "{\"service_type\": \"police\", \"situation\": \"brawl\"}"
                ]
            ],
        });
        let reply: AgentReply = serde_json::from_value(json).unwrap();
        match reply {
            AgentReply::Trace(trace) => {
                let (calls, actions) = parse_trace(&trace);
                assert_eq!(calls.len(), 1);
                assert_eq!(actions.len(), 1);
            }
            AgentReply::Parsed(_) => panic!("expected trace shape"),
        }
    }
}
