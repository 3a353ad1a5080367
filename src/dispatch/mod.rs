//! Agent dispatch: trace canonicalization
//!
//! The agent executor is an external tool-calling LLM service. Its raw
//! tool-invocation trace is parsed here into the canonical
//! [`ToolInvocation`] records that travel on the event stream, including
//! the synthetic fallback call used when the agent produced no tool calls.
//!
//! [`ToolInvocation`]: crate::types::ToolInvocation

pub mod adapter;

pub use adapter::{fallback_invocation, normalize_service, parse_trace, AgentTrace};
