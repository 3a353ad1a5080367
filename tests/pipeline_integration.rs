//! Pipeline regression tests
//!
//! Drive a full analysis session against in-process mock vision/agent/XAI
//! services bound on ephemeral localhost ports, feeding scripted frames
//! through the `FrameSource` seam. Verifies the event-stream invariants:
//! ordering, terminal discipline, XAI/agent singletons and the absence of
//! `critical` in any published urgency label.

use std::net::SocketAddr;

use async_trait::async_trait;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use uuid::Uuid;

use vigil::extract::FrameSource;
use vigil::pipeline::run_with_source;
use vigil::session::{SessionError, SessionEvent};
use vigil::types::{AnalysisRequest, Frame, VideoInfo};
use vigil::{AppConfig, AppState};

// ============================================================================
// Mock collaborators
// ============================================================================

const CAPTION_BENIGN: &str = "A calm street with pedestrians walking. No danger. 3 people.";
const CAPTION_SMOKE: &str = "Thick smoke drifting across the parking lot.";
const CAPTION_FIRE: &str =
    "Building on fire with people inside. Injured person on the ground, injury: yes. 2 people.";

fn caption_for(frame_number: u64) -> &'static str {
    match frame_number {
        0 => CAPTION_BENIGN,
        30 => CAPTION_SMOKE,
        _ => CAPTION_FIRE,
    }
}

async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock service");
    let addr = listener.local_addr().expect("mock addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}

async fn mock_vision() -> SocketAddr {
    serve(Router::new().route(
        "/analyze",
        post(|Json(request): Json<AnalysisRequest>| async move {
            Json(vigil::parse_caption(
                caption_for(request.frame_number),
                &request.timestamp,
                request.frame_number,
            ))
        }),
    ))
    .await
}

async fn mock_agent() -> SocketAddr {
    serve(Router::new().route(
        "/analyze",
        post(|Json(request): Json<Value>| async move {
            let situation = request["scene_description"].as_str().unwrap_or("incident");
            let call = json!({
                "status": "success",
                "service_type": "fire",
                "urgency": request["urgency_level"],
                "situation": situation,
                "timestamp": "2024-01-01 00:00:00",
                "call_id": "EMERG-TEST-1",
            });
            let sms = json!({
                "status": "completed",
                "message": format!("Sent by Monkedh: {situation}"),
                "timestamp": "2024-01-01 00:00:01",
                "call_id": "SMS-TEST-1",
            });
            let redirect = json!({
                "status": "pending",
                "message": "Switch to guided chat",
                "timestamp": "2024-01-01 00:00:02",
                "call_id": "REDIRECT-TEST-1",
            });
            Json(json!({
                "output": "Dispatched fire crews and alerted bystanders.",
                "intermediate_steps": [
                    [{"tool": "call_authorities", "tool_input": {"service_type": "fire"}}, call.to_string()],
                    [{"tool": "phone_sms_tool", "tool_input": {"message": situation}}, sms.to_string()],
                    [{"tool": "redirect_to_chat_tool", "tool_input": {"message": "Switch to guided chat"}}, redirect.to_string()]
                ]
            }))
        }),
    ))
    .await
}

async fn mock_xai() -> SocketAddr {
    serve(Router::new().route(
        "/analyze",
        post(|Json(request): Json<Value>| async move {
            Json(json!({
                "frame_number": request["frame_number"],
                "timestamp": request["timestamp"],
                "grid_size": request["grid_size"],
                "cells": [{"row": 0, "col": 0, "score": 0.9, "summary": "hot"}],
                "max_score": 0.9,
                "heatmap_image_base64": "data:image/jpeg;base64,",
                "explanation": "(1,1) score=0.90 hot",
            }))
        }),
    ))
    .await
}

async fn test_state(xai_enabled: bool) -> AppState {
    let vision = mock_vision().await;
    let agent = mock_agent().await;
    let xai = mock_xai().await;

    let config = AppConfig {
        vision_url: format!("http://{vision}"),
        agent_url: format!("http://{agent}"),
        xai_url: format!("http://{xai}"),
        xai_enabled,
        ..AppConfig::default()
    };
    AppState::from_config(config).expect("state")
}

// ============================================================================
// Scripted frame source
// ============================================================================

fn video_info(total_frames: u64) -> VideoInfo {
    VideoInfo {
        fps: 30.0,
        total_frames,
        duration_seconds: total_frames as f64 / 30.0,
        width: 640,
        height: 480,
        duration_formatted: "00:00:03".to_string(),
    }
}

struct ScriptedFrames {
    info: VideoInfo,
    frames: std::vec::IntoIter<Frame>,
}

impl ScriptedFrames {
    fn new(frame_numbers: &[u64]) -> Self {
        let frames: Vec<Frame> = frame_numbers
            .iter()
            .map(|&n| Frame {
                frame_number: n,
                timestamp: vigil::types::format_timestamp(n as f64 / 30.0),
                timestamp_seconds: n as f64 / 30.0,
                image_base64: "data:image/jpeg;base64,dGVzdA==".to_string(),
            })
            .collect();
        Self {
            info: video_info(frame_numbers.last().copied().unwrap_or(0) + 30),
            frames: frames.into_iter(),
        }
    }
}

#[async_trait]
impl FrameSource for ScriptedFrames {
    fn info(&self) -> &VideoInfo {
        &self.info
    }

    async fn next_frame(&mut self) -> Option<Frame> {
        self.frames.next()
    }
}

/// A source that never yields; used for cancellation tests.
struct StalledFrames {
    info: VideoInfo,
}

#[async_trait]
impl FrameSource for StalledFrames {
    fn info(&self) -> &VideoInfo {
        &self.info
    }

    async fn next_frame(&mut self) -> Option<Frame> {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        None
    }
}

// ============================================================================
// Helpers
// ============================================================================

async fn run_and_collect(state: &AppState, frames: &[u64]) -> Vec<SessionEvent> {
    let session_id = Uuid::new_v4();
    let cancel = state.registry.register(session_id).expect("register");
    let mut rx = state.registry.subscribe(session_id).expect("subscribe");

    let task_state = state.clone();
    let source = ScriptedFrames::new(frames);
    let task = tokio::spawn(async move {
        run_with_source(task_state, session_id, source, cancel).await;
    });

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        let done = event.is_end();
        events.push(event);
        if done {
            break;
        }
    }
    task.await.expect("pipeline task");
    assert!(
        !state.registry.contains(session_id),
        "session must leave the registry after end"
    );
    events
}

fn names(events: &[SessionEvent]) -> Vec<&'static str> {
    events.iter().map(SessionEvent::name).collect()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn full_session_event_order() {
    let state = test_state(true).await;
    let events = run_and_collect(&state, &[0, 30, 60]).await;
    let names = names(&events);

    assert_eq!(
        names,
        vec![
            "frame",
            "frame",
            "incident",
            "xai_heatmap",
            "frame",
            "incident",
            "agent_call",
            "tool_call",
            "tool_call",
            "tool_call",
            "complete",
            "end",
        ],
        "unexpected event sequence: {names:?}"
    );
}

#[tokio::test]
async fn no_critical_urgency_on_the_wire() {
    let state = test_state(true).await;
    let events = run_and_collect(&state, &[0, 30, 60]).await;

    for event in &events {
        let payload = event.payload();
        match event.name() {
            "frame" | "incident" => {
                assert_ne!(
                    payload["urgency_level"], "critical",
                    "critical leaked in {} event",
                    event.name()
                );
            }
            "complete" => {
                let summary = &payload["analysis_summary"];
                assert_ne!(summary["threat_level"], "critical");
                assert_ne!(summary["dominant_urgency_level"], "critical");
                for incident in payload["critical_incidents"].as_array().unwrap() {
                    assert_ne!(incident["urgency_level"], "critical");
                }
                for point in payload["urgency_timeline"].as_array().unwrap() {
                    assert_ne!(point["urgency_level"], "critical");
                }
            }
            _ => {}
        }
    }
}

#[tokio::test]
async fn completion_report_statistics() {
    let state = test_state(true).await;
    let events = run_and_collect(&state, &[0, 30, 60]).await;

    let complete = events
        .iter()
        .find(|e| e.name() == "complete")
        .expect("complete event")
        .payload();
    let summary = &complete["analysis_summary"];

    assert_eq!(summary["total_frames_analyzed"], 3);
    assert_eq!(summary["high_urgency_frames"], 2);
    assert_eq!(summary["low_urgency_frames"], 1);
    assert_eq!(summary["total_incidents"], 2);
    assert_eq!(summary["threat_level"], "high");
    assert_eq!(summary["requires_immediate_response"], true);
    assert_eq!(summary["max_severity_index"], 10.0);

    let hazards = summary["unique_hazards_detected"].as_array().unwrap();
    for hazard in ["smoke", "fire", "medical_emergency"] {
        assert!(
            hazards.iter().any(|h| h == hazard),
            "missing hazard {hazard} in {hazards:?}"
        );
    }

    assert_eq!(complete["emergency_responses"].as_array().unwrap().len(), 3);
    assert_eq!(complete["xai_enabled"], true);
    assert!(complete["xai_analysis"].is_object());
    assert_eq!(complete["urgency_timeline"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn xai_fires_once_on_first_qualifying_frame() {
    let state = test_state(true).await;
    let events = run_and_collect(&state, &[0, 30, 60]).await;

    let heatmaps: Vec<_> = events.iter().filter(|e| e.name() == "xai_heatmap").collect();
    assert_eq!(heatmaps.len(), 1);
    // First qualifying frame is the smoke incident, not the later fire.
    assert_eq!(heatmaps[0].payload()["frame_number"], 30);

    let heatmap_pos = events.iter().position(|e| e.name() == "xai_heatmap").unwrap();
    let complete_pos = events.iter().position(|e| e.name() == "complete").unwrap();
    assert!(heatmap_pos < complete_pos);
}

#[tokio::test]
async fn xai_disabled_is_announced_once() {
    let state = test_state(false).await;
    let events = run_and_collect(&state, &[0, 30, 60]).await;
    let names = names(&events);

    assert_eq!(
        names.iter().filter(|n| **n == "xai_disabled").count(),
        1,
        "{names:?}"
    );
    assert!(!names.contains(&"xai_heatmap"));

    let complete = events
        .iter()
        .find(|e| e.name() == "complete")
        .unwrap()
        .payload();
    assert_eq!(complete["xai_enabled"], false);
    assert!(complete["xai_analysis"].is_null());
}

#[tokio::test]
async fn agent_call_precedes_every_tool_call() {
    let state = test_state(true).await;
    let events = run_and_collect(&state, &[0, 30, 60]).await;

    let agent_positions: Vec<_> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| e.name() == "agent_call")
        .map(|(i, _)| i)
        .collect();
    assert_eq!(agent_positions.len(), 1);

    for (i, event) in events.iter().enumerate() {
        if event.name() == "tool_call" {
            assert!(i > agent_positions[0], "tool_call before agent_call");
            // Tool calls carry the dispatched frame.
            assert_eq!(event.payload()["frame_number"], 60);
        }
    }
}

#[tokio::test]
async fn benign_video_skips_incidents_and_agent() {
    let state = test_state(true).await;
    let events = run_and_collect(&state, &[0]).await;
    let names = names(&events);

    assert_eq!(names, vec!["frame", "complete", "end"]);

    let complete = events
        .iter()
        .find(|e| e.name() == "complete")
        .unwrap()
        .payload();
    let summary = &complete["analysis_summary"];
    assert_eq!(summary["threat_level"], "low");
    assert_eq!(summary["dominant_urgency_level"], "low");
    assert_eq!(summary["requires_immediate_response"], false);
    assert_eq!(summary["total_incidents"], 0);
    assert!(complete["emergency_responses"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn empty_video_completes_with_low_dominant() {
    let state = test_state(true).await;
    let events = run_and_collect(&state, &[]).await;
    let names = names(&events);

    assert_eq!(names, vec!["complete", "end"]);
    let summary = events[0].payload()["analysis_summary"].clone();
    assert_eq!(summary["total_frames_analyzed"], 0);
    assert_eq!(summary["dominant_urgency_level"], "low");
    assert_eq!(summary["average_severity_index"], 0.0);
}

#[tokio::test]
async fn second_subscriber_is_rejected() {
    let state = test_state(true).await;
    let session_id = Uuid::new_v4();
    let _cancel = state.registry.register(session_id).expect("register");
    let _rx = state.registry.subscribe(session_id).expect("first subscribe");

    assert_eq!(
        state.registry.subscribe(session_id).unwrap_err(),
        SessionError::AlreadySubscribed
    );
}

#[tokio::test]
async fn cancellation_publishes_error_then_end() {
    let state = test_state(true).await;
    let session_id = Uuid::new_v4();
    let cancel = state.registry.register(session_id).expect("register");
    let mut rx = state.registry.subscribe(session_id).expect("subscribe");

    let task_state = state.clone();
    let source = StalledFrames {
        info: video_info(300),
    };
    let token = cancel.clone();
    let task = tokio::spawn(async move {
        run_with_source(task_state, session_id, source, token).await;
    });

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    cancel.cancel();

    let first = rx.recv().await.expect("error event");
    assert_eq!(first.name(), "error");
    assert!(first.payload()["detail"]
        .as_str()
        .unwrap()
        .contains("cancelled"));

    let second = rx.recv().await.expect("end event");
    assert!(second.is_end());
    assert!(rx.recv().await.is_none());

    task.await.expect("pipeline task");
    assert!(!state.registry.contains(session_id));
}

#[tokio::test]
async fn agent_failure_still_completes() {
    // Agent URL points at a dead port: dispatch fails, session completes.
    let vision = mock_vision().await;
    let xai = mock_xai().await;
    let config = AppConfig {
        vision_url: format!("http://{vision}"),
        agent_url: "http://127.0.0.1:9".to_string(),
        xai_url: format!("http://{xai}"),
        xai_enabled: true,
        ..AppConfig::default()
    };
    let state = AppState::from_config(config).expect("state");

    let events = run_and_collect(&state, &[0, 30, 60]).await;
    let names = names(&events);

    assert!(!names.contains(&"agent_call"));
    assert!(!names.contains(&"tool_call"));
    assert_eq!(names.last(), Some(&"end"));
    assert_eq!(names[names.len() - 2], "complete");

    let complete = events
        .iter()
        .find(|e| e.name() == "complete")
        .unwrap()
        .payload();
    assert!(complete["emergency_responses"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn vision_failures_skip_frames_but_count_attempts() {
    // Vision URL dead: every frame is skipped, but attempts are counted.
    let agent = mock_agent().await;
    let xai = mock_xai().await;
    let config = AppConfig {
        vision_url: "http://127.0.0.1:9".to_string(),
        agent_url: format!("http://{agent}"),
        xai_url: format!("http://{xai}"),
        xai_enabled: true,
        ..AppConfig::default()
    };
    let state = AppState::from_config(config).expect("state");

    let events = run_and_collect(&state, &[0, 30]).await;
    let names = names(&events);
    assert_eq!(names, vec!["complete", "end"]);

    let summary = events[0].payload()["analysis_summary"].clone();
    assert_eq!(summary["total_frames_analyzed"], 2);
    assert_eq!(summary["low_urgency_frames"], 0);
    assert_eq!(summary["average_severity_index"], 0.0);
}
