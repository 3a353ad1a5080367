//! Video analysis pipeline
//!
//! One detached task per uploaded video drives the whole session:
//!
//! ```text
//! PHASE 1: Decode probe (VideoInfo)
//! PHASE 2: Sampled frame extraction (lazy, 1 frame / interval)
//! PHASE 3: Vision analysis per frame (skip on remote failure)
//! PHASE 4: Severity index + dispatch policy
//! PHASE 5: Event publication (frame / incident)
//! PHASE 6: XAI attribution (at most once, first qualifying incident)
//! PHASE 7: Agent dispatch (at most once, end of stream)
//! PHASE 8: Aggregate report (complete), then end
//! ```
//!
//! Frames are processed strictly sequentially so event delivery is FIFO
//! and the accumulators never need locks. Remote failures are recovered
//! locally; only an unopenable container is fatal to the session.

use anyhow::anyhow;
use tempfile::TempPath;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::analysis::{dispatch_required, public_urgency, severity_index};
use crate::analysis::severity::round2;
use crate::clients::ClientError;
use crate::dispatch::adapter::fallback_invocation;
use crate::extract::{FrameExtractor, FrameSource};
use crate::session::events::{
    AgentCallEvent, AnalysisSummary, CompletionReport, FrameEvent, IncidentRecord, TimelinePoint,
    ToolCallEvent, XaiHeatmapEvent,
};
use crate::session::SessionEvent;
use crate::state::AppState;
use crate::types::{
    AnalysisRequest, DispatchRequest, EmergencyMetrics, Hazard, ToolInvocation, UrgencyLevel,
    XaiResult,
};

/// Severity at or above which a frame becomes an incident.
const INCIDENT_SEVERITY: f64 = 6.0;

/// Severity at or above which an incident frame triggers XAI attribution.
const XAI_SEVERITY: f64 = 7.0;

/// Minimum severity for the best-frame fallback dispatch.
const FALLBACK_DISPATCH_SEVERITY: f64 = 5.0;

// ============================================================================
// Session entry
// ============================================================================

/// Start a detached analysis session for an uploaded video.
///
/// The bytes are parked in a temp file owned by the session task, the
/// session is registered, and the id returned immediately; all further
/// progress is reported on the session's event stream.
pub fn start_session(state: &AppState, video_bytes: &[u8]) -> anyhow::Result<Uuid> {
    let session_id = Uuid::new_v4();

    let mut tmp = tempfile::NamedTempFile::new()?;
    std::io::Write::write_all(&mut tmp, video_bytes)?;
    let video = tmp.into_temp_path();

    let cancel = state
        .registry
        .register(session_id)
        .map_err(|e| anyhow!("failed to register session: {e}"))?;

    let task_state = state.clone();
    tokio::spawn(async move {
        run_session(task_state, session_id, video, cancel).await;
    });

    info!(%session_id, "Video analysis session started");
    Ok(session_id)
}

/// Open the uploaded video and run the session to completion.
///
/// Owns the temp file: it is deleted when this task returns, on every
/// path including cancellation.
async fn run_session(state: AppState, session_id: Uuid, video: TempPath, cancel: CancellationToken) {
    let interval = state.config.sample_interval_secs;
    match FrameExtractor::open(&video, interval, None).await {
        Ok(source) => run_with_source(state, session_id, source, cancel).await,
        Err(e) => {
            warn!(%session_id, error = %e, "Video could not be opened");
            finalize(&state, session_id, Err(anyhow!(e.to_string()))).await;
        }
    }
    drop(video);
}

/// Drive a session over an already-open frame source.
///
/// Public for integration tests, which substitute a scripted
/// [`FrameSource`] for the ffmpeg-backed extractor.
pub async fn run_with_source<S: FrameSource>(
    state: AppState,
    session_id: Uuid,
    source: S,
    cancel: CancellationToken,
) {
    let result = analyze_session(&state, session_id, source, &cancel).await;
    finalize(&state, session_id, result).await;
}

/// Publish the terminal event pair and retire the session.
async fn finalize(state: &AppState, session_id: Uuid, result: anyhow::Result<()>) {
    if let Err(e) = result {
        state
            .registry
            .publish(session_id, SessionEvent::Error { detail: e.to_string() })
            .await;
    }
    state
        .registry
        .publish(session_id, SessionEvent::End { session_id })
        .await;
    state.registry.remove(session_id);
    info!(%session_id, "Session finished");
}

// ============================================================================
// Session body
// ============================================================================

async fn analyze_session<S: FrameSource>(
    state: &AppState,
    session_id: Uuid,
    mut source: S,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let video_info = source.info().clone();

    let mut critical_incidents: Vec<IncidentRecord> = Vec::new();
    let mut urgency_timeline: Vec<TimelinePoint> = Vec::new();
    let mut unique_hazards: Vec<Hazard> = Vec::new();
    let mut severity_scores: Vec<f64> = Vec::new();
    let mut urgency_counts = [0u64; 4];
    let mut max_urgency = UrgencyLevel::Low;
    let mut max_severity = 0.0f64;
    let mut dispatch_candidates: Vec<(EmergencyMetrics, f64)> = Vec::new();
    let mut best: Option<(EmergencyMetrics, f64)> = None;
    let mut xai_analysis: Option<XaiResult> = None;
    let mut xai_attempted = false;
    let mut frame_count = 0u64;

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return Err(anyhow!("session cancelled")),
            frame = source.next_frame() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        frame_count += 1;

        let request = AnalysisRequest {
            image_base64: frame.image_base64.clone(),
            timestamp: frame.timestamp.clone(),
            frame_number: frame.frame_number,
        };
        let analysis = tokio::select! {
            _ = cancel.cancelled() => return Err(anyhow!("session cancelled")),
            result = state.vision.analyze(&request) => result,
        };
        let metrics = match analysis {
            Ok(metrics) => metrics,
            Err(e) => {
                // Per-frame remote failures are skipped, not fatal.
                warn!(%session_id, frame = frame.frame_number, error = %e, "Vision analysis failed, skipping frame");
                continue;
            }
        };

        let severity = severity_index(&metrics);
        severity_scores.push(severity);
        if severity > max_severity {
            max_severity = severity;
        }
        if best.as_ref().map_or(true, |(_, s)| severity > *s) {
            best = Some((metrics.clone(), severity));
        }
        for hazard in &metrics.detected_hazards {
            if !unique_hazards.contains(hazard) {
                unique_hazards.push(hazard.clone());
            }
        }

        let label = public_urgency(&metrics);
        urgency_counts[label.priority() as usize] += 1;
        if label.priority() >= max_urgency.priority() {
            max_urgency = label;
        }

        let dispatch_recommended = dispatch_required(&metrics, severity);
        if dispatch_recommended {
            dispatch_candidates.push((metrics.clone(), severity));
        }

        state
            .registry
            .publish(
                session_id,
                SessionEvent::Frame(FrameEvent {
                    session_id,
                    frame_number: metrics.frame_number,
                    timestamp: metrics.timestamp.clone(),
                    urgency_level: label,
                    scene_description: metrics.scene_description.clone(),
                    detected_hazards: metrics.detected_hazards.clone(),
                    people_count: metrics.people_count,
                    visible_injuries: metrics.visible_injuries,
                    dispatch_recommended,
                    recommended_action: metrics.recommended_action.clone(),
                }),
            )
            .await;

        if label.priority() >= UrgencyLevel::High.priority() || severity >= INCIDENT_SEVERITY {
            let incident = IncidentRecord {
                timestamp: metrics.timestamp.clone(),
                frame_number: metrics.frame_number,
                urgency_level: label,
                scene_description: metrics.scene_description.clone(),
                detected_hazards: metrics.detected_hazards.clone(),
                people_count: metrics.people_count,
                visible_injuries: metrics.visible_injuries,
                dispatch_recommended,
                xai_analysis: None,
                agent_response: None,
                actions_taken: None,
            };
            state
                .registry
                .publish(session_id, SessionEvent::Incident(incident.clone()))
                .await;
            critical_incidents.push(incident);

            let should_trigger_xai = !xai_attempted
                && (label.priority() >= UrgencyLevel::High.priority()
                    || severity >= XAI_SEVERITY
                    || metrics.visible_injuries);
            if should_trigger_xai {
                xai_attempted = true;
                let attribution = tokio::select! {
                    _ = cancel.cancelled() => return Err(anyhow!("session cancelled")),
                    result = state.xai.heatmap(
                        &frame.image_base64,
                        metrics.frame_number,
                        &metrics.timestamp,
                        &metrics.scene_description,
                        &metrics.detected_hazards,
                    ) => result,
                };
                match attribution {
                    Ok(result) => {
                        if let Some(last) = critical_incidents.last_mut() {
                            last.xai_analysis = Some(result.clone());
                        }
                        state
                            .registry
                            .publish(
                                session_id,
                                SessionEvent::XaiHeatmap(XaiHeatmapEvent {
                                    session_id,
                                    frame_number: metrics.frame_number,
                                    timestamp: metrics.timestamp.clone(),
                                    grid_size: result.grid_size,
                                    heatmap_image_base64: result.heatmap_image_base64.clone(),
                                    cells: result.cells.clone(),
                                    explanation: result.explanation.clone(),
                                    max_score: result.max_score,
                                }),
                            )
                            .await;
                        xai_analysis = Some(result);
                    }
                    Err(ClientError::Disabled(_)) => {
                        state
                            .registry
                            .publish(
                                session_id,
                                SessionEvent::XaiDisabled {
                                    frame_number: metrics.frame_number,
                                    timestamp: metrics.timestamp.clone(),
                                    reason: "XAI attribution disabled via environment variable"
                                        .to_string(),
                                },
                            )
                            .await;
                    }
                    Err(e) => {
                        warn!(%session_id, frame = metrics.frame_number, error = %e, "XAI attribution failed");
                        state
                            .registry
                            .publish(
                                session_id,
                                SessionEvent::XaiError {
                                    frame_number: metrics.frame_number,
                                    timestamp: metrics.timestamp.clone(),
                                    detail: e.to_string(),
                                },
                            )
                            .await;
                    }
                }
            }
        }

        urgency_timeline.push(TimelinePoint {
            timestamp: metrics.timestamp.clone(),
            frame_number: metrics.frame_number,
            urgency_level: label,
            scene_description: metrics.scene_description.clone(),
            detected_hazards: metrics.detected_hazards.clone(),
        });
    }

    // ------------------------------------------------------------------
    // End of stream: agent dispatch decision
    // ------------------------------------------------------------------
    let selection = select_dispatch_frame(&dispatch_candidates, &best);
    let requires_immediate_response = !dispatch_candidates.is_empty();

    let mut emergency_responses: Vec<ToolInvocation> = Vec::new();
    if let Some((metrics, severity)) = selection {
        let request = DispatchRequest {
            urgency_score: metrics.urgency_score,
            // The agent sees the raw level; consumers never do.
            urgency_level: metrics.urgency_level,
            scene_description: metrics.scene_description.clone(),
            detected_hazards: metrics.detected_hazards.clone(),
            people_count: metrics.people_count,
            visible_injuries: metrics.visible_injuries,
            timestamp: metrics.timestamp.clone(),
            frame_number: metrics.frame_number,
            severity_index: severity,
        };

        let dispatch = tokio::select! {
            _ = cancel.cancelled() => return Err(anyhow!("session cancelled")),
            result = state.agent.analyze(&request) => result,
        };
        match dispatch {
            Ok(mut outcome) => {
                if outcome.emergency_calls.is_empty() {
                    warn!(%session_id, "Agent returned no tool calls, injecting fallback dispatch");
                    outcome.emergency_calls.push(fallback_invocation(&request));
                }
                for incident in critical_incidents.iter_mut() {
                    if incident.frame_number == metrics.frame_number {
                        incident.agent_response = Some(outcome.agent_response.clone());
                        incident.actions_taken = Some(outcome.actions_taken.clone());
                        break;
                    }
                }
                state
                    .registry
                    .publish(
                        session_id,
                        SessionEvent::AgentCall(AgentCallEvent {
                            session_id,
                            frame_number: metrics.frame_number,
                            agent_response: outcome.agent_response.clone(),
                            emergency_responses: outcome.emergency_calls.clone(),
                            actions_taken: outcome.actions_taken.clone(),
                            tool_calls: outcome.actions_taken.clone(),
                        }),
                    )
                    .await;
                for invocation in &outcome.emergency_calls {
                    state
                        .registry
                        .publish(
                            session_id,
                            SessionEvent::ToolCall(ToolCallEvent {
                                session_id,
                                frame_number: metrics.frame_number,
                                invocation: invocation.clone(),
                            }),
                        )
                        .await;
                }
                emergency_responses = outcome.emergency_calls;
            }
            Err(e) => {
                // An unreachable agent never aborts the session.
                warn!(%session_id, error = %e, "Agent dispatch failed");
            }
        }
    }

    // ------------------------------------------------------------------
    // Final report
    // ------------------------------------------------------------------
    let average_severity = if severity_scores.is_empty() {
        0.0
    } else {
        severity_scores.iter().sum::<f64>() / severity_scores.len() as f64
    };
    let dominant = dominant_urgency(&urgency_counts, frame_count);
    let phone = state.phone.snapshot();

    let report = CompletionReport {
        session_id,
        video_info,
        analysis_summary: AnalysisSummary {
            total_frames_analyzed: frame_count,
            threat_level: max_urgency,
            dominant_urgency_level: dominant,
            high_urgency_frames: urgency_counts[UrgencyLevel::High.priority() as usize],
            medium_urgency_frames: urgency_counts[UrgencyLevel::Medium.priority() as usize],
            normal_urgency_frames: urgency_counts[UrgencyLevel::Normal.priority() as usize],
            low_urgency_frames: urgency_counts[UrgencyLevel::Low.priority() as usize],
            max_severity_index: round2(max_severity),
            average_severity_index: round2(average_severity),
            unique_hazards_detected: unique_hazards,
            total_incidents: critical_incidents.len(),
            requires_immediate_response,
            phone_bridge_connected: phone.connected,
            phone_bridge_ip: phone.ip,
        },
        emergency_responses,
        critical_incidents,
        urgency_timeline,
        xai_analysis,
        xai_enabled: state.xai.is_enabled(),
    };

    state
        .registry
        .publish(session_id, SessionEvent::Complete(Box::new(report)))
        .await;

    Ok(())
}

// ============================================================================
// Policy helpers
// ============================================================================

/// Pick the frame the agent should act on: the strongest dispatch
/// candidate, else the overall best frame when it clears the fallback bar.
fn select_dispatch_frame(
    dispatch_candidates: &[(EmergencyMetrics, f64)],
    best: &Option<(EmergencyMetrics, f64)>,
) -> Option<(EmergencyMetrics, f64)> {
    if let Some(strongest) = dispatch_candidates
        .iter()
        .max_by(|a, b| a.1.total_cmp(&b.1))
    {
        return Some(strongest.clone());
    }
    match best {
        Some((metrics, severity)) if *severity >= FALLBACK_DISPATCH_SEVERITY => {
            Some((metrics.clone(), *severity))
        }
        _ => None,
    }
}

/// Most frequent public label; ties resolve to the higher priority.
fn dominant_urgency(urgency_counts: &[u64; 4], frame_count: u64) -> UrgencyLevel {
    if frame_count == 0 {
        return UrgencyLevel::Low;
    }
    let mut dominant = UrgencyLevel::Low;
    let mut dominant_count = 0u64;
    for level in UrgencyLevel::PUBLIC {
        let count = urgency_counts[level.priority() as usize];
        if count >= dominant_count {
            dominant = level;
            dominant_count = count;
        }
    }
    dominant
}

// ============================================================================
// Tests
// ============================================================================
