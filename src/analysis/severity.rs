//! Severity index and dispatch policy
//!
//! The severity index collapses a frame assessment into a single 0-10
//! scalar: weighted hazards, urgency, injuries and crowd size. Dispatch
//! policy decides when a frame justifies waking the agent executor, and
//! `public_urgency` enforces the rule that `critical` never reaches
//! consumers.

use crate::types::{EmergencyMetrics, Hazard, UrgencyLevel};

/// Weight applied to the visible-injuries flag.
const INJURY_BONUS: f64 = 2.5;

/// Per-person weight, capped at this many people.
const PEOPLE_CAP: u32 = 5;
const PEOPLE_WEIGHT: f64 = 0.3;

/// Fraction of the urgency score feeding the index.
const URGENCY_FACTOR: f64 = 0.4;

/// Compute the 0-10 severity index for a frame assessment.
///
/// `round(0.4 * urgency + Σ hazard_weight + 2.5 * injuries + 0.3 * min(people, 5), 2)`,
/// clamped to `[0, 10]`.
pub fn severity_index(metrics: &EmergencyMetrics) -> f64 {
    let hazard_score: f64 = metrics.detected_hazards.iter().map(Hazard::weight).sum();
    let injury_bonus = if metrics.visible_injuries {
        INJURY_BONUS
    } else {
        0.0
    };
    let people_bonus =
        f64::from(metrics.people_count.unwrap_or(0).min(PEOPLE_CAP)) * PEOPLE_WEIGHT;
    let base = metrics.urgency_score * URGENCY_FACTOR;

    let raw = base + hazard_score + injury_bonus + people_bonus;
    (round2(raw)).clamp(0.0, 10.0)
}

/// Round to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Whether a frame warrants escalation to the agent executor.
///
/// Requires a life-threatening signal (fire, medical emergency or visible
/// injuries) AND a quantitative threshold (urgency ≥ 6.0 or severity ≥ 6.5).
pub fn dispatch_required(metrics: &EmergencyMetrics, severity_index: f64) -> bool {
    let has_critical_hazard = metrics.has_hazard(&Hazard::Fire)
        || metrics.has_hazard(&Hazard::MedicalEmergency);
    (has_critical_hazard || metrics.visible_injuries)
        && (metrics.urgency_score >= 6.0 || severity_index >= 6.5)
}

/// Reclassify an urgency score into a public label.
pub fn classify_urgency(score: f64) -> UrgencyLevel {
    if score >= 7.0 {
        UrgencyLevel::High
    } else if score >= 5.0 {
        UrgencyLevel::Medium
    } else if score >= 3.0 {
        UrgencyLevel::Normal
    } else {
        UrgencyLevel::Low
    }
}

/// The urgency label published to consumers.
///
/// `critical` maps to `high`; anything outside the public set is
/// reclassified from the urgency score. The raw level survives only inside
/// the agent dispatch payload.
pub fn public_urgency(metrics: &EmergencyMetrics) -> UrgencyLevel {
    match metrics.urgency_level {
        UrgencyLevel::Critical => UrgencyLevel::High,
        level if UrgencyLevel::PUBLIC.contains(&level) => level,
        _ => classify_urgency(metrics.urgency_score),
    }
}

// ============================================================================
// Tests
// ============================================================================
