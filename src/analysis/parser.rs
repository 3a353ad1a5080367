//! Hazard parser: free-text caption → structured emergency metrics
//!
//! Vision models return prose; this module turns it into a typed record
//! with strict rules so the rest of the pipeline never touches raw text.
//! A hazard is detected when one of its cue phrases appears and none of
//! its negation patterns match. Urgency follows from the detected hazard
//! set first and explicit danger keywords second.

use std::sync::OnceLock;

use regex::Regex;

use crate::types::{EmergencyMetrics, Hazard, UrgencyLevel};

/// Parser confidence is fixed: the rules are deterministic, the input is not.
const PARSE_CONFIDENCE: f64 = 0.8;

/// Scene descriptions are clipped to keep frame events compact.
const SCENE_DESCRIPTION_LIMIT: usize = 250;

// ============================================================================
// Detection tables
// ============================================================================

struct HazardRule {
    hazard: Hazard,
    cues: &'static [&'static str],
    negation: &'static str,
    /// Extra phrases that must also appear (disambiguates e.g. "gas station").
    context: Option<&'static [&'static str]>,
}

const HAZARD_RULES: &[HazardRule] = &[
    HazardRule {
        hazard: Hazard::Fire,
        cues: &["fire", "flame", "burning", "blaze"],
        negation: r"no\s+fire|fire[:\s]*no|without\s+fire",
        context: None,
    },
    HazardRule {
        hazard: Hazard::Smoke,
        cues: &["smoke", "smoking", "smoky"],
        negation: r"no\s+smoke|smoke[:\s]*no|without\s+smoke",
        context: None,
    },
    HazardRule {
        hazard: Hazard::Water,
        cues: &["flood", "flooding", "submerged", "inundated", "water damage"],
        negation: r"no\s+(flood|water)|flood[:\s]*no",
        context: None,
    },
    HazardRule {
        hazard: Hazard::StructuralDamage,
        cues: &[
            "collapsed",
            "debris",
            "rubble",
            "damaged building",
            "broken structure",
            "structural damage",
            "crumbled",
            "destroyed",
        ],
        negation: r"no\s+damage|damage[:\s]*no|intact",
        context: None,
    },
    HazardRule {
        hazard: Hazard::Gas,
        cues: &["gas leak", "gas", "chemical", "fumes", "toxic"],
        negation: r"no\s+gas|gas[:\s]*no",
        context: Some(&["leak", "fumes", "toxic", "chemical", "danger"]),
    },
    HazardRule {
        hazard: Hazard::MedicalEmergency,
        cues: &[
            "injured",
            "injury",
            "hurt",
            "victim",
            "casualty",
            "wounded",
            "medical emergency",
            "blood",
            "bloody",
            "bleeding",
            "bloodied",
        ],
        negation: r"no\s+injur|injur[yed]*[:\s]*no|uninjured",
        context: None,
    },
    HazardRule {
        hazard: Hazard::Violence,
        cues: &[
            "weapon", "gun", "knife", "assault", "attack", "violence", "fighting", "combat",
        ],
        negation: r"no\s+(weapon|violence)|weapon[:\s]*no",
        context: None,
    },
    HazardRule {
        hazard: Hazard::BlockedExit,
        cues: &["blocked exit", "obstructed", "trapped", "blocked path"],
        negation: r"no\s+block|block[:\s]*no|clear",
        context: None,
    },
];

const HIGH_RISK_HAZARDS: &[Hazard] = &[Hazard::Smoke, Hazard::StructuralDamage, Hazard::Gas];
const MEDIUM_RISK_HAZARDS: &[Hazard] = &[Hazard::Water, Hazard::BlockedExit];

const CRITICAL_KEYWORDS: &[&str] = &["critical", "extreme danger", "life threatening", "emergency"];
const HIGH_KEYWORDS: &[&str] = &["high danger", "high risk", "dangerous", "urgent"];
const MEDIUM_KEYWORDS: &[&str] = &["medium", "moderate", "caution", "some concern"];
const SAFE_KEYWORDS: &[&str] = &["safe", "no danger", "no emergency", "normal situation"];

const NO_PEOPLE_PHRASES: &[&str] = &["no people", "nobody", "none visible", "0 people"];

const ACTION_KEYWORDS: &[&str] = &[
    "should",
    "must",
    "need to",
    "evacuate",
    "call",
    "contact",
    "move",
    "leave",
    "stay",
    "avoid",
    "immediately",
];

/// Compiled regex tables, built once on first use.
struct ParserTables {
    negations: Vec<Regex>,
    people: Vec<Regex>,
    injuries: Regex,
}

fn tables() -> &'static ParserTables {
    static TABLES: OnceLock<ParserTables> = OnceLock::new();
    TABLES.get_or_init(|| ParserTables {
        negations: HAZARD_RULES
            .iter()
            .map(|rule| compile(rule.negation))
            .collect(),
        people: vec![
            compile(r"(\d+)\s+(?:people|person|individual)"),
            compile(r"(?:people|person)[:\s]+(\d+)"),
            compile(r"see\s+(\d+)"),
            compile(r"count[:\s]+(\d+)"),
        ],
        injuries: compile(r"injur[yed]*[:\s]*(yes|visible|present|detected)"),
    })
}

fn compile(pattern: &str) -> Regex {
    // Table patterns are compile-time literals covered by tests.
    Regex::new(pattern).expect("invalid parser table pattern")
}

// ============================================================================
// Parsing
// ============================================================================

/// Parse a vision caption into a structured assessment.
///
/// Case-insensitive, deterministic: identical caption, timestamp and frame
/// number always produce identical metrics.
pub fn parse_caption(caption: &str, timestamp: &str, frame_number: u64) -> EmergencyMetrics {
    let tables = tables();
    let lower = caption.to_lowercase();

    // 1. Hazard detection: cue present, negation absent, context satisfied.
    let mut detected_hazards = Vec::new();
    for (rule, negation) in HAZARD_RULES.iter().zip(&tables.negations) {
        let cued = rule.cues.iter().any(|cue| lower.contains(cue));
        if !cued || negation.is_match(&lower) {
            continue;
        }
        if let Some(context) = rule.context {
            if !context.iter().any(|cue| lower.contains(cue)) {
                continue;
            }
        }
        detected_hazards.push(rule.hazard.clone());
    }

    // 2. Urgency: hazard tiers first, explicit danger keywords second.
    let (urgency_level, urgency_score) = assess_urgency(&detected_hazards, &lower);

    // 3. People count.
    let people_count = tables
        .people
        .iter()
        .find_map(|pattern| {
            pattern
                .captures(&lower)
                .and_then(|caps| caps.get(1))
                .and_then(|m| m.as_str().parse::<u32>().ok())
        })
        .or_else(|| {
            NO_PEOPLE_PHRASES
                .iter()
                .any(|phrase| lower.contains(phrase))
                .then_some(0)
        });

    // 4. Injuries: only an explicit affirmative counts.
    let visible_injuries = tables.injuries.is_match(&lower);

    // 5. Environment.
    let environmental_conditions = environment(&lower, &detected_hazards);

    // 6. Accessibility.
    let mut accessibility_issues = Vec::new();
    if detected_hazards.contains(&Hazard::BlockedExit) {
        accessibility_issues.push("blocked_exit".to_string());
    }
    if lower.contains("debris") || lower.contains("rubble") {
        accessibility_issues.push("debris".to_string());
    }

    // 7. Recommended action.
    let recommended_action = recommended_action(caption, urgency_level);

    // 8. Scene description: first two sentences, clipped.
    let scene_description = scene_description(caption);

    EmergencyMetrics {
        timestamp: timestamp.to_string(),
        frame_number,
        scene_description,
        urgency_level,
        urgency_score,
        detected_hazards,
        people_count,
        visible_injuries,
        environmental_conditions,
        accessibility_issues,
        recommended_action,
        confidence: PARSE_CONFIDENCE,
        raw_response: caption.to_string(),
    }
}

fn assess_urgency(hazards: &[Hazard], lower: &str) -> (UrgencyLevel, f64) {
    if hazards.iter().any(Hazard::is_critical) {
        return (UrgencyLevel::Critical, 9.5);
    }
    if hazards.iter().any(|h| HIGH_RISK_HAZARDS.contains(h)) {
        return (UrgencyLevel::High, 7.5);
    }
    if hazards.iter().any(|h| MEDIUM_RISK_HAZARDS.contains(h)) {
        return (UrgencyLevel::Medium, 4.5);
    }
    if CRITICAL_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        return (UrgencyLevel::Critical, 9.5);
    }
    if HIGH_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        return (UrgencyLevel::High, 7.5);
    }
    if MEDIUM_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        return (UrgencyLevel::Medium, 4.5);
    }
    if SAFE_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        return (UrgencyLevel::Low, 1.5);
    }
    (UrgencyLevel::Low, 1.5)
}

fn environment(lower: &str, hazards: &[Hazard]) -> String {
    if lower.contains("dark") || lower.contains("low light") {
        "Low lighting conditions".to_string()
    } else if lower.contains("bright") || lower.contains("good light") {
        "Good lighting".to_string()
    } else if hazards.contains(&Hazard::Smoke) {
        "Poor visibility due to smoke".to_string()
    } else if lower.contains("rain") || lower.contains("wet") {
        "Wet conditions".to_string()
    } else {
        "Normal indoor/outdoor conditions".to_string()
    }
}

fn recommended_action(caption: &str, urgency: UrgencyLevel) -> String {
    let action_sentences: Vec<&str> = caption
        .split('.')
        .map(str::trim)
        .filter(|sentence| {
            let lower = sentence.to_lowercase();
            ACTION_KEYWORDS.iter().any(|kw| lower.contains(kw))
        })
        .take(2)
        .collect();

    if !action_sentences.is_empty() {
        return action_sentences.join(". ");
    }

    match urgency {
        UrgencyLevel::Critical => {
            "IMMEDIATE ACTION REQUIRED. Evacuate area and call emergency services NOW.".to_string()
        }
        UrgencyLevel::High => {
            "Call emergency services immediately. Ensure safety of all individuals.".to_string()
        }
        UrgencyLevel::Medium => {
            "Stay alert. Prepare to evacuate if situation worsens. Contact authorities if needed."
                .to_string()
        }
        UrgencyLevel::Normal | UrgencyLevel::Low => {
            "Monitor situation. Call emergency services if needed.".to_string()
        }
    }
}

fn scene_description(caption: &str) -> String {
    let description = caption
        .split('.')
        .take(2)
        .collect::<Vec<_>>()
        .join(". ")
        .trim()
        .to_string();

    if description.len() > SCENE_DESCRIPTION_LIMIT {
        let clipped: String = description
            .chars()
            .take(SCENE_DESCRIPTION_LIMIT - 3)
            .collect();
        format!("{}...", clipped)
    } else {
        description
    }
}

// ============================================================================
// Tests
// ============================================================================
