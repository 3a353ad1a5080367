//! Frame assessment: hazard parsing and severity policy
//!
//! Two pure, deterministic stages sit between the vision analyzer and the
//! event stream:
//!
//! - `parser`: free-text caption → structured [`EmergencyMetrics`]
//! - `severity`: metrics → severity index, dispatch decision, public label
//!
//! Both are table-driven and side-effect free so identical inputs always
//! yield identical assessments.
//!
//! [`EmergencyMetrics`]: crate::types::EmergencyMetrics

pub mod parser;
pub mod severity;

pub use parser::parse_caption;
pub use severity::{
    classify_urgency, dispatch_required, public_urgency, severity_index,
};
