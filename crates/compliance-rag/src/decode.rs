//! Tolerant decode of a model's violation list.
//!
//! Never fails. A response without a usable JSON array degrades to one
//! `Retrieved Context` violation carrying the raw text, and says so.

use std::sync::OnceLock;

use regex::Regex;
use scanward_core::domain::ComplianceViolation;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedViolations {
    pub violations: Vec<ComplianceViolation>,
    /// True when `violations` is the fallback rather than a parsed answer.
    pub degraded: bool,
}

#[derive(Deserialize)]
struct LooseViolation {
    #[serde(default)]
    regulation: Value,
    #[serde(default)]
    reason: Value,
}

fn text(v: Value) -> String {
    match v {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Find the first bracketed array of objects in `raw` and decode it.
pub fn decode_violations(raw: &str) -> DecodedViolations {
    static ARRAY: OnceLock<Regex> = OnceLock::new();
    let re = ARRAY.get_or_init(|| Regex::new(r"(?s)\[\s*\{.*?\}\s*\]").expect("valid regex"));

    let parsed = re
        .find(raw)
        .and_then(|m| serde_json::from_str::<Vec<LooseViolation>>(m.as_str()).ok());

    match parsed {
        Some(items) => DecodedViolations {
            violations: items
                .into_iter()
                .map(|v| ComplianceViolation::new(text(v.regulation), text(v.reason)))
                .collect(),
            degraded: false,
        },
        None => DecodedViolations {
            violations: vec![ComplianceViolation::retrieved_context(raw)],
            degraded: true,
        },
    }
}
