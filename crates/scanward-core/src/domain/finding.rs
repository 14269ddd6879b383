//! Findings and the compliance enrichment vocabulary.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::request::ScanCategory;

/// A single reported issue from a scan, the unit of enrichment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub identifier: String,
    pub name: String,
    pub description: String,
    pub category: ScanCategory,
}

impl Finding {
    pub fn new(
        identifier: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        category: ScanCategory,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            name: name.into(),
            description: description.into(),
            category,
        }
    }

    /// Extract a finding from a raw scan result item.
    ///
    /// Web alerts carry `name`/`description`; code-scanner results carry
    /// `check_id` and `extra.message`.
    pub fn from_result_item(item: &Value, category: ScanCategory) -> Self {
        let str_at = |v: Option<&Value>| v.and_then(Value::as_str).unwrap_or_default().to_string();

        let name = str_at(item.get("name"));
        let check_id = str_at(item.get("check_id"));
        let mut description = str_at(item.get("description"));
        if description.is_empty() {
            description = str_at(item.get("extra").and_then(|e| e.get("message")));
        }

        let identifier = if !name.is_empty() {
            name.clone()
        } else if !check_id.is_empty() {
            check_id
        } else {
            "<unnamed>".to_string()
        };

        Self {
            identifier,
            name,
            description,
            category,
        }
    }

    /// Whether there is anything to enrich.
    pub fn has_content(&self) -> bool {
        !self.name.trim().is_empty() || !self.description.trim().is_empty()
    }

    /// Query text used against the knowledge index.
    pub fn retrieval_query(&self) -> String {
        format!("{} {}", self.name, self.description).trim().to_string()
    }
}

/// A regulation a finding is judged to violate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceViolation {
    pub regulation: String,
    pub reason: String,
}

impl ComplianceViolation {
    pub fn new(regulation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            regulation: regulation.into(),
            reason: reason.into(),
        }
    }

    /// Short-circuit result for a finding with neither name nor description.
    pub fn no_information() -> Self {
        Self::new("Unknown", "No vulnerability information provided")
    }

    /// Degraded result wrapping an unparseable model response.
    pub fn retrieved_context(raw: &str) -> Self {
        Self::new("Retrieved Context", raw.trim())
    }

    pub fn rate_limited(attempts: u32) -> Self {
        Self::new(
            "Rate Limit Error",
            format!("API rate limit exceeded after {attempts} attempts"),
        )
    }

    pub fn provider_failure(message: &str) -> Self {
        Self::new("Error", format!("API call failed: {message}"))
    }

    pub fn cancelled() -> Self {
        Self::new("Cancelled", "Run was cancelled before this item was merged")
    }
}

/// A compliance document a retrieval drew chunks from.
///
/// `chunk_ids` is a set, so it is always ascending and deduplicated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceSource {
    pub source_file: String,
    pub file_type: String,
    pub chunk_ids: BTreeSet<u64>,
    /// Unique content previews, first-seen order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub previews: Vec<String>,
}

impl ComplianceSource {
    pub fn new(source_file: impl Into<String>, file_type: impl Into<String>) -> Self {
        Self {
            source_file: source_file.into(),
            file_type: file_type.into(),
            chunk_ids: BTreeSet::new(),
            previews: Vec::new(),
        }
    }
}

/// One chunk returned by a similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub content: String,
    pub source_file: String,
    pub file_type: String,
    pub chunk_id: u64,
}

/// Ordered chunks returned for one query, at most `k` long.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalContext {
    chunks: Vec<RetrievedChunk>,
}

impl RetrievalContext {
    pub fn new(mut chunks: Vec<RetrievedChunk>, k: usize) -> Self {
        chunks.truncate(k);
        Self { chunks }
    }

    pub fn chunks(&self) -> &[RetrievedChunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Output of enriching one finding.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub violations: Vec<ComplianceViolation>,
    pub sources: Vec<ComplianceSource>,
    /// True when the violations are a fallback rather than a parsed model answer.
    #[serde(default)]
    pub degraded: bool,
}
