//! Downstream artifacts: annotated items, the assembled report, narration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::finding::{ComplianceReport, ComplianceViolation, Finding};
use crate::domain::request::ScanCategory;
use crate::domain::scan::ScanStatus;

/// Result-item field carrying the generated explanation.
pub const AI_EXPLANATION_FIELD: &str = "ai_explanation";
/// Result-item field carrying compliance violations.
pub const VIOLATIONS_FIELD: &str = "top_compliance_violations";
/// Result-item field carrying merged compliance sources.
pub const SOURCES_FIELD: &str = "compliance_sources";
/// Result-item field flagging a fallback (unparsed) compliance answer.
pub const DEGRADED_FIELD: &str = "compliance_degraded";

/// A scan result item plus the fields later stages attach to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedItem {
    pub category: ScanCategory,
    pub identifier: String,
    pub item: Value,
}

impl AnnotatedItem {
    pub fn new(category: ScanCategory, item: Value) -> Self {
        let identifier = Finding::from_result_item(&item, category).identifier;
        Self {
            category,
            identifier,
            item,
        }
    }

    pub fn finding(&self) -> Finding {
        Finding::from_result_item(&self.item, self.category)
    }

    pub fn explanation(&self) -> Option<&str> {
        self.item.get(AI_EXPLANATION_FIELD).and_then(Value::as_str)
    }

    pub fn violations(&self) -> Vec<ComplianceViolation> {
        self.item
            .get(VIOLATIONS_FIELD)
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    pub fn is_degraded(&self) -> bool {
        self.item
            .get(DEGRADED_FIELD)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn set_explanation(&mut self, explanation: String) {
        self.set_field(AI_EXPLANATION_FIELD, Value::String(explanation));
    }

    pub fn set_compliance(&mut self, report: &ComplianceReport) {
        self.set_field(
            VIOLATIONS_FIELD,
            serde_json::to_value(&report.violations).unwrap_or(Value::Array(Vec::new())),
        );
        self.set_field(
            SOURCES_FIELD,
            serde_json::to_value(&report.sources).unwrap_or(Value::Array(Vec::new())),
        );
        self.set_field(DEGRADED_FIELD, Value::Bool(report.degraded));
    }

    fn set_field(&mut self, key: &str, value: Value) {
        if !self.item.is_object() {
            self.item = serde_json::json!({ "value": self.item.take() });
        }
        if let Some(obj) = self.item.as_object_mut() {
            obj.insert(key.to_string(), value);
        }
    }
}

/// Output of the explain stage.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExplanationArtifact {
    pub items: Vec<AnnotatedItem>,
    pub failed: usize,
}

/// Output of the compliance stage.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ComplianceArtifact {
    pub items: Vec<AnnotatedItem>,
    pub degraded: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySummary {
    pub category: ScanCategory,
    /// `None` when no requested source matched the category.
    pub status: Option<ScanStatus>,
    pub findings: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub category: ScanCategory,
    pub identifier: String,
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default)]
    pub violations: Vec<ComplianceViolation>,
    #[serde(default)]
    pub degraded: bool,
}

/// Structured report assembled from the run's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityReport {
    pub generated_at: DateTime<Utc>,
    pub prompt: String,
    pub categories: Vec<CategorySummary>,
    pub entries: Vec<ReportEntry>,
}

impl SecurityReport {
    pub fn total_findings(&self) -> usize {
        self.entries.len()
    }

    pub fn degraded_entries(&self) -> usize {
        self.entries.iter().filter(|e| e.degraded).count()
    }
}

/// Output of the report stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportArtifact {
    pub report: SecurityReport,
    /// Where the renderer put the rendered document, if anywhere.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Output of the narrate stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrationArtifact {
    pub script: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::finding::ComplianceSource;
    use serde_json::json;

    #[test]
    fn compliance_fields_are_attached_to_item() {
        let mut item = AnnotatedItem::new(ScanCategory::Web, json!({"name": "XSS"}));
        item.set_explanation("reflected input".to_string());
        item.set_compliance(&ComplianceReport {
            violations: vec![ComplianceViolation::new("OWASP ASVS V5.3.3", "output encoding")],
            sources: vec![ComplianceSource {
                source_file: "asvs.pdf".into(),
                file_type: "pdf".into(),
                chunk_ids: [2, 1].into_iter().collect(),
                previews: vec!["V5.1.1 Input validation...".into()],
            }],
            degraded: false,
        });

        assert_eq!(item.identifier, "XSS");
        assert_eq!(item.explanation(), Some("reflected input"));
        assert_eq!(item.violations().len(), 1);
        assert_eq!(item.item[SOURCES_FIELD][0]["chunk_ids"], json!([1, 2]));
        assert!(!item.is_degraded());
    }

    #[test]
    fn non_object_items_are_wrapped() {
        let mut item = AnnotatedItem::new(ScanCategory::Code, json!("raw line"));
        item.set_explanation("text".to_string());
        assert_eq!(item.item["value"], json!("raw line"));
        assert_eq!(item.explanation(), Some("text"));
    }
}
