//! Scan outcomes, per-category aggregates and the scan artifact contract.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::domain::finding::Finding;
use crate::domain::request::ScanCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Success,
    Failure,
}

/// Opaque handle to a persisted scan payload (SHA-256 of its JSON encoding).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef(String);

impl ArtifactRef {
    pub fn for_payload(payload: &Value) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(payload.to_string().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars.
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl std::fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Output contract of a scan tool: `{status, results, errors, version}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanArtifact {
    pub status: ScanStatus,
    #[serde(default)]
    pub results: Vec<Value>,
    #[serde(default)]
    pub errors: Vec<Value>,
    #[serde(default)]
    pub version: String,
}

impl ScanArtifact {
    pub fn success(results: Vec<Value>) -> Self {
        Self {
            status: ScanStatus::Success,
            results,
            errors: Vec::new(),
            version: String::new(),
        }
    }
}

/// What happened to one source within a category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceOutcome {
    pub source: String,
    pub status: ScanStatus,
    pub attempts: u32,
    pub result_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate outcome of all sources dispatched to one category's tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanOutcome {
    pub status: ScanStatus,
    pub category: ScanCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_ref: Option<ArtifactRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub sources: Vec<SourceOutcome>,
    pub artifact: ScanArtifact,
}

impl ScanOutcome {
    /// Merge per-source outcomes. `Success` iff at least one source succeeded.
    pub fn aggregate(
        category: ScanCategory,
        mut sources: Vec<SourceOutcome>,
        results: Vec<Value>,
        mut errors: Vec<Value>,
        version: String,
    ) -> Self {
        sources.sort_by(|a, b| a.source.cmp(&b.source));
        let succeeded = sources.iter().any(|s| s.status == ScanStatus::Success);

        let failures: Vec<String> = sources
            .iter()
            .filter_map(|s| s.error.as_ref().map(|e| format!("{}: {}", s.source, e)))
            .collect();

        let (status, error) = if succeeded {
            (ScanStatus::Success, None)
        } else {
            (ScanStatus::Failure, Some(failures.join("; ")))
        };

        for failure in &failures {
            errors.push(Value::String(failure.clone()));
        }

        let artifact = ScanArtifact {
            status,
            results,
            errors,
            version,
        };
        let artifact_ref = succeeded
            .then(|| serde_json::to_value(&artifact).ok())
            .flatten()
            .map(|v| ArtifactRef::for_payload(&v));

        Self {
            status,
            category,
            artifact_ref,
            error,
            sources,
            artifact,
        }
    }
}

/// Per-category result. `NoMatchingSource` is the explicit empty marker for a
/// requested category no source routed to, distinct from an empty scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CategoryResult {
    NoMatchingSource,
    Scanned(ScanOutcome),
}

impl CategoryResult {
    pub fn outcome(&self) -> Option<&ScanOutcome> {
        match self {
            Self::Scanned(outcome) => Some(outcome),
            Self::NoMatchingSource => None,
        }
    }

    pub fn is_empty_marker(&self) -> bool {
        matches!(self, Self::NoMatchingSource)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    CategoryNotRequested { category: ScanCategory },
    Unmatched,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedSource {
    pub source: String,
    #[serde(flatten)]
    pub reason: SkipReason,
}

/// Output of the scan stage, keyed by category.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScanResults {
    pub categories: BTreeMap<ScanCategory, CategoryResult>,
    #[serde(default)]
    pub skipped: Vec<SkippedSource>,
}

impl ScanResults {
    pub fn get(&self, category: ScanCategory) -> Option<&CategoryResult> {
        self.categories.get(&category)
    }

    /// `Success` if any category produced a successful scan.
    pub fn status(&self) -> ScanStatus {
        let any_success = self
            .categories
            .values()
            .filter_map(CategoryResult::outcome)
            .any(|o| o.status == ScanStatus::Success);
        if any_success {
            ScanStatus::Success
        } else {
            ScanStatus::Failure
        }
    }

    /// Raw result items of successful categories, in category order.
    pub fn items(&self) -> Vec<(ScanCategory, &Value)> {
        self.categories
            .iter()
            .filter_map(|(cat, res)| res.outcome().map(|o| (*cat, o)))
            .filter(|(_, o)| o.status == ScanStatus::Success)
            .flat_map(|(cat, o)| o.artifact.results.iter().map(move |item| (cat, item)))
            .collect()
    }

    pub fn findings(&self) -> Vec<Finding> {
        self.items()
            .into_iter()
            .map(|(cat, item)| Finding::from_result_item(item, cat))
            .collect()
    }
}
