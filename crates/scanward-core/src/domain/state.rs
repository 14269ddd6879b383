//! Typed, append-only pipeline state.
//!
//! One optional slot per stage output. A slot is written once per run; a
//! second write is a configuration error rather than an overwrite.

use serde::{Deserialize, Serialize};

use crate::domain::error::ConfigurationError;
use crate::domain::report::{
    ComplianceArtifact, ExplanationArtifact, NarrationArtifact, ReportArtifact,
};
use crate::domain::scan::ScanResults;

/// Key of a stage output slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKey {
    ScanResults,
    Explanations,
    Compliance,
    Report,
    Narration,
}

impl StateKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ScanResults => "scan_results",
            Self::Explanations => "explanations",
            Self::Compliance => "compliance",
            Self::Report => "report",
            Self::Narration => "narration",
        }
    }
}

impl std::fmt::Display for StateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payload produced by a stage, tagged with the slot it fills.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutput {
    ScanResults(ScanResults),
    Explanations(ExplanationArtifact),
    Compliance(ComplianceArtifact),
    Report(ReportArtifact),
    Narration(NarrationArtifact),
}

impl StageOutput {
    pub fn key(&self) -> StateKey {
        match self {
            Self::ScanResults(_) => StateKey::ScanResults,
            Self::Explanations(_) => StateKey::Explanations,
            Self::Compliance(_) => StateKey::Compliance,
            Self::Report(_) => StateKey::Report,
            Self::Narration(_) => StateKey::Narration,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PipelineState {
    #[serde(skip_serializing_if = "Option::is_none")]
    scan_results: Option<ScanResults>,
    #[serde(skip_serializing_if = "Option::is_none")]
    explanations: Option<ExplanationArtifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    compliance: Option<ComplianceArtifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<ReportArtifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    narration: Option<NarrationArtifact>,
}

impl PipelineState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: StateKey) -> bool {
        match key {
            StateKey::ScanResults => self.scan_results.is_some(),
            StateKey::Explanations => self.explanations.is_some(),
            StateKey::Compliance => self.compliance.is_some(),
            StateKey::Report => self.report.is_some(),
            StateKey::Narration => self.narration.is_some(),
        }
    }

    /// Keys written so far, in slot order.
    pub fn keys(&self) -> Vec<StateKey> {
        [
            StateKey::ScanResults,
            StateKey::Explanations,
            StateKey::Compliance,
            StateKey::Report,
            StateKey::Narration,
        ]
        .into_iter()
        .filter(|k| self.contains(*k))
        .collect()
    }

    /// Write a stage output into its slot. Rejects a second write.
    pub fn record(&mut self, output: StageOutput) -> Result<StateKey, ConfigurationError> {
        let key = output.key();
        if self.contains(key) {
            return Err(ConfigurationError::StateKeyRewritten { key });
        }
        match output {
            StageOutput::ScanResults(v) => self.scan_results = Some(v),
            StageOutput::Explanations(v) => self.explanations = Some(v),
            StageOutput::Compliance(v) => self.compliance = Some(v),
            StageOutput::Report(v) => self.report = Some(v),
            StageOutput::Narration(v) => self.narration = Some(v),
        }
        Ok(key)
    }

    pub fn scan_results(&self) -> Option<&ScanResults> {
        self.scan_results.as_ref()
    }

    pub fn explanations(&self) -> Option<&ExplanationArtifact> {
        self.explanations.as_ref()
    }

    pub fn compliance(&self) -> Option<&ComplianceArtifact> {
        self.compliance.as_ref()
    }

    pub fn report(&self) -> Option<&ReportArtifact> {
        self.report.as_ref()
    }

    pub fn narration(&self) -> Option<&NarrationArtifact> {
        self.narration.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_fills_slot_once() {
        let mut state = PipelineState::new();
        assert!(state.keys().is_empty());

        let key = state
            .record(StageOutput::ScanResults(ScanResults::default()))
            .unwrap();
        assert_eq!(key, StateKey::ScanResults);
        assert!(state.contains(StateKey::ScanResults));

        let err = state
            .record(StageOutput::ScanResults(ScanResults::default()))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::StateKeyRewritten {
                key: StateKey::ScanResults
            }
        );
    }

    #[test]
    fn snapshot_omits_unwritten_slots() {
        let mut state = PipelineState::new();
        state
            .record(StageOutput::Explanations(ExplanationArtifact::default()))
            .unwrap();
        let raw = serde_json::to_value(&state).unwrap();
        let obj = raw.as_object().unwrap();
        assert_eq!(obj.len(), 1);
        assert!(obj.contains_key("explanations"));
    }
}
