//! Narrate stage: a short spoken-style summary of the report.
//!
//! Audio synthesis is external; [`Narrator`] receives the script and says
//! where it put the result.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use scanward_core::domain::{
    NarrationArtifact, ScanwardError, SecurityReport, StageId, StageOutput, StateKey,
};
use tracing::info;

use super::{StageContext, StageHandler};

/// Entries named in the script before it summarises the rest.
const NARRATED_ENTRIES: usize = 5;

/// Build the narration script for `report`.
pub fn narration_script(report: &SecurityReport) -> String {
    let mut lines = Vec::new();
    let total = report.total_findings();
    lines.push(match total {
        0 => "The security scan completed and found no issues.".to_string(),
        1 => "The security scan completed and found one issue.".to_string(),
        n => format!("The security scan completed and found {n} issues."),
    });

    for summary in &report.categories {
        if summary.status.is_none() {
            continue;
        }
        if !summary.errors.is_empty() {
            lines.push(format!(
                "The {} scan reported {} error{}.",
                summary.category,
                summary.errors.len(),
                if summary.errors.len() == 1 { "" } else { "s" }
            ));
        }
    }

    for entry in report.entries.iter().take(NARRATED_ENTRIES) {
        let mut line = format!("{}.", entry.identifier);
        if let Some(v) = entry.violations.first() {
            if !entry.degraded {
                line.push_str(&format!(" It relates to {}.", v.regulation));
            }
        }
        lines.push(line);
    }
    if total > NARRATED_ENTRIES {
        lines.push(format!(
            "{} more issues are listed in the written report.",
            total - NARRATED_ENTRIES
        ));
    }
    lines.join(" ")
}

#[async_trait]
pub trait Narrator: Send + Sync {
    async fn narrate(&self, run_id: &str, script: &str) -> Result<Option<String>, ScanwardError>;
}

/// Writes the script to `<dir>/<run_id>-narration.txt` for an external voice step.
pub struct ScriptFileNarrator {
    dir: PathBuf,
}

impl ScriptFileNarrator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl Narrator for ScriptFileNarrator {
    async fn narrate(&self, run_id: &str, script: &str) -> Result<Option<String>, ScanwardError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(format!("{run_id}-narration.txt"));
        tokio::fs::write(&path, script).await?;
        Ok(Some(path.display().to_string()))
    }
}

pub struct NarrateStage {
    narrator: Option<Arc<dyn Narrator>>,
}

impl NarrateStage {
    /// Produce the script only.
    pub fn new() -> Self {
        Self { narrator: None }
    }

    pub fn with_narrator(narrator: Arc<dyn Narrator>) -> Self {
        Self {
            narrator: Some(narrator),
        }
    }
}

impl Default for NarrateStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StageHandler for NarrateStage {
    fn stage(&self) -> StageId {
        StageId::Narrate
    }

    fn requires(&self) -> &'static [StateKey] {
        &[StateKey::Report]
    }

    fn produces(&self) -> StateKey {
        StateKey::Narration
    }

    async fn run(&self, ctx: &StageContext<'_>) -> Result<StageOutput, ScanwardError> {
        let report = ctx.state.report().ok_or(ScanwardError::Stage {
            stage: StageId::Narrate,
            reason: format!("{} missing", StateKey::Report),
        })?;
        let script = narration_script(&report.report);
        let location = match &self.narrator {
            Some(narrator) => narrator.narrate(ctx.run_id, &script).await?,
            None => None,
        };
        info!(run_id = ctx.run_id, chars = script.len(), "narrate stage complete");
        Ok(StageOutput::Narration(NarrationArtifact { script, location }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use scanward_core::domain::{ComplianceViolation, ReportEntry, ScanCategory};

    fn entry(id: &str) -> ReportEntry {
        ReportEntry {
            category: ScanCategory::Web,
            identifier: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            explanation: None,
            violations: vec![ComplianceViolation::new("PCI DSS 6.5.7", "xss")],
            degraded: false,
        }
    }

    #[test]
    fn script_names_top_entries_and_counts_the_rest() {
        let report = SecurityReport {
            generated_at: Utc::now(),
            prompt: String::new(),
            categories: Vec::new(),
            entries: (0..7).map(|i| entry(&format!("Issue {i}"))).collect(),
        };
        let script = narration_script(&report);
        assert!(script.starts_with("The security scan completed and found 7 issues."));
        assert!(script.contains("Issue 0. It relates to PCI DSS 6.5.7."));
        assert!(!script.contains("Issue 5."));
        assert!(script.ends_with("2 more issues are listed in the written report."));
    }

    #[test]
    fn empty_report_script() {
        let report = SecurityReport {
            generated_at: Utc::now(),
            prompt: String::new(),
            categories: Vec::new(),
            entries: Vec::new(),
        };
        assert_eq!(
            narration_script(&report),
            "The security scan completed and found no issues."
        );
    }
}
