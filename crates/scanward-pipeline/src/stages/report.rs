//! Report stage: assemble a [`SecurityReport`] from state and render it.
//!
//! Rendering goes through [`ReportRenderer`]; the markdown file renderer is
//! the in-tree implementation. PDF and translated output live elsewhere.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use scanward_core::domain::{
    CategoryResult, CategorySummary, PipelineRequest, PipelineState, ReportArtifact, ReportEntry,
    ScanwardError, SecurityReport, StageId, StageOutput, StateKey,
};
use tracing::info;

use super::{latest_items, StageContext, StageHandler};

/// Build the structured report from whatever stages have run.
pub fn assemble_report(request: &PipelineRequest, state: &PipelineState) -> SecurityReport {
    let categories = state
        .scan_results()
        .map(|scan| {
            scan.categories
                .iter()
                .map(|(category, result)| match result {
                    CategoryResult::NoMatchingSource => CategorySummary {
                        category: *category,
                        status: None,
                        findings: 0,
                        errors: Vec::new(),
                    },
                    CategoryResult::Scanned(outcome) => CategorySummary {
                        category: *category,
                        status: Some(outcome.status),
                        findings: outcome.artifact.results.len(),
                        errors: outcome
                            .sources
                            .iter()
                            .filter_map(|s| s.error.as_ref().map(|e| format!("{}: {e}", s.source)))
                            .collect(),
                    },
                })
                .collect()
        })
        .unwrap_or_default();

    let entries = latest_items(state)
        .into_iter()
        .map(|item| {
            let finding = item.finding();
            ReportEntry {
                category: item.category,
                identifier: item.identifier.clone(),
                name: finding.name,
                description: finding.description,
                explanation: item.explanation().map(str::to_string),
                violations: item.violations(),
                degraded: item.is_degraded(),
            }
        })
        .collect();

    SecurityReport {
        generated_at: Utc::now(),
        prompt: request.prompt().to_string(),
        categories,
        entries,
    }
}

/// Render a report as markdown.
pub fn render_markdown(report: &SecurityReport) -> String {
    let mut out = String::new();
    out.push_str("# Security Report\n\n");
    out.push_str(&format!("- generated: {}\n", report.generated_at.to_rfc3339()));
    if !report.prompt.is_empty() {
        out.push_str(&format!("- request: {}\n", report.prompt));
    }
    out.push_str(&format!("- findings: {}\n", report.total_findings()));
    if report.degraded_entries() > 0 {
        out.push_str(&format!("- degraded entries: {}\n", report.degraded_entries()));
    }
    out.push('\n');

    out.push_str("## Scans\n");
    for summary in &report.categories {
        let status = match summary.status {
            Some(status) => format!("{status:?}").to_lowercase(),
            None => "no matching source".to_string(),
        };
        out.push_str(&format!(
            "- {}: {} ({} findings)\n",
            summary.category, status, summary.findings
        ));
        for error in &summary.errors {
            out.push_str(&format!("  - error: {error}\n"));
        }
    }
    out.push('\n');

    if !report.entries.is_empty() {
        out.push_str("## Findings\n");
    }
    for entry in &report.entries {
        out.push_str(&format!("\n### [{}] {}\n\n", entry.category, entry.identifier));
        if !entry.description.is_empty() {
            out.push_str(&format!("{}\n\n", entry.description));
        }
        if let Some(explanation) = &entry.explanation {
            out.push_str("#### Explanation\n\n");
            out.push_str(explanation.trim());
            out.push_str("\n\n");
        }
        if !entry.violations.is_empty() {
            out.push_str("#### Compliance\n\n");
            for v in &entry.violations {
                out.push_str(&format!("- **{}**: {}\n", v.regulation, v.reason));
            }
            if entry.degraded {
                out.push_str("- _unstructured or failed compliance answer_\n");
            }
            out.push('\n');
        }
    }
    out
}

/// Publishes a rendered report, returning where it went.
#[async_trait]
pub trait ReportRenderer: Send + Sync {
    async fn render(
        &self,
        run_id: &str,
        report: &SecurityReport,
    ) -> Result<Option<String>, ScanwardError>;
}

/// Writes `<dir>/<run_id>-report.md` plus the JSON report beside it.
pub struct MarkdownFileRenderer {
    dir: PathBuf,
}

impl MarkdownFileRenderer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl ReportRenderer for MarkdownFileRenderer {
    async fn render(
        &self,
        run_id: &str,
        report: &SecurityReport,
    ) -> Result<Option<String>, ScanwardError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let md_path = self.dir.join(format!("{run_id}-report.md"));
        let json_path = self.dir.join(format!("{run_id}-report.json"));

        tokio::fs::write(&md_path, render_markdown(report)).await?;
        tokio::fs::write(&json_path, serde_json::to_string_pretty(report)?).await?;
        Ok(Some(md_path.display().to_string()))
    }
}

pub struct ReportStage {
    renderer: Option<Arc<dyn ReportRenderer>>,
}

impl ReportStage {
    /// Assemble only; nothing is written.
    pub fn new() -> Self {
        Self { renderer: None }
    }

    pub fn with_renderer(renderer: Arc<dyn ReportRenderer>) -> Self {
        Self {
            renderer: Some(renderer),
        }
    }
}

impl Default for ReportStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StageHandler for ReportStage {
    fn stage(&self) -> StageId {
        StageId::Report
    }

    fn requires(&self) -> &'static [StateKey] {
        &[StateKey::ScanResults]
    }

    fn produces(&self) -> StateKey {
        StateKey::Report
    }

    async fn run(&self, ctx: &StageContext<'_>) -> Result<StageOutput, ScanwardError> {
        let report = assemble_report(ctx.request, ctx.state);
        let location = match &self.renderer {
            Some(renderer) => renderer.render(ctx.run_id, &report).await?,
            None => None,
        };
        info!(
            run_id = ctx.run_id,
            findings = report.total_findings(),
            degraded = report.degraded_entries(),
            location = location.as_deref().unwrap_or("-"),
            "report stage complete"
        );
        Ok(StageOutput::Report(ReportArtifact { report, location }))
    }
}
