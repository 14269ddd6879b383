//! Stage handlers and the enum-indexed handler registry.
//!
//! Each stage declares the state keys it reads and the one key it writes.
//! The orchestrator checks both before invoking [`StageHandler::run`].

pub mod compliance;
pub mod explain;
pub mod narrate;
pub mod report;
pub mod scan;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use scanward_core::domain::{
    AnnotatedItem, PipelineRequest, PipelineState, ScanStatus, ScanwardError, StageId, StageOutput,
    StateKey,
};
use scanward_core::CancellationToken;

pub use compliance::ComplianceStage;
pub use explain::ExplainStage;
pub use narrate::{narration_script, NarrateStage, Narrator, ScriptFileNarrator};
pub use report::{assemble_report, render_markdown, MarkdownFileRenderer, ReportRenderer, ReportStage};
pub use scan::ScanStage;

/// Read-only view of a run handed to each stage.
pub struct StageContext<'a> {
    pub run_id: &'a str,
    pub request: &'a PipelineRequest,
    pub state: &'a PipelineState,
    pub cancel: &'a CancellationToken,
}

#[async_trait]
pub trait StageHandler: Send + Sync {
    fn stage(&self) -> StageId;

    /// State keys that must exist before this stage runs.
    fn requires(&self) -> &'static [StateKey];

    /// The single key this stage writes.
    fn produces(&self) -> StateKey;

    async fn run(&self, ctx: &StageContext<'_>) -> Result<StageOutput, ScanwardError>;
}

/// Handler table keyed by stage.
#[derive(Clone, Default)]
pub struct StageRegistry {
    handlers: BTreeMap<StageId, Arc<dyn StageHandler>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn StageHandler>) -> &mut Self {
        self.handlers.insert(handler.stage(), handler);
        self
    }

    pub fn with(mut self, handler: Arc<dyn StageHandler>) -> Self {
        self.register(handler);
        self
    }

    pub fn get(&self, stage: StageId) -> Option<&Arc<dyn StageHandler>> {
        self.handlers.get(&stage)
    }

    pub fn stages(&self) -> Vec<StageId> {
        self.handlers.keys().copied().collect()
    }
}

/// Items of a successful scan, or a stage error naming `stage`.
pub(crate) fn scanned_items(
    stage: StageId,
    state: &PipelineState,
) -> Result<Vec<AnnotatedItem>, ScanwardError> {
    let scan = state.scan_results().ok_or(ScanwardError::Stage {
        stage,
        reason: format!("{} missing", StateKey::ScanResults),
    })?;
    if scan.status() != ScanStatus::Success {
        return Err(ScanwardError::Stage {
            stage,
            reason: "scan artifact status is not success".to_string(),
        });
    }
    Ok(scan
        .items()
        .into_iter()
        .map(|(category, item)| AnnotatedItem::new(category, item.clone()))
        .collect())
}

/// Most-annotated view of the scanned items available in `state`.
pub(crate) fn latest_items(state: &PipelineState) -> Vec<AnnotatedItem> {
    if let Some(compliance) = state.compliance() {
        return compliance.items.clone();
    }
    if let Some(explanations) = state.explanations() {
        return explanations.items.clone();
    }
    state
        .scan_results()
        .map(|scan| {
            scan.items()
                .into_iter()
                .map(|(category, item)| AnnotatedItem::new(category, item.clone()))
                .collect()
        })
        .unwrap_or_default()
}
