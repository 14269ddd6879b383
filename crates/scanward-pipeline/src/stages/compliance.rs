//! Compliance stage: enrich every scanned item with regulations it violates.
//!
//! Builds on the explained items when the explain stage ran first.

use async_trait::async_trait;
use compliance_rag::ComplianceEnricher;
use scanward_core::domain::{
    AnnotatedItem, ComplianceArtifact, ScanwardError, StageId, StageOutput, StateKey,
};
use tracing::info;

use super::{scanned_items, StageContext, StageHandler};

pub struct ComplianceStage {
    enricher: ComplianceEnricher,
    max_concurrent: usize,
}

impl ComplianceStage {
    pub fn new(enricher: ComplianceEnricher) -> Self {
        Self {
            enricher,
            max_concurrent: 4,
        }
    }

    pub fn with_concurrency(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }
}

#[async_trait]
impl StageHandler for ComplianceStage {
    fn stage(&self) -> StageId {
        StageId::Compliance
    }

    fn requires(&self) -> &'static [StateKey] {
        &[StateKey::ScanResults]
    }

    fn produces(&self) -> StateKey {
        StateKey::Compliance
    }

    async fn run(&self, ctx: &StageContext<'_>) -> Result<StageOutput, ScanwardError> {
        // Validates the scan artifact even when explanations are reused.
        let scanned = scanned_items(StageId::Compliance, ctx.state)?;
        let items: Vec<AnnotatedItem> = match ctx.state.explanations() {
            Some(explained) => explained.items.clone(),
            None => scanned,
        };

        let findings = items.iter().map(AnnotatedItem::finding).collect();
        let reports = self
            .enricher
            .enrich_batch(findings, self.max_concurrent, ctx.cancel)
            .await;

        let mut degraded = 0;
        let mut annotated = Vec::with_capacity(items.len());
        for (mut item, report) in items.into_iter().zip(reports) {
            if report.degraded {
                degraded += 1;
            }
            item.set_compliance(&report);
            annotated.push(item);
        }

        info!(
            run_id = ctx.run_id,
            total = annotated.len(),
            degraded,
            "compliance stage complete"
        );
        Ok(StageOutput::Compliance(ComplianceArtifact {
            items: annotated,
            degraded,
        }))
    }
}
