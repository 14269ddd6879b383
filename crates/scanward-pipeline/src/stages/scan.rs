use async_trait::async_trait;
use scanward_core::domain::{ScanwardError, StageId, StageOutput, StateKey};
use tracing::info;

use super::{StageContext, StageHandler};
use crate::dispatcher::ToolDispatcher;

/// Dispatches the request's sources to scan tools.
pub struct ScanStage {
    dispatcher: ToolDispatcher,
}

impl ScanStage {
    pub fn new(dispatcher: ToolDispatcher) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl StageHandler for ScanStage {
    fn stage(&self) -> StageId {
        StageId::Scan
    }

    fn requires(&self) -> &'static [StateKey] {
        &[]
    }

    fn produces(&self) -> StateKey {
        StateKey::ScanResults
    }

    async fn run(&self, ctx: &StageContext<'_>) -> Result<StageOutput, ScanwardError> {
        let results = self.dispatcher.dispatch(ctx.request, ctx.cancel).await?;
        info!(
            run_id = ctx.run_id,
            findings = results.items().len(),
            status = ?results.status(),
            "scan stage complete"
        );
        Ok(StageOutput::ScanResults(results))
    }
}
