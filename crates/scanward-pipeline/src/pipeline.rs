//! End-to-end pipeline: plan, then orchestrate.
//!
//! [`SecurityPipeline`] is a plain async function over a request.
//! [`PipelineJobRunner`] adapts it to the queue-agnostic job boundary.

use std::sync::Arc;

use async_trait::async_trait;
use compliance_rag::{ComplianceEnricher, KnowledgeIndex, KnowledgeRetriever};
use scanward_core::domain::{PipelineRequest, PlanSequence};
use scanward_core::jobs::JobRunner;
use scanward_core::provider::CompletionClient;
use scanward_core::{CancellationToken, ScanwardConfig};
use uuid::Uuid;

use crate::dispatcher::{ScanTool, ToolDispatcher};
use crate::orchestrator::{PipelineRun, StageOrchestrator};
use crate::planner::IntentPlanner;
use crate::stages::{
    ComplianceStage, ExplainStage, MarkdownFileRenderer, NarrateStage, ReportStage, ScanStage,
    ScriptFileNarrator, StageRegistry,
};

pub struct SecurityPipeline {
    planner: Option<IntentPlanner>,
    orchestrator: StageOrchestrator,
}

impl SecurityPipeline {
    pub fn new(orchestrator: StageOrchestrator) -> Self {
        Self {
            planner: None,
            orchestrator,
        }
    }

    pub fn with_planner(mut self, planner: IntentPlanner) -> Self {
        self.planner = Some(planner);
        self
    }

    /// Wire all five stages from configuration and injected collaborators.
    ///
    /// Reports and narration scripts are written under `config.output_dir`.
    pub fn assemble(
        config: &ScanwardConfig,
        client: Arc<dyn CompletionClient>,
        index: Arc<dyn KnowledgeIndex>,
        tools: Vec<Arc<dyn ScanTool>>,
    ) -> Self {
        let dispatcher = tools.into_iter().fold(
            ToolDispatcher::new(config.tool_retry, config.scan_timeout())
                .with_concurrency(config.concurrency),
            |d, tool| d.with_tool(tool),
        );

        let retriever = KnowledgeRetriever::new(index)
            .with_top_k(config.top_k)
            .with_timeout(config.call_timeout());
        let enricher = ComplianceEnricher::new(retriever, Arc::clone(&client))
            .with_policy(config.provider_retry)
            .with_call_timeout(config.call_timeout());

        let registry = StageRegistry::new()
            .with(Arc::new(ScanStage::new(dispatcher)))
            .with(Arc::new(
                ExplainStage::new(Arc::clone(&client))
                    .with_policy(config.provider_retry)
                    .with_call_timeout(config.call_timeout())
                    .with_concurrency(config.concurrency),
            ))
            .with(Arc::new(
                ComplianceStage::new(enricher).with_concurrency(config.concurrency),
            ))
            .with(Arc::new(ReportStage::with_renderer(Arc::new(
                MarkdownFileRenderer::new(&config.output_dir),
            ))))
            .with(Arc::new(NarrateStage::with_narrator(Arc::new(
                ScriptFileNarrator::new(&config.output_dir),
            ))));

        Self::new(StageOrchestrator::new(registry)).with_planner(
            IntentPlanner::new(client).with_call_timeout(config.call_timeout()),
        )
    }

    /// Choose a plan for `request` (full when no planner is set).
    pub async fn plan(&self, request: &PipelineRequest) -> PlanSequence {
        match &self.planner {
            Some(planner) => planner.plan(request.prompt()).await,
            None => PlanSequence::full(),
        }
    }

    pub async fn run(&self, request: &PipelineRequest, cancel: &CancellationToken) -> PipelineRun {
        let plan = self.plan(request).await;
        self.run_with_plan(request, &plan, cancel).await
    }

    pub async fn run_with_plan(
        &self,
        request: &PipelineRequest,
        plan: &PlanSequence,
        cancel: &CancellationToken,
    ) -> PipelineRun {
        self.run_as(&new_run_id(), request, plan, cancel).await
    }

    /// Run under a caller-chosen id, e.g. one already attached to a span.
    pub async fn run_as(
        &self,
        run_id: &str,
        request: &PipelineRequest,
        plan: &PlanSequence,
        cancel: &CancellationToken,
    ) -> PipelineRun {
        self.orchestrator.run(run_id, plan, request, cancel).await
    }
}

pub fn new_run_id() -> String {
    Uuid::new_v4().to_string()
}

/// Runs submitted requests through a shared pipeline.
pub struct PipelineJobRunner {
    pipeline: Arc<SecurityPipeline>,
}

impl PipelineJobRunner {
    pub fn new(pipeline: Arc<SecurityPipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl JobRunner<PipelineRequest, PipelineRun> for PipelineJobRunner {
    async fn run(&self, request: PipelineRequest) -> anyhow::Result<PipelineRun> {
        Ok(self.pipeline.run(&request, &CancellationToken::new()).await)
    }
}
