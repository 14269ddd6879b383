//! Stage Orchestrator: execute a plan over one run's state.
//!
//! Stages run strictly in plan order, one at a time. Before a stage runs its
//! handler must exist and its required keys must be in state; either failure
//! aborts the run without invoking the stage. Partial state is returned on
//! abort.

use std::time::Instant;

use scanward_core::domain::{
    ConfigurationError, PipelineRequest, PipelineState, PlanSequence, ScanwardError, StageId,
};
use scanward_core::metrics::METRICS;
use scanward_core::obs;
use scanward_core::CancellationToken;
use serde::{Deserialize, Serialize};
use tracing::{info_span, Instrument};

use crate::stages::{StageContext, StageRegistry};

/// Terminal state of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Aborted {
        /// Error kind, e.g. `configuration` or `stage`.
        kind: String,
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        stage: Option<StageId>,
    },
}

/// Result of a run: terminal status plus the state accumulated so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: String,
    #[serde(flatten)]
    pub status: RunStatus,
    pub plan: PlanSequence,
    pub executed: Vec<StageId>,
    pub state: PipelineState,
    pub duration_ms: u64,
}

impl PipelineRun {
    pub fn is_completed(&self) -> bool {
        matches!(self.status, RunStatus::Completed)
    }
}

pub struct StageOrchestrator {
    registry: StageRegistry,
}

impl StageOrchestrator {
    pub fn new(registry: StageRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    /// Every planned stage must have a handler.
    pub fn validate(&self, plan: &PlanSequence) -> Result<(), ConfigurationError> {
        for stage in plan.stages() {
            if self.registry.get(*stage).is_none() {
                return Err(ConfigurationError::MissingHandler { stage: *stage });
            }
        }
        Ok(())
    }

    /// Run `plan` to completion or first fatal error.
    pub async fn run(
        &self,
        run_id: &str,
        plan: &PlanSequence,
        request: &PipelineRequest,
        cancel: &CancellationToken,
    ) -> PipelineRun {
        let span = info_span!("scanward.run", run_id = %run_id);
        self.run_inner(run_id, plan, request, cancel)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        run_id: &str,
        plan: &PlanSequence,
        request: &PipelineRequest,
        cancel: &CancellationToken,
    ) -> PipelineRun {
        let started = Instant::now();
        let mut state = PipelineState::new();
        let mut executed = Vec::with_capacity(plan.len());
        obs::emit_run_started(run_id, &plan.to_string());

        let result = match self.validate(plan) {
            Ok(()) => {
                self.execute(run_id, plan, request, cancel, &mut state, &mut executed)
                    .await
            }
            Err(e) => Err((None, ScanwardError::from(e))),
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let status = match result {
            Ok(()) => {
                obs::emit_run_finished(run_id, duration_ms, executed.len());
                RunStatus::Completed
            }
            Err((stage, error)) => {
                obs::emit_run_aborted(run_id, stage.map(|s| s.as_str()), &error);
                RunStatus::Aborted {
                    kind: error.kind().to_string(),
                    reason: error.to_string(),
                    stage,
                }
            }
        };

        PipelineRun {
            run_id: run_id.to_string(),
            status,
            plan: plan.clone(),
            executed,
            state,
            duration_ms,
        }
    }

    async fn execute(
        &self,
        run_id: &str,
        plan: &PlanSequence,
        request: &PipelineRequest,
        cancel: &CancellationToken,
        state: &mut PipelineState,
        executed: &mut Vec<StageId>,
    ) -> Result<(), (Option<StageId>, ScanwardError)> {
        for (position, stage) in plan.stages().iter().copied().enumerate() {
            if cancel.is_cancelled() {
                return Err((Some(stage), ScanwardError::Cancelled));
            }

            let handler = self.registry.get(stage).ok_or((
                Some(stage),
                ScanwardError::from(ConfigurationError::MissingHandler { stage }),
            ))?;

            if let Some(key) = handler.requires().iter().find(|k| !state.contains(**k)) {
                obs::emit_dependency_missing(run_id, stage.as_str(), key.as_str());
                return Err((
                    Some(stage),
                    ConfigurationError::MissingDependency { stage, key: *key }.into(),
                ));
            }

            obs::emit_stage_started(run_id, stage.as_str(), position);
            let stage_started = Instant::now();
            let ctx = StageContext {
                run_id,
                request,
                state: &*state,
                cancel,
            };
            let output = handler.run(&ctx).await.map_err(|e| (Some(stage), e))?;

            if output.key() != handler.produces() {
                return Err((
                    Some(stage),
                    ConfigurationError::Invalid(format!(
                        "stage {stage} produced '{}' but declares '{}'",
                        output.key(),
                        handler.produces()
                    ))
                    .into(),
                ));
            }
            // A result that lands after cancellation is not merged.
            if cancel.is_cancelled() {
                return Err((Some(stage), ScanwardError::Cancelled));
            }
            let key = state
                .record(output)
                .map_err(|e| (Some(stage), ScanwardError::from(e)))?;

            METRICS.inc_stages();
            executed.push(stage);
            obs::emit_stage_finished(
                run_id,
                stage.as_str(),
                key.as_str(),
                stage_started.elapsed().as_millis() as u64,
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use scanward_core::domain::{
        NarrationArtifact, ReportArtifact, ScanCategory, ScanResults, SecurityReport,
        StageOutput, StateKey,
    };

    use crate::stages::StageHandler;

    /// Records its invocation and returns an empty payload for its key.
    struct Recording {
        stage: StageId,
        requires: &'static [StateKey],
        produces: StateKey,
        log: Arc<Mutex<Vec<StageId>>>,
        fail: bool,
    }

    #[async_trait]
    impl StageHandler for Recording {
        fn stage(&self) -> StageId {
            self.stage
        }

        fn requires(&self) -> &'static [StateKey] {
            self.requires
        }

        fn produces(&self) -> StateKey {
            self.produces
        }

        async fn run(&self, _ctx: &StageContext<'_>) -> Result<StageOutput, ScanwardError> {
            self.log.lock().unwrap().push(self.stage);
            if self.fail {
                return Err(ScanwardError::Stage {
                    stage: self.stage,
                    reason: "boom".into(),
                });
            }
            Ok(match self.produces {
                StateKey::ScanResults => StageOutput::ScanResults(ScanResults::default()),
                StateKey::Explanations => StageOutput::Explanations(Default::default()),
                StateKey::Compliance => StageOutput::Compliance(Default::default()),
                StateKey::Report => StageOutput::Report(ReportArtifact {
                    report: SecurityReport {
                        generated_at: chrono::Utc::now(),
                        prompt: String::new(),
                        categories: Vec::new(),
                        entries: Vec::new(),
                    },
                    location: None,
                }),
                StateKey::Narration => StageOutput::Narration(NarrationArtifact {
                    script: String::new(),
                    location: None,
                }),
            })
        }
    }

    fn registry(log: &Arc<Mutex<Vec<StageId>>>, failing: Option<StageId>) -> StageRegistry {
        let spec: [(StageId, &'static [StateKey], StateKey); 5] = [
            (StageId::Scan, &[], StateKey::ScanResults),
            (StageId::Explain, &[StateKey::ScanResults], StateKey::Explanations),
            (StageId::Compliance, &[StateKey::ScanResults], StateKey::Compliance),
            (StageId::Report, &[StateKey::ScanResults], StateKey::Report),
            (StageId::Narrate, &[StateKey::Report], StateKey::Narration),
        ];
        spec.into_iter()
            .fold(StageRegistry::new(), |r, (stage, requires, produces)| {
                r.with(Arc::new(Recording {
                    stage,
                    requires,
                    produces,
                    log: Arc::clone(log),
                    fail: failing == Some(stage),
                }))
            })
    }

    fn request() -> PipelineRequest {
        PipelineRequest::new(vec!["https://h/o/r.git".into()], [ScanCategory::Code], "").unwrap()
    }

    #[tokio::test]
    async fn stages_run_once_in_plan_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let orchestrator = StageOrchestrator::new(registry(&log, None));
        let plan = PlanSequence::full();

        let run = orchestrator
            .run("r1", &plan, &request(), &CancellationToken::new())
            .await;

        assert!(run.is_completed());
        assert_eq!(*log.lock().unwrap(), StageId::ALL.to_vec());
        assert_eq!(run.executed, StageId::ALL.to_vec());
        assert_eq!(run.state.keys().len(), 5);
    }

    #[tokio::test]
    async fn missing_dependency_aborts_before_stage_runs() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let orchestrator = StageOrchestrator::new(registry(&log, None));
        let plan = PlanSequence::new(vec![StageId::Scan, StageId::Narrate]).unwrap();

        let run = orchestrator
            .run("r2", &plan, &request(), &CancellationToken::new())
            .await;

        assert_eq!(
            run.status,
            RunStatus::Aborted {
                kind: "configuration".into(),
                reason: ScanwardError::from(ConfigurationError::MissingDependency {
                    stage: StageId::Narrate,
                    key: StateKey::Report,
                })
                .to_string(),
                stage: Some(StageId::Narrate),
            }
        );
        assert_eq!(*log.lock().unwrap(), vec![StageId::Scan]);
        assert!(run.state.contains(StateKey::ScanResults));
    }

    #[tokio::test]
    async fn missing_handler_aborts_before_any_stage() {
        let log = Arc::new(Mutex::new(Vec::<StageId>::new()));
        let orchestrator = StageOrchestrator::new(StageRegistry::new());
        let run = orchestrator
            .run("r3", &PlanSequence::full(), &request(), &CancellationToken::new())
            .await;
        assert!(matches!(run.status, RunStatus::Aborted { ref kind, stage: None, .. } if kind == "configuration"));
        assert!(log.lock().unwrap().is_empty());
        assert!(run.executed.is_empty());
    }

    #[tokio::test]
    async fn stage_failure_keeps_partial_state() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let orchestrator = StageOrchestrator::new(registry(&log, Some(StageId::Compliance)));
        let run = orchestrator
            .run("r4", &PlanSequence::full(), &request(), &CancellationToken::new())
            .await;

        assert!(matches!(run.status, RunStatus::Aborted { stage: Some(StageId::Compliance), .. }));
        assert_eq!(run.executed, vec![StageId::Scan, StageId::Explain]);
        assert!(run.state.contains(StateKey::Explanations));
        assert!(!run.state.contains(StateKey::Report));
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_next_stage() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let orchestrator = StageOrchestrator::new(registry(&log, None));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let run = orchestrator
            .run("r5", &PlanSequence::full(), &request(), &cancel)
            .await;
        assert!(matches!(run.status, RunStatus::Aborted { ref kind, .. } if kind == "cancelled"));
        assert!(log.lock().unwrap().is_empty());
    }
}
