//! Structured observability hooks for pipeline run lifecycle events.
//!
//! Events are emitted at `info!` level (filter with `SCANWARD_LOG`).
//! For JSON output, start the binary with `--json`.

use tracing::{info, warn};

/// RAII guard that enters a run-scoped tracing span for the duration of a run.
///
/// ```ignore
/// let _span = RunSpan::enter("run-12345");
/// // every event below is tagged with run_id = "run-12345"
/// ```
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    pub fn enter(run_id: &str) -> Self {
        let span = tracing::info_span!("scanward.run", run_id = %run_id);
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_run_started(run_id: &str, plan: &str) {
    info!(event = "run.started", run_id = %run_id, plan = %plan);
}

pub fn emit_stage_started(run_id: &str, stage: &str, position: usize) {
    info!(event = "stage.started", run_id = %run_id, stage = %stage, position = position);
}

pub fn emit_stage_finished(run_id: &str, stage: &str, output_key: &str, duration_ms: u64) {
    info!(
        event = "stage.finished",
        run_id = %run_id,
        stage = %stage,
        output_key = %output_key,
        duration_ms = duration_ms,
    );
}

/// A stage's required input was never produced. Always fatal.
pub fn emit_dependency_missing(run_id: &str, stage: &str, key: &str) {
    warn!(event = "stage.dependency_missing", run_id = %run_id, stage = %stage, key = %key);
}

pub fn emit_run_finished(run_id: &str, duration_ms: u64, stages_executed: usize) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        stages_executed = stages_executed,
    );
}

pub fn emit_run_aborted(run_id: &str, stage: Option<&str>, error: &dyn std::fmt::Display) {
    warn!(
        event = "run.aborted",
        run_id = %run_id,
        stage = stage.unwrap_or("-"),
        error = %error,
    );
}

pub fn emit_rate_limited(item: &str, attempt: u32) {
    warn!(event = "provider.rate_limited", item = %item, attempt = attempt);
}
