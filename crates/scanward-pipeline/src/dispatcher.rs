//! Tool Dispatcher: route sources to scan tools and invoke them with retry.
//!
//! Routing is by source format. Each matched (source, tool) pair runs in its
//! own task under the tool retry policy; outcomes are merged by category key,
//! so completion order never affects the result.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use scanward_core::domain::{
    CategoryResult, ConfigurationError, PipelineRequest, ScanArtifact, ScanCategory, ScanOutcome,
    ScanResults, ScanStatus, SkipReason, SkippedSource, SourceOutcome, ToolExecutionError,
};
use scanward_core::metrics::METRICS;
use scanward_core::parallel::{execute_bounded, TaskOutcome};
use scanward_core::retry::{retry_async, RetryDecision, RetryPolicy};
use scanward_core::CancellationToken;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

/// External scanner for one category.
#[async_trait]
pub trait ScanTool: Send + Sync {
    fn name(&self) -> &str;

    fn category(&self) -> ScanCategory;

    /// Scan one source. Transient failures are reported as
    /// [`ToolExecutionError::Transient`] so the dispatcher can retry them.
    async fn scan(&self, source: &str) -> Result<ScanArtifact, ToolExecutionError>;
}

/// Sources routed for one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Routing {
    pub matched: BTreeMap<ScanCategory, Vec<String>>,
    pub skipped: Vec<SkippedSource>,
}

/// Split request sources by category, recording why any were skipped.
pub fn route_sources(request: &PipelineRequest) -> Routing {
    let mut routing = Routing::default();
    for source in request.sources() {
        match ScanCategory::for_source(source) {
            Some(category) if request.requests(category) => {
                let sources = routing.matched.entry(category).or_default();
                if !sources.contains(source) {
                    sources.push(source.clone());
                }
            }
            Some(category) => routing.skipped.push(SkippedSource {
                source: source.clone(),
                reason: SkipReason::CategoryNotRequested { category },
            }),
            None => routing.skipped.push(SkippedSource {
                source: source.clone(),
                reason: SkipReason::Unmatched,
            }),
        }
    }
    routing
}

#[derive(Clone)]
pub struct ToolDispatcher {
    tools: BTreeMap<ScanCategory, Arc<dyn ScanTool>>,
    policy: RetryPolicy,
    call_timeout: Duration,
    max_concurrent: usize,
}

impl ToolDispatcher {
    pub fn new(policy: RetryPolicy, call_timeout: Duration) -> Self {
        Self {
            tools: BTreeMap::new(),
            policy,
            call_timeout,
            max_concurrent: 4,
        }
    }

    /// Register `tool` for its category, replacing any previous one.
    pub fn with_tool(mut self, tool: Arc<dyn ScanTool>) -> Self {
        self.tools.insert(tool.category(), tool);
        self
    }

    pub fn with_concurrency(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn has_tool(&self, category: ScanCategory) -> bool {
        self.tools.contains_key(&category)
    }

    /// Dispatch every matched (source, tool) pair and aggregate per category.
    ///
    /// Fails only when a category with matched sources has no registered tool.
    #[instrument(skip_all, fields(sources = request.sources().len()))]
    pub async fn dispatch(
        &self,
        request: &PipelineRequest,
        cancel: &CancellationToken,
    ) -> Result<ScanResults, ConfigurationError> {
        let routing = route_sources(request);
        for skipped in &routing.skipped {
            debug!(source = %skipped.source, reason = ?skipped.reason, "source skipped");
        }

        let mut pairs = Vec::new();
        for (category, sources) in &routing.matched {
            let tool = self.tools.get(category).ok_or_else(|| {
                ConfigurationError::Invalid(format!("no scan tool registered for category {category}"))
            })?;
            for source in sources {
                pairs.push((Arc::clone(tool), source.clone()));
            }
        }

        let policy = self.policy;
        let call_timeout = self.call_timeout;
        let keys: Vec<(ScanCategory, String)> = pairs
            .iter()
            .map(|(tool, source)| (tool.category(), source.clone()))
            .collect();
        let outcomes = execute_bounded(pairs, self.max_concurrent, cancel, move |(tool, source)| {
            async move { invoke_with_retry(tool.as_ref(), &source, &policy, call_timeout).await }
        })
        .await;

        let mut per_category: BTreeMap<ScanCategory, Vec<(SourceOutcome, Option<ScanArtifact>)>> =
            BTreeMap::new();
        for ((category, source), outcome) in keys.into_iter().zip(outcomes) {
            let entry = match outcome {
                TaskOutcome::Completed(done) => done,
                TaskOutcome::Cancelled => (failed_source(&source, 0, "cancelled".to_string()), None),
                TaskOutcome::Panicked(msg) => (failed_source(&source, 0, msg), None),
            };
            per_category.entry(category).or_default().push(entry);
        }

        // Every known category gets an entry; unscanned ones carry the marker.
        let mut categories = BTreeMap::new();
        for category in ScanCategory::ALL {
            let result = match per_category.remove(&category) {
                Some(entries) => CategoryResult::Scanned(merge_category(category, entries)),
                None => CategoryResult::NoMatchingSource,
            };
            categories.insert(category, result);
        }

        let results = ScanResults {
            categories,
            skipped: routing.skipped,
        };
        info!(
            status = ?results.status(),
            categories = results.categories.len(),
            skipped = results.skipped.len(),
            "dispatch complete"
        );
        Ok(results)
    }
}

fn failed_source(source: &str, attempts: u32, error: String) -> SourceOutcome {
    SourceOutcome {
        source: source.to_string(),
        status: ScanStatus::Failure,
        attempts,
        result_count: 0,
        error: Some(error),
    }
}

/// Invoke one tool on one source, retrying transient failures only.
async fn invoke_with_retry(
    tool: &dyn ScanTool,
    source: &str,
    policy: &RetryPolicy,
    call_timeout: Duration,
) -> (SourceOutcome, Option<ScanArtifact>) {
    let outcome = retry_async(
        policy,
        tool.name(),
        |attempt| async move {
            METRICS.inc_tool_attempts();
            debug!(tool = tool.name(), source, attempt, "invoking scan tool");
            match tokio::time::timeout(call_timeout, tool.scan(source)).await {
                Ok(result) => result,
                Err(_) => Err(ToolExecutionError::Timeout {
                    tool: tool.name().to_string(),
                    timeout_ms: call_timeout.as_millis() as u64,
                }),
            }
        },
        |err: &ToolExecutionError| {
            if err.is_transient() {
                RetryDecision::Retry {
                    delay: policy.delay_from_message(&err.to_string()),
                }
            } else {
                RetryDecision::GiveUp
            }
        },
    )
    .await;

    match outcome.result {
        Ok(artifact) if artifact.status == ScanStatus::Success => (
            SourceOutcome {
                source: source.to_string(),
                status: ScanStatus::Success,
                attempts: outcome.attempts,
                result_count: artifact.results.len(),
                error: None,
            },
            Some(artifact),
        ),
        Ok(artifact) => {
            let message = if artifact.errors.is_empty() {
                "tool reported failure".to_string()
            } else {
                artifact
                    .errors
                    .iter()
                    .map(error_text)
                    .collect::<Vec<_>>()
                    .join("; ")
            };
            (failed_source(source, outcome.attempts, message), None)
        }
        Err(e) => {
            warn!(tool = tool.name(), source, attempts = outcome.attempts, error = %e, "scan failed");
            (failed_source(source, outcome.attempts, e.to_string()), None)
        }
    }
}

fn error_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Merge one category's per-source results in source order.
fn merge_category(
    category: ScanCategory,
    mut entries: Vec<(SourceOutcome, Option<ScanArtifact>)>,
) -> ScanOutcome {
    entries.sort_by(|a, b| a.0.source.cmp(&b.0.source));

    let mut results = Vec::new();
    let mut errors = Vec::new();
    let mut version = String::new();
    let mut sources = Vec::with_capacity(entries.len());
    for (source, artifact) in entries {
        if let Some(artifact) = artifact {
            results.extend(artifact.results);
            errors.extend(artifact.errors);
            if version.is_empty() {
                version = artifact.version;
            }
        }
        sources.push(source);
    }
    ScanOutcome::aggregate(category, sources, results, errors, version)
}
