//! Scanward Core Library
//!
//! Domain model, retry policy, provider seam, cancellation and job boundary
//! shared by the retrieval, pipeline and provider crates.

pub mod cancel;
pub mod config;
pub mod domain;
pub mod fakes;
pub mod jobs;
pub mod metrics;
pub mod obs;
pub mod parallel;
pub mod provider;
pub mod retry;
pub mod telemetry;

pub use cancel::CancellationToken;
pub use config::{ProviderConfig, ScanwardConfig, ToolCommands};
pub use domain::{
    AnnotatedItem, ArtifactRef, CategoryResult, CategorySummary, ComplianceArtifact,
    ComplianceReport, ComplianceSource, ComplianceViolation, ConfigurationError, DepthLevel,
    ExplanationArtifact, Finding, NarrationArtifact, PipelineRequest, PipelineState, PlanSequence,
    ProviderError, ReportArtifact, ReportEntry, Result, RetrievalContext, RetrievedChunk,
    ScanArtifact, ScanCategory, ScanOutcome, ScanResults, ScanStatus, ScanwardError,
    SecurityReport, SkipReason, SkippedSource, SourceOutcome, StageId, StageOutput, StateKey,
    ToolExecutionError, ValidationError,
};
pub use jobs::{JobError, JobId, JobQueue, JobRunner, JobSnapshot, JobStatus, LocalJobQueue};
pub use metrics::METRICS;
pub use parallel::{execute_bounded, TaskOutcome};
pub use provider::{complete_with_retry, CompletionClient};
pub use retry::{parse_retry_hint, retry_async, RetryDecision, RetryOutcome, RetryPolicy};
pub use telemetry::init_tracing;

/// Scanward version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
