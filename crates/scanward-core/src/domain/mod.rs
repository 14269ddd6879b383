//! Domain models for Scanward.
//!
//! Canonical definitions for the core entities:
//! - `PipelineRequest`: what to scan and how deep to go
//! - `PlanSequence`: validated, ordered stage list
//! - `PipelineState`: append-only stage outputs for one run
//! - `Finding` / `ComplianceReport`: the enrichment vocabulary

pub mod error;
pub mod finding;
pub mod plan;
pub mod report;
pub mod request;
pub mod scan;
pub mod state;

pub use error::{
    ConfigurationError, ProviderError, Result, ScanwardError, ToolExecutionError, ValidationError,
};
pub use finding::{
    ComplianceReport, ComplianceSource, ComplianceViolation, Finding, RetrievalContext,
    RetrievedChunk,
};
pub use plan::{DepthLevel, PlanSequence, StageId};
pub use report::{
    AnnotatedItem, CategorySummary, ComplianceArtifact, ExplanationArtifact, NarrationArtifact,
    ReportArtifact, ReportEntry, SecurityReport,
};
pub use request::{PipelineRequest, ScanCategory};
pub use scan::{
    ArtifactRef, CategoryResult, ScanArtifact, ScanOutcome, ScanResults, ScanStatus, SkipReason,
    SkippedSource, SourceOutcome,
};
pub use state::{PipelineState, StageOutput, StateKey};
