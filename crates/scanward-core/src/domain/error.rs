//! Domain-level error taxonomy for Scanward.
//!
//! Item-level failures (one source, one finding) are recorded as data inside
//! stage payloads. Only validation, configuration and stage-level errors
//! travel through these types and abort a run.

use crate::domain::plan::StageId;
use crate::domain::state::StateKey;

/// Malformed request or identifier. Fatal, never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("request must contain at least one source")]
    NoSources,

    #[error("request must select at least one scan category")]
    NoCategories,

    #[error("source at position {index} is empty")]
    EmptySource { index: usize },

    #[error("unknown scan category: {value}")]
    UnknownCategory { value: String },

    #[error("malformed source identifier '{identifier}': {reason}")]
    MalformedSource { identifier: String, reason: String },
}

/// Plan or wiring problem detected before the offending stage executes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("unknown stage identifier: {token}")]
    UnknownStage { token: String },

    #[error("plan sequence must not be empty")]
    EmptyPlan,

    #[error("stage {stage} appears more than once in the plan")]
    DuplicateStage { stage: StageId },

    #[error("stage {stage} requires state key '{key}' which no earlier stage produced")]
    MissingDependency { stage: StageId, key: StateKey },

    #[error("no handler registered for stage {stage}")]
    MissingHandler { stage: StageId },

    #[error("state key '{key}' was already written in this run")]
    StateKeyRewritten { key: StateKey },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Failure reported by an external scan tool for one source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolExecutionError {
    #[error("tool '{tool}' transient failure: {message}")]
    Transient { tool: String, message: String },

    #[error("tool '{tool}' rejected input: {message}")]
    Validation { tool: String, message: String },

    #[error("tool '{tool}' timed out after {timeout_ms}ms")]
    Timeout { tool: String, timeout_ms: u64 },

    #[error("tool '{tool}' failed: {message}")]
    Failed { tool: String, message: String },
}

impl ToolExecutionError {
    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Timeout { .. })
    }
}

/// Failure reported by the generative completion service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Rate-limit or quota exhaustion; retried with back-off.
    #[error("provider rate limited: {message}")]
    RateLimited { message: String },

    /// Any other provider failure; fails the item without retry.
    #[error("provider call failed: {message}")]
    Hard { message: String },

    #[error("provider call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

impl ProviderError {
    /// Classify a raw provider error message.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if is_rate_limit_message(&message) {
            Self::RateLimited { message }
        } else {
            Self::Hard { message }
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// The underlying message without the variant prefix.
    pub fn message(&self) -> String {
        match self {
            Self::RateLimited { message } | Self::Hard { message } => message.clone(),
            Self::Timeout { timeout_ms } => format!("timed out after {timeout_ms}ms"),
        }
    }
}

/// Whether an error message indicates rate-limit or quota exhaustion.
pub fn is_rate_limit_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    message.contains("429") || lower.contains("quota") || lower.contains("rate limit")
}

/// Scanward umbrella error.
#[derive(Debug, thiserror::Error)]
pub enum ScanwardError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("tool execution error: {0}")]
    Tool(#[from] ToolExecutionError),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("stage {stage} failed: {reason}")]
    Stage { stage: StageId, reason: String },

    #[error("run cancelled")]
    Cancelled,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScanwardError {
    /// Short machine-readable kind, used in run diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Configuration(_) => "configuration",
            Self::Tool(_) => "tool_execution",
            Self::Provider(_) => "provider",
            Self::Stage { .. } => "stage",
            Self::Cancelled => "cancelled",
            Self::Serialization(_) => "serialization",
            Self::Io(_) => "io",
        }
    }
}

/// Result type for Scanward domain operations.
pub type Result<T> = std::result::Result<T, ScanwardError>;
