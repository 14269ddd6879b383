//! Retrieval errors.
//!
//! None of these abort a run. The enricher degrades a failed retrieval to an
//! empty context and still asks the model.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("failed to read index {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse index {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("embedding dimension mismatch: index has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("similarity search timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

pub type RetrievalResult<T> = std::result::Result<T, RetrievalError>;
