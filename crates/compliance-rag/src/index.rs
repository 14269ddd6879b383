//! Read-only knowledge index over compliance document chunks.
//!
//! The index is built offline. [`FlatVectorIndex`] loads the built file and
//! ranks chunks by cosine similarity to the embedded query; ties keep file
//! order, so identical queries always return identical lists.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{RetrievalError, RetrievalResult};

/// Metadata stored with each chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(default = "unknown_source")]
    pub source_file: String,
    #[serde(default = "unknown_file_type")]
    pub file_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<u64>,
}

fn unknown_source() -> String {
    "Unknown".to_string()
}

fn unknown_file_type() -> String {
    "unknown".to_string()
}

impl ChunkMetadata {
    pub fn new(source_file: impl Into<String>, file_type: impl Into<String>, chunk_id: u64) -> Self {
        Self {
            source_file: source_file.into(),
            file_type: file_type.into(),
            chunk_id: Some(chunk_id),
        }
    }
}

/// One similarity-search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub content: String,
    pub metadata: ChunkMetadata,
}

impl IndexedChunk {
    pub fn new(content: impl Into<String>, metadata: ChunkMetadata) -> Self {
        Self {
            content: content.into(),
            metadata,
        }
    }
}

/// `similarity_search(query, k)`: at most `k` chunks, most similar first.
#[async_trait]
pub trait KnowledgeIndex: Send + Sync {
    async fn similarity_search(&self, query: &str, k: usize) -> RetrievalResult<Vec<IndexedChunk>>;
}

/// Turns query text into a vector in the index's embedding space.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> RetrievalResult<Vec<f32>>;
}

/// On-disk entry of a built index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub content: String,
    pub metadata: ChunkMetadata,
    pub embedding: Vec<f32>,
}

/// On-disk layout of a built index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexFile {
    pub dimension: usize,
    #[serde(default)]
    pub embedding_model: Option<String>,
    pub entries: Vec<IndexEntry>,
}

/// Exhaustive cosine-similarity index held in memory.
pub struct FlatVectorIndex {
    dimension: usize,
    entries: Vec<IndexEntry>,
    embedder: Arc<dyn Embedder>,
}

impl FlatVectorIndex {
    pub fn new(file: IndexFile, embedder: Arc<dyn Embedder>) -> RetrievalResult<Self> {
        if let Some(bad) = file.entries.iter().find(|e| e.embedding.len() != file.dimension) {
            return Err(RetrievalError::DimensionMismatch {
                expected: file.dimension,
                actual: bad.embedding.len(),
            });
        }
        Ok(Self {
            dimension: file.dimension,
            entries: file.entries,
            embedder,
        })
    }

    /// Load a built index from a JSON file.
    pub async fn load(path: &Path, embedder: Arc<dyn Embedder>) -> RetrievalResult<Self> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|source| RetrievalError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: IndexFile = serde_json::from_str(&raw).map_err(|source| RetrievalError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let index = Self::new(file, embedder)?;
        info!(
            path = %path.display(),
            entries = index.len(),
            dimension = index.dimension,
            "knowledge index loaded"
        );
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KnowledgeIndex for FlatVectorIndex {
    async fn similarity_search(&self, query: &str, k: usize) -> RetrievalResult<Vec<IndexedChunk>> {
        let query_vec = self.embedder.embed(query).await?;
        if query_vec.len() != self.dimension {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.dimension,
                actual: query_vec.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, cosine(&query_vec, &e.embedding)))
            .collect();
        // Stable sort: equal scores keep file order.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);

        debug!(query_len = query.len(), hits = scored.len(), "similarity search");
        Ok(scored
            .into_iter()
            .map(|(i, _)| {
                let e = &self.entries[i];
                IndexedChunk::new(e.content.clone(), e.metadata.clone())
            })
            .collect())
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}
