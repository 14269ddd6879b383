//! In-memory index and embedder doubles (testing only).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{RetrievalError, RetrievalResult};
use crate::index::{ChunkMetadata, Embedder, IndexedChunk, KnowledgeIndex};

/// Index that returns the same hits for every query.
#[derive(Debug, Default)]
pub struct StaticIndex {
    hits: Vec<IndexedChunk>,
    queries: Mutex<Vec<String>>,
    fail_with: Option<String>,
}

impl StaticIndex {
    pub fn new(hits: Vec<IndexedChunk>) -> Self {
        Self {
            hits,
            ..Self::default()
        }
    }

    /// Build hits from `(source_file, chunk_id, content)` triples.
    pub fn from_triples(triples: &[(&str, u64, &str)]) -> Self {
        Self::new(
            triples
                .iter()
                .map(|(file, id, content)| {
                    IndexedChunk::new(*content, ChunkMetadata::new(*file, "pdf", *id))
                })
                .collect(),
        )
    }

    /// Index whose every search fails.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            fail_with: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl KnowledgeIndex for StaticIndex {
    async fn similarity_search(&self, query: &str, k: usize) -> RetrievalResult<Vec<IndexedChunk>> {
        self.queries.lock().unwrap().push(query.to_string());
        if let Some(message) = &self.fail_with {
            return Err(RetrievalError::Embedding(message.clone()));
        }
        Ok(self.hits.iter().take(k).cloned().collect())
    }
}

/// Bag-of-words embedder over a fixed vocabulary: one dimension per word,
/// valued by its occurrence count in the lowercased text.
#[derive(Debug)]
pub struct VocabularyEmbedder {
    vocabulary: Vec<String>,
    calls: AtomicUsize,
}

impl VocabularyEmbedder {
    pub fn new(vocabulary: &[&str]) -> Self {
        Self {
            vocabulary: vocabulary.iter().map(|w| w.to_lowercase()).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for VocabularyEmbedder {
    async fn embed(&self, text: &str) -> RetrievalResult<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let lower = text.to_lowercase();
        Ok(self
            .vocabulary
            .iter()
            .map(|word| lower.matches(word.as_str()).count() as f32)
            .collect())
    }
}
