//! Knowledge Retriever: top-k lookup plus per-source chunk merge.

use std::sync::Arc;
use std::time::Duration;

use scanward_core::domain::{ComplianceSource, RetrievalContext, RetrievedChunk};
use serde::Serialize;
use tracing::debug;

use crate::error::{RetrievalError, RetrievalResult};
use crate::index::{IndexedChunk, KnowledgeIndex};

/// Chunks retrieved per query unless configured otherwise.
pub const DEFAULT_TOP_K: usize = 5;

/// Characters of chunk content kept in a source preview.
pub const PREVIEW_CHARS: usize = 100;

/// Ordered context plus the sources it came from, one entry per file.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Retrieval {
    pub context: RetrievalContext,
    pub sources: Vec<ComplianceSource>,
}

impl Retrieval {
    pub fn is_empty(&self) -> bool {
        self.context.is_empty()
    }
}

#[derive(Clone)]
pub struct KnowledgeRetriever {
    index: Arc<dyn KnowledgeIndex>,
    k: usize,
    timeout: Duration,
}

impl KnowledgeRetriever {
    pub fn new(index: Arc<dyn KnowledgeIndex>) -> Self {
        Self {
            index,
            k: DEFAULT_TOP_K,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_top_k(mut self, k: usize) -> Self {
        self.k = k.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn top_k(&self) -> usize {
        self.k
    }

    /// Search the index and merge hits by source file.
    pub async fn retrieve(&self, query: &str) -> RetrievalResult<Retrieval> {
        let hits = tokio::time::timeout(self.timeout, self.index.similarity_search(query, self.k))
            .await
            .map_err(|_| RetrievalError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            })??;

        let retrieval = merge_hits(hits, self.k);
        debug!(
            chunks = retrieval.context.len(),
            sources = retrieval.sources.len(),
            "retrieved compliance context"
        );
        Ok(retrieval)
    }
}

/// Group ranked hits by source file.
///
/// Sources keep first-seen order. Chunk ids are a sorted set; a hit without a
/// chunk id uses its rank. Previews are deduplicated per source.
pub fn merge_hits(hits: Vec<IndexedChunk>, k: usize) -> Retrieval {
    let mut sources: Vec<ComplianceSource> = Vec::new();
    let mut chunks = Vec::with_capacity(hits.len().min(k));

    for (rank, hit) in hits.into_iter().take(k).enumerate() {
        let chunk_id = hit.metadata.chunk_id.unwrap_or(rank as u64);
        let preview = preview(&hit.content);

        let pos = match sources
            .iter()
            .position(|s| s.source_file == hit.metadata.source_file)
        {
            Some(pos) => pos,
            None => {
                sources.push(ComplianceSource::new(
                    hit.metadata.source_file.clone(),
                    hit.metadata.file_type.clone(),
                ));
                sources.len() - 1
            }
        };
        let source = &mut sources[pos];
        source.file_type = hit.metadata.file_type.clone();
        source.chunk_ids.insert(chunk_id);
        if !source.previews.contains(&preview) {
            source.previews.push(preview);
        }

        chunks.push(RetrievedChunk {
            content: hit.content,
            source_file: hit.metadata.source_file,
            file_type: hit.metadata.file_type,
            chunk_id,
        });
    }

    Retrieval {
        context: RetrievalContext::new(chunks, k),
        sources,
    }
}

/// First [`PREVIEW_CHARS`] characters, with `...` when truncated.
pub fn preview(content: &str) -> String {
    match content.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &content[..cut]),
        None => content.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::StaticIndex;
    use crate::index::ChunkMetadata;

    #[test]
    fn chunk_ids_merge_sorted_and_deduplicated() {
        let hits = vec![
            IndexedChunk::new("a1", ChunkMetadata::new("A.pdf", "pdf", 1)),
            IndexedChunk::new("b4", ChunkMetadata::new("B.md", "md", 4)),
            IndexedChunk::new("a3", ChunkMetadata::new("A.pdf", "pdf", 3)),
            IndexedChunk::new("a3", ChunkMetadata::new("A.pdf", "pdf", 3)),
            IndexedChunk::new("b2", ChunkMetadata::new("B.md", "md", 2)),
            IndexedChunk::new("a5", ChunkMetadata::new("A.pdf", "pdf", 5)),
        ];
        let merged = merge_hits(hits, 10);

        assert_eq!(merged.sources.len(), 2);
        assert_eq!(merged.sources[0].source_file, "A.pdf");
        assert_eq!(
            merged.sources[0].chunk_ids.iter().copied().collect::<Vec<_>>(),
            vec![1, 3, 5]
        );
        assert_eq!(
            merged.sources[1].chunk_ids.iter().copied().collect::<Vec<_>>(),
            vec![2, 4]
        );
        assert_eq!(merged.sources[0].previews, vec!["a1", "a3", "a5"]);
        assert_eq!(merged.context.len(), 6);
    }

    #[test]
    fn missing_chunk_id_falls_back_to_rank() {
        let mut meta = ChunkMetadata::new("A.pdf", "pdf", 0);
        meta.chunk_id = None;
        let hits = vec![
            IndexedChunk::new("x", ChunkMetadata::new("B.pdf", "pdf", 9)),
            IndexedChunk::new("y", meta),
        ];
        let merged = merge_hits(hits, 5);
        assert_eq!(merged.context.chunks()[1].chunk_id, 1);
    }

    #[test]
    fn previews_are_truncated_on_char_boundaries() {
        let long = "é".repeat(150);
        let p = preview(&long);
        assert!(p.ends_with("..."));
        assert_eq!(p.chars().count(), PREVIEW_CHARS + 3);
        assert_eq!(preview("short"), "short");
    }

    #[tokio::test]
    async fn retrieve_caps_context_at_k() {
        let index = StaticIndex::from_triples(&[
            ("A.pdf", 1, "one"),
            ("A.pdf", 2, "two"),
            ("B.pdf", 3, "three"),
        ]);
        let retriever = KnowledgeRetriever::new(Arc::new(index)).with_top_k(2);
        let retrieval = retriever.retrieve("sql injection").await.unwrap();
        assert_eq!(retrieval.context.len(), 2);
        assert_eq!(retrieval.sources.len(), 1);
    }

    #[tokio::test]
    async fn identical_queries_yield_identical_context() {
        let index = Arc::new(StaticIndex::from_triples(&[
            ("A.pdf", 1, "one"),
            ("B.pdf", 2, "two"),
        ]));
        let retriever = KnowledgeRetriever::new(index);
        let a = retriever.retrieve("q").await.unwrap();
        let b = retriever.retrieve("q").await.unwrap();
        assert_eq!(a, b);
    }
}
