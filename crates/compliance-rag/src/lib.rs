//! Compliance RAG
//!
//! Retrieval-augmented mapping of scan findings to compliance regulations:
//!
//! - [`index`]: read-only embedding index (`similarity_search(query, k)`)
//! - [`retriever`]: top-k lookup and per-source chunk merge
//! - [`prompt`] / [`decode`]: prompt construction and tolerant answer decode
//! - [`enricher`]: per-finding and batch enrichment with rate-limit retry

pub mod decode;
pub mod enricher;
pub mod error;
pub mod fakes;
pub mod index;
pub mod prompt;
pub mod retriever;

pub use decode::{decode_violations, DecodedViolations};
pub use enricher::ComplianceEnricher;
pub use error::{RetrievalError, RetrievalResult};
pub use index::{
    ChunkMetadata, Embedder, FlatVectorIndex, IndexEntry, IndexFile, IndexedChunk, KnowledgeIndex,
};
pub use prompt::compliance_prompt;
pub use retriever::{merge_hits, KnowledgeRetriever, Retrieval, DEFAULT_TOP_K};
