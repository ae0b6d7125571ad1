//! Deepquill retrieval core
//!
//! Multi-stage retrieval over a mixed document corpus:
//! - Keyword search (BM25 term-frequency index)
//! - Vector search (semantic similarity via the external collaborator)
//! - Weighted score fusion of the two result sets
//! - Pairwise reranking of a bounded candidate set
//!
//! Each stage degrades independently: no keyword index means vector-only
//! retrieval, no reranker means passthrough ordering, and the pipeline's
//! worst case is plain vector search.

mod fusion;
mod keyword;
mod pipeline;
mod rerank;

pub use fusion::{FusionWeights, ScoreFusion};
pub use keyword::KeywordIndex;
pub use pipeline::{HybridRetrievalPipeline, MockVectorSearch, VectorHit, VectorSearch};
pub use rerank::{
    PairwiseScorer, Reranker, ScorerError, MAX_CHUNK_LENGTH, MAX_QUERY_LENGTH,
    MAX_RERANK_CANDIDATES, MIN_QUERY_LENGTH, RERANK_BATCH_SIZE,
};
