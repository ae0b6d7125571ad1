//! Hybrid retrieval pipeline
//!
//! Composes vector search (external), the keyword index, score fusion, and
//! reranking into a single retrieve contract. Every stage failure degrades
//! one level instead of aborting: the worst-case behavior of the pipeline is
//! plain vector search, and an empty vector result short-circuits to empty.

use crate::fusion::ScoreFusion;
use crate::keyword::KeywordIndex;
use crate::rerank::Reranker;
use async_trait::async_trait;
use deepquill_common::config::RetrievalConfig;
use deepquill_common::errors::Result;
use deepquill_common::metrics::METRICS_PREFIX;
use deepquill_common::model::{Metadata, RetrievalCandidate};
use metrics::{counter, histogram};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// One nearest-neighbor hit from the vector collaborator.
///
/// Distance convention: lower = more similar.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub text: String,
    pub distance: f32,
    pub metadata: Metadata,
}

/// External nearest-neighbor search over the embedded corpus
#[async_trait]
pub trait VectorSearch: Send + Sync {
    /// Return the `k` nearest chunks for a query
    async fn search(&self, query: &str, k: usize) -> Result<Vec<VectorHit>>;
}

/// Hybrid retriever combining keyword and vector search with reranking
pub struct HybridRetrievalPipeline {
    vector: Arc<dyn VectorSearch>,
    keyword: KeywordIndex,
    fusion: ScoreFusion,
    reranker: Reranker,
    similarity_threshold: f32,
}

impl HybridRetrievalPipeline {
    /// Create a pipeline over a vector collaborator and an optional reranker
    pub fn new(vector: Arc<dyn VectorSearch>, reranker: Reranker, config: &RetrievalConfig) -> Self {
        Self {
            vector,
            keyword: KeywordIndex::new(),
            fusion: ScoreFusion::with_weights(config.keyword_weight, config.vector_weight),
            reranker,
            similarity_threshold: config.similarity_threshold,
        }
    }

    /// Build the keyword index over the corpus texts.
    ///
    /// Call once before sharing the pipeline; a corpus that cannot be
    /// indexed leaves keyword search absent and retrieval vector-only.
    pub fn index_corpus(&mut self, corpus: &[String]) {
        self.keyword.build(corpus);
    }

    /// Whether keyword search participates in retrieval
    pub fn keyword_available(&self) -> bool {
        self.keyword.is_built()
    }

    /// Convert a vector distance to a similarity score
    fn similarity(distance: f32) -> f32 {
        1.0 / (1.0 + distance.max(0.0))
    }

    /// Full retrieval: vector + keyword fusion to `retrieve_k`, reranked
    /// down to `final_k`.
    pub async fn retrieve(
        &self,
        query: &str,
        retrieve_k: usize,
        final_k: usize,
    ) -> Vec<RetrievalCandidate> {
        let started = Instant::now();
        counter!(format!("{}_retrieval_queries_total", METRICS_PREFIX)).increment(1);

        // Stage 1: vector search; nothing retrievable without it
        let vector_candidates = match self.vector.search(query, retrieve_k).await {
            Ok(hits) => self.to_candidates(hits),
            Err(e) => {
                tracing::error!(error = %e, "Vector search failed, returning empty");
                return Vec::new();
            }
        };

        if vector_candidates.is_empty() {
            tracing::debug!(query = query, "No vector candidates");
            return Vec::new();
        }

        // Stage 2: keyword search + fusion when the index is available
        let fused = if self.keyword.is_built() {
            match self.keyword_candidates(query, retrieve_k, &vector_candidates) {
                Ok(keyword_candidates) => {
                    self.fusion
                        .fuse(keyword_candidates, vector_candidates, retrieve_k)
                }
                Err(e) => {
                    counter!(format!("{}_keyword_fallback_total", METRICS_PREFIX)).increment(1);
                    tracing::warn!(error = %e, "Keyword search failed, using vector results only");
                    vector_candidates.into_iter().take(retrieve_k).collect()
                }
            }
        } else {
            counter!(format!("{}_keyword_fallback_total", METRICS_PREFIX)).increment(1);
            tracing::debug!("Keyword index not built, using vector results only");
            vector_candidates.into_iter().take(retrieve_k).collect()
        };

        // Stage 3: rerank (internally degrades to passthrough)
        let results = self.reranker.rerank(query, fused, final_k).await;

        histogram!(format!("{}_retrieval_duration_seconds", METRICS_PREFIX))
            .record(started.elapsed().as_secs_f64());
        tracing::info!(
            query = query,
            results = results.len(),
            keyword = self.keyword.is_built(),
            reranked = self.reranker.is_available(),
            "Hybrid retrieval complete"
        );

        results
    }

    fn to_candidates(&self, hits: Vec<VectorHit>) -> Vec<RetrievalCandidate> {
        hits.into_iter()
            .map(|hit| RetrievalCandidate {
                text: hit.text,
                score: Self::similarity(hit.distance),
                metadata: hit.metadata,
            })
            .filter(|c| c.score >= self.similarity_threshold)
            .collect()
    }

    /// Top keyword candidates for a query.
    ///
    /// Metadata is borrowed from a text-equal vector candidate when one
    /// exists; keyword-only candidates carry empty metadata until the chunk
    /// provider annotates them downstream.
    fn keyword_candidates(
        &self,
        query: &str,
        top_k: usize,
        vector_candidates: &[RetrievalCandidate],
    ) -> Result<Vec<RetrievalCandidate>> {
        let scores = self.keyword.scores(query)?;

        let metadata_by_text: HashMap<&str, &Metadata> = vector_candidates
            .iter()
            .map(|c| (c.text.as_str(), &c.metadata))
            .collect();

        let mut ranked: Vec<(usize, f32)> = scores
            .into_iter()
            .enumerate()
            .filter(|(_, score)| *score > 0.0)
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(top_k);

        Ok(ranked
            .into_iter()
            .filter_map(|(idx, score)| {
                self.keyword.text_at(idx).map(|text| {
                    let metadata = metadata_by_text
                        .get(text)
                        .map(|m| (*m).clone())
                        .unwrap_or_default();
                    RetrievalCandidate::new(text, score, metadata)
                })
            })
            .collect())
    }
}

/// Fixed-response vector search for testing
pub struct MockVectorSearch {
    hits: Vec<VectorHit>,
}

impl MockVectorSearch {
    pub fn new(hits: Vec<VectorHit>) -> Self {
        Self { hits }
    }

    /// Hits with evenly spaced distances over the given texts
    pub fn from_texts(texts: &[&str]) -> Self {
        Self {
            hits: texts
                .iter()
                .enumerate()
                .map(|(i, text)| VectorHit {
                    text: text.to_string(),
                    distance: 0.1 * (i as f32 + 1.0),
                    metadata: Metadata::new(),
                })
                .collect(),
        }
    }
}

#[async_trait]
impl VectorSearch for MockVectorSearch {
    async fn search(&self, _query: &str, k: usize) -> Result<Vec<VectorHit>> {
        Ok(self.hits.iter().take(k).cloned().collect())
    }
}
