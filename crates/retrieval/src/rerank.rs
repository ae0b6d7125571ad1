//! Second-pass pairwise reranking over a bounded candidate set
//!
//! The pairwise model call is the most expensive and most fragile stage of
//! retrieval, so this module is built around safety limits and graceful
//! degradation: candidate caps, per-text truncation, fixed-size batches, one
//! halved-batch retry on resource exhaustion, and passthrough on any
//! ultimate failure. Reranking never raises past its own boundary.

use async_trait::async_trait;
use deepquill_common::errors::{AppError, Result};
use deepquill_common::metrics::METRICS_PREFIX;
use deepquill_common::model::RetrievalCandidate;
use metrics::counter;
use std::sync::Arc;

/// Maximum candidates passed to the pairwise model
pub const MAX_RERANK_CANDIDATES: usize = 50;

/// Maximum characters per candidate text when scoring
pub const MAX_CHUNK_LENGTH: usize = 8000;

/// Maximum query length in characters
pub const MAX_QUERY_LENGTH: usize = 1000;

/// Minimum query length in characters
pub const MIN_QUERY_LENGTH: usize = 2;

/// Pairs scored per model call
pub const RERANK_BATCH_SIZE: usize = 20;

/// Failure modes of the external pairwise model
#[derive(Debug, thiserror::Error)]
pub enum ScorerError {
    /// Out-of-memory class condition; the caller retries at half batch size
    #[error("resource exhaustion during pairwise scoring")]
    ResourceExhausted,

    #[error("pairwise scoring failed: {0}")]
    Failed(String),
}

/// External pairwise relevance model
#[async_trait]
pub trait PairwiseScorer: Send + Sync {
    /// Score each document against the query; one score per document
    async fn score_pairs(
        &self,
        query: &str,
        docs: &[String],
    ) -> std::result::Result<Vec<f32>, ScorerError>;
}

/// Why a rerank attempt fell back to passthrough
#[derive(Debug)]
enum RerankFailure {
    InvalidQuery(String),
    Exhausted,
    ScoringFailed(String),
}

/// Pairwise reranker with batching and passthrough degradation
pub struct Reranker {
    scorer: Option<Arc<dyn PairwiseScorer>>,
    batch_size: usize,
}

impl Reranker {
    /// Create a reranker.
    ///
    /// `None` models a scorer that failed to load at startup: every call
    /// becomes a passthrough, logged once here rather than per call.
    pub fn new(scorer: Option<Arc<dyn PairwiseScorer>>) -> Self {
        if scorer.is_none() {
            tracing::warn!("Pairwise scorer unavailable, reranking disabled");
        }
        Self {
            scorer,
            batch_size: RERANK_BATCH_SIZE,
        }
    }

    /// Whether a scorer is loaded
    pub fn is_available(&self) -> bool {
        self.scorer.is_some()
    }

    /// Validate and bound a query
    pub fn validate_query(query: &str) -> Result<String> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AppError::InvalidQuery {
                reason: "query is empty".to_string(),
            });
        }
        if query.chars().count() < MIN_QUERY_LENGTH {
            return Err(AppError::InvalidQuery {
                reason: format!("query shorter than {} characters", MIN_QUERY_LENGTH),
            });
        }
        if query.chars().count() > MAX_QUERY_LENGTH {
            tracing::warn!(
                length = query.chars().count(),
                limit = MAX_QUERY_LENGTH,
                "Query truncated for reranking"
            );
            return Ok(query.chars().take(MAX_QUERY_LENGTH).collect());
        }
        Ok(query.to_string())
    }

    /// Truncate candidate text before scoring
    fn truncate_text(text: &str) -> String {
        if text.chars().count() > MAX_CHUNK_LENGTH {
            text.chars().take(MAX_CHUNK_LENGTH).collect()
        } else {
            text.to_string()
        }
    }

    /// Rerank candidates by pairwise relevance.
    ///
    /// On success, candidates are reordered purely by the new scores,
    /// descending. Any failure degrades to the first `top_k` of the input,
    /// unchanged in order and score.
    pub async fn rerank(
        &self,
        query: &str,
        candidates: Vec<RetrievalCandidate>,
        top_k: usize,
    ) -> Vec<RetrievalCandidate> {
        if candidates.is_empty() {
            return candidates;
        }

        match self.try_rerank(query, &candidates, top_k).await {
            Ok(reranked) => reranked,
            Err(failure) => {
                counter!(format!("{}_rerank_passthrough_total", METRICS_PREFIX)).increment(1);
                match failure {
                    RerankFailure::InvalidQuery(reason) => {
                        tracing::warn!(reason = %reason, "Invalid query, rerank passthrough")
                    }
                    RerankFailure::Exhausted => {
                        tracing::error!("Rerank failed even at reduced batch size, passthrough")
                    }
                    RerankFailure::ScoringFailed(message) => {
                        tracing::error!(error = %message, "Pairwise scoring failed, passthrough")
                    }
                }
                candidates.into_iter().take(top_k).collect()
            }
        }
    }

    async fn try_rerank(
        &self,
        query: &str,
        candidates: &[RetrievalCandidate],
        top_k: usize,
    ) -> std::result::Result<Vec<RetrievalCandidate>, RerankFailure> {
        let scorer = self
            .scorer
            .as_ref()
            .ok_or_else(|| RerankFailure::ScoringFailed("scorer not loaded".to_string()))?;

        let query = Self::validate_query(query)
            .map_err(|e| RerankFailure::InvalidQuery(e.to_string()))?;

        // Cap the candidate set before any model work
        let capped = if candidates.len() > MAX_RERANK_CANDIDATES {
            tracing::warn!(
                candidates = candidates.len(),
                limit = MAX_RERANK_CANDIDATES,
                "Too many rerank candidates, dropping excess"
            );
            &candidates[..MAX_RERANK_CANDIDATES]
        } else {
            candidates
        };

        let texts: Vec<String> = capped.iter().map(|c| Self::truncate_text(&c.text)).collect();

        // Score in fixed-size batches; one retry at half batch size when the
        // model signals resource exhaustion
        let scores = match self.score_batches(scorer, &query, &texts, self.batch_size).await {
            Ok(scores) => scores,
            Err(ScorerError::ResourceExhausted) => {
                let reduced = (self.batch_size / 2).max(1);
                tracing::warn!(
                    batch_size = reduced,
                    "Resource exhaustion during reranking, retrying at half batch size"
                );
                self.score_batches(scorer, &query, &texts, reduced)
                    .await
                    .map_err(|e| match e {
                        ScorerError::ResourceExhausted => RerankFailure::Exhausted,
                        ScorerError::Failed(message) => RerankFailure::ScoringFailed(message),
                    })?
            }
            Err(ScorerError::Failed(message)) => {
                return Err(RerankFailure::ScoringFailed(message))
            }
        };

        if scores.len() != capped.len() {
            return Err(RerankFailure::ScoringFailed(format!(
                "scorer returned {} scores for {} candidates",
                scores.len(),
                capped.len()
            )));
        }

        // Reorder purely by the new pairwise scores
        let mut reranked: Vec<RetrievalCandidate> = capped
            .iter()
            .zip(scores)
            .map(|(candidate, score)| RetrievalCandidate {
                text: candidate.text.clone(),
                score,
                metadata: candidate.metadata.clone(),
            })
            .collect();

        reranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        reranked.truncate(top_k);

        tracing::debug!(selected = reranked.len(), "Reranking complete");
        Ok(reranked)
    }

    async fn score_batches(
        &self,
        scorer: &Arc<dyn PairwiseScorer>,
        query: &str,
        texts: &[String],
        batch_size: usize,
    ) -> std::result::Result<Vec<f32>, ScorerError> {
        let mut scores = Vec::with_capacity(texts.len());
        for batch in texts.chunks(batch_size) {
            let batch_scores = scorer.score_pairs(query, batch).await?;
            scores.extend(batch_scores);
        }
        Ok(scores)
    }
}
