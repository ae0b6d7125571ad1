//! Keyword relevance index over a fixed corpus
//!
//! Okapi BM25 term-frequency scoring with a whole-corpus contract: one score
//! per corpus position, positionally aligned with the indexed texts. An
//! empty or fully-invalid corpus leaves the index unbuilt, which downstream
//! consumers treat as a recognized degraded state (vector-only retrieval),
//! not an error.

use crate::rerank::MAX_CHUNK_LENGTH;
use deepquill_common::errors::{AppError, Result};
use regex_lite::Regex;
use std::collections::HashMap;

// Okapi BM25 constants
const BM25_K1: f32 = 1.5;
const BM25_B: f32 = 0.75;

/// Term-frequency relevance index over a chunk corpus
pub struct KeywordIndex {
    token_re: Regex,
    inner: Option<BuiltIndex>,
}

struct BuiltIndex {
    /// Per-document term frequencies, positionally aligned with the corpus
    doc_terms: Vec<HashMap<String, u32>>,

    /// Original (truncated) texts, kept for candidate construction
    texts: Vec<String>,

    /// Per-document token counts
    doc_lens: Vec<f32>,

    /// Average document length
    avgdl: f32,

    /// Inverse document frequency per term
    idf: HashMap<String, f32>,
}

impl KeywordIndex {
    pub fn new() -> Self {
        Self {
            // Lowercased word tokens; everything else is a separator
            token_re: Regex::new(r"[a-z0-9]+").expect("static token pattern"),
            inner: None,
        }
    }

    /// Tokenize text: lowercase, split at word boundaries
    fn tokenize(&self, text: &str) -> Vec<String> {
        let lowered = text.to_lowercase();
        self.token_re
            .find_iter(&lowered)
            .map(|m| m.as_str().to_string())
            .collect()
    }

    /// Build the index over a corpus of chunk texts.
    ///
    /// Empty or invalid texts become empty-token placeholders so scores stay
    /// positionally aligned with the corpus. A corpus with no usable tokens
    /// at all leaves the index unbuilt.
    pub fn build(&mut self, corpus: &[String]) {
        if corpus.is_empty() {
            tracing::warn!("No texts provided for keyword index");
            self.inner = None;
            return;
        }

        tracing::info!(documents = corpus.len(), "Building keyword index");

        let mut doc_terms = Vec::with_capacity(corpus.len());
        let mut texts = Vec::with_capacity(corpus.len());
        let mut doc_lens = Vec::with_capacity(corpus.len());
        let mut doc_freq: HashMap<String, u32> = HashMap::new();
        let mut total_tokens = 0usize;

        for text in corpus {
            let truncated: String = if text.chars().count() > MAX_CHUNK_LENGTH {
                tracing::warn!(
                    length = text.chars().count(),
                    limit = MAX_CHUNK_LENGTH,
                    "Truncating chunk for keyword indexing"
                );
                text.chars().take(MAX_CHUNK_LENGTH).collect()
            } else {
                text.clone()
            };

            let tokens = self.tokenize(&truncated);
            total_tokens += tokens.len();
            doc_lens.push(tokens.len() as f32);

            let mut terms: HashMap<String, u32> = HashMap::new();
            for token in tokens {
                *terms.entry(token).or_insert(0) += 1;
            }
            for term in terms.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }

            doc_terms.push(terms);
            texts.push(truncated);
        }

        if total_tokens == 0 {
            tracing::warn!("Corpus produced no tokens, keyword index left unbuilt");
            self.inner = None;
            return;
        }

        let n = corpus.len() as f32;
        let avgdl = total_tokens as f32 / n;

        // Okapi idf with the standard 0.5 smoothing, floored at zero
        let idf = doc_freq
            .into_iter()
            .map(|(term, df)| {
                let df = df as f32;
                let value = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                (term, value.max(0.0))
            })
            .collect();

        self.inner = Some(BuiltIndex {
            doc_terms,
            texts,
            doc_lens,
            avgdl,
            idf,
        });

        tracing::info!("Keyword index built");
    }

    /// Whether the index has been built over a usable corpus
    pub fn is_built(&self) -> bool {
        self.inner.is_some()
    }

    /// Number of indexed corpus positions
    pub fn len(&self) -> usize {
        self.inner.as_ref().map(|i| i.texts.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Indexed text at a corpus position
    pub fn text_at(&self, index: usize) -> Option<&str> {
        self.inner
            .as_ref()
            .and_then(|i| i.texts.get(index))
            .map(String::as_str)
    }

    /// Relevance score per corpus position for a query.
    ///
    /// Returns `IndexUnavailable` when the index was never built (or was
    /// built over an unusable corpus); callers fall back to vector-only
    /// retrieval on that error.
    pub fn scores(&self, query: &str) -> Result<Vec<f32>> {
        let inner = self.inner.as_ref().ok_or_else(|| AppError::IndexUnavailable {
            reason: "keyword index not built".to_string(),
        })?;

        let query_tokens = self.tokenize(query);
        let mut scores = vec![0.0f32; inner.doc_terms.len()];

        for (doc_idx, terms) in inner.doc_terms.iter().enumerate() {
            let dl = inner.doc_lens[doc_idx];
            let norm = BM25_K1 * (1.0 - BM25_B + BM25_B * dl / inner.avgdl);

            let mut score = 0.0f32;
            for token in &query_tokens {
                let tf = *terms.get(token).unwrap_or(&0) as f32;
                if tf == 0.0 {
                    continue;
                }
                let idf = *inner.idf.get(token).unwrap_or(&0.0);
                score += idf * (tf * (BM25_K1 + 1.0)) / (tf + norm);
            }
            scores[doc_idx] = score;
        }

        Ok(scores)
    }
}

impl Default for KeywordIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_build_and_score_alignment() {
        let mut index = KeywordIndex::new();
        index.build(&corpus(&[
            "transformer attention mechanisms",
            "convolutional networks for vision",
            "attention is all you need",
        ]));

        assert!(index.is_built());
        let scores = index.scores("attention").unwrap();
        assert_eq!(scores.len(), 3);
        assert!(scores[0] > 0.0);
        assert_eq!(scores[1], 0.0);
        assert!(scores[2] > 0.0);
    }

    #[test]
    fn test_empty_corpus_leaves_index_unbuilt() {
        let mut index = KeywordIndex::new();
        index.build(&[]);
        assert!(!index.is_built());
        assert!(matches!(
            index.scores("anything"),
            Err(AppError::IndexUnavailable { .. })
        ));
    }

    #[test]
    fn test_invalid_texts_keep_positions() {
        let mut index = KeywordIndex::new();
        index.build(&corpus(&["", "   ", "real content here"]));

        assert!(index.is_built());
        let scores = index.scores("content").unwrap();
        assert_eq!(scores.len(), 3);
        assert_eq!(scores[0], 0.0);
        assert_eq!(scores[1], 0.0);
        assert!(scores[2] > 0.0);
    }

    #[test]
    fn test_fully_invalid_corpus_unbuilt() {
        let mut index = KeywordIndex::new();
        index.build(&corpus(&["", "!!!", "   "]));
        assert!(!index.is_built());
    }

    #[test]
    fn test_tokenizer_case_and_boundaries() {
        let index = KeywordIndex::new();
        let tokens = index.tokenize("Hello, World-2024!");
        assert_eq!(tokens, vec!["hello", "world", "2024"]);
    }

    #[test]
    fn test_term_frequency_raises_score() {
        let mut index = KeywordIndex::new();
        index.build(&corpus(&[
            "cache cache cache eviction",
            "cache eviction policy overview",
        ]));

        let scores = index.scores("cache").unwrap();
        assert!(scores[0] > scores[1]);
    }
}
