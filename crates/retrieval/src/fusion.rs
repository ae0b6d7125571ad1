//! Weighted score fusion for combining search results
//!
//! Merges keyword and vector result sets after normalizing each to its own
//! maximum, so the two methods' incompatible score scales never mix raw.
//!
//! Merging is keyed on literal text content, not chunk identity: two
//! distinct chunks with identical text collapse into one candidate. This is
//! the expected dedup behavior, not a defect.

use deepquill_common::model::RetrievalCandidate;
use std::collections::HashMap;

/// Relative weights for the two retrieval methods.
///
/// Immutable per `ScoreFusion` instance; every fusion call reads its own
/// copy, so concurrent retrievals can never observe a half-updated pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    pub keyword: f32,
    pub vector: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            keyword: 0.5,
            vector: 0.5,
        }
    }
}

/// Weighted fusion of keyword and vector result sets
#[derive(Debug, Clone, Default)]
pub struct ScoreFusion {
    weights: FusionWeights,
}

impl ScoreFusion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with custom weights
    pub fn with_weights(keyword: f32, vector: f32) -> Self {
        Self {
            weights: FusionWeights { keyword, vector },
        }
    }

    pub fn weights(&self) -> FusionWeights {
        self.weights
    }

    /// Normalize a result set by its maximum score.
    ///
    /// An all-zero or negative maximum uses 1.0 as divisor so scores pass
    /// through rather than exploding.
    fn normalize(results: &mut [RetrievalCandidate]) {
        let max = results
            .iter()
            .map(|c| c.score)
            .fold(f32::NEG_INFINITY, f32::max);
        let divisor = if max > 0.0 { max } else { 1.0 };
        for candidate in results {
            candidate.score /= divisor;
        }
    }

    /// Fuse keyword and vector results into one ranked candidate list.
    ///
    /// Each set is normalized independently, then merged by text key with
    /// weighted accumulation. Vector-side metadata overwrites keyword-side
    /// entries on collision (the vector source carries fuller provenance).
    /// Output is sorted descending by combined score, stable on ties
    /// (keyword insertion order first, then vector), truncated to `top_k`.
    pub fn fuse(
        &self,
        mut keyword_results: Vec<RetrievalCandidate>,
        mut vector_results: Vec<RetrievalCandidate>,
        top_k: usize,
    ) -> Vec<RetrievalCandidate> {
        let weights = self.weights;

        Self::normalize(&mut keyword_results);
        Self::normalize(&mut vector_results);

        // Merge by text key, preserving first-insertion order for ties
        let mut merged: Vec<RetrievalCandidate> = Vec::new();
        let mut index_by_text: HashMap<String, usize> = HashMap::new();

        for mut candidate in keyword_results {
            candidate.score *= weights.keyword;
            match index_by_text.get(&candidate.text) {
                Some(&idx) => merged[idx].score += candidate.score,
                None => {
                    index_by_text.insert(candidate.text.clone(), merged.len());
                    merged.push(candidate);
                }
            }
        }

        for candidate in vector_results {
            let weighted = weights.vector * candidate.score;
            match index_by_text.get(&candidate.text) {
                Some(&idx) => {
                    let existing = &mut merged[idx];
                    existing.score += weighted;
                    // Vector metadata wins on key collision
                    for (key, value) in candidate.metadata {
                        existing.metadata.insert(key, value);
                    }
                }
                None => {
                    index_by_text.insert(candidate.text.clone(), merged.len());
                    merged.push(RetrievalCandidate {
                        text: candidate.text,
                        score: weighted,
                        metadata: candidate.metadata,
                    });
                }
            }
        }

        // Stable sort keeps insertion order on equal scores
        merged.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        merged.truncate(top_k);

        tracing::debug!(results = merged.len(), "Fusion complete");
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepquill_common::model::Metadata;

    fn candidate(text: &str, score: f32) -> RetrievalCandidate {
        RetrievalCandidate::new(text, score, Metadata::new())
    }

    fn candidate_with_meta(text: &str, score: f32, key: &str, value: &str) -> RetrievalCandidate {
        let mut meta = Metadata::new();
        meta.insert(key.into(), value.into());
        RetrievalCandidate::new(text, score, meta)
    }

    #[test]
    fn test_weighted_fusion_scenario() {
        // Keyword: [A(10)]; Vector: [A(0.8), B(0.4)]; weights (0.5, 0.5)
        // A normalizes to 1.0 in both sets -> 0.5 + 0.5 = 1.0
        // B normalizes to 0.5 in the vector set -> 0.25
        let fusion = ScoreFusion::with_weights(0.5, 0.5);
        let fused = fusion.fuse(
            vec![candidate("A", 10.0)],
            vec![candidate("A", 0.8), candidate("B", 0.4)],
            10,
        );

        assert_eq!(fused.len(), 2);
        assert_eq!(fused[0].text, "A");
        assert!((fused[0].score - 1.0).abs() < 1e-6);
        assert_eq!(fused[1].text, "B");
        assert!((fused[1].score - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_single_set_membership_weighting() {
        let fusion = ScoreFusion::with_weights(0.7, 0.3);

        // Keyword-only candidate scores kw_weight * normalized score
        let fused = fusion.fuse(
            vec![candidate("only-kw", 4.0), candidate("top-kw", 8.0)],
            vec![],
            10,
        );
        let only_kw = fused.iter().find(|c| c.text == "only-kw").unwrap();
        assert!((only_kw.score - 0.7 * 0.5).abs() < 1e-6);

        // Vector-only candidate scores vec_weight * normalized score
        let fused = fusion.fuse(vec![], vec![candidate("only-vec", 0.9)], 10);
        assert!((fused[0].score - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_output_sorted_descending() {
        let fusion = ScoreFusion::new();
        let fused = fusion.fuse(
            vec![candidate("a", 1.0), candidate("b", 5.0), candidate("c", 3.0)],
            vec![candidate("d", 0.2), candidate("e", 0.9)],
            10,
        );
        for pair in fused.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_truncates_to_top_k() {
        let fusion = ScoreFusion::new();
        let keyword = (0..10).map(|i| candidate(&format!("k{}", i), i as f32)).collect();
        let fused = fusion.fuse(keyword, vec![], 3);
        assert_eq!(fused.len(), 3);
    }

    #[test]
    fn test_vector_metadata_wins_collision() {
        let fusion = ScoreFusion::new();
        let fused = fusion.fuse(
            vec![candidate_with_meta("same text", 2.0, "source", "keyword-side")],
            vec![candidate_with_meta("same text", 0.5, "source", "vector-side")],
            10,
        );
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].metadata["source"], "vector-side");
    }

    #[test]
    fn test_identical_text_collapses() {
        // Two distinct chunks with identical text merge into one candidate;
        // expected dedup behavior of the text-equality key.
        let fusion = ScoreFusion::new();
        let fused = fusion.fuse(
            vec![],
            vec![candidate("duplicate", 0.8), candidate("duplicate", 0.4)],
            10,
        );
        assert_eq!(fused.len(), 1);
    }

    #[test]
    fn test_zero_max_uses_unit_divisor() {
        let fusion = ScoreFusion::with_weights(1.0, 0.0);
        let fused = fusion.fuse(vec![candidate("z", 0.0)], vec![], 10);
        assert_eq!(fused[0].score, 0.0);
    }
}
