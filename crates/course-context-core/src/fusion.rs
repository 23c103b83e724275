//! Reciprocal Rank Fusion of the sparse and dense result lists.
//!
//! BM25 scores and cosine similarities live on incomparable scales, so the
//! lists are merged by rank instead of by raw score:
//!
//! ```text
//! fused(d) = Σ_lists 1 / (rrf_k + rank_list(d))
//! ```
//!
//! A document missing from a list contributes nothing for that list.
//! Ordering: fused score (desc), best source rank (asc), sparse hits before
//! dense-only hits, document id (asc).

use std::collections::HashMap;

use crate::models::{FusedResult, RetrievalResult};

/// Standard RRF smoothing constant.
pub const DEFAULT_RRF_K: f64 = 60.0;

#[derive(Debug, Clone, Copy)]
pub struct RrfFusion {
    k: f64,
}

impl Default for RrfFusion {
    fn default() -> Self {
        Self { k: DEFAULT_RRF_K }
    }
}

impl RrfFusion {
    pub fn new(k: f64) -> Self {
        assert!(k >= 0.0 && k.is_finite(), "rrf_k must be a non-negative number");
        Self { k }
    }

    pub fn k(&self) -> f64 {
        self.k
    }

    fn contribution(&self, rank: usize) -> f64 {
        1.0 / (self.k + rank as f64)
    }

    /// Merge both lists and keep the best `limit` documents.
    pub fn fuse(
        &self,
        sparse: &[RetrievalResult],
        dense: &[RetrievalResult],
        limit: usize,
    ) -> Vec<FusedResult> {
        let mut merged: HashMap<&str, FusedResult> = HashMap::new();

        for r in sparse {
            let entry = merged
                .entry(r.document_id.as_str())
                .or_insert_with(|| empty_result(&r.document_id));
            entry.fused_score += self.contribution(r.rank);
            entry.sparse_rank = Some(r.rank);
            for term in &r.matched_terms {
                if !entry.matched_terms.contains(term) {
                    entry.matched_terms.push(term.clone());
                }
            }
        }

        for r in dense {
            let entry = merged
                .entry(r.document_id.as_str())
                .or_insert_with(|| empty_result(&r.document_id));
            entry.fused_score += self.contribution(r.rank);
            entry.dense_rank = Some(r.rank);
        }

        let active_lists = [sparse, dense].iter().filter(|l| !l.is_empty()).count();
        let best_possible = active_lists as f64 * self.contribution(1);

        let mut results: Vec<FusedResult> = merged
            .into_values()
            .map(|mut r| {
                r.normalized_score = if best_possible > 0.0 {
                    (r.fused_score / best_possible).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                r
            })
            .collect();

        results.sort_by(|a, b| {
            b.fused_score
                .partial_cmp(&a.fused_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.best_rank().cmp(&b.best_rank()))
                .then(b.sparse_rank.is_some().cmp(&a.sparse_rank.is_some()))
                .then(a.document_id.cmp(&b.document_id))
        });
        results.truncate(limit);

        tracing::trace!(
            sparse = sparse.len(),
            dense = dense.len(),
            fused = results.len(),
            "fused result lists"
        );

        results
    }
}

fn empty_result(document_id: &str) -> FusedResult {
    FusedResult {
        document_id: document_id.to_string(),
        fused_score: 0.0,
        normalized_score: 0.0,
        matched_terms: Vec::new(),
        sparse_rank: None,
        dense_rank: None,
    }
}
