//! Maximal Marginal Relevance re-ranking.
//!
//! Near-identical materials (re-uploaded slide decks, lightly edited
//! handouts) tend to fuse to adjacent ranks. MMR picks greedily:
//!
//! ```text
//! next = argmax_d  λ·rel(d) − (1 − λ)·max_{s ∈ selected} sim(d, s)
//! ```
//!
//! `rel` is the fused score divided by the best fused score among the
//! candidates. `sim` is embedding cosine when both documents carry vectors of
//! the same size, otherwise Jaccard overlap of their token sets.

use std::collections::HashSet;

use crate::corpus::Corpus;
use crate::embedding::cosine_with_norm;
use crate::models::FusedResult;
use crate::tokenize::{jaccard, jaccard_sets};

/// Default relevance weight.
pub const DEFAULT_LAMBDA: f64 = 0.7;

#[derive(Debug, Clone, Copy)]
pub struct Diversifier {
    lambda: f64,
}

impl Default for Diversifier {
    fn default() -> Self {
        Self {
            lambda: DEFAULT_LAMBDA,
        }
    }
}

/// Pairwise similarity source for one candidate.
struct Candidate<'a> {
    result: &'a FusedResult,
    relevance: f64,
    position: Option<usize>,
    tokens: HashSet<&'a str>,
}

impl Diversifier {
    pub fn new(lambda: f64) -> Self {
        assert!(
            (0.0..=1.0).contains(&lambda),
            "mmr lambda must be in [0, 1], got {}",
            lambda
        );
        Self { lambda }
    }

    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    /// Reorder `fused` for diversity and keep at most `limit` results.
    pub fn diversify(&self, corpus: &Corpus, fused: &[FusedResult], limit: usize) -> Vec<FusedResult> {
        if fused.is_empty() || limit == 0 {
            return Vec::new();
        }

        let max_score = fused
            .iter()
            .map(|r| r.fused_score)
            .fold(f64::NEG_INFINITY, f64::max);

        let index = corpus.index();
        let documents = corpus.documents();
        let mut remaining: Vec<Candidate> = fused
            .iter()
            .map(|r| {
                let position = index.position(&r.document_id);
                let tokens = position
                    .map(|i| documents[i].tokens.iter().map(String::as_str).collect())
                    .unwrap_or_default();
                Candidate {
                    result: r,
                    relevance: if max_score > 0.0 {
                        r.fused_score / max_score
                    } else {
                        0.0
                    },
                    position,
                    tokens,
                }
            })
            .collect();

        let mut selected: Vec<Candidate> = Vec::with_capacity(limit.min(fused.len()));

        while selected.len() < limit && !remaining.is_empty() {
            let mut best_idx = 0;
            let mut best_score = f64::NEG_INFINITY;

            for (i, cand) in remaining.iter().enumerate() {
                let redundancy = selected
                    .iter()
                    .map(|s| self.similarity(corpus, cand, s))
                    .fold(0.0, f64::max);
                let mmr = self.lambda * cand.relevance - (1.0 - self.lambda) * redundancy;
                // Strict comparison keeps the earlier (better fused) candidate on ties.
                if mmr > best_score {
                    best_score = mmr;
                    best_idx = i;
                }
            }

            selected.push(remaining.remove(best_idx));
        }

        selected.into_iter().map(|c| c.result.clone()).collect()
    }

    fn similarity(&self, corpus: &Corpus, a: &Candidate, b: &Candidate) -> f64 {
        if let (Some(ia), Some(ib)) = (a.position, b.position) {
            if let Some(sim) = embedding_similarity(corpus, ia, ib) {
                return sim;
            }
        }
        jaccard_sets(&a.tokens, &b.tokens)
    }
}

/// Pairwise similarity between two documents of `corpus`, as used by MMR.
pub fn document_similarity(corpus: &Corpus, a: &str, b: &str) -> f64 {
    let index = corpus.index();
    let (Some(ia), Some(ib)) = (index.position(a), index.position(b)) else {
        return 0.0;
    };
    if let Some(sim) = embedding_similarity(corpus, ia, ib) {
        return sim;
    }
    let docs = corpus.documents();
    jaccard(&docs[ia].tokens, &docs[ib].tokens)
}

/// Cosine of two documents' embeddings, `None` unless both have vectors of
/// the same size.
fn embedding_similarity(corpus: &Corpus, a: usize, b: usize) -> Option<f64> {
    let docs = corpus.documents();
    let index = corpus.index();
    let ea = docs[a].embedding.as_deref()?;
    let eb = docs[b].embedding.as_deref()?;
    if ea.len() != eb.len() {
        return None;
    }
    Some(cosine_with_norm(ea, index.norm(a)?, eb, index.norm(b)?) as f64)
}
