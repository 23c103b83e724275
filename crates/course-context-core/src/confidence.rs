//! Query confidence: how well can this corpus answer this question?
//!
//! Three signals, each in `[0, 1]`:
//!
//! - **coverage**: share of distinct query terms present in the corpus
//!   vocabulary.
//! - **margin**: `(s1 − s2) / s1` over the two best BM25 scores. A single hit
//!   counts as a full margin, no hit as none.
//! - **history**: how many recent queries resemble this one (token Jaccard
//!   ≥ [`HISTORY_SIMILARITY`]); `SATURATION` similar queries give `1.0`.
//!
//! The blend is a weighted mean. History only ever adds confidence: when it
//! is absent or holds no similar query, its weight is dropped and the other
//! two are renormalized.

use serde::{Deserialize, Serialize};

use crate::corpus::Corpus;
use crate::sparse::Bm25Retriever;
use crate::tokenize::{jaccard, unique_terms};

/// Jaccard overlap at which a past query counts as "the same topic".
pub const HISTORY_SIMILARITY: f64 = 0.5;

/// Number of similar past queries that saturates the history signal.
const SATURATION: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ConfidenceLevel::Low => "low",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::High => "high",
        })
    }
}

/// Result of scoring one query, with the signals behind it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceScore {
    pub level: ConfidenceLevel,
    /// Blended score in `[0, 1]`.
    pub score: f64,
    pub coverage: f64,
    pub margin: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<f64>,
    pub query_terms: usize,
    pub matched_terms: usize,
}

/// Level cutoffs on the blended score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceThresholds {
    pub high: f64,
    pub medium: f64,
}

impl Default for ConfidenceThresholds {
    fn default() -> Self {
        Self {
            high: 0.7,
            medium: 0.4,
        }
    }
}

/// Relative signal weights. They need not sum to one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalWeights {
    pub coverage: f64,
    pub margin: f64,
    pub history: f64,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            coverage: 0.6,
            margin: 0.25,
            history: 0.15,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfidenceScorer {
    thresholds: ConfidenceThresholds,
    weights: SignalWeights,
    history_window: usize,
    bm25: Bm25Retriever,
}

impl Default for ConfidenceScorer {
    fn default() -> Self {
        Self::new(ConfidenceThresholds::default(), SignalWeights::default(), 10)
    }
}

impl ConfidenceScorer {
    /// # Panics
    ///
    /// If thresholds are not ordered `0 ≤ medium ≤ high ≤ 1`, or if any
    /// weight is negative, or all weights are zero.
    pub fn new(thresholds: ConfidenceThresholds, weights: SignalWeights, history_window: usize) -> Self {
        assert!(
            0.0 <= thresholds.medium && thresholds.medium <= thresholds.high && thresholds.high <= 1.0,
            "confidence thresholds must satisfy 0 <= medium <= high <= 1"
        );
        assert!(
            weights.coverage >= 0.0 && weights.margin >= 0.0 && weights.history >= 0.0,
            "confidence weights must be non-negative"
        );
        assert!(
            weights.coverage + weights.margin > 0.0,
            "coverage and margin weights must not both be zero"
        );
        Self {
            thresholds,
            weights,
            history_window,
            bm25: Bm25Retriever::default(),
        }
    }

    pub fn with_bm25(mut self, bm25: Bm25Retriever) -> Self {
        self.bm25 = bm25;
        self
    }

    pub fn thresholds(&self) -> ConfidenceThresholds {
        self.thresholds
    }

    pub fn level_for(&self, score: f64) -> ConfidenceLevel {
        if score >= self.thresholds.high {
            ConfidenceLevel::High
        } else if score >= self.thresholds.medium {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }

    /// Score `query` against `corpus`, optionally informed by recent queries.
    pub fn score(&self, query: &str, corpus: &Corpus, history: Option<&[String]>) -> ConfidenceScore {
        let terms = unique_terms(query);
        let index = corpus.index();

        let matched = terms.iter().filter(|t| index.contains_term(t)).count();
        let coverage = if terms.is_empty() {
            0.0
        } else {
            matched as f64 / terms.len() as f64
        };

        let margin = match self.bm25.top_two_scores(corpus, query) {
            (Some(s1), Some(s2)) if s1 > 0.0 => ((s1 - s2) / s1).clamp(0.0, 1.0),
            (Some(s1), None) if s1 > 0.0 => 1.0,
            _ => 0.0,
        };

        let history_signal = history.map(|past| self.history_signal(&terms, past));

        let (weighted, total_weight) = match history_signal {
            Some(h) if h > 0.0 => (
                self.weights.coverage * coverage + self.weights.margin * margin + self.weights.history * h,
                self.weights.coverage + self.weights.margin + self.weights.history,
            ),
            _ => (
                self.weights.coverage * coverage + self.weights.margin * margin,
                self.weights.coverage + self.weights.margin,
            ),
        };
        let score = (weighted / total_weight).clamp(0.0, 1.0);

        ConfidenceScore {
            level: self.level_for(score),
            score,
            coverage,
            margin,
            history: history_signal,
            query_terms: terms.len(),
            matched_terms: matched,
        }
    }

    fn history_signal(&self, terms: &[String], history: &[String]) -> f64 {
        if terms.is_empty() {
            return 0.0;
        }
        let start = history.len().saturating_sub(self.history_window);
        let similar = history[start..]
            .iter()
            .filter(|past| jaccard(terms, &unique_terms(past)) >= HISTORY_SIMILARITY)
            .count();
        (similar as f64 / SATURATION).min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Document, MaterialType};

    fn corpus() -> Corpus {
        Corpus::new(
            "cs101",
            vec![
                Document::new(
                    "rec",
                    "cs101",
                    "Recursion",
                    "Recursion needs a base case and a recursive case. Recursion recursion stack frames.",
                    MaterialType::Lecture,
                ),
                Document::new(
                    "loops",
                    "cs101",
                    "Loops",
                    "Iteration with while loops and counters.",
                    MaterialType::Lecture,
                ),
            ],
        )
    }

    #[test]
    fn test_no_overlap_is_low() {
        let score = ConfidenceScorer::default().score("quantum chromodynamics", &corpus(), None);
        assert_eq!(score.coverage, 0.0);
        assert_eq!(score.margin, 0.0);
        assert_eq!(score.level, ConfidenceLevel::Low);
        assert_eq!(score.matched_terms, 0);
    }

    #[test]
    fn test_full_coverage_single_hit_is_high() {
        let score = ConfidenceScorer::default().score("recursion base case", &corpus(), None);
        assert_eq!(score.coverage, 1.0);
        assert_eq!(score.margin, 1.0);
        assert_eq!(score.level, ConfidenceLevel::High);
    }

    #[test]
    fn test_empty_query_is_low() {
        let score = ConfidenceScorer::default().score("", &corpus(), None);
        assert_eq!(score.query_terms, 0);
        assert_eq!(score.level, ConfidenceLevel::Low);
    }

    #[test]
    fn test_partial_coverage_is_medium() {
        // One of two terms known, unambiguous hit.
        let score = ConfidenceScorer::default().score("recursion monads", &corpus(), None);
        assert!((score.coverage - 0.5).abs() < 1e-9);
        assert_eq!(score.level, ConfidenceLevel::Medium);
    }

    #[test]
    fn test_history_raises_confidence() {
        let scorer = ConfidenceScorer::default();
        let history: Vec<String> = vec![
            "recursion monads".into(),
            "what about recursion monads".into(),
            "recursion and monads".into(),
        ];
        let without = scorer.score("recursion monads", &corpus(), Some(&[][..]));
        let with = scorer.score("recursion monads", &corpus(), Some(history.as_slice()));
        assert_eq!(with.history, Some(1.0));
        assert!(with.score > without.score);
    }

    #[test]
    fn test_unrelated_history_does_not_lower_confidence() {
        let scorer = ConfidenceScorer::default();
        let alone = scorer.score("recursion base case", &corpus(), None);
        let unrelated: Vec<String> = vec!["unrelated topic entirely".into()];

        for history in [&[][..], unrelated.as_slice()] {
            let score = scorer.score("recursion base case", &corpus(), Some(history));
            assert_eq!(score.history, Some(0.0));
            assert_eq!(score.score, alone.score);
            assert_eq!(score.level, ConfidenceLevel::High);
        }
    }

    #[test]
    fn test_history_window_limits_lookback() {
        let scorer = ConfidenceScorer::new(ConfidenceThresholds::default(), SignalWeights::default(), 1);
        let history: Vec<String> = vec!["recursion monads".into(), "unrelated topic entirely".into()];
        let score = scorer.score("recursion monads", &corpus(), Some(history.as_slice()));
        assert_eq!(score.history, Some(0.0));
    }

    #[test]
    fn test_deterministic_and_monotonic_levels() {
        let scorer = ConfidenceScorer::default();
        let a = scorer.score("recursion loops", &corpus(), None);
        let b = scorer.score("recursion loops", &corpus(), None);
        assert_eq!(a, b);
        assert!(scorer.level_for(0.1) <= scorer.level_for(0.5));
        assert!(scorer.level_for(0.5) <= scorer.level_for(0.9));
    }

    #[test]
    #[should_panic]
    fn test_unordered_thresholds_panic() {
        ConfidenceScorer::new(
            ConfidenceThresholds { high: 0.3, medium: 0.6 },
            SignalWeights::default(),
            10,
        );
    }
}
