//! Sparse retrieval using BM25.
//!
//! Scores every document that shares at least one term with the query:
//!
//! ```text
//! score(d) = Σ_t IDF(t) · tf·(k1 + 1) / (tf + k1·(1 − b + b·|d| / avgdl))
//! ```
//!
//! IDF values come from the corpus index, computed once per corpus build.
//! Results are sorted by score, ties broken by document insertion order.

use std::collections::HashMap;

use crate::corpus::Corpus;
use crate::models::RetrievalResult;
use crate::tokenize::unique_terms;

/// BM25 free parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25Params {
    /// Term-frequency saturation.
    pub k1: f64,
    /// Length normalization.
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

/// Keyword retriever over a [`Corpus`].
#[derive(Debug, Clone, Default)]
pub struct Bm25Retriever {
    params: Bm25Params,
}

impl Bm25Retriever {
    pub fn new(params: Bm25Params) -> Self {
        Self { params }
    }

    pub fn params(&self) -> Bm25Params {
        self.params
    }

    /// Top `k` documents for `query`, best first.
    ///
    /// An empty or all-stopword query yields an empty list.
    pub fn retrieve(&self, corpus: &Corpus, query: &str, k: usize) -> Vec<RetrievalResult> {
        let terms = unique_terms(query);
        if terms.is_empty() || corpus.is_empty() || k == 0 {
            return Vec::new();
        }

        let index = corpus.index();
        let avgdl = index.avg_doc_len().max(f64::EPSILON);
        let Bm25Params { k1, b } = self.params;

        // doc position -> (score, matched terms)
        let mut hits: HashMap<usize, (f64, Vec<String>)> = HashMap::new();

        for term in &terms {
            let idf = index.idf(term);
            for posting in index.postings(term) {
                let tf = posting.tf as f64;
                let len_norm = 1.0 - b + b * index.doc_len(posting.doc) as f64 / avgdl;
                let contribution = idf * tf * (k1 + 1.0) / (tf + k1 * len_norm);
                let entry = hits.entry(posting.doc).or_insert((0.0, Vec::new()));
                entry.0 += contribution;
                entry.1.push(term.clone());
            }
        }

        let mut ranked: Vec<(usize, f64, Vec<String>)> = hits
            .into_iter()
            .map(|(doc, (score, matched))| (doc, score, matched))
            .collect();

        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        ranked.truncate(k);

        let documents = corpus.documents();
        ranked
            .into_iter()
            .enumerate()
            .map(|(i, (doc, score, matched_terms))| RetrievalResult {
                document_id: documents[doc].id.clone(),
                score,
                rank: i + 1,
                matched_terms,
            })
            .collect()
    }

    /// Raw BM25 scores of the best two documents, used as a margin signal.
    pub fn top_two_scores(&self, corpus: &Corpus, query: &str) -> (Option<f64>, Option<f64>) {
        let top = self.retrieve(corpus, query, 2);
        (top.first().map(|r| r.score), top.get(1).map(|r| r.score))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Document, MaterialType};

    fn doc(id: &str, title: &str, text: &str) -> Document {
        Document::new(id, "cs101", title, text, MaterialType::Lecture)
    }

    #[test]
    fn test_binary_search_scenario() {
        let corpus = Corpus::new(
            "cs101",
            vec![doc(
                "bs",
                "Binary Search",
                "binary halves the range. binary works on sorted data. binary binary binary.",
            )],
        );
        let results = Bm25Retriever::default().retrieve(&corpus, "binary search algorithm", 5);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document_id, "bs");
        assert!(results[0].score > 0.0);
        assert!(results[0].matched_terms.contains(&"binary".to_string()));
        assert!(results[0].matched_terms.contains(&"search".to_string()));
        assert!(!results[0].matched_terms.contains(&"algorithm".to_string()));
    }

    #[test]
    fn test_empty_and_stopword_queries() {
        let corpus = Corpus::new("c", vec![doc("a", "", "stacks and queues")]);
        let retriever = Bm25Retriever::default();
        assert!(retriever.retrieve(&corpus, "", 5).is_empty());
        assert!(retriever.retrieve(&corpus, "the of and is", 5).is_empty());
    }

    #[test]
    fn test_more_occurrences_never_lower_score() {
        // Same length, one more occurrence of the query term.
        let base = "heap filler words padding more text here";
        let boosted = "heap heap words padding more text here";
        let corpus = Corpus::new(
            "c",
            vec![
                doc("base", "", base),
                doc("boosted", "", boosted),
                doc("other", "", "unrelated queue material"),
            ],
        );
        assert_eq!(
            corpus.get("base").unwrap().tokens.len(),
            corpus.get("boosted").unwrap().tokens.len()
        );
        let results = Bm25Retriever::default().retrieve(&corpus, "heap", 5);
        let score = |id: &str| {
            results
                .iter()
                .find(|r| r.document_id == id)
                .map(|r| r.score)
                .unwrap()
        };
        assert!(score("boosted") >= score("base"));
        assert_eq!(results[0].document_id, "boosted");
    }

    #[test]
    fn test_ties_follow_insertion_order() {
        let corpus = Corpus::new(
            "c",
            vec![
                doc("first", "", "pointer arithmetic"),
                doc("second", "", "pointer arithmetic"),
            ],
        );
        let results = Bm25Retriever::default().retrieve(&corpus, "pointer", 5);
        assert_eq!(results[0].document_id, "first");
        assert_eq!(results[1].document_id, "second");
        assert_eq!(results[0].rank, 1);
        assert_eq!(results[1].rank, 2);
    }

    #[test]
    fn test_truncates_to_k() {
        let docs = (0..10)
            .map(|i| doc(&format!("d{}", i), "", "sorting algorithms"))
            .collect();
        let corpus = Corpus::new("c", docs);
        assert_eq!(Bm25Retriever::default().retrieve(&corpus, "sorting", 3).len(), 3);
        assert!(Bm25Retriever::default().retrieve(&corpus, "sorting", 0).is_empty());
    }

    #[test]
    fn test_top_two_scores() {
        let corpus = Corpus::new(
            "c",
            vec![doc("a", "", "tree tree tree"), doc("b", "", "tree forest")],
        );
        let (s1, s2) = Bm25Retriever::default().top_two_scores(&corpus, "tree");
        assert!(s1.unwrap() > s2.unwrap());
    }
}
