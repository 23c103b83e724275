//! Dense retrieval by cosine similarity.
//!
//! The query is embedded through the injected [`Embedder`] and compared with
//! each document's precomputed embedding. This retriever fails soft: a
//! missing embedder, a provider error, or a timeout all produce an empty
//! result list so the pipeline degrades to sparse-only retrieval.

use std::sync::Arc;
use std::time::Duration;

use crate::corpus::Corpus;
use crate::embedding::{cosine_with_norm, l2_norm, Embedder};
use crate::error::EmbeddingError;
use crate::models::RetrievalResult;

/// Default upper bound on a single query-embedding call.
pub const DEFAULT_EMBED_TIMEOUT: Duration = Duration::from_secs(5);

/// Semantic retriever over a [`Corpus`].
#[derive(Clone)]
pub struct DenseRetriever {
    embedder: Option<Arc<dyn Embedder>>,
    timeout: Duration,
}

impl DenseRetriever {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder: Some(embedder),
            timeout: DEFAULT_EMBED_TIMEOUT,
        }
    }

    /// A retriever with no embedder; always returns nothing.
    pub fn disabled() -> Self {
        Self {
            embedder: None,
            timeout: DEFAULT_EMBED_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.embedder.is_some()
    }

    /// Embed the query, bounded by the configured timeout.
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>, EmbeddingError> {
        let embedder = self.embedder.as_ref().ok_or(EmbeddingError::Disabled)?;
        match tokio::time::timeout(self.timeout, embedder.embed(query)).await {
            Ok(result) => result,
            Err(_) => Err(EmbeddingError::Timeout(self.timeout.as_millis() as u64)),
        }
    }

    /// Top `k` documents by cosine similarity, best first.
    pub async fn retrieve(&self, corpus: &Corpus, query: &str, k: usize) -> Vec<RetrievalResult> {
        if !self.is_enabled() || query.trim().is_empty() || corpus.is_empty() || k == 0 {
            return Vec::new();
        }

        let query_vec = match self.embed_query(query).await {
            Ok(v) if !v.is_empty() => v,
            Ok(_) => {
                tracing::warn!(course_id = %corpus.course_id(), "embedder returned an empty vector");
                return Vec::new();
            }
            Err(e) => {
                tracing::warn!(
                    course_id = %corpus.course_id(),
                    error = %e,
                    "dense retrieval unavailable, continuing with sparse only"
                );
                return Vec::new();
            }
        };

        rank_by_similarity(corpus, &query_vec, k)
    }
}

/// Rank documents against an already-computed query vector.
pub fn rank_by_similarity(corpus: &Corpus, query_vec: &[f32], k: usize) -> Vec<RetrievalResult> {
    let index = corpus.index();
    let query_norm = l2_norm(query_vec);

    let mut scored: Vec<(usize, f32)> = corpus
        .documents()
        .iter()
        .enumerate()
        .filter_map(|(i, doc)| {
            let embedding = doc.embedding.as_deref()?;
            if embedding.len() != query_vec.len() {
                return None;
            }
            let norm = index.norm(i)?;
            let sim = cosine_with_norm(query_vec, query_norm, embedding, norm);
            (sim > 0.0).then_some((i, sim))
        })
        .collect();

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    scored.truncate(k);

    let documents = corpus.documents();
    scored
        .into_iter()
        .enumerate()
        .map(|(rank, (i, sim))| RetrievalResult {
            document_id: documents[i].id.clone(),
            score: sim as f64,
            rank: rank + 1,
            matched_terms: Vec::new(),
        })
        .collect()
}
