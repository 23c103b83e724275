//! Embedding provider trait and vector utilities.
//!
//! Defines the [`Embedder`] trait that all embedding backends implement.
//! Results are a tagged [`EmbeddingResult`] so downstream code never has to
//! inspect untyped provider payloads.
//!
//! Concrete provider implementations (OpenAI, Ollama) live in the
//! `course-context` app crate.

use async_trait::async_trait;

use crate::error::EmbeddingError;

/// Outcome of embedding one text.
pub type EmbeddingResult = Result<Vec<f32>, EmbeddingError>;

/// Trait for embedding providers.
///
/// Implementations own their own retry and rate-limit policy; the core never
/// retries a failed call.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> EmbeddingResult;

    /// Embed several texts, returning vectors in input order.
    ///
    /// The default implementation calls [`embed`](Embedder::embed) once per
    /// text and stops at the first failure.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Euclidean norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity of `a` and `b` given their precomputed norms.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, vectors of
/// different lengths, and zero vectors. The dense retriever caches document
/// norms in the corpus index so each query only pays for the dot products.
pub fn cosine_with_norm(a: &[f32], a_norm: f32, b: &[f32], b_norm: f32) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let denom = a_norm * b_norm;
    if denom < f32::EPSILON {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    dot / denom
}
