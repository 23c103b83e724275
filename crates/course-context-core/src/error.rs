//! Error types for the retrieval core.
//!
//! Only two failure classes cross module boundaries: embedding-provider
//! failures (always absorbed by the dense retriever) and invalid caller
//! options (the one error surfaced by the context builders).

use thiserror::Error;

/// Failure reported by an [`Embedder`](crate::embedding::Embedder).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EmbeddingError {
    /// No provider is configured.
    #[error("embedding provider is disabled")]
    Disabled,
    /// The provider did not answer within the allotted time.
    #[error("embedding request timed out after {0} ms")]
    Timeout(u64),
    /// The provider answered with an error or an unusable payload.
    #[error("embedding provider error: {0}")]
    Provider(String),
    /// The provider returned a different number of vectors than inputs.
    #[error("embedding provider returned {got} vectors for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },
}

/// Error returned by the context builders.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ContextError {
    /// The caller passed options that violate their documented ranges.
    #[error("invalid context options: {0}")]
    InvalidOptions(String),
}
