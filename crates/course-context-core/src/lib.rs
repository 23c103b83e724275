//! # Course Context Core
//!
//! Retrieval and context assembly for course materials: BM25 and dense
//! retrieval, reciprocal rank fusion, MMR diversification, query confidence,
//! confidence-adaptive routing with caching, and token-budgeted context
//! building for one or several courses.
//!
//! This crate does no filesystem, network, or configuration-file I/O.
//! Materials arrive as [`models::Document`]s through a
//! [`corpus::CorpusRegistry`]; embeddings arrive through the
//! [`embedding::Embedder`] trait.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use course_context_core::assembler::ContextAssembler;
//! use course_context_core::corpus::CorpusRegistry;
//! use course_context_core::models::{ContextOptions, Course, Document, MaterialType};
//!
//! # async fn demo() {
//! let registry = Arc::new(CorpusRegistry::new());
//! registry.register(
//!     Course { id: "cs101".into(), code: "CS101".into(), name: "Intro".into(), active: true },
//!     vec![Document::new("l1", "cs101", "Loops", "A for loop repeats.", MaterialType::Lecture)],
//! );
//! let assembler = ContextAssembler::new(registry);
//! let ctx = assembler
//!     .build_context("cs101", "how do loops work", &ContextOptions::default())
//!     .await
//!     .unwrap();
//! println!("{}", ctx.context_text);
//! # }
//! ```

pub mod assembler;
pub mod cache;
pub mod confidence;
pub mod corpus;
pub mod dense;
pub mod diversify;
pub mod embedding;
pub mod error;
pub mod excerpt;
pub mod fusion;
pub mod models;
pub mod multi_course;
pub mod router;
pub mod sparse;
pub mod tokenize;
