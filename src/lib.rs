//! # Course Context
//!
//! Retrieval and context assembly over course materials for AI tutoring
//! tools. The retrieval pipeline itself lives in [`course_context_core`];
//! this crate adds everything around it: configuration, material ingestion
//! from disk, HTTP embedding providers, the `cctx` CLI, and the HTTP server.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌────────────────────────────┐
//! │ materials/  │──▶│  Ingestion   │──▶│ CorpusRegistry (per course) │
//! │ JSON files  │   │ (+ embedder) │   └─────────────┬──────────────┘
//! └─────────────┘   └──────────────┘                 │
//!                                                    ▼
//!        BM25 + dense ─▶ RRF ─▶ MMR ─▶ filter/sort ─▶ token-budgeted text
//!                 (routed by query confidence, cached by query key)
//!                                                    │
//!                              ┌─────────────────────┤
//!                              ▼                     ▼
//!                         ┌──────────┐         ┌──────────┐
//!                         │   CLI    │         │   HTTP   │
//!                         │  (cctx)  │         │  (axum)  │
//!                         └──────────┘         └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`materials`] | Catalog and material file ingestion |
//! | [`embedding`] | OpenAI and Ollama embedding providers |
//! | [`engine`] | Builds the assembler from configuration |
//! | [`courses`] | `cctx courses` |
//! | [`context_cmd`] | `cctx context`, `multi`, `detect` |
//! | [`server`] | HTTP server |

pub mod config;
pub mod context_cmd;
pub mod courses;
pub mod embedding;
pub mod engine;
pub mod materials;
pub mod server;
