//! Wires a [`Config`] into a ready-to-query assembler.
//!
//! Loading happens once per process: the CLI builds an [`Engine`] per
//! command, the server builds one at startup and shares it behind an `Arc`.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use course_context_core::assembler::{AssemblerSettings, ContextAssembler};
use course_context_core::cache::{ContextCache, MemoryContextCache, MokaContextCache};
use course_context_core::confidence::ConfidenceScorer;
use course_context_core::dense::DenseRetriever;
use course_context_core::diversify::Diversifier;
use course_context_core::fusion::RrfFusion;
use course_context_core::models::ContextOptions;
use course_context_core::multi_course::MultiCourseBuilder;
use course_context_core::router::AdaptiveRouter;
use course_context_core::sparse::Bm25Retriever;

use crate::config::{CacheConfig, Config};
use crate::embedding::create_embedder;
use crate::materials::{load_registry, LoadStats};

pub struct Engine {
    pub config: Config,
    pub assembler: Arc<ContextAssembler>,
    pub multi: MultiCourseBuilder,
    pub stats: LoadStats,
}

impl Engine {
    /// Load materials and build every pipeline stage from `config`.
    pub async fn load(config: Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let (registry, stats) = load_registry(&config, embedder.clone()).await?;

        let bm25 = Bm25Retriever::new(config.retrieval.bm25_params());
        let scorer = ConfidenceScorer::new(
            config.confidence.thresholds(),
            config.confidence.weights(),
            config.confidence.history_window,
        )
        .with_bm25(bm25.clone());
        let router = AdaptiveRouter::new(scorer, config.routing.policy(), build_cache(&config.cache));

        let dense = match embedder {
            Some(embedder) => DenseRetriever::new(embedder)
                .with_timeout(Duration::from_millis(config.embedding.query_timeout_ms)),
            None => DenseRetriever::disabled(),
        };

        let assembler = ContextAssembler::new(registry)
            .with_router(router)
            .with_bm25(bm25)
            .with_dense(dense)
            .with_fusion(RrfFusion::new(config.retrieval.rrf_k))
            .with_diversifier(Diversifier::new(config.retrieval.mmr_lambda))
            .with_settings(AssemblerSettings {
                candidate_multiplier: config.retrieval.candidate_multiplier,
                excerpt: config.context.excerpt_settings(),
            });
        let assembler = Arc::new(assembler);
        let multi = MultiCourseBuilder::new(assembler.clone());

        tracing::debug!(
            cache = %config.cache.backend,
            dense = config.embedding.is_enabled(),
            "engine ready"
        );

        Ok(Self {
            config,
            assembler,
            multi,
            stats,
        })
    }

    /// Options from `[context]`, with any provided overrides applied.
    pub fn options(&self, overrides: &OptionOverrides) -> ContextOptions {
        overrides.apply(self.config.context.default_options())
    }
}

fn build_cache(config: &CacheConfig) -> Arc<dyn ContextCache> {
    match config.backend.as_str() {
        "lru" => Arc::new(MemoryContextCache::new(config.max_entries, config.ttl())),
        _ => Arc::new(MokaContextCache::new(config.max_entries as u64, config.ttl())),
    }
}

/// Per-request option overrides shared by the CLI and HTTP surfaces.
#[derive(Debug, Default, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionOverrides {
    pub max_materials: Option<usize>,
    pub min_relevance: Option<f64>,
    pub max_tokens: Option<usize>,
    pub priority_types: Option<Vec<String>>,
}

impl OptionOverrides {
    pub fn apply(&self, mut options: ContextOptions) -> ContextOptions {
        if let Some(n) = self.max_materials {
            options.max_materials = n;
        }
        if let Some(r) = self.min_relevance {
            options.min_relevance = r;
        }
        if let Some(t) = self.max_tokens {
            options.max_tokens = t;
        }
        if let Some(types) = &self.priority_types {
            options.priority_types = types
                .iter()
                .map(|t| course_context_core::models::MaterialType::parse(t))
                .collect();
        }
        options
    }
}
