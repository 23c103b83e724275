//! Single-course context assembly.
//!
//! One build runs the whole pipeline:
//!
//! 1. validate options (the only failure surfaced to callers)
//! 2. route on query confidence, returning a cached context when allowed
//! 3. retrieve `candidate_multiplier × max_materials` candidates from BM25
//!    (blocking pool) and the dense retriever concurrently
//! 4. fuse with RRF, diversify with MMR down to `max_materials`
//! 5. drop materials under `min_relevance`, move priority types first
//! 6. render excerpts and fit everything into `max_tokens`
//!
//! Any other failure (unknown course, empty corpus, a crashed retrieval task)
//! produces a well-formed empty context explaining what happened.

use std::sync::Arc;

use chrono::Utc;

use crate::cache::{ContextCache, MokaContextCache};
use crate::confidence::ConfidenceScorer;
use crate::corpus::{Corpus, CorpusRegistry};
use crate::dense::DenseRetriever;
use crate::diversify::Diversifier;
use crate::error::ContextError;
use crate::excerpt::{estimate_tokens, head_excerpt, span_excerpt, truncate_to_budget, ExcerptSettings};
use crate::fusion::RrfFusion;
use crate::models::{ContextOptions, CourseContext, FusedResult, RankedMaterial, RetrievalResult};
use crate::router::{AdaptiveRouter, RoutingDecision, RoutingPolicy};
use crate::sparse::Bm25Retriever;
use crate::tokenize::unique_terms;

/// Knobs for the assembly stages that are not per-request options.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssemblerSettings {
    /// Candidates retrieved per requested material.
    pub candidate_multiplier: usize,
    pub excerpt: ExcerptSettings,
}

impl Default for AssemblerSettings {
    fn default() -> Self {
        Self {
            candidate_multiplier: 2,
            excerpt: ExcerptSettings::default(),
        }
    }
}

pub struct ContextAssembler {
    registry: Arc<CorpusRegistry>,
    router: AdaptiveRouter,
    bm25: Bm25Retriever,
    dense: DenseRetriever,
    fusion: RrfFusion,
    diversifier: Diversifier,
    settings: AssemblerSettings,
}

impl ContextAssembler {
    /// Assembler with default components, sparse-only retrieval, and a
    /// Moka cache of 256 entries.
    pub fn new(registry: Arc<CorpusRegistry>) -> Self {
        let cache: Arc<dyn ContextCache> = Arc::new(MokaContextCache::new(256, None));
        Self {
            registry,
            router: AdaptiveRouter::new(ConfidenceScorer::default(), RoutingPolicy::default(), cache),
            bm25: Bm25Retriever::default(),
            dense: DenseRetriever::disabled(),
            fusion: RrfFusion::default(),
            diversifier: Diversifier::default(),
            settings: AssemblerSettings::default(),
        }
    }

    pub fn with_router(mut self, router: AdaptiveRouter) -> Self {
        self.router = router;
        self
    }

    pub fn with_dense(mut self, dense: DenseRetriever) -> Self {
        self.dense = dense;
        self
    }

    pub fn with_bm25(mut self, bm25: Bm25Retriever) -> Self {
        self.bm25 = bm25;
        self
    }

    pub fn with_fusion(mut self, fusion: RrfFusion) -> Self {
        self.fusion = fusion;
        self
    }

    pub fn with_diversifier(mut self, diversifier: Diversifier) -> Self {
        self.diversifier = diversifier;
        self
    }

    pub fn with_settings(mut self, settings: AssemblerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn registry(&self) -> &Arc<CorpusRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &AdaptiveRouter {
        &self.router
    }

    pub async fn build_context(
        &self,
        course_id: &str,
        question: &str,
        options: &ContextOptions,
    ) -> Result<CourseContext, ContextError> {
        self.assemble(course_id, question, options, None).await
    }

    /// Like [`build_context`](Self::build_context), letting recent queries of
    /// the same conversation inform confidence.
    pub async fn build_context_with_history(
        &self,
        course_id: &str,
        question: &str,
        options: &ContextOptions,
        history: &[String],
    ) -> Result<CourseContext, ContextError> {
        self.assemble(course_id, question, options, Some(history)).await
    }

    async fn assemble(
        &self,
        course_id: &str,
        question: &str,
        options: &ContextOptions,
        history: Option<&[String]>,
    ) -> Result<CourseContext, ContextError> {
        options.validate()?;

        let Some(corpus) = self.registry.corpus(course_id) else {
            tracing::warn!(course_id, "context requested for unknown course");
            return Ok(empty_context(
                course_id,
                &format!("No materials are available for course {}.", course_id),
                options.max_tokens,
                None,
            ));
        };
        if corpus.is_empty() {
            return Ok(empty_context(
                course_id,
                &format!("Course {} has no materials yet.", course_id),
                options.max_tokens,
                None,
            ));
        }

        let plan = self.router.route(course_id, question, options, &corpus, history);
        if let Some(mut cached) = plan.cached {
            cached.routing = Some(plan.decision);
            return Ok(cached);
        }
        let opts = plan.options;

        let k = opts
            .max_materials
            .saturating_mul(self.settings.candidate_multiplier.max(1));
        let (sparse, dense) = self.retrieve(&corpus, question, k).await;

        let fused = self.fusion.fuse(&sparse, &dense, k);
        let diversified = self.diversifier.diversify(&corpus, &fused, opts.max_materials);

        let query_terms = unique_terms(question);
        let mut materials: Vec<RankedMaterial> = diversified
            .iter()
            .filter(|r| r.normalized_score * 100.0 >= opts.min_relevance)
            .filter_map(|r| self.to_material(&corpus, r, &query_terms))
            .collect();
        // Stable: relevance order is preserved within each group.
        materials.sort_by_key(|m| !opts.priority_types.contains(&m.kind));

        tracing::debug!(
            course_id,
            sparse = sparse.len(),
            dense = dense.len(),
            fused = fused.len(),
            kept = materials.len(),
            "assembled candidates"
        );

        let context = if materials.is_empty() {
            empty_context(
                course_id,
                "No course materials matched this question closely enough.",
                opts.max_tokens,
                Some(plan.decision.clone()),
            )
        } else {
            let (materials, text) = render(materials, opts.max_tokens);
            CourseContext {
                course_id: course_id.to_string(),
                materials,
                estimated_tokens: estimate_tokens(&text),
                context_text: text,
                built_at: Utc::now(),
                routing: Some(plan.decision.clone()),
            }
        };

        self.router.record(&plan.decision, &context);
        Ok(context)
    }

    async fn retrieve(
        &self,
        corpus: &Arc<Corpus>,
        question: &str,
        k: usize,
    ) -> (Vec<RetrievalResult>, Vec<RetrievalResult>) {
        let sparse_task = {
            let corpus = Arc::clone(corpus);
            let bm25 = self.bm25.clone();
            let question = question.to_string();
            tokio::task::spawn_blocking(move || bm25.retrieve(&corpus, &question, k))
        };
        let (sparse, dense) = tokio::join!(sparse_task, self.dense.retrieve(corpus, question, k));

        let sparse = sparse.unwrap_or_else(|e| {
            tracing::warn!(course_id = %corpus.course_id(), error = %e, "sparse retrieval task failed");
            Vec::new()
        });
        (sparse, dense)
    }

    fn to_material(&self, corpus: &Corpus, result: &FusedResult, query_terms: &[String]) -> Option<RankedMaterial> {
        let doc = corpus.get(&result.document_id)?;

        let mut matched = result.matched_terms.clone();
        for keyword in &doc.keywords {
            if query_terms.contains(keyword) && !matched.contains(keyword) {
                matched.push(keyword.clone());
            }
        }

        let excerpt = span_excerpt(&doc.text, &matched, &self.settings.excerpt)
            .unwrap_or_else(|| head_excerpt(&doc.text, self.settings.excerpt.head_chars));

        Some(RankedMaterial {
            id: doc.id.clone(),
            title: doc.title.clone(),
            kind: doc.kind(),
            week: doc.metadata.week,
            date: doc.metadata.date,
            text: doc.text.clone(),
            relevance_score: (result.normalized_score * 100.0).clamp(0.0, 100.0),
            matched_keywords: matched,
            excerpt,
        })
    }
}

fn section(index: usize, material: &RankedMaterial) -> String {
    let mut header = format!("### [{}] {} ({}", index, material.title, material.kind);
    if let Some(week) = material.week {
        header.push_str(&format!(", week {}", week));
    }
    header.push(')');
    format!(
        "{}\nRelevance: {:.0}%\n{}",
        header, material.relevance_score, material.excerpt
    )
}

/// Add whole sections while they fit. The first section is always kept,
/// truncated if it alone exceeds the budget.
fn render(materials: Vec<RankedMaterial>, max_tokens: usize) -> (Vec<RankedMaterial>, String) {
    let mut text = String::new();
    let mut included = Vec::with_capacity(materials.len());

    for material in materials {
        let section = section(included.len() + 1, &material);
        let candidate = if text.is_empty() {
            section
        } else {
            format!("{}\n\n{}", text, section)
        };
        if estimate_tokens(&candidate) <= max_tokens {
            text = candidate;
            included.push(material);
            continue;
        }
        if included.is_empty() {
            text = truncate_to_budget(&candidate, max_tokens);
            included.push(material);
        }
        break;
    }

    (included, text)
}

fn empty_context(
    course_id: &str,
    explanation: &str,
    max_tokens: usize,
    routing: Option<RoutingDecision>,
) -> CourseContext {
    let text = truncate_to_budget(explanation, max_tokens);
    CourseContext {
        course_id: course_id.to_string(),
        materials: Vec::new(),
        estimated_tokens: estimate_tokens(&text),
        context_text: text,
        built_at: Utc::now(),
        routing,
    }
}
