//! Confidence-adaptive retrieval routing.
//!
//! | confidence | cache     | action       | options                                   |
//! |------------|-----------|--------------|-------------------------------------------|
//! | high       | hit       | `use_cache`  | unchanged, cached context returned        |
//! | high       | miss      | `standard`   | unchanged, result cached after assembly   |
//! | medium     | n/a       | `expand`     | `max_materials × expand_factor`           |
//! | low        | n/a       | `aggressive` | `max_materials × aggressive_factor`, lower `min_relevance` |
//!
//! Only `standard` results are written back, so an expanded or aggressive
//! context never shadows a confident one.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::cache::ContextCache;
use crate::confidence::{ConfidenceLevel, ConfidenceScore, ConfidenceScorer};
use crate::corpus::Corpus;
use crate::models::{ContextOptions, CourseContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingAction {
    UseCache,
    Standard,
    Expand,
    Aggressive,
}

impl std::fmt::Display for RoutingAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RoutingAction::UseCache => "use_cache",
            RoutingAction::Standard => "standard",
            RoutingAction::Expand => "expand",
            RoutingAction::Aggressive => "aggressive",
        })
    }
}

/// Routing metadata attached to every assembled context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingDecision {
    pub action: RoutingAction,
    pub confidence: ConfidenceScore,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
    pub should_expand: bool,
    pub should_use_aggressive_retrieval: bool,
}

/// How far each action widens retrieval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoutingPolicy {
    pub expand_factor: usize,
    pub aggressive_factor: usize,
    /// Subtracted from `min_relevance` on aggressive routes.
    pub relevance_drop: f64,
    /// Lower bound for the lowered `min_relevance`.
    pub relevance_floor: f64,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self {
            expand_factor: 2,
            aggressive_factor: 3,
            relevance_drop: 15.0,
            relevance_floor: 5.0,
        }
    }
}

/// Outcome of [`AdaptiveRouter::route`].
#[derive(Debug, Clone)]
pub struct RoutePlan {
    pub decision: RoutingDecision,
    /// Options to assemble with (possibly widened).
    pub options: ContextOptions,
    /// Set only for `use_cache`.
    pub cached: Option<CourseContext>,
}

pub struct AdaptiveRouter {
    scorer: ConfidenceScorer,
    policy: RoutingPolicy,
    cache: Arc<dyn ContextCache>,
}

impl AdaptiveRouter {
    pub fn new(scorer: ConfidenceScorer, policy: RoutingPolicy, cache: Arc<dyn ContextCache>) -> Self {
        Self {
            scorer,
            policy,
            cache,
        }
    }

    pub fn cache(&self) -> &Arc<dyn ContextCache> {
        &self.cache
    }

    pub fn scorer(&self) -> &ConfidenceScorer {
        &self.scorer
    }

    pub fn route(
        &self,
        course_id: &str,
        query: &str,
        options: &ContextOptions,
        corpus: &Corpus,
        history: Option<&[String]>,
    ) -> RoutePlan {
        let confidence = self.scorer.score(query, corpus, history);
        let level = confidence.level;

        let plan = match level {
            ConfidenceLevel::High => {
                let key = cache_key(query, course_id, corpus.generation(), options);
                match self.cache.get(&key) {
                    Some(cached) => RoutePlan {
                        decision: decision(RoutingAction::UseCache, confidence, Some(key)),
                        options: options.clone(),
                        cached: Some(cached),
                    },
                    None => RoutePlan {
                        decision: decision(RoutingAction::Standard, confidence, Some(key)),
                        options: options.clone(),
                        cached: None,
                    },
                }
            }
            ConfidenceLevel::Medium => {
                let mut widened = options.clone();
                widened.max_materials = options.max_materials.saturating_mul(self.policy.expand_factor.max(1));
                RoutePlan {
                    decision: decision(RoutingAction::Expand, confidence, None),
                    options: widened,
                    cached: None,
                }
            }
            ConfidenceLevel::Low => {
                let mut widened = options.clone();
                widened.max_materials =
                    options.max_materials.saturating_mul(self.policy.aggressive_factor.max(1));
                widened.min_relevance = (options.min_relevance - self.policy.relevance_drop)
                    .max(self.policy.relevance_floor)
                    .min(options.min_relevance);
                RoutePlan {
                    decision: decision(RoutingAction::Aggressive, confidence, None),
                    options: widened,
                    cached: None,
                }
            }
        };

        tracing::debug!(
            course_id,
            action = %plan.decision.action,
            level = %level,
            score = plan.decision.confidence.score,
            "routed query"
        );
        plan
    }

    /// Store a freshly assembled context when the route allows it.
    pub fn record(&self, decision: &RoutingDecision, context: &CourseContext) {
        if decision.action != RoutingAction::Standard {
            return;
        }
        if let Some(key) = &decision.cache_key {
            self.cache.set(key.clone(), context.clone());
        }
    }
}

fn decision(action: RoutingAction, confidence: ConfidenceScore, cache_key: Option<String>) -> RoutingDecision {
    RoutingDecision {
        action,
        confidence,
        cache_key,
        should_expand: action == RoutingAction::Expand,
        should_use_aggressive_retrieval: action == RoutingAction::Aggressive,
    }
}

/// Lowercase and collapse whitespace so trivially different spellings share
/// a cache entry.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// SHA-256 over the normalized query, course id, corpus generation, and
/// serialized options. Keying on the generation means a re-registered course
/// never serves contexts built from its previous documents.
pub fn cache_key(query: &str, course_id: &str, generation: u64, options: &ContextOptions) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_query(query).as_bytes());
    hasher.update(b"\x1f");
    hasher.update(course_id.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(generation.to_le_bytes());
    hasher.update(b"\x1f");
    hasher.update(serde_json::to_string(options).unwrap_or_default().as_bytes());
    format!("{:x}", hasher.finalize())
}
