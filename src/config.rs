use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use course_context_core::confidence::{ConfidenceThresholds, SignalWeights};
use course_context_core::excerpt::ExcerptSettings;
use course_context_core::models::{ContextOptions, MaterialType};
use course_context_core::router::RoutingPolicy;
use course_context_core::sparse::Bm25Params;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub materials: MaterialsConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub confidence: ConfidenceConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MaterialsConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_catalog")]
    pub catalog: String,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.json".to_string()]
}
fn default_catalog() -> String {
    "catalog.json".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_bm25_k1")]
    pub bm25_k1: f64,
    #[serde(default = "default_bm25_b")]
    pub bm25_b: f64,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    #[serde(default = "default_mmr_lambda")]
    pub mmr_lambda: f64,
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            bm25_k1: default_bm25_k1(),
            bm25_b: default_bm25_b(),
            rrf_k: default_rrf_k(),
            mmr_lambda: default_mmr_lambda(),
            candidate_multiplier: default_candidate_multiplier(),
        }
    }
}

fn default_bm25_k1() -> f64 {
    1.5
}
fn default_bm25_b() -> f64 {
    0.75
}
fn default_rrf_k() -> f64 {
    60.0
}
fn default_mmr_lambda() -> f64 {
    0.7
}
fn default_candidate_multiplier() -> usize {
    2
}

impl RetrievalConfig {
    pub fn bm25_params(&self) -> Bm25Params {
        Bm25Params {
            k1: self.bm25_k1,
            b: self.bm25_b,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConfidenceConfig {
    #[serde(default = "default_high")]
    pub high: f64,
    #[serde(default = "default_medium")]
    pub medium: f64,
    #[serde(default = "default_coverage_weight")]
    pub coverage_weight: f64,
    #[serde(default = "default_margin_weight")]
    pub margin_weight: f64,
    #[serde(default = "default_history_weight")]
    pub history_weight: f64,
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            high: default_high(),
            medium: default_medium(),
            coverage_weight: default_coverage_weight(),
            margin_weight: default_margin_weight(),
            history_weight: default_history_weight(),
            history_window: default_history_window(),
        }
    }
}

fn default_high() -> f64 {
    0.7
}
fn default_medium() -> f64 {
    0.4
}
fn default_coverage_weight() -> f64 {
    0.6
}
fn default_margin_weight() -> f64 {
    0.25
}
fn default_history_weight() -> f64 {
    0.15
}
fn default_history_window() -> usize {
    10
}

impl ConfidenceConfig {
    pub fn thresholds(&self) -> ConfidenceThresholds {
        ConfidenceThresholds {
            high: self.high,
            medium: self.medium,
        }
    }

    pub fn weights(&self) -> SignalWeights {
        SignalWeights {
            coverage: self.coverage_weight,
            margin: self.margin_weight,
            history: self.history_weight,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RoutingConfig {
    #[serde(default = "default_expand_factor")]
    pub expand_factor: usize,
    #[serde(default = "default_aggressive_factor")]
    pub aggressive_factor: usize,
    #[serde(default = "default_relevance_drop")]
    pub relevance_drop: f64,
    #[serde(default = "default_relevance_floor")]
    pub relevance_floor: f64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            expand_factor: default_expand_factor(),
            aggressive_factor: default_aggressive_factor(),
            relevance_drop: default_relevance_drop(),
            relevance_floor: default_relevance_floor(),
        }
    }
}

fn default_expand_factor() -> usize {
    2
}
fn default_aggressive_factor() -> usize {
    3
}
fn default_relevance_drop() -> f64 {
    15.0
}
fn default_relevance_floor() -> f64 {
    5.0
}

impl RoutingConfig {
    pub fn policy(&self) -> RoutingPolicy {
        RoutingPolicy {
            expand_factor: self.expand_factor,
            aggressive_factor: self.aggressive_factor,
            relevance_drop: self.relevance_drop,
            relevance_floor: self.relevance_floor,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// `moka` (default) or `lru`.
    #[serde(default = "default_cache_backend")]
    pub backend: String,
    #[serde(default = "default_cache_entries")]
    pub max_entries: usize,
    /// 0 disables expiry.
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: default_cache_backend(),
            max_entries: default_cache_entries(),
            ttl_secs: default_cache_ttl(),
        }
    }
}

fn default_cache_backend() -> String {
    "moka".to_string()
}
fn default_cache_entries() -> usize {
    256
}
fn default_cache_ttl() -> u64 {
    900
}

impl CacheConfig {
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_secs > 0).then(|| Duration::from_secs(self.ttl_secs))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContextConfig {
    #[serde(default = "default_max_materials")]
    pub max_materials: usize,
    #[serde(default = "default_min_relevance")]
    pub min_relevance: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default)]
    pub priority_types: Vec<String>,
    #[serde(default = "default_excerpt_window")]
    pub excerpt_window: usize,
    #[serde(default = "default_max_windows")]
    pub max_windows: usize,
    #[serde(default = "default_head_chars")]
    pub head_excerpt_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_materials: default_max_materials(),
            min_relevance: default_min_relevance(),
            max_tokens: default_max_tokens(),
            priority_types: Vec::new(),
            excerpt_window: default_excerpt_window(),
            max_windows: default_max_windows(),
            head_excerpt_chars: default_head_chars(),
        }
    }
}

fn default_max_materials() -> usize {
    5
}
fn default_min_relevance() -> f64 {
    30.0
}
fn default_max_tokens() -> usize {
    2000
}
fn default_excerpt_window() -> usize {
    350
}
fn default_max_windows() -> usize {
    3
}
fn default_head_chars() -> usize {
    600
}

impl ContextConfig {
    /// Options applied when a request leaves them unset.
    pub fn default_options(&self) -> ContextOptions {
        ContextOptions {
            max_materials: self.max_materials,
            min_relevance: self.min_relevance,
            max_tokens: self.max_tokens,
            priority_types: self.priority_types.iter().map(|t| MaterialType::parse(t)).collect(),
        }
    }

    pub fn excerpt_settings(&self) -> ExcerptSettings {
        ExcerptSettings {
            window: self.excerpt_window,
            max_windows: self.max_windows,
            head_chars: self.head_excerpt_chars,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Upper bound on embedding one query during retrieval.
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            query_timeout_ms: default_query_timeout_ms(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_query_timeout_ms() -> u64 {
    5000
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let mut config = parse_config(&content)?;

    // Relative material roots resolve against the config file's directory.
    if config.materials.root.is_relative() {
        if let Some(dir) = path.parent() {
            config.materials.root = dir.join(&config.materials.root);
        }
    }

    Ok(config)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate retrieval
    let r = &config.retrieval;
    if r.bm25_k1 < 0.0 {
        bail!("retrieval.bm25_k1 must be >= 0");
    }
    if !(0.0..=1.0).contains(&r.bm25_b) {
        bail!("retrieval.bm25_b must be in [0.0, 1.0]");
    }
    if r.rrf_k < 0.0 || !r.rrf_k.is_finite() {
        bail!("retrieval.rrf_k must be >= 0");
    }
    if !(0.0..=1.0).contains(&r.mmr_lambda) {
        bail!("retrieval.mmr_lambda must be in [0.0, 1.0]");
    }
    if r.candidate_multiplier == 0 {
        bail!("retrieval.candidate_multiplier must be >= 1");
    }

    // Validate confidence
    let c = &config.confidence;
    if !(0.0 <= c.medium && c.medium <= c.high && c.high <= 1.0) {
        bail!("confidence thresholds must satisfy 0 <= medium <= high <= 1");
    }
    if c.coverage_weight < 0.0 || c.margin_weight < 0.0 || c.history_weight < 0.0 {
        bail!("confidence weights must be >= 0");
    }
    if c.coverage_weight + c.margin_weight <= 0.0 {
        bail!("confidence.coverage_weight and confidence.margin_weight must not both be 0");
    }

    // Validate routing
    let rt = &config.routing;
    if rt.expand_factor == 0 || rt.aggressive_factor == 0 {
        bail!("routing.expand_factor and routing.aggressive_factor must be >= 1");
    }
    if rt.relevance_drop < 0.0 {
        bail!("routing.relevance_drop must be >= 0");
    }
    if !(0.0..=100.0).contains(&rt.relevance_floor) {
        bail!("routing.relevance_floor must be in [0, 100]");
    }

    // Validate cache
    match config.cache.backend.as_str() {
        "lru" | "moka" => {}
        other => bail!("Unknown cache backend: '{}'. Must be lru or moka.", other),
    }
    if config.cache.max_entries == 0 {
        bail!("cache.max_entries must be >= 1");
    }

    // Validate context defaults
    config
        .context
        .default_options()
        .validate()
        .map_err(|e| anyhow::anyhow!("[context] {}", e))?;
    if config.context.max_windows == 0 {
        bail!("context.max_windows must be >= 1");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be >= 1");
        }
    }

    Ok(())
}
