//! Core data types shared by every stage of the retrieval pipeline.
//!
//! Documents are immutable once indexed. Everything produced per query
//! ([`RetrievalResult`], [`FusedResult`], [`RankedMaterial`],
//! [`CourseContext`]) is a plain value that is never mutated after the
//! stage that created it hands it on.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ContextError;
use crate::router::RoutingDecision;
use crate::tokenize::tokenize;

/// Kind of course material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaterialType {
    Lecture,
    Reading,
    Homework,
    Exam,
    Project,
    Syllabus,
    Announcement,
    Video,
    Code,
    #[serde(other)]
    Other,
}

impl MaterialType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaterialType::Lecture => "lecture",
            MaterialType::Reading => "reading",
            MaterialType::Homework => "homework",
            MaterialType::Exam => "exam",
            MaterialType::Project => "project",
            MaterialType::Syllabus => "syllabus",
            MaterialType::Announcement => "announcement",
            MaterialType::Video => "video",
            MaterialType::Code => "code",
            MaterialType::Other => "other",
        }
    }

    /// Parse a type name, mapping anything unrecognized to [`MaterialType::Other`].
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "lecture" => MaterialType::Lecture,
            "reading" => MaterialType::Reading,
            "homework" => MaterialType::Homework,
            "exam" => MaterialType::Exam,
            "project" => MaterialType::Project,
            "syllabus" => MaterialType::Syllabus,
            "announcement" => MaterialType::Announcement,
            "video" => MaterialType::Video,
            "code" => MaterialType::Code,
            _ => MaterialType::Other,
        }
    }
}

impl std::fmt::Display for MaterialType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptive metadata attached to a material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialMetadata {
    pub kind: MaterialType,
    pub week: Option<u32>,
    pub date: Option<NaiveDate>,
}

/// One piece of course material, tokenized and optionally embedded.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub course_id: String,
    pub title: String,
    pub text: String,
    /// Index terms derived from `title` and `text`.
    pub tokens: Vec<String>,
    pub embedding: Option<Vec<f32>>,
    /// Author-supplied tags, lowercased.
    pub keywords: Vec<String>,
    pub metadata: MaterialMetadata,
}

impl Document {
    pub fn new(
        id: impl Into<String>,
        course_id: impl Into<String>,
        title: impl Into<String>,
        text: impl Into<String>,
        kind: MaterialType,
    ) -> Self {
        let title = title.into();
        let text = text.into();
        let tokens = tokenize(&format!("{}\n{}", title, text));
        Self {
            id: id.into(),
            course_id: course_id.into(),
            title,
            text,
            tokens,
            embedding: None,
            keywords: Vec::new(),
            metadata: MaterialMetadata {
                kind,
                week: None,
                date: None,
            },
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = if embedding.is_empty() {
            None
        } else {
            Some(embedding)
        };
        self
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.keywords = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        self
    }

    pub fn with_week(mut self, week: Option<u32>) -> Self {
        self.metadata.week = week;
        self
    }

    pub fn with_date(mut self, date: Option<NaiveDate>) -> Self {
        self.metadata.date = date;
        self
    }

    pub fn kind(&self) -> MaterialType {
        self.metadata.kind
    }
}

/// A course that owns a corpus of materials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub id: String,
    pub code: String,
    pub name: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// A hit from a single retriever. Scores are only comparable within one list.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalResult {
    pub document_id: String,
    pub score: f64,
    /// 1-based position in the retriever's list.
    pub rank: usize,
    /// Query terms found in the document (sparse only).
    pub matched_terms: Vec<String>,
}

/// A hit after reciprocal rank fusion.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedResult {
    pub document_id: String,
    pub fused_score: f64,
    /// `fused_score` divided by the best score reachable from the lists
    /// that produced results, in `[0, 1]`.
    pub normalized_score: f64,
    pub matched_terms: Vec<String>,
    pub sparse_rank: Option<usize>,
    pub dense_rank: Option<usize>,
}

impl FusedResult {
    /// Best (lowest) rank across both source lists.
    pub fn best_rank(&self) -> usize {
        match (self.sparse_rank, self.dense_rank) {
            (Some(s), Some(d)) => s.min(d),
            (Some(s), None) => s,
            (None, Some(d)) => d,
            (None, None) => usize::MAX,
        }
    }
}

/// Final output unit handed to the prompt builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedMaterial {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: MaterialType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub week: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    pub text: String,
    /// 0-100.
    pub relevance_score: f64,
    pub matched_keywords: Vec<String>,
    pub excerpt: String,
}

/// Assembled context for one course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseContext {
    pub course_id: String,
    pub materials: Vec<RankedMaterial>,
    pub context_text: String,
    pub estimated_tokens: usize,
    pub built_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routing: Option<RoutingDecision>,
}

/// Per-course score from automatic course detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseDetection {
    pub course_id: String,
    pub code: String,
    pub score: f64,
}

/// Contexts for several courses combined under one token budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiCourseContext {
    pub user_id: String,
    pub course_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub detected: Vec<CourseDetection>,
    pub contexts: Vec<CourseContext>,
    pub combined_text: String,
    pub total_tokens: usize,
    pub built_at: DateTime<Utc>,
}

/// Caller-tunable knobs for a single context build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextOptions {
    pub max_materials: usize,
    /// 0-100.
    pub min_relevance: f64,
    pub max_tokens: usize,
    pub priority_types: Vec<MaterialType>,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            max_materials: 5,
            min_relevance: 30.0,
            max_tokens: 2000,
            priority_types: Vec::new(),
        }
    }
}

impl ContextOptions {
    /// Reject options that can only come from a caller bug.
    pub fn validate(&self) -> Result<(), ContextError> {
        if self.max_materials == 0 {
            return Err(ContextError::InvalidOptions(
                "maxMaterials must be >= 1".to_string(),
            ));
        }
        if !self.min_relevance.is_finite() || !(0.0..=100.0).contains(&self.min_relevance) {
            return Err(ContextError::InvalidOptions(format!(
                "minRelevance must be in [0, 100], got {}",
                self.min_relevance
            )));
        }
        if self.max_tokens == 0 {
            return Err(ContextError::InvalidOptions(
                "maxTokens must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}
