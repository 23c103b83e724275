//! Material ingestion from a directory of JSON files.
//!
//! The materials root holds a catalog (courses and enrollments) plus any
//! number of material files:
//!
//! ```text
//! materials/
//!   catalog.json            {"courses": [...], "enrollments": {"user": ["cs101"]}}
//!   cs101/week1.json        {"id": ..., "courseId": "cs101", "type": "lecture", ...}
//!   cs101/homework.json     [{...}, {...}]
//! ```
//!
//! Files are discovered with `walkdir`, filtered with `globset`, and read in
//! sorted path order so the resulting corpora are deterministic. When an
//! embedding provider is configured, materials that arrive without a vector
//! are embedded in batches; a failed batch leaves its materials sparse-only.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use course_context_core::corpus::CorpusRegistry;
use course_context_core::embedding::Embedder;
use course_context_core::models::{Course, Document, MaterialType};

use crate::config::{Config, EmbeddingConfig};

#[derive(Debug, Deserialize, Default)]
pub struct Catalog {
    #[serde(default)]
    pub courses: Vec<Course>,
    /// User id → enrolled course ids.
    #[serde(default)]
    pub enrollments: BTreeMap<String, Vec<String>>,
}

/// One material as stored on disk.
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MaterialRecord {
    pub id: String,
    pub course_id: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub week: Option<u32>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MaterialFile {
    Many(Vec<MaterialRecord>),
    One(Box<MaterialRecord>),
}

impl MaterialRecord {
    fn into_document(self) -> Document {
        let kind = self
            .kind
            .as_deref()
            .map(MaterialType::parse)
            .unwrap_or(MaterialType::Other);
        let doc = Document::new(self.id, self.course_id, self.title, self.content, kind)
            .with_keywords(self.keywords)
            .with_week(self.week)
            .with_date(self.date);
        match self.embedding {
            Some(vector) => doc.with_embedding(vector),
            None => doc,
        }
    }
}

/// Summary of one load, for logging and the `courses` command.
#[derive(Debug, Default, Clone)]
pub struct LoadStats {
    pub files: usize,
    pub materials: usize,
    pub skipped: usize,
    pub embedded: usize,
}

/// Read the catalog and every material file under `config.materials.root`
/// into a fresh registry.
pub async fn load_registry(
    config: &Config,
    embedder: Option<Arc<dyn Embedder>>,
) -> Result<(Arc<CorpusRegistry>, LoadStats)> {
    let root = &config.materials.root;
    if !root.exists() {
        bail!("Materials root does not exist: {}", root.display());
    }

    let catalog = read_catalog(&root.join(&config.materials.catalog))?;
    let files = scan_material_files(config)?;
    let mut stats = LoadStats {
        files: files.len(),
        ..LoadStats::default()
    };

    let known: HashSet<&str> = catalog.courses.iter().map(|c| c.id.as_str()).collect();
    let mut by_course: HashMap<String, Vec<Document>> = HashMap::new();
    let mut seen: HashSet<(String, String)> = HashSet::new();

    for path in &files {
        for record in read_material_file(path)? {
            if !known.contains(record.course_id.as_str()) {
                tracing::warn!(
                    material = %record.id,
                    course_id = %record.course_id,
                    file = %path.display(),
                    "material references a course missing from the catalog, skipping"
                );
                stats.skipped += 1;
                continue;
            }
            if !seen.insert((record.course_id.clone(), record.id.clone())) {
                tracing::warn!(material = %record.id, file = %path.display(), "duplicate material id, keeping first");
                stats.skipped += 1;
                continue;
            }
            by_course
                .entry(record.course_id.clone())
                .or_default()
                .push(record.into_document());
        }
    }

    if let Some(embedder) = embedder {
        for docs in by_course.values_mut() {
            stats.embedded += embed_missing(embedder.as_ref(), &config.embedding, docs).await;
        }
    }

    let registry = Arc::new(CorpusRegistry::new());
    for course in catalog.courses {
        let docs = by_course.remove(&course.id).unwrap_or_default();
        stats.materials += docs.len();
        tracing::debug!(course_id = %course.id, materials = docs.len(), "registering course");
        registry.register(course, docs);
    }
    for (user, course_ids) in catalog.enrollments {
        registry.enroll(user, course_ids);
    }

    tracing::info!(
        files = stats.files,
        materials = stats.materials,
        skipped = stats.skipped,
        embedded = stats.embedded,
        "materials loaded"
    );
    Ok((registry, stats))
}

fn read_catalog(path: &Path) -> Result<Catalog> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read catalog: {}", path.display()))?;
    let catalog: Catalog = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse catalog: {}", path.display()))?;

    let mut ids = HashSet::new();
    for course in &catalog.courses {
        if !ids.insert(course.id.as_str()) {
            bail!("Duplicate course id in catalog: {}", course.id);
        }
    }
    Ok(catalog)
}

fn read_material_file(path: &Path) -> Result<Vec<MaterialRecord>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read material file: {}", path.display()))?;
    let parsed: MaterialFile = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse material file: {}", path.display()))?;
    Ok(match parsed {
        MaterialFile::Many(records) => records,
        MaterialFile::One(record) => vec![*record],
    })
}

/// Material files under the root, sorted by relative path.
pub fn scan_material_files(config: &Config) -> Result<Vec<PathBuf>> {
    let materials = &config.materials;
    let root = &materials.root;

    let include_set = build_globset(&materials.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/node_modules/**".to_string(),
        materials.catalog.clone(),
    ];
    default_excludes.extend(materials.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut files = Vec::new();

    let walker = WalkDir::new(root).follow_links(materials.follow_symlinks);
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        files.push((rel_str, path.to_path_buf()));
    }

    // Sort for deterministic ordering
    files.sort_by(|a, b| a.0.cmp(&b.0));

    Ok(files.into_iter().map(|(_, path)| path).collect())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

/// Embed documents that have no vector, `batch_size` at a time. Returns the
/// number of documents that gained an embedding.
async fn embed_missing(embedder: &dyn Embedder, config: &EmbeddingConfig, docs: &mut [Document]) -> usize {
    let pending: Vec<usize> = docs
        .iter()
        .enumerate()
        .filter(|(_, d)| d.embedding.is_none())
        .map(|(i, _)| i)
        .collect();
    let mut embedded = 0;

    for batch in pending.chunks(config.batch_size.max(1)) {
        let texts: Vec<String> = batch
            .iter()
            .map(|&i| format!("{}\n{}", docs[i].title, docs[i].text))
            .collect();
        match embedder.embed_batch(&texts).await {
            Ok(vectors) => {
                for (&i, vector) in batch.iter().zip(vectors) {
                    docs[i].embedding = Some(vector);
                    embedded += 1;
                }
            }
            Err(e) => {
                tracing::warn!(
                    model = embedder.model_name(),
                    batch = batch.len(),
                    error = %e,
                    "embedding batch failed, materials stay sparse-only"
                );
            }
        }
    }

    embedded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use async_trait::async_trait;
    use course_context_core::embedding::EmbeddingResult;
    use course_context_core::error::EmbeddingError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn setup() -> (TempDir, Config) {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("materials");
        write(
            &root,
            "catalog.json",
            r#"{
                "courses": [
                    {"id": "cs101", "code": "CS101", "name": "Intro to Programming"},
                    {"id": "math201", "code": "MATH201", "name": "Linear Algebra", "active": false}
                ],
                "enrollments": {"alice": ["cs101", "math201"]}
            }"#,
        );
        write(
            &root,
            "cs101/loops.json",
            r#"{"id": "loops", "courseId": "cs101", "type": "lecture", "title": "Loops",
                "content": "A for loop repeats.", "keywords": ["Loops"], "week": 2, "date": "2024-09-09"}"#,
        );
        write(
            &root,
            "cs101/hw.json",
            r#"[
                {"id": "hw1", "courseId": "cs101", "type": "homework", "title": "HW 1", "content": "Write a loop."},
                {"id": "hw1", "courseId": "cs101", "type": "homework", "title": "Dup", "content": "dup"},
                {"id": "stray", "courseId": "bio100", "title": "Cells", "content": "Mitochondria."}
            ]"#,
        );
        write(&root, "notes.txt", "not a material");
        write(&root, "drafts/skip.json", r#"{"id": "d", "courseId": "cs101", "title": "D", "content": "draft"}"#);

        let toml = format!(
            "[materials]\nroot = \"{}\"\nexclude_globs = [\"drafts/**\"]\n",
            root.display()
        );
        let config = parse_config(&toml).unwrap();
        (tmp, config)
    }

    #[test]
    fn test_scan_is_sorted_and_filtered() {
        let (_tmp, config) = setup();
        let files = scan_material_files(&config).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.strip_prefix(&config.materials.root).unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["cs101/hw.json", "cs101/loops.json"]);
    }

    #[tokio::test]
    async fn test_load_registry() {
        let (_tmp, config) = setup();
        let (registry, stats) = load_registry(&config, None).await.unwrap();

        assert_eq!(stats.files, 2);
        assert_eq!(stats.materials, 2);
        assert_eq!(stats.skipped, 2);
        assert_eq!(registry.courses().len(), 2);

        let corpus = registry.corpus("cs101").unwrap();
        let loops = corpus.get("loops").unwrap();
        assert_eq!(loops.kind(), MaterialType::Lecture);
        assert_eq!(loops.keywords, vec!["loops"]);
        assert_eq!(loops.metadata.week, Some(2));
        assert_eq!(loops.metadata.date, NaiveDate::from_ymd_opt(2024, 9, 9));
        assert_eq!(corpus.get("hw1").unwrap().title, "HW 1");

        assert!(registry.corpus("math201").unwrap().is_empty());
        assert_eq!(registry.enrolled_courses("alice").len(), 2);
    }

    #[tokio::test]
    async fn test_missing_root_errors() {
        let config = parse_config("[materials]\nroot = \"/definitely/not/here\"\n").unwrap();
        let err = load_registry(&config, None).await.unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn test_malformed_material_names_file() {
        let (_tmp, config) = setup();
        write(&config.materials.root, "cs101/broken.json", "{ not json");
        let err = load_registry(&config, None).await.unwrap_err();
        assert!(format!("{:#}", err).contains("broken.json"));
    }

    struct CountingEmbedder {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        fn model_name(&self) -> &str {
            "counting"
        }

        async fn embed(&self, _text: &str) -> EmbeddingResult {
            Ok(vec![1.0, 0.0])
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(EmbeddingError::Provider("down".into()));
            }
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    #[tokio::test]
    async fn test_embeds_missing_in_batches() {
        let (_tmp, mut config) = setup();
        config.embedding.batch_size = 1;
        let embedder = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let (registry, stats) = load_registry(&config, Some(embedder.clone() as Arc<dyn Embedder>)).await.unwrap();
        assert_eq!(stats.embedded, 2);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
        assert!(registry
            .corpus("cs101")
            .unwrap()
            .documents()
            .iter()
            .all(|d| d.embedding.is_some()));
    }

    #[tokio::test]
    async fn test_embedding_failure_keeps_materials() {
        let (_tmp, config) = setup();
        let embedder = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let (registry, stats) = load_registry(&config, Some(embedder as Arc<dyn Embedder>)).await.unwrap();
        assert_eq!(stats.embedded, 0);
        assert_eq!(registry.corpus("cs101").unwrap().len(), 2);
    }
}
