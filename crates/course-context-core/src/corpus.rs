//! In-memory document store, one corpus per course.
//!
//! A [`Corpus`] owns an ordered set of [`Document`]s and a derived
//! [`CorpusIndex`] (inverted index, IDF table, embedding norms). The index is
//! built lazily on first use behind a [`OnceLock`], so concurrent first
//! queries share a single build instead of racing to build their own.
//!
//! Documents are immutable. Re-indexing a course replaces its corpus
//! wholesale through [`CorpusRegistry::register`]; queries already holding the
//! old `Arc<Corpus>` finish against the old snapshot. Every corpus carries a
//! process-unique [`Corpus::generation`], so anything keyed on a corpus can
//! tell a replacement apart from the snapshot it was built from.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use std::time::Instant;

use crate::embedding::l2_norm;
use crate::models::{Course, Document};

/// One entry of a postings list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Posting {
    /// Position of the document in the corpus.
    pub doc: usize,
    /// Term frequency within the document.
    pub tf: u32,
}

/// Statistics derived from a corpus, built once and then read-only.
#[derive(Debug)]
pub struct CorpusIndex {
    postings: HashMap<String, Vec<Posting>>,
    idf: HashMap<String, f64>,
    doc_lens: Vec<usize>,
    avg_doc_len: f64,
    norms: Vec<Option<f32>>,
    positions: HashMap<String, usize>,
}

impl CorpusIndex {
    fn build(documents: &[Document]) -> Self {
        let mut postings: HashMap<String, Vec<Posting>> = HashMap::new();
        let mut doc_lens = Vec::with_capacity(documents.len());
        let mut norms = Vec::with_capacity(documents.len());
        let mut positions = HashMap::with_capacity(documents.len());

        for (i, doc) in documents.iter().enumerate() {
            doc_lens.push(doc.tokens.len());
            norms.push(doc.embedding.as_deref().map(l2_norm));
            positions.entry(doc.id.clone()).or_insert(i);

            let mut tf: HashMap<&str, u32> = HashMap::new();
            for token in &doc.tokens {
                *tf.entry(token.as_str()).or_insert(0) += 1;
            }
            for (term, count) in tf {
                postings
                    .entry(term.to_string())
                    .or_default()
                    .push(Posting { doc: i, tf: count });
            }
        }

        for list in postings.values_mut() {
            list.sort_by_key(|p| p.doc);
        }

        let n = documents.len() as f64;
        let idf = postings
            .iter()
            .map(|(term, list)| {
                let df = list.len() as f64;
                (term.clone(), (1.0 + (n - df + 0.5) / (df + 0.5)).ln())
            })
            .collect();

        let total: usize = doc_lens.iter().sum();
        let avg_doc_len = if documents.is_empty() {
            0.0
        } else {
            total as f64 / n
        };

        Self {
            postings,
            idf,
            doc_lens,
            avg_doc_len,
            norms,
            positions,
        }
    }

    pub fn postings(&self, term: &str) -> &[Posting] {
        self.postings.get(term).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Inverse document frequency, `0.0` for terms outside the vocabulary.
    pub fn idf(&self, term: &str) -> f64 {
        self.idf.get(term).copied().unwrap_or(0.0)
    }

    pub fn contains_term(&self, term: &str) -> bool {
        self.postings.contains_key(term)
    }

    pub fn vocabulary_size(&self) -> usize {
        self.postings.len()
    }

    pub fn doc_len(&self, doc: usize) -> usize {
        self.doc_lens.get(doc).copied().unwrap_or(0)
    }

    pub fn avg_doc_len(&self) -> f64 {
        self.avg_doc_len
    }

    /// Precomputed embedding norm of the document at `doc`, if it has one.
    pub fn norm(&self, doc: usize) -> Option<f32> {
        self.norms.get(doc).copied().flatten()
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.positions.get(id).copied()
    }
}

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Ordered documents of one course plus their lazily built index.
#[derive(Debug)]
pub struct Corpus {
    course_id: String,
    generation: u64,
    documents: Vec<Document>,
    index: OnceLock<CorpusIndex>,
}

impl Corpus {
    pub fn new(course_id: impl Into<String>, documents: Vec<Document>) -> Self {
        Self {
            course_id: course_id.into(),
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
            documents,
            index: OnceLock::new(),
        }
    }

    /// Identifies this snapshot; no two corpora in a process share one.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn course_id(&self) -> &str {
        &self.course_id
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// The corpus index, building it on first call.
    ///
    /// Callers arriving while another thread is building block until that
    /// build finishes and then share its result.
    pub fn index(&self) -> &CorpusIndex {
        self.index.get_or_init(|| {
            let started = Instant::now();
            let index = CorpusIndex::build(&self.documents);
            tracing::debug!(
                course_id = %self.course_id,
                documents = self.documents.len(),
                terms = index.vocabulary_size(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "built corpus index"
            );
            index
        })
    }

    pub fn is_indexed(&self) -> bool {
        self.index.get().is_some()
    }

    pub fn get(&self, id: &str) -> Option<&Document> {
        self.index().position(id).map(|i| &self.documents[i])
    }
}

#[derive(Debug)]
struct CourseEntry {
    course: Course,
    corpus: Arc<Corpus>,
}

/// Thread-safe registry of courses, their corpora, and user enrollments.
#[derive(Debug)]
pub struct CorpusRegistry {
    courses: RwLock<BTreeMap<String, CourseEntry>>,
    enrollments: RwLock<HashMap<String, Vec<String>>>,
}

impl CorpusRegistry {
    pub fn new() -> Self {
        Self {
            courses: RwLock::new(BTreeMap::new()),
            enrollments: RwLock::new(HashMap::new()),
        }
    }

    /// Register a course, replacing any previous corpus for the same id.
    pub fn register(&self, course: Course, documents: Vec<Document>) -> Arc<Corpus> {
        let corpus = Arc::new(Corpus::new(course.id.clone(), documents));
        let mut courses = self.courses.write().unwrap_or_else(PoisonError::into_inner);
        if courses.contains_key(&course.id) {
            tracing::debug!(course_id = %course.id, "replacing corpus");
        }
        courses.insert(
            course.id.clone(),
            CourseEntry {
                course,
                corpus: Arc::clone(&corpus),
            },
        );
        corpus
    }

    pub fn corpus(&self, course_id: &str) -> Option<Arc<Corpus>> {
        let courses = self.courses.read().unwrap_or_else(PoisonError::into_inner);
        courses.get(course_id).map(|e| Arc::clone(&e.corpus))
    }

    pub fn course(&self, course_id: &str) -> Option<Course> {
        let courses = self.courses.read().unwrap_or_else(PoisonError::into_inner);
        courses.get(course_id).map(|e| e.course.clone())
    }

    /// All registered courses, ordered by id.
    pub fn courses(&self) -> Vec<Course> {
        let courses = self.courses.read().unwrap_or_else(PoisonError::into_inner);
        courses.values().map(|e| e.course.clone()).collect()
    }

    pub fn enroll(&self, user_id: impl Into<String>, course_ids: Vec<String>) {
        let mut enrollments = self
            .enrollments
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        enrollments.insert(user_id.into(), course_ids);
    }

    /// Courses the user is enrolled in, in enrollment order. Unknown course
    /// ids are skipped.
    pub fn enrolled_courses(&self, user_id: &str) -> Vec<Course> {
        let ids = {
            let enrollments = self
                .enrollments
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            enrollments.get(user_id).cloned().unwrap_or_default()
        };
        ids.iter().filter_map(|id| self.course(id)).collect()
    }
}

impl Default for CorpusRegistry {
    fn default() -> Self {
        Self::new()
    }
}
