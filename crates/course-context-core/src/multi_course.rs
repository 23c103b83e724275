//! Contexts spanning several courses under one token budget.
//!
//! Courses come either from the caller or from [`MultiCourseBuilder::detect_courses`].
//! The budget is handed out one course at a time: each course gets the
//! remaining budget divided by the number of courses still to process, so a
//! course that uses less than its share leaves more for the ones after it.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;

use crate::assembler::ContextAssembler;
use crate::error::ContextError;
use crate::excerpt::estimate_tokens;
use crate::models::{ContextOptions, Course, CourseDetection, MultiCourseContext};
use crate::tokenize::{tokenize, unique_terms};

const CODE_MENTION: f64 = 10.0;
const NAME_MENTION: f64 = 8.0;
const KEYWORD_MATCH: f64 = 2.0;
const CONTENT_MATCH: f64 = 1.0;
/// Shorter terms match inside too many unrelated words.
const MIN_CONTENT_TERM_CHARS: usize = 4;
const SECTION_SEPARATOR: &str = "\n\n";

pub struct MultiCourseBuilder {
    assembler: Arc<ContextAssembler>,
    max_detected: usize,
}

impl MultiCourseBuilder {
    pub fn new(assembler: Arc<ContextAssembler>) -> Self {
        Self {
            assembler,
            max_detected: 3,
        }
    }

    pub fn with_max_detected(mut self, max_detected: usize) -> Self {
        self.max_detected = max_detected.max(1);
        self
    }

    pub fn assembler(&self) -> &Arc<ContextAssembler> {
        &self.assembler
    }

    /// Score `courses` against `question`, best first.
    ///
    /// Keeps at most `max_detected` courses with a positive score. When no
    /// course scores, every active course is returned with score zero.
    pub fn detect_courses(&self, question: &str, courses: &[Course]) -> Vec<CourseDetection> {
        let lowered = question.to_lowercase();
        let compact: String = lowered.chars().filter(|c| !c.is_whitespace()).collect();
        let terms = unique_terms(question);

        let mut detections: Vec<CourseDetection> = courses
            .iter()
            .map(|course| CourseDetection {
                course_id: course.id.clone(),
                code: course.code.clone(),
                score: self.course_score(course, &lowered, &compact, &terms),
            })
            .filter(|d| d.score > 0.0)
            .collect();

        if detections.is_empty() {
            return courses
                .iter()
                .filter(|c| c.active)
                .map(|c| CourseDetection {
                    course_id: c.id.clone(),
                    code: c.code.clone(),
                    score: 0.0,
                })
                .collect();
        }

        // Stable: equal scores keep the caller's course order.
        detections.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        detections.truncate(self.max_detected);
        detections
    }

    fn course_score(&self, course: &Course, lowered: &str, compact: &str, terms: &[String]) -> f64 {
        let mut score = 0.0;

        let code = course.code.to_lowercase();
        let code_compact: String = code.chars().filter(|c| !c.is_whitespace()).collect();
        if !code_compact.is_empty() && (lowered.contains(&code) || compact.contains(&code_compact)) {
            score += CODE_MENTION;
        }

        let name = course.name.trim().to_lowercase();
        if !name.is_empty() && lowered.contains(&name) {
            score += NAME_MENTION;
        }

        let Some(corpus) = self.assembler.registry().corpus(&course.id) else {
            return score;
        };

        let mut labels: HashSet<String> = HashSet::new();
        let mut texts: Vec<String> = Vec::with_capacity(corpus.len());
        for doc in corpus.documents() {
            labels.extend(doc.keywords.iter().cloned());
            labels.extend(tokenize(&doc.title));
            texts.push(doc.text.to_lowercase());
        }

        for term in terms {
            if labels.contains(term) {
                score += KEYWORD_MATCH;
            }
            if term.chars().count() >= MIN_CONTENT_TERM_CHARS && texts.iter().any(|t| t.contains(term.as_str())) {
                score += CONTENT_MATCH;
            }
        }

        score
    }

    /// Build one context per course and join them under `## CODE: Name`
    /// headers, keeping `total_tokens <= options.max_tokens`.
    ///
    /// With `course_ids`, unknown ids are skipped and repeated ids are built
    /// once, at their first position. Without, courses are
    /// detected among the user's enrollments, or among all registered
    /// courses when the user has none.
    pub async fn build_multi_course_context(
        &self,
        user_id: &str,
        question: &str,
        course_ids: Option<&[String]>,
        options: &ContextOptions,
    ) -> Result<MultiCourseContext, ContextError> {
        options.validate()?;
        let registry = self.assembler.registry();

        let (targets, detected): (Vec<Course>, Vec<CourseDetection>) = match course_ids {
            Some(ids) if !ids.is_empty() => {
                let mut seen = HashSet::new();
                let courses = ids
                    .iter()
                    .filter(|id| seen.insert(id.as_str()))
                    .filter_map(|id| {
                        let course = registry.course(id);
                        if course.is_none() {
                            tracing::warn!(course_id = %id, "skipping unknown course");
                        }
                        course
                    })
                    .collect();
                (courses, Vec::new())
            }
            _ => {
                let mut candidates = registry.enrolled_courses(user_id);
                if candidates.is_empty() {
                    candidates = registry.courses();
                }
                let detected = self.detect_courses(question, &candidates);
                let courses = detected
                    .iter()
                    .filter_map(|d| candidates.iter().find(|c| c.id == d.course_id).cloned())
                    .collect();
                (courses, detected)
            }
        };

        let mut remaining = options.max_tokens;
        let mut combined = String::new();
        let mut contexts = Vec::with_capacity(targets.len());
        let mut processed = Vec::with_capacity(targets.len());

        for (i, course) in targets.iter().enumerate() {
            let share = remaining / (targets.len() - i);
            let header = format!("## {}: {}\n", course.code, course.name);
            let separator_tokens = if combined.is_empty() {
                0
            } else {
                estimate_tokens(SECTION_SEPARATOR)
            };
            let overhead = estimate_tokens(&header) + separator_tokens;
            if share <= overhead {
                tracing::debug!(course_id = %course.id, share, "token budget exhausted");
                break;
            }

            let course_options = ContextOptions {
                max_tokens: share - overhead,
                ..options.clone()
            };
            let context = self
                .assembler
                .build_context(&course.id, question, &course_options)
                .await?;

            if !combined.is_empty() {
                combined.push_str(SECTION_SEPARATOR);
            }
            combined.push_str(&header);
            combined.push_str(&context.context_text);

            remaining = remaining.saturating_sub(overhead + context.estimated_tokens);
            processed.push(course.id.clone());
            contexts.push(context);
        }

        Ok(MultiCourseContext {
            user_id: user_id.to_string(),
            course_ids: processed,
            detected,
            contexts,
            total_tokens: estimate_tokens(&combined),
            combined_text: combined,
            built_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::CorpusRegistry;
    use crate::models::{Document, MaterialType};

    fn course(id: &str, code: &str, name: &str) -> Course {
        Course {
            id: id.into(),
            code: code.into(),
            name: name.into(),
            active: true,
        }
    }

    fn builder() -> MultiCourseBuilder {
        let registry = Arc::new(CorpusRegistry::new());
        registry.register(
            course("cs101", "CS101", "Intro to Programming"),
            vec![
                Document::new(
                    "loops",
                    "cs101",
                    "Loops",
                    "A while loop repeats until its condition is false. For loops iterate over ranges.",
                    MaterialType::Lecture,
                ),
                Document::new(
                    "recursion",
                    "cs101",
                    "Recursion",
                    "Recursive functions call themselves on smaller inputs until a base case.",
                    MaterialType::Lecture,
                ),
            ],
        );
        registry.register(
            course("math201", "MATH201", "Linear Algebra"),
            vec![Document::new(
                "eigen",
                "math201",
                "Eigenvalues",
                "An eigenvalue scales its eigenvector under a linear map. Matrix diagonalization.",
                MaterialType::Lecture,
            )
            .with_keywords(["matrix", "eigenvalues"])],
        );
        registry.register(
            course("hist150", "HIST150", "World History"),
            vec![Document::new(
                "empires",
                "hist150",
                "Empires",
                "The rise and fall of empires across the ancient world.",
                MaterialType::Reading,
            )],
        );
        registry.enroll(
            "student-1",
            vec!["cs101".into(), "math201".into(), "hist150".into()],
        );
        MultiCourseBuilder::new(Arc::new(ContextAssembler::new(registry)))
    }

    fn enrolled(builder: &MultiCourseBuilder) -> Vec<Course> {
        builder.assembler().registry().enrolled_courses("student-1")
    }

    #[test]
    fn test_explicit_code_mention_wins() {
        let b = builder();
        let detections = b.detect_courses("In CS101, why does my for loop never stop?", &enrolled(&b));
        assert_eq!(detections[0].course_id, "cs101");
        assert!(detections[0].score >= CODE_MENTION);
        assert!(detections.iter().skip(1).all(|d| d.score < detections[0].score));
    }

    #[test]
    fn test_code_with_space_matches() {
        let b = builder();
        let detections = b.detect_courses("question about cs 101 homework", &enrolled(&b));
        assert_eq!(detections[0].course_id, "cs101");
    }

    #[test]
    fn test_name_and_keywords_score() {
        let b = builder();
        let detections = b.detect_courses("linear algebra: how to diagonalize a matrix", &enrolled(&b));
        assert_eq!(detections[0].course_id, "math201");
        // name + keyword "matrix" + content "matrix"
        assert!(detections[0].score >= NAME_MENTION + KEYWORD_MATCH + CONTENT_MATCH);
    }

    #[test]
    fn test_no_signal_falls_back_to_active_courses() {
        let b = builder();
        let mut courses = enrolled(&b);
        courses[2].active = false;
        let detections = b.detect_courses("zzz qqq", &courses);
        let ids: Vec<&str> = detections.iter().map(|d| d.course_id.as_str()).collect();
        assert_eq!(ids, vec!["cs101", "math201"]);
        assert!(detections.iter().all(|d| d.score == 0.0));
    }

    #[test]
    fn test_keeps_at_most_three() {
        let b = builder().with_max_detected(1);
        let detections = b.detect_courses("cs101 math201 hist150", &enrolled(&b));
        assert_eq!(detections.len(), 1);
    }

    #[tokio::test]
    async fn test_multi_course_respects_budget() {
        let b = builder();
        let ids: Vec<String> = vec!["cs101".into(), "unknown".into(), "math201".into()];
        for max_tokens in [3, 10, 40, 400] {
            let options = ContextOptions {
                max_tokens,
                ..ContextOptions::default()
            };
            let multi = b
                .build_multi_course_context("student-1", "loops and matrix", Some(ids.as_slice()), &options)
                .await
                .unwrap();
            assert!(multi.total_tokens <= max_tokens, "budget {}", max_tokens);
            assert!(multi.course_ids.iter().all(|id| id != "unknown"));
            assert_eq!(multi.contexts.len(), multi.course_ids.len());
        }
    }

    #[tokio::test]
    async fn test_multi_course_sections() {
        let b = builder();
        let multi = b
            .build_multi_course_context("student-1", "cs101 loops", None, &ContextOptions::default())
            .await
            .unwrap();
        assert_eq!(multi.course_ids[0], "cs101");
        assert_eq!(multi.detected[0].course_id, "cs101");
        assert!(multi.combined_text.starts_with("## CS101: Intro to Programming\n"));
        assert_eq!(multi.total_tokens, estimate_tokens(&multi.combined_text));
    }

    #[tokio::test]
    async fn test_unenrolled_user_uses_all_courses() {
        let b = builder();
        let multi = b
            .build_multi_course_context("stranger", "world empires", None, &ContextOptions::default())
            .await
            .unwrap();
        assert_eq!(multi.course_ids, vec!["hist150"]);
    }

    #[tokio::test]
    async fn test_repeated_course_ids_build_once() {
        let b = builder();
        let ids: Vec<String> = vec!["cs101".into(), "math201".into(), "cs101".into()];
        let multi = b
            .build_multi_course_context("student-1", "loops and matrix", Some(ids.as_slice()), &ContextOptions::default())
            .await
            .unwrap();
        assert_eq!(multi.course_ids, vec!["cs101", "math201"]);
        assert_eq!(multi.contexts.len(), 2);
        assert_eq!(multi.combined_text.matches("## CS101: Intro to Programming").count(), 1);
    }
}
