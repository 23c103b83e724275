//! Term extraction shared by indexing and querying.
//!
//! Documents and queries go through the same pipeline so BM25 statistics
//! line up: lowercase, split on anything that is not alphanumeric, drop
//! tokens of two characters or fewer, drop stopwords.

use std::collections::HashSet;

/// Tokens at or below this length are discarded.
const MIN_TOKEN_CHARS: usize = 3;

const STOPWORDS: &[&str] = &[
    "about", "above", "after", "again", "against", "all", "also", "and", "any", "are", "because",
    "been", "before", "being", "below", "between", "both", "but", "can", "could", "did", "does",
    "doing", "down", "during", "each", "few", "for", "from", "further", "had", "has", "have",
    "having", "her", "here", "hers", "herself", "him", "himself", "his", "how", "into", "its",
    "itself", "just", "more", "most", "myself", "nor", "not", "now", "off", "once", "only",
    "other", "our", "ours", "ourselves", "out", "over", "own", "same", "she", "should", "some",
    "such", "than", "that", "the", "their", "theirs", "them", "themselves", "then", "there",
    "these", "they", "this", "those", "through", "too", "under", "until", "very", "was", "were",
    "what", "when", "where", "which", "while", "who", "whom", "why", "will", "with", "would",
    "you", "your", "yours", "yourself", "yourselves",
];

/// Returns `true` if `term` is on the stopword list.
pub fn is_stopword(term: &str) -> bool {
    STOPWORDS.binary_search(&term).is_ok()
}

/// Split text into index terms, preserving order and duplicates.
///
/// ```rust
/// use course_context_core::tokenize::tokenize;
///
/// let terms = tokenize("What is the Binary-Search algorithm?");
/// assert_eq!(terms, vec!["binary", "search", "algorithm"]);
/// ```
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= MIN_TOKEN_CHARS)
        .filter(|t| !is_stopword(t))
        .map(str::to_string)
        .collect()
}

/// Distinct terms of `text`, in first-occurrence order.
pub fn unique_terms(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(text)
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Jaccard overlap of two term lists, `0.0` when both are empty.
pub fn jaccard<'a, A, B>(a: A, b: B) -> f64
where
    A: IntoIterator<Item = &'a String>,
    B: IntoIterator<Item = &'a String>,
{
    let a: HashSet<&str> = a.into_iter().map(String::as_str).collect();
    let b: HashSet<&str> = b.into_iter().map(String::as_str).collect();
    jaccard_sets(&a, &b)
}

/// [`jaccard`] over sets the caller already holds.
pub fn jaccard_sets(a: &HashSet<&str>, b: &HashSet<&str>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}
