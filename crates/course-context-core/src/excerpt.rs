//! Excerpt extraction and token budgeting.
//!
//! Token counts are estimated at [`CHARS_PER_TOKEN`] characters per token;
//! every cut lands on a UTF-8 character boundary and, where possible, on
//! whitespace.

/// Approximate chars-per-token ratio.
pub const CHARS_PER_TOKEN: usize = 4;

/// Appended to text cut down to a token budget, when it fits.
pub const TRUNCATION_MARKER: &str = "\n\n[truncated]";

const WINDOW_SEPARATOR: &str = " … ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExcerptSettings {
    /// Characters of context kept on each side of a match.
    pub window: usize,
    pub max_windows: usize,
    /// Length of the fallback excerpt, in characters.
    pub head_chars: usize,
}

impl Default for ExcerptSettings {
    fn default() -> Self {
        Self {
            window: 350,
            max_windows: 3,
            head_chars: 600,
        }
    }
}

/// `ceil(chars / CHARS_PER_TOKEN)`.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Windows of `text` around occurrences of `terms`, or `None` when no term
/// occurs.
///
/// Terms match whole words, compared after Unicode lowercasing; a term with
/// several words matches them as a consecutive run. Windows are measured in
/// characters. Overlapping windows are merged; when more than `max_windows`
/// remain, the ones holding the most matches win and are emitted in document
/// order.
pub fn span_excerpt(text: &str, terms: &[String], settings: &ExcerptSettings) -> Option<String> {
    if text.is_empty() || terms.is_empty() || settings.max_windows == 0 {
        return None;
    }
    // Byte offset of every char, plus `text.len()` as the end sentinel.
    let char_starts: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_count = char_starts.len() - 1;
    let doc_words = words(text);

    // Matches as (start char, end char).
    let mut matches: Vec<(usize, usize)> = Vec::new();
    for term in terms {
        let needle: Vec<String> = term
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect();
        if needle.is_empty() || needle.len() > doc_words.len() {
            continue;
        }
        for run in doc_words.windows(needle.len()) {
            if run.iter().zip(&needle).all(|(w, n)| w.lower == *n) {
                matches.push((run[0].char_start, run[needle.len() - 1].char_end));
            }
        }
    }
    if matches.is_empty() {
        return None;
    }
    matches.sort_unstable();

    // (start, end, hits), in bytes
    let mut windows: Vec<(usize, usize, usize)> = Vec::new();
    for (m_start, m_end) in matches {
        let from = char_starts[m_start.saturating_sub(settings.window)];
        let to = char_starts[(m_end + settings.window).min(char_count)];
        let start = snap_start(text, from, char_starts[m_start]);
        let end = snap_end(text, to, char_starts[m_end]);
        match windows.last_mut() {
            Some(last) if start <= last.1 => {
                last.1 = last.1.max(end);
                last.2 += 1;
            }
            _ => windows.push((start, end, 1)),
        }
    }

    if windows.len() > settings.max_windows {
        let mut by_hits: Vec<usize> = (0..windows.len()).collect();
        by_hits.sort_by(|&a, &b| windows[b].2.cmp(&windows[a].2).then(a.cmp(&b)));
        by_hits.truncate(settings.max_windows);
        by_hits.sort_unstable();
        windows = by_hits.into_iter().map(|i| windows[i]).collect();
    }

    let pieces: Vec<&str> = windows
        .iter()
        .map(|&(s, e, _)| text[s..e].trim())
        .filter(|p| !p.is_empty())
        .collect();
    if pieces.is_empty() {
        return None;
    }
    Some(pieces.join(WINDOW_SEPARATOR))
}

struct Word {
    char_start: usize,
    char_end: usize,
    lower: String,
}

/// Alphanumeric runs of `text` with their char positions.
fn words(text: &str) -> Vec<Word> {
    let mut out = Vec::new();
    let mut current: Option<(usize, usize)> = None; // (char start, byte start)
    let mut chars = text.char_indices().enumerate().peekable();
    while let Some((ci, (bi, c))) = chars.next() {
        if c.is_alphanumeric() {
            if current.is_none() {
                current = Some((ci, bi));
            }
        } else if let Some((cs, bs)) = current.take() {
            out.push(Word {
                char_start: cs,
                char_end: ci,
                lower: text[bs..bi].to_lowercase(),
            });
        }
        if chars.peek().is_none() {
            if let Some((cs, bs)) = current.take() {
                out.push(Word {
                    char_start: cs,
                    char_end: ci + 1,
                    lower: text[bs..].to_lowercase(),
                });
            }
        }
    }
    out
}

/// The first `max_chars` characters of `text`, cut back to whitespace and
/// suffixed with `…` when shortened.
pub fn head_excerpt(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    let cut = byte_offset_of_char(trimmed, max_chars);
    if cut >= trimmed.len() {
        return trimmed.to_string();
    }
    let snapped = trimmed[..cut]
        .rfind(char::is_whitespace)
        .filter(|&i| i > 0)
        .unwrap_or(cut);
    format!("{}…", trimmed[..snapped].trim_end())
}

/// Cut `text` so that `estimate_tokens(result) <= max_tokens`.
///
/// Prefers a paragraph break, then a line break, then whitespace in the
/// second half of the allowed span. [`TRUNCATION_MARKER`] is appended only
/// when it fits in the budget.
pub fn truncate_to_budget(text: &str, max_tokens: usize) -> String {
    if estimate_tokens(text) <= max_tokens {
        return text.to_string();
    }
    let budget_chars = max_tokens.saturating_mul(CHARS_PER_TOKEN);
    let marker_chars = TRUNCATION_MARKER.chars().count();

    let (body_chars, marker) = if budget_chars > marker_chars {
        (budget_chars - marker_chars, TRUNCATION_MARKER)
    } else {
        (budget_chars, "")
    };

    let hard = byte_offset_of_char(text, body_chars);
    let head = &text[..hard];
    let min_cut = hard / 2;
    let cut = head
        .rfind("\n\n")
        .filter(|&i| i >= min_cut)
        .or_else(|| head.rfind('\n').filter(|&i| i >= min_cut))
        .or_else(|| head.rfind(char::is_whitespace).filter(|&i| i >= min_cut))
        .unwrap_or(hard);

    let mut out = text[..cut].trim_end().to_string();
    out.push_str(marker);
    out
}

fn byte_offset_of_char(text: &str, n: usize) -> usize {
    text.char_indices().nth(n).map(|(i, _)| i).unwrap_or(text.len())
}

fn ceil_char_boundary(text: &str, mut pos: usize) -> usize {
    while pos < text.len() && !text.is_char_boundary(pos) {
        pos += 1;
    }
    pos
}

fn floor_char_boundary(text: &str, mut pos: usize) -> usize {
    while pos > 0 && !text.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

/// Move `pos` forward to the start of a word, never past `limit`.
fn snap_start(text: &str, pos: usize, limit: usize) -> usize {
    let pos = ceil_char_boundary(text, pos);
    if pos == 0 || pos >= limit || text[..pos].ends_with(char::is_whitespace) {
        return pos.min(limit);
    }
    text[pos..limit]
        .find(char::is_whitespace)
        .map(|i| pos + i + 1)
        .map(|p| ceil_char_boundary(text, p).min(limit))
        .unwrap_or(pos)
}

/// Move `pos` back to the end of a word, never before `floor`.
fn snap_end(text: &str, pos: usize, floor: usize) -> usize {
    let pos = floor_char_boundary(text, pos);
    if pos >= text.len() || pos <= floor || text[pos..].starts_with(char::is_whitespace) {
        return pos.max(floor);
    }
    text[floor..pos]
        .rfind(char::is_whitespace)
        .map(|i| floor + i)
        .unwrap_or(pos)
}
