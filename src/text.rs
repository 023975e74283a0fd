//! # Text Processing Module
//!
//! ## Purpose
//! Text processing primitives shared by the guidance index, the finding
//! engine, and the spelling pass: tokenization, normalization, snippet
//! extraction, and fuzzy partial-ratio matching.
//!
//! ## Input/Output Specification
//! - **Input**: Raw page text, query terms, site address strings
//! - **Output**: Normalized text, lowercase index terms, context snippets,
//!   similarity scores in [0, 1]
//!
//! ## Key Features
//! - Lowercase alphanumeric term extraction for the inverted index
//! - Alphabetic token extraction for the spelling pass
//! - Windowed Levenshtein partial-ratio for fuzzy fallback scoring
//! - Site-address normalization (", 0 ," placeholder stripping)

use regex::Regex;
use std::sync::OnceLock;
use unicode_normalization::UnicodeNormalization;

/// Normalize raw document text: NFC, collapsed control characters,
/// preserved line breaks.
pub fn normalize_text(text: &str) -> String {
    let normalized: String = text.nfc().collect();
    normalized
        .chars()
        .filter(|&c| c == '\n' || c == '\t' || !c.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}

/// Collapse all whitespace runs to single spaces.
pub fn collapse_whitespace(text: &str) -> String {
    static WS: OnceLock<Regex> = OnceLock::new();
    let ws = WS.get_or_init(|| Regex::new(r"\s+").unwrap());
    ws.replace_all(text.trim(), " ").to_string()
}

/// Extract lowercase alphanumeric index terms of at least `min_len` chars.
pub fn index_terms(text: &str, min_len: usize) -> Vec<String> {
    let mut terms = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            current.push(c.to_ascii_lowercase());
        } else if !current.is_empty() {
            if current.len() >= min_len {
                terms.push(std::mem::take(&mut current));
            } else {
                current.clear();
            }
        }
    }
    if current.len() >= min_len {
        terms.push(current);
    }
    terms
}

/// Extract alphabetic tokens of at least `min_len` chars, preserving case.
/// Used by the spelling pass.
pub fn alpha_tokens(text: &str, min_len: usize) -> Vec<&str> {
    static ALPHA: OnceLock<Regex> = OnceLock::new();
    let alpha = ALPHA.get_or_init(|| Regex::new(r"[A-Za-z]+").unwrap());
    alpha
        .find_iter(text)
        .map(|m| m.as_str())
        .filter(|t| t.len() >= min_len)
        .collect()
}

/// Case-insensitive substring test.
pub fn contains_ci(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Extract a context snippet around the first occurrence of `term`,
/// roughly 80 chars of leading context and a 240-char window. Falls back
/// to the head of the text when the term is absent.
pub fn snippet_around(text: &str, term: &str) -> String {
    let lower = text.to_lowercase();
    let pos = lower.find(&term.to_lowercase());
    let start = match pos {
        Some(p) => floor_char_boundary(text, p.saturating_sub(80)),
        None => 0,
    };
    let end = floor_char_boundary(text, (start + 240).min(text.len()));
    let mut out = text[start..end].replace('\n', " ");
    if end < text.len() {
        out.push_str("...");
    }
    out
}

/// Truncate text to a maximum length with an ellipsis.
pub fn truncate(text: &str, max_length: usize) -> String {
    if text.len() <= max_length {
        text.to_string()
    } else {
        let end = floor_char_boundary(text, max_length.saturating_sub(3));
        format!("{}...", &text[..end])
    }
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    if idx >= text.len() {
        return text.len();
    }
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Levenshtein edit distance over char sequences.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    levenshtein_chars(&a, &b)
}

fn levenshtein_chars(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

fn similarity(a: &[char], b: &[char]) -> f32 {
    let max_len = a.len().max(b.len());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein_chars(a, b) as f32 / max_len as f32
}

/// Cap on the haystack prefix scanned by [`partial_ratio`]; long page
/// texts beyond this contribute nothing to fuzzy scores.
pub const PARTIAL_RATIO_SCAN_LIMIT: usize = 10_000;

/// Best similarity of `needle` against any equally sized window of
/// `haystack`, in [0, 1]. Case-insensitive. An exact substring scores 1.0
/// without scanning. The window stride is a quarter of the needle length,
/// a coarse approximation that is stable across rebuilds.
pub fn partial_ratio(needle: &str, haystack: &str) -> f32 {
    let needle_lower = needle.to_lowercase();
    let hay_lower: String = haystack
        .chars()
        .take(PARTIAL_RATIO_SCAN_LIMIT)
        .collect::<String>()
        .to_lowercase();
    if needle_lower.is_empty() {
        return 0.0;
    }
    if hay_lower.contains(&needle_lower) {
        return 1.0;
    }
    let n: Vec<char> = needle_lower.chars().collect();
    let h: Vec<char> = hay_lower.chars().collect();
    if h.len() <= n.len() {
        return similarity(&n, &h);
    }
    let win = n.len();
    let stride = (win / 4).max(1);
    let mut best = 0.0f32;
    let mut start = 0;
    while start + win <= h.len() {
        let score = similarity(&n, &h[start..start + win]);
        if score > best {
            best = score;
            if best >= 0.999 {
                break;
            }
        }
        start += stride;
    }
    best
}

/// Normalize a site address for title matching: strip the literal ", 0 ,"
/// placeholder used to mean "no suite number", collapse whitespace.
pub fn normalize_site_address(address: &str) -> String {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    let placeholder = PLACEHOLDER.get_or_init(|| Regex::new(r"(?i)\s*,\s*0\s*,\s*").unwrap());
    collapse_whitespace(&placeholder.replace_all(address, " , "))
}

/// First comma-separated component of a normalized address, trimmed.
pub fn address_first_component(address: &str) -> String {
    normalize_site_address(address)
        .split(',')
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}
