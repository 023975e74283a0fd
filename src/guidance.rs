//! # Guidance Index Module
//!
//! ## Purpose
//! In-memory inverted index over a directory of guidance documents
//! (standards extracts, vendor notes). Ranks documents against free-text
//! queries and returns scored citations with context snippets.
//!
//! ## Input/Output Specification
//! - **Input**: A guidance root directory of plain-text files, free-text
//!   queries
//! - **Output**: Ranked [`GuidanceCitation`] lists with scores in [0, 1]
//!
//! ## Key Features
//! - Exact term hits score 1.0 per query term
//! - Fuzzy partial-ratio fallback for near-miss terms above a floor
//! - Deterministic ranking (score desc, then source name)
//! - Rebuildable at runtime without restarting the service

use crate::config::GuidanceConfig;
use crate::errors::{AuditError, Result};
use crate::text;
use crate::GuidanceCitation;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const GUIDANCE_EXTENSIONS: &[&str] = &["txt", "md", "text"];

/// A single indexed guidance document.
#[derive(Debug, Clone)]
struct GuidanceDoc {
    /// Path relative to the guidance root
    source: String,
    /// Full normalized text
    text: String,
}

/// Inverted index over the guidance corpus.
#[derive(Debug)]
pub struct GuidanceIndex {
    docs: Vec<GuidanceDoc>,
    postings: HashMap<String, Vec<usize>>,
    fuzzy_floor: f32,
    top_k: usize,
    min_term_len: usize,
}

impl GuidanceIndex {
    /// An empty index. Searches return no citations.
    pub fn empty(config: &GuidanceConfig) -> Self {
        Self {
            docs: Vec::new(),
            postings: HashMap::new(),
            fuzzy_floor: config.fuzzy_floor,
            top_k: config.top_k,
            min_term_len: config.min_term_len,
        }
    }

    /// Build the index by walking the guidance root. Fails when the root
    /// does not exist or is not a directory.
    pub fn build(config: &GuidanceConfig) -> Result<Self> {
        if !config.root.is_dir() {
            return Err(AuditError::GuidanceCorpusUnavailable {
                root: config.root.display().to_string(),
                details: "guidance root is not a directory".to_string(),
            });
        }
        let mut index = Self::empty(config);
        for entry in WalkDir::new(&config.root)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let ext = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase());
            if !matches!(ext.as_deref(), Some(e) if GUIDANCE_EXTENSIONS.contains(&e)) {
                continue;
            }
            let raw = match std::fs::read_to_string(entry.path()) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "skipping unreadable guidance file");
                    continue;
                }
            };
            let source = entry
                .path()
                .strip_prefix(&config.root)
                .unwrap_or(entry.path())
                .display()
                .to_string();
            index.add_document(source, text::normalize_text(&raw));
        }
        index.docs.sort_by(|a, b| a.source.cmp(&b.source));
        index.rebuild_postings();
        info!(
            documents = index.docs.len(),
            terms = index.postings.len(),
            root = %config.root.display(),
            "guidance index built"
        );
        Ok(index)
    }

    /// Build the index, falling back to an empty one when the corpus root
    /// is unavailable. Used at startup so a missing corpus degrades the
    /// audit instead of blocking it.
    pub fn build_or_empty(config: &GuidanceConfig) -> Self {
        match Self::build(config) {
            Ok(index) => index,
            Err(e) => {
                warn!(error = %e, "guidance corpus unavailable, starting with empty index");
                Self::empty(config)
            }
        }
    }

    fn add_document(&mut self, source: String, text_content: String) {
        self.docs.push(GuidanceDoc {
            source,
            text: text_content,
        });
    }

    /// Rebuild the term postings from scratch. Doc ids are appended in
    /// ascending order, so each posting list stays sorted.
    fn rebuild_postings(&mut self) {
        self.postings.clear();
        for (doc_id, doc) in self.docs.iter().enumerate() {
            let terms: HashSet<String> = text::index_terms(&doc.text, self.min_term_len)
                .into_iter()
                .collect();
            for term in terms {
                self.postings.entry(term).or_default().push(doc_id);
            }
        }
    }

    fn has_exact_term(&self, doc_id: usize, term: &str) -> bool {
        self.postings
            .get(term)
            .is_some_and(|ids| ids.binary_search(&doc_id).is_ok())
    }

    /// Number of indexed documents.
    pub fn document_count(&self) -> usize {
        self.docs.len()
    }

    /// Number of distinct index terms.
    pub fn term_count(&self) -> usize {
        self.postings.len()
    }

    /// Search the corpus for a free-text query. Each query term contributes
    /// 1.0 for an exact hit, or its partial-ratio when at or above the
    /// fuzzy floor; the document score is the mean contribution over query
    /// terms. Returns at most `top_k` citations, best first.
    pub fn search(&self, query: &str) -> Vec<GuidanceCitation> {
        let query_terms = text::index_terms(query, self.min_term_len);
        if query_terms.is_empty() || self.docs.is_empty() {
            return Vec::new();
        }
        let mut scored: Vec<(f32, usize, &str)> = Vec::new();
        for (doc_id, doc) in self.docs.iter().enumerate() {
            let mut total = 0.0f32;
            let mut first_hit: Option<&str> = None;
            for term in &query_terms {
                if self.has_exact_term(doc_id, term) {
                    total += 1.0;
                    first_hit.get_or_insert(term);
                } else {
                    let ratio = text::partial_ratio(term, &doc.text);
                    if ratio >= self.fuzzy_floor {
                        total += ratio;
                        first_hit.get_or_insert(term);
                    }
                }
            }
            if total > 0.0 {
                let score = total / query_terms.len() as f32;
                scored.push((score, doc_id, first_hit.unwrap_or("")));
            }
        }
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| self.docs[a.1].source.cmp(&self.docs[b.1].source))
        });
        scored
            .into_iter()
            .take(self.top_k)
            .map(|(score, doc_id, hit)| {
                let doc = &self.docs[doc_id];
                GuidanceCitation {
                    source: doc.source.clone(),
                    snippet: text::snippet_around(&doc.text, hit),
                    score,
                }
            })
            .collect()
    }

    /// Best score across several alternative phrasings. Used by
    /// guidance-evidence checks that accept any of a set of phrases.
    pub fn best_of(&self, phrases: &[String]) -> Option<GuidanceCitation> {
        let mut best: Option<GuidanceCitation> = None;
        for phrase in phrases {
            if let Some(candidate) = self.search(phrase).into_iter().next() {
                let better = match &best {
                    Some(current) => candidate.score > current.score,
                    None => true,
                };
                if better {
                    best = Some(candidate);
                }
            }
        }
        debug!(
            phrases = phrases.len(),
            best_score = best.as_ref().map(|c| c.score).unwrap_or(0.0),
            "guidance evidence scored"
        );
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn index_with(docs: &[(&str, &str)]) -> GuidanceIndex {
        let config = Config::default().guidance;
        let mut index = GuidanceIndex::empty(&config);
        for (source, content) in docs {
            index.add_document(source.to_string(), content.to_string());
        }
        index.rebuild_postings();
        index
    }

    #[test]
    fn test_empty_index_returns_nothing() {
        let config = Config::default().guidance;
        let index = GuidanceIndex::empty(&config);
        assert!(index.search("eltek psu").is_empty());
    }

    #[test]
    fn test_exact_term_scores_full() {
        let index = index_with(&[(
            "tdee43001.txt",
            "Section 3.8.1: the ELTEK PSU shall be configured for power resilience.",
        )]);
        let results = index.search("eltek psu");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].score, 1.0);
        assert!(results[0].snippet.to_lowercase().contains("eltek"));
    }

    #[test]
    fn test_fuzzy_fallback_below_exact() {
        let index = index_with(&[("notes.txt", "resilienc planning for dc power systems")]);
        let results = index.search("resilience");
        assert_eq!(results.len(), 1);
        assert!(results[0].score >= 0.8 && results[0].score < 1.0);
    }

    #[test]
    fn test_ranking_is_deterministic() {
        let index = index_with(&[
            ("b.txt", "eltek psu installation"),
            ("a.txt", "eltek psu commissioning"),
        ]);
        let results = index.search("eltek psu");
        assert_eq!(results.len(), 2);
        // equal scores tie-break by source name
        assert_eq!(results[0].source, "a.txt");
        assert_eq!(results[1].source, "b.txt");
    }

    #[test]
    fn test_top_k_limits_results() {
        let docs: Vec<(String, String)> = (0..10)
            .map(|i| (format!("d{}.txt", i), "title block checks".to_string()))
            .collect();
        let refs: Vec<(&str, &str)> = docs
            .iter()
            .map(|(s, c)| (s.as_str(), c.as_str()))
            .collect();
        let index = index_with(&refs);
        assert_eq!(index.search("title block").len(), 5);
    }

    #[test]
    fn test_best_of_picks_highest() {
        let index = index_with(&[("psu.txt", "important note: eltek psu settings")]);
        let best = index
            .best_of(&["nonexistent phrase".to_string(), "eltek psu".to_string()])
            .unwrap();
        assert_eq!(best.score, 1.0);
    }

    #[test]
    fn test_build_missing_root_fails() {
        let mut config = Config::default().guidance;
        config.root = std::path::PathBuf::from("/nonexistent/guidance/root");
        assert!(GuidanceIndex::build(&config).is_err());
        let index = GuidanceIndex::build_or_empty(&config);
        assert_eq!(index.document_count(), 0);
    }

    #[test]
    fn test_rebuild_unchanged_corpus_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("psu.txt"),
            "the ELTEK PSU shall be configured for power resilience",
        )
        .unwrap();
        std::fs::write(dir.path().join("scale.md"), "scale bar and north point shown").unwrap();
        std::fs::write(dir.path().join("title.txt"), "title block layout standards").unwrap();
        let mut config = Config::default().guidance;
        config.root = dir.path().to_path_buf();

        let first = GuidanceIndex::build(&config).unwrap();
        let second = GuidanceIndex::build(&config).unwrap();
        assert_eq!(first.document_count(), second.document_count());
        assert_eq!(first.term_count(), second.term_count());

        for query in ["eltek psu", "scale bar", "title block", "resilience"] {
            let a = first.search(query);
            let b = second.search(query);
            assert_eq!(a.len(), b.len(), "result count differs for {query:?}");
            for (x, y) in a.iter().zip(&b) {
                assert_eq!(x.source, y.source);
                assert_eq!(x.score, y.score);
                assert_eq!(x.snippet, y.snippet);
            }
        }
    }

    #[test]
    fn test_build_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "scale bar requirements").unwrap();
        std::fs::write(dir.path().join("skip.pdf"), "binary").unwrap();
        let mut config = Config::default().guidance;
        config.root = dir.path().to_path_buf();
        let index = GuidanceIndex::build(&config).unwrap();
        assert_eq!(index.document_count(), 1);
        assert!(index.term_count() > 0);
    }
}
