//! # Spelling Pass Module
//!
//! ## Purpose
//! Optional dictionary-based spelling pass over document text. Runs only
//! when a dictionary is configured; a missing dictionary degrades the
//! audit rather than failing it.
//!
//! ## Input/Output Specification
//! - **Input**: Page-indexed document text, a word list dictionary,
//!   configured and learned allow-words
//! - **Output**: Minor [`Finding`]s, one per distinct unknown word, capped
//!
//! ## Key Features
//! - First-occurrence reporting: each unknown word is flagged once, with
//!   the page it first appears on
//! - Nearest-word suggestions via edit distance
//! - Hard cap on findings so noisy extractions cannot flood a report

use crate::config::SpellingConfig;
use crate::text;
use crate::{Finding, FindingKind, Severity};
use std::collections::HashSet;
use tracing::{debug, warn};

const SUGGESTION_MAX_DISTANCE: usize = 2;

/// Dictionary-backed spell checker.
#[derive(Debug)]
pub struct SpellChecker {
    dictionary: HashSet<String>,
    allow: HashSet<String>,
    min_token_len: usize,
    max_findings: usize,
    active: bool,
}

impl SpellChecker {
    /// Build the checker from configuration. The pass is inactive when
    /// disabled or when no dictionary can be loaded.
    pub fn from_config(config: &SpellingConfig) -> Self {
        let mut dictionary = HashSet::new();
        let mut active = config.enabled;
        if active {
            match &config.dictionary_path {
                Some(path) => match std::fs::read_to_string(path) {
                    Ok(content) => {
                        dictionary.extend(
                            content
                                .lines()
                                .map(|l| l.trim().to_lowercase())
                                .filter(|l| !l.is_empty()),
                        );
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "spelling dictionary unavailable, pass disabled");
                        active = false;
                    }
                },
                None => {
                    debug!("no spelling dictionary configured, pass disabled");
                    active = false;
                }
            }
        }
        if dictionary.is_empty() {
            active = false;
        }
        let allow = config
            .allow_words
            .iter()
            .map(|w| w.trim().to_lowercase())
            .collect();
        Self {
            dictionary,
            allow,
            min_token_len: config.min_token_len,
            max_findings: config.max_findings,
            active,
        }
    }

    /// Whether the pass will produce findings at all.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Run the pass over page-indexed text. `extra_allow` carries learned
    /// allow-words for the current audit context, lowercase.
    pub fn check_pages(&self, pages: &[String], extra_allow: &HashSet<String>) -> Vec<Finding> {
        if !self.active {
            return Vec::new();
        }
        let mut findings = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        'pages: for (page_idx, page) in pages.iter().enumerate() {
            for token in text::alpha_tokens(page, self.min_token_len) {
                let lower = token.to_lowercase();
                if seen.contains(&lower)
                    || self.dictionary.contains(&lower)
                    || self.allow.contains(&lower)
                    || extra_allow.contains(&lower)
                {
                    continue;
                }
                seen.insert(lower.clone());
                let message = match self.suggest(&lower) {
                    Some(suggestion) => format!(
                        "Possible misspelling '{}' (did you mean '{}'?)",
                        token, suggestion
                    ),
                    None => format!("Possible misspelling '{}'", token),
                };
                findings.push(Finding {
                    rule_id: "spelling".to_string(),
                    rule_name: "Spelling".to_string(),
                    kind: FindingKind::Spelling,
                    severity: Severity::Minor,
                    message,
                    page: Some(page_idx as u32 + 1),
                    evidence: Some(token.to_string()),
                    citation: None,
                });
                if findings.len() >= self.max_findings {
                    break 'pages;
                }
            }
        }
        debug!(count = findings.len(), "spelling pass complete");
        findings
    }

    /// Nearest dictionary word within a small edit distance. Candidates
    /// are pre-filtered by first letter and length to keep the scan cheap.
    fn suggest(&self, word: &str) -> Option<String> {
        let first = word.chars().next()?;
        let len = word.chars().count();
        let mut best: Option<(usize, &String)> = None;
        for candidate in &self.dictionary {
            if !candidate.starts_with(first) {
                continue;
            }
            let clen = candidate.chars().count();
            if clen.abs_diff(len) > SUGGESTION_MAX_DISTANCE {
                continue;
            }
            let dist = text::levenshtein(word, candidate);
            if dist <= SUGGESTION_MAX_DISTANCE {
                match best {
                    Some((b, _)) if b <= dist => {}
                    _ => best = Some((dist, candidate)),
                }
            }
        }
        best.map(|(_, w)| w.clone())
    }
}
