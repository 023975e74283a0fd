//! # Rule Mining Module
//!
//! ## Purpose
//! Scans guidance documents for imperative sentences ("shall", "must",
//! "do not", ...) and turns them into rule proposals a reviewer can accept
//! into the custom overlay. Mining never writes rules on its own.
//!
//! ## Input/Output Specification
//! - **Input**: Guidance root directory
//! - **Output**: [`RuleProposal`] list, one per imperative sentence
//!
//! ## Key Features
//! - Prohibitive cues ("do not", "forbidden") propose forbid checks;
//!   obligating cues propose must-contain checks
//! - Capitalized phrases in the sentence become the suggested terms
//! - Proposals convert to validated rules only on explicit acceptance

use crate::config::GuidanceConfig;
use crate::errors::Result;
use crate::rules::{validate_rule, CheckSpec, Rule, RuleOrigin, TriggerValues};
use crate::text;
use crate::Severity;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Cues that obligate: the drawing must carry something.
const OBLIGATING_CUES: &[&str] = &["must", "shall", "ensure", "required", "require"];
/// Cues that prohibit: the drawing must not carry something.
const PROHIBITIVE_CUES: &[&str] = &["do not", "must not", "shall not", "forbidden"];
/// Softer cues that still merit review.
const ADVISORY_CUES: &[&str] = &["should"];

const MIN_SENTENCE_LEN: usize = 20;
const MAX_PROPOSALS_PER_DOC: usize = 50;

/// A mined rule candidate awaiting reviewer acceptance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleProposal {
    /// Guidance document the sentence came from
    pub source: String,
    /// The imperative sentence, whitespace-collapsed
    pub sentence: String,
    /// The cue that matched
    pub cue: String,
    /// Whether the cue prohibits rather than obligates
    pub prohibitive: bool,
    /// Suggested severity
    pub severity: Severity,
    /// Suggested check terms (capitalized phrases from the sentence)
    pub suggested_terms: Vec<String>,
}

impl RuleProposal {
    /// Convert an accepted proposal into a rule for the custom overlay.
    /// The reviewer may scope it with trigger gates before insertion.
    pub fn into_rule(self, id: String, trigger: BTreeMap<String, TriggerValues>) -> Result<Rule> {
        let terms = if self.suggested_terms.is_empty() {
            vec![self.sentence.clone()]
        } else {
            self.suggested_terms.clone()
        };
        let rule = Rule {
            id,
            name: text::truncate(&self.sentence, 80),
            severity: self.severity,
            trigger,
            check: if self.prohibitive {
                CheckSpec::Forbid { terms }
            } else {
                CheckSpec::MustContain { terms }
            },
            origin: RuleOrigin::Learned,
            enabled: true,
        };
        validate_rule(&rule)?;
        Ok(rule)
    }
}

/// Mine rule proposals from every document under the guidance root.
/// Unreadable files are skipped; a missing root yields no proposals.
pub fn mine_guidance(config: &GuidanceConfig) -> Vec<RuleProposal> {
    let mut proposals = Vec::new();
    if !config.root.is_dir() {
        debug!(root = %config.root.display(), "guidance root unavailable, nothing to mine");
        return proposals;
    }
    for entry in WalkDir::new(&config.root)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let Ok(content) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        let source = entry
            .path()
            .strip_prefix(&config.root)
            .unwrap_or(entry.path())
            .display()
            .to_string();
        let before = proposals.len();
        mine_text(&source, &content, &mut proposals);
        debug!(source = %source, found = proposals.len() - before, "mined guidance document");
    }
    proposals.sort_by(|a, b| a.source.cmp(&b.source).then(a.sentence.cmp(&b.sentence)));
    info!(proposals = proposals.len(), "guidance mining complete");
    proposals
}

/// Mine proposals from one document's text.
pub fn mine_text(source: &str, content: &str, out: &mut Vec<RuleProposal>) {
    let mut count = 0;
    for raw in split_sentences(content) {
        let sentence = text::collapse_whitespace(raw);
        if sentence.len() < MIN_SENTENCE_LEN {
            continue;
        }
        let Some((cue, prohibitive)) = match_cue(&sentence) else {
            continue;
        };
        let severity = if ADVISORY_CUES.contains(&cue) {
            Severity::Minor
        } else {
            Severity::Major
        };
        out.push(RuleProposal {
            source: source.to_string(),
            sentence: sentence.clone(),
            cue: cue.to_string(),
            prohibitive,
            severity,
            suggested_terms: capitalized_phrases(&sentence),
        });
        count += 1;
        if count >= MAX_PROPOSALS_PER_DOC {
            break;
        }
    }
}

fn split_sentences(content: &str) -> impl Iterator<Item = &str> {
    content
        .split(|c| matches!(c, '.' | '!' | '?' | '\n' | ';'))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Longest matching cue wins so "must not" is prohibitive, not "must".
fn match_cue(sentence: &str) -> Option<(&'static str, bool)> {
    let lower = sentence.to_lowercase();
    let mut best: Option<(&'static str, bool)> = None;
    for &cue in PROHIBITIVE_CUES {
        if contains_word(&lower, cue) {
            match best {
                Some((b, _)) if b.len() >= cue.len() => {}
                _ => best = Some((cue, true)),
            }
        }
    }
    if best.is_some() {
        return best;
    }
    for &cue in OBLIGATING_CUES.iter().chain(ADVISORY_CUES) {
        if contains_word(&lower, cue) {
            match best {
                Some((b, _)) if b.len() >= cue.len() => {}
                _ => best = Some((cue, false)),
            }
        }
    }
    best
}

fn contains_word(lower: &str, cue: &str) -> bool {
    let padded = format!(" {} ", lower.replace(',', " "));
    padded.contains(&format!(" {} ", cue))
}

/// Runs of two-plus capitalized or all-caps words, the usual shape of
/// equipment names and note headings in guidance text.
fn capitalized_phrases(sentence: &str) -> Vec<String> {
    static PHRASE: OnceLock<Regex> = OnceLock::new();
    let phrase = PHRASE
        .get_or_init(|| Regex::new(r"\b([A-Z][A-Z0-9]+(?:\s+[A-Z][A-Z0-9]+)+)\b").unwrap());
    let mut phrases: Vec<String> = phrase
        .find_iter(sentence)
        .map(|m| m.as_str().to_string())
        .collect();
    phrases.dedup();
    phrases
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_obligating_sentence_proposed() {
        let mut out = Vec::new();
        mine_text(
            "tdee43001.txt",
            "The drawing shall state the ELTEK PSU configuration. Colours are arbitrary.",
            &mut out,
        );
        assert_eq!(out.len(), 1);
        let p = &out[0];
        assert_eq!(p.cue, "shall");
        assert!(!p.prohibitive);
        assert_eq!(p.severity, Severity::Major);
        assert_eq!(p.suggested_terms, vec!["ELTEK PSU"]);
    }

    #[test]
    fn test_prohibitive_cue_wins_over_obligating() {
        let mut out = Vec::new();
        mine_text(
            "g.txt",
            "Contractors must not remove the EARTH BAR LABEL from the cabinet.",
            &mut out,
        );
        assert_eq!(out.len(), 1);
        assert!(out[0].prohibitive);
        assert_eq!(out[0].cue, "must not");
    }

    #[test]
    fn test_advisory_cue_is_minor() {
        let mut out = Vec::new();
        mine_text(
            "g.txt",
            "The site layout should include an ACCESS ROUTE PLAN for review.",
            &mut out,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].severity, Severity::Minor);
    }

    #[test]
    fn test_short_and_plain_sentences_skipped() {
        let mut out = Vec::new();
        mine_text("g.txt", "Must comply. The panel is grey and mounted on the wall.", &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_proposal_converts_to_rule() {
        let mut out = Vec::new();
        mine_text(
            "g.txt",
            "All drawings must include an IMPORTANT NOTE describing the PSU.",
            &mut out,
        );
        let rule = out
            .remove(0)
            .into_rule("mined-important-note".to_string(), BTreeMap::new())
            .unwrap();
        assert_eq!(
            rule.check,
            CheckSpec::MustContain {
                terms: vec!["IMPORTANT NOTE".to_string()]
            }
        );
        assert_eq!(rule.origin, RuleOrigin::Learned);
    }

    #[test]
    fn test_mine_guidance_missing_root() {
        let mut config = crate::config::Config::default().guidance;
        config.root = std::path::PathBuf::from("/nonexistent/root");
        assert!(mine_guidance(&config).is_empty());
    }

    #[test]
    fn test_mine_guidance_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.txt"),
            "The contractor shall fit the ELTEK PSU as specified in this section.",
        )
        .unwrap();
        let mut config = crate::config::Config::default().guidance;
        config.root = dir.path().to_path_buf();
        let proposals = mine_guidance(&config);
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].source, "a.txt");
    }
}
