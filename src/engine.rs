//! # Finding Engine Module
//!
//! ## Purpose
//! Evaluates the applicable ruleset against page-indexed document text and
//! metadata, runs the spelling pass, filters findings the reviewers have
//! suppressed for this context, and derives the document status.
//!
//! ## Input/Output Specification
//! - **Input**: [`AuditInput`] (file name, metadata, page texts), rule
//!   store, guidance index, learning store
//! - **Output**: [`AuditOutcome`] with findings, status, and run identity
//!
//! ## Key Features
//! - Rule evaluation never aborts the audit: degraded collaborators
//!   reduce output quality only
//! - Deterministic finding order (rule order, then spelling)
//! - Guidance evidence satisfied by a document hit or a corpus match at
//!   or above the configured threshold

use crate::config::Config;
use crate::guidance::GuidanceIndex;
use crate::learning::{self, LearningStore};
use crate::rules::{CheckSpec, Rule, RuleStore};
use crate::spelling::SpellChecker;
use crate::text;
use crate::{AuditMetadata, AuditStatus, Finding, FindingKind};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One document submitted for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditInput {
    /// Original file name of the drawing
    pub file_name: String,
    /// Structured metadata describing the drawing
    pub metadata: AuditMetadata,
    /// Extracted text, one entry per page in page order
    pub pages: Vec<String>,
}

/// The complete result of one audit run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditOutcome {
    /// Unique identifier of this run
    pub run_id: Uuid,
    /// File name of the audited drawing
    pub file_name: String,
    /// Metadata the audit ran with
    pub metadata: AuditMetadata,
    /// Learning context key derived from the metadata
    pub context: String,
    /// Derived document status
    pub status: AuditStatus,
    /// Findings that survived suppression, in evaluation order
    pub findings: Vec<Finding>,
    /// Number of rules that applied to this drawing
    pub evaluated_rules: usize,
    /// Findings dropped by context suppression
    pub suppressed: usize,
    /// When the run completed
    pub created_at: DateTime<Utc>,
}

/// The rule evaluation engine. Stateless apart from configuration and the
/// spelling dictionary; rule, guidance, and learning state are passed per
/// call so the API can swap them at runtime.
pub struct FindingEngine {
    config: Arc<Config>,
    spell: SpellChecker,
}

impl FindingEngine {
    pub fn new(config: Arc<Config>) -> Self {
        let spell = SpellChecker::from_config(&config.spelling);
        if !spell.is_active() {
            debug!("spelling pass inactive for this deployment");
        }
        Self { config, spell }
    }

    /// Whether the spelling pass will contribute findings.
    pub fn spelling_active(&self) -> bool {
        self.spell.is_active()
    }

    /// Run a full audit over one document.
    pub fn evaluate(
        &self,
        input: &AuditInput,
        rules: &RuleStore,
        guidance: &GuidanceIndex,
        learning: &LearningStore,
    ) -> AuditOutcome {
        let context = learning::context_key(&input.metadata, &self.config.engine.context_fields);
        let applicable = rules.applicable_rules(&input.metadata);
        debug!(
            file = %input.file_name,
            rules = applicable.len(),
            pages = input.pages.len(),
            "evaluating ruleset"
        );

        let mut findings: Vec<Finding> = Vec::new();
        for rule in &applicable {
            if let Some(finding) = self.evaluate_rule(rule, input, guidance) {
                findings.push(finding);
            }
        }

        let allow_words = learning.allow_words(&context);
        findings.extend(self.spell.check_pages(&input.pages, &allow_words));

        let before = findings.len();
        findings.retain(|f| !learning.is_suppressed(&context, f));
        let suppressed = before - findings.len();

        let status = AuditStatus::derive(&findings);
        info!(
            file = %input.file_name,
            status = %status,
            findings = findings.len(),
            suppressed,
            "audit complete"
        );
        AuditOutcome {
            run_id: Uuid::new_v4(),
            file_name: input.file_name.clone(),
            metadata: input.metadata.clone(),
            context,
            status,
            findings,
            evaluated_rules: applicable.len(),
            suppressed,
            created_at: Utc::now(),
        }
    }

    /// Evaluate one rule. Returns a finding when the check fails, `None`
    /// when the document satisfies it.
    fn evaluate_rule(
        &self,
        rule: &Rule,
        input: &AuditInput,
        guidance: &GuidanceIndex,
    ) -> Option<Finding> {
        match &rule.check {
            CheckSpec::MustContain { terms } => {
                let missing: Vec<&str> = terms
                    .iter()
                    .filter(|t| find_page(&input.pages, t).is_none())
                    .map(|t| t.as_str())
                    .collect();
                if missing.is_empty() {
                    return None;
                }
                Some(Finding {
                    rule_id: rule.id.clone(),
                    rule_name: rule.name.clone(),
                    kind: FindingKind::MustContain,
                    severity: rule.severity,
                    message: format!("Required text not found: {}", missing.join(", ")),
                    page: None,
                    evidence: Some(missing.join(", ")),
                    citation: None,
                })
            }
            CheckSpec::Forbid { terms } => {
                for term in terms {
                    if let Some(page) = find_forbidden(&input.pages, term) {
                        return Some(Finding {
                            rule_id: rule.id.clone(),
                            rule_name: rule.name.clone(),
                            kind: FindingKind::Forbid,
                            severity: rule.severity,
                            message: format!("Forbidden text present: {}", term),
                            page: Some(page),
                            evidence: Some(term.clone()),
                            citation: None,
                        });
                    }
                }
                None
            }
            CheckSpec::RegexPresence { pattern } => {
                let regex = match compile_ci(pattern) {
                    Ok(regex) => regex,
                    Err(e) => {
                        // validated on entry to the store; a failure here
                        // means the file was edited by hand
                        warn!(rule_id = %rule.id, error = %e, "skipping rule with invalid pattern");
                        return None;
                    }
                };
                if input.pages.iter().any(|p| regex.is_match(p)) {
                    return None;
                }
                Some(Finding {
                    rule_id: rule.id.clone(),
                    rule_name: rule.name.clone(),
                    kind: FindingKind::RegexPresence,
                    severity: rule.severity,
                    message: format!("No text matching pattern: {}", pattern),
                    page: None,
                    evidence: None,
                    citation: None,
                })
            }
            CheckSpec::SiteAddressInTitle => {
                let component = text::address_first_component(&input.metadata.site_address);
                if component.is_empty() {
                    return None;
                }
                let title = title_block(input, self.config.engine.title_head_chars);
                if text::contains_ci(&title, &component) {
                    return None;
                }
                Some(Finding {
                    rule_id: rule.id.clone(),
                    rule_name: rule.name.clone(),
                    kind: FindingKind::MetadataDerived,
                    severity: rule.severity,
                    message: format!("Site address '{}' not found in title block", component),
                    page: Some(1),
                    evidence: Some(component),
                    citation: None,
                })
            }
            CheckSpec::GuidanceEvidence {
                search_any,
                guidance_hint,
            } => {
                for phrase in search_any {
                    if find_page(&input.pages, phrase).is_some() {
                        return None;
                    }
                }
                let citation = guidance.best_of(search_any);
                if citation
                    .as_ref()
                    .is_some_and(|c| c.score >= self.config.guidance.evidence_threshold)
                {
                    // a strong corpus match evidences the policy on its own
                    return None;
                }
                let mut message = format!(
                    "Policy not evidenced: {}",
                    search_any.join(", ")
                );
                match &citation {
                    Some(c) => {
                        message.push_str(&format!(" (closest guidance: {})", c.source));
                    }
                    None => message.push_str(" (no guidance found)"),
                }
                if let Some(hint) = guidance_hint {
                    message.push_str(". ");
                    message.push_str(hint);
                }
                Some(Finding {
                    rule_id: rule.id.clone(),
                    rule_name: rule.name.clone(),
                    kind: FindingKind::GuidanceEvidence,
                    severity: rule.severity,
                    message,
                    page: None,
                    evidence: search_any.first().cloned(),
                    citation,
                })
            }
        }
    }
}

/// First page (1-based) containing the term, case-insensitive.
fn find_page(pages: &[String], term: &str) -> Option<u32> {
    pages
        .iter()
        .position(|p| text::contains_ci(p, term))
        .map(|i| i as u32 + 1)
}

/// Forbidden entries are plain substrings unless prefixed with `regex:`,
/// so phrases with metacharacters match literally.
fn find_forbidden(pages: &[String], term: &str) -> Option<u32> {
    match term.strip_prefix("regex:") {
        Some(pattern) => match compile_ci(pattern) {
            Ok(regex) => pages
                .iter()
                .position(|p| regex.is_match(p))
                .map(|i| i as u32 + 1),
            Err(e) => {
                // validated on entry to the store; a failure here means
                // the file was edited by hand
                warn!(pattern, error = %e, "skipping forbidden entry with invalid pattern");
                None
            }
        },
        None => find_page(pages, term),
    }
}

fn compile_ci(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    regex::RegexBuilder::new(pattern).case_insensitive(true).build()
}

/// Head of the page-one text treated as the title block.
fn title_block(input: &AuditInput, head_chars: usize) -> String {
    input
        .pages
        .first()
        .map(|p| p.chars().take(head_chars).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::rules::RuleStore;
    use crate::Severity;
    use std::path::Path;
    use tempfile::tempdir;

    fn engine_with(dir: &Path) -> (FindingEngine, RuleStore, GuidanceIndex, LearningStore) {
        let mut config = Config::default();
        config.rules.base_path = dir.join("base.toml");
        config.rules.overlay_path = dir.join("custom.toml");
        config.learning.path = dir.join("learning.json");
        config.guidance.root = dir.join("guidance");
        let rules = RuleStore::open(&config.rules).unwrap();
        let guidance = GuidanceIndex::build_or_empty(&config.guidance);
        let learning = LearningStore::open(&config.learning).unwrap();
        (
            FindingEngine::new(Arc::new(config)),
            rules,
            guidance,
            learning,
        )
    }

    fn input(pages: &[&str], metadata: AuditMetadata) -> AuditInput {
        AuditInput {
            file_name: "drawing.pdf".to_string(),
            metadata,
            pages: pages.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[test]
    fn test_clean_drawing_passes() {
        let dir = tempdir().unwrap();
        let (engine, rules, guidance, learning) = engine_with(dir.path());
        let outcome = engine.evaluate(
            &input(
                &["TITLE: Site Layout  SCALE 1:500"],
                AuditMetadata::default(),
            ),
            &rules,
            &guidance,
            &learning,
        );
        assert_eq!(outcome.status, AuditStatus::Pass);
        assert!(outcome.findings.is_empty());
        assert_eq!(outcome.evaluated_rules, 3);
    }

    #[test]
    fn test_missing_title_rejects() {
        let dir = tempdir().unwrap();
        let (engine, rules, guidance, learning) = engine_with(dir.path());
        let outcome = engine.evaluate(
            &input(&["SCALE 1:500 site layout"], AuditMetadata::default()),
            &rules,
            &guidance,
            &learning,
        );
        assert_eq!(outcome.status, AuditStatus::Rejected);
        let title = outcome
            .findings
            .iter()
            .find(|f| f.rule_id == "title-block-present")
            .unwrap();
        assert_eq!(title.severity, Severity::Major);
        assert_eq!(title.evidence.as_deref(), Some("TITLE"));
    }

    #[test]
    fn test_missing_scale_alone_is_minor_pass() {
        let dir = tempdir().unwrap();
        let (engine, rules, guidance, learning) = engine_with(dir.path());
        let outcome = engine.evaluate(
            &input(&["TITLE: Site Layout"], AuditMetadata::default()),
            &rules,
            &guidance,
            &learning,
        );
        assert_eq!(outcome.status, AuditStatus::Pass);
        assert_eq!(outcome.findings.len(), 1);
        assert_eq!(outcome.findings[0].rule_id, "scale-shown");
    }

    #[test]
    fn test_site_address_placeholder_stripped() {
        let dir = tempdir().unwrap();
        let (engine, rules, guidance, learning) = engine_with(dir.path());
        let metadata = AuditMetadata {
            site_address: "MANBY ROAD , 0 , IMMINGHAM".to_string(),
            ..Default::default()
        };
        let ok = engine.evaluate(
            &input(&["TITLE: Manby Road Compound  SCALE 1:200"], metadata.clone()),
            &rules,
            &guidance,
            &learning,
        );
        assert!(ok
            .findings
            .iter()
            .all(|f| f.rule_id != "site-address-in-title"));

        let bad = engine.evaluate(
            &input(&["TITLE: Another Site  SCALE 1:200"], metadata),
            &rules,
            &guidance,
            &learning,
        );
        let finding = bad
            .findings
            .iter()
            .find(|f| f.rule_id == "site-address-in-title")
            .unwrap();
        assert_eq!(finding.page, Some(1));
        assert_eq!(finding.evidence.as_deref(), Some("MANBY ROAD"));
        assert_eq!(bad.status, AuditStatus::Rejected);
    }

    #[test]
    fn test_guidance_evidence_rule_gated_by_project() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("guidance")).unwrap();
        std::fs::write(
            dir.path().join("guidance/tdee43001.txt"),
            "Section 3.8.1: the ELTEK PSU configuration shall be stated on the drawing.",
        )
        .unwrap();
        let (engine, rules, guidance, learning) = engine_with(dir.path());
        let metadata = AuditMetadata {
            project: "Power Resilience".to_string(),
            ..Default::default()
        };

        // drawing carries the note: no finding
        let ok = engine.evaluate(
            &input(
                &["TITLE x SCALE y", "IMPORTANT NOTE: eltek psu configured"],
                metadata.clone(),
            ),
            &rules,
            &guidance,
            &learning,
        );
        assert!(ok
            .findings
            .iter()
            .all(|f| f.rule_id != "power-resilience-eltek-psu"));

        // drawing misses the note, but the corpus scores 1.0 for the
        // phrase: the policy counts as evidenced and no finding is raised
        let corpus_backed = engine.evaluate(
            &input(&["TITLE x SCALE y"], metadata),
            &rules,
            &guidance,
            &learning,
        );
        assert!(corpus_backed
            .findings
            .iter()
            .all(|f| f.rule_id != "power-resilience-eltek-psu"));
        assert_eq!(corpus_backed.status, AuditStatus::Pass);
    }

    #[test]
    fn test_guidance_evidence_below_threshold_raises_finding() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("guidance")).unwrap();
        // only one of four query terms hits, scoring 0.25 < 0.30
        std::fs::write(
            dir.path().join("guidance/battery.txt"),
            "battery checks weekly",
        )
        .unwrap();
        let (engine, mut rules, guidance, learning) = engine_with(dir.path());
        rules
            .upsert_custom(crate::rules::Rule {
                id: "battery-autonomy".to_string(),
                name: "Battery autonomy stated".to_string(),
                severity: Severity::Major,
                trigger: Default::default(),
                check: CheckSpec::GuidanceEvidence {
                    search_any: vec!["battery autonomy duration statement".to_string()],
                    guidance_hint: None,
                },
                origin: crate::rules::RuleOrigin::Custom,
                enabled: true,
            })
            .unwrap();
        let outcome = engine.evaluate(
            &input(&["TITLE x SCALE y"], AuditMetadata::default()),
            &rules,
            &guidance,
            &learning,
        );
        let finding = outcome
            .findings
            .iter()
            .find(|f| f.rule_id == "battery-autonomy")
            .unwrap();
        assert!(finding.message.contains("closest guidance: battery.txt"));
        let citation = finding.citation.as_ref().unwrap();
        assert!(citation.score < 0.30);
        assert_eq!(outcome.status, AuditStatus::Rejected);
    }

    #[test]
    fn test_guidance_rule_skipped_for_other_projects() {
        let dir = tempdir().unwrap();
        let (engine, rules, guidance, learning) = engine_with(dir.path());
        let outcome = engine.evaluate(
            &input(
                &["TITLE x SCALE y"],
                AuditMetadata {
                    project: "Site Upgrade".to_string(),
                    ..Default::default()
                },
            ),
            &rules,
            &guidance,
            &learning,
        );
        assert!(outcome
            .findings
            .iter()
            .all(|f| f.rule_id != "power-resilience-eltek-psu"));
        assert_eq!(outcome.evaluated_rules, 3);
    }

    #[test]
    fn test_suppressed_findings_filtered() {
        let dir = tempdir().unwrap();
        let (engine, rules, guidance, mut learning) = engine_with(dir.path());
        let metadata = AuditMetadata {
            client: "Acme".to_string(),
            ..Default::default()
        };
        let ctx = learning::context_key(&metadata, &Config::default().engine.context_fields);
        learning.add_ignore_phrase(&ctx, "SCALE").unwrap();
        let outcome = engine.evaluate(
            &input(&["TITLE only"], metadata),
            &rules,
            &guidance,
            &learning,
        );
        assert_eq!(outcome.suppressed, 1);
        assert!(outcome.findings.iter().all(|f| f.rule_id != "scale-shown"));
    }

    #[test]
    fn test_empty_document_rejects_with_findings() {
        let dir = tempdir().unwrap();
        let (engine, rules, guidance, learning) = engine_with(dir.path());
        let outcome = engine.evaluate(
            &input(&[], AuditMetadata::default()),
            &rules,
            &guidance,
            &learning,
        );
        assert_eq!(outcome.status, AuditStatus::Rejected);
        assert!(!outcome.findings.is_empty());
    }

    #[test]
    fn test_guidance_rule_without_corpus_notes_no_guidance() {
        let dir = tempdir().unwrap();
        let (engine, rules, guidance, learning) = engine_with(dir.path());
        let outcome = engine.evaluate(
            &input(
                &["TITLE x SCALE y"],
                AuditMetadata {
                    project: "Power Resilience".to_string(),
                    ..Default::default()
                },
            ),
            &rules,
            &guidance,
            &learning,
        );
        let finding = outcome
            .findings
            .iter()
            .find(|f| f.rule_id == "power-resilience-eltek-psu")
            .unwrap();
        assert!(finding.message.contains("no guidance found"));
        assert!(finding.citation.is_none());
        assert_eq!(finding.severity, Severity::Major);
    }

    #[test]
    fn test_empty_must_contain_passes_vacuously() {
        let dir = tempdir().unwrap();
        let (engine, mut rules, guidance, learning) = engine_with(dir.path());
        rules
            .upsert_custom(crate::rules::Rule {
                id: "vacuous".to_string(),
                name: "Vacuous".to_string(),
                severity: Severity::Critical,
                trigger: Default::default(),
                check: CheckSpec::MustContain { terms: vec![] },
                origin: crate::rules::RuleOrigin::Custom,
                enabled: true,
            })
            .unwrap();
        let outcome = engine.evaluate(
            &input(&["TITLE x SCALE y"], AuditMetadata::default()),
            &rules,
            &guidance,
            &learning,
        );
        assert!(outcome.findings.iter().all(|f| f.rule_id != "vacuous"));
        assert_eq!(outcome.status, AuditStatus::Pass);
    }

    #[test]
    fn test_forbid_entry_as_regex() {
        let dir = tempdir().unwrap();
        let (engine, mut rules, guidance, learning) = engine_with(dir.path());
        rules
            .upsert_custom(crate::rules::Rule {
                id: "no-rev-zero".to_string(),
                name: "No revision zero".to_string(),
                severity: Severity::Major,
                trigger: Default::default(),
                check: CheckSpec::Forbid {
                    terms: vec![r"regex:rev\s*0\b".to_string()],
                },
                origin: crate::rules::RuleOrigin::Custom,
                enabled: true,
            })
            .unwrap();
        let outcome = engine.evaluate(
            &input(&["TITLE x SCALE y REV 0 issued"], AuditMetadata::default()),
            &rules,
            &guidance,
            &learning,
        );
        assert!(outcome.findings.iter().any(|f| f.rule_id == "no-rev-zero"));
    }

    #[test]
    fn test_forbid_metacharacters_match_literally() {
        let dir = tempdir().unwrap();
        let (engine, mut rules, guidance, learning) = engine_with(dir.path());
        rules
            .upsert_custom(crate::rules::Rule {
                id: "no-do-not-scale".to_string(),
                name: "No do-not-scale stamp".to_string(),
                severity: Severity::Major,
                trigger: Default::default(),
                check: CheckSpec::Forbid {
                    terms: vec!["A3 (DO NOT SCALE)".to_string()],
                },
                origin: crate::rules::RuleOrigin::Custom,
                enabled: true,
            })
            .unwrap();

        // the parentheses are not a capture group: no hit without them
        let no_parens = engine.evaluate(
            &input(&["TITLE x SCALE y A3 DO NOT SCALE"], AuditMetadata::default()),
            &rules,
            &guidance,
            &learning,
        );
        assert!(no_parens
            .findings
            .iter()
            .all(|f| f.rule_id != "no-do-not-scale"));

        let literal = engine.evaluate(
            &input(&["TITLE x SCALE y a3 (do not scale)"], AuditMetadata::default()),
            &rules,
            &guidance,
            &learning,
        );
        assert!(literal
            .findings
            .iter()
            .any(|f| f.rule_id == "no-do-not-scale"));
    }

    #[test]
    fn test_forbid_reports_page() {
        let dir = tempdir().unwrap();
        let (engine, mut rules, guidance, learning) = engine_with(dir.path());
        rules
            .upsert_custom(crate::rules::Rule {
                id: "no-draft".to_string(),
                name: "No draft stamp".to_string(),
                severity: Severity::Major,
                trigger: Default::default(),
                check: CheckSpec::Forbid {
                    terms: vec!["DRAFT".to_string()],
                },
                origin: crate::rules::RuleOrigin::Custom,
                enabled: true,
            })
            .unwrap();
        let outcome = engine.evaluate(
            &input(&["TITLE x SCALE y", "draft copy"], AuditMetadata::default()),
            &rules,
            &guidance,
            &learning,
        );
        let finding = outcome
            .findings
            .iter()
            .find(|f| f.rule_id == "no-draft")
            .unwrap();
        assert_eq!(finding.page, Some(2));
        assert_eq!(finding.evidence.as_deref(), Some("DRAFT"));
    }
}
