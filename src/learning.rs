//! # Learning Module
//!
//! ## Purpose
//! Processes reviewer verdicts on findings and persists what was learned,
//! scoped by audit context. Findings judged not valid feed the
//! context-scoped ignore-phrase and allow-word sets; confirmed findings
//! can be promoted into standing rules in the custom overlay.
//!
//! ## Input/Output Specification
//! - **Input**: A batch of reviewer verdicts plus the metadata of the
//!   audited drawing
//! - **Output**: Count of mutations applied; updated ignore-phrases,
//!   allow-words, and promoted rules
//!
//! ## Key Features
//! - Context keys built from configured metadata fields, so learning in
//!   one client/project never leaks into another
//! - Set semantics throughout: re-applying the same verdict is a no-op
//! - JSON persistence with atomic saves

use crate::config::LearningConfig;
use crate::errors::{AuditError, Result};
use crate::rules::{CheckSpec, Rule, RuleOrigin, RuleStore, TriggerValues};
use crate::{AuditMetadata, Finding, FindingKind, Severity};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Fields a promoted rule is scoped to via trigger gates.
const PROMOTION_SCOPE_FIELDS: &[&str] = &["client", "project", "vendor", "site_type"];

/// Build the learning context key for a drawing: the configured metadata
/// fields, lowercase, joined with `|`. Blank fields contribute an empty
/// segment so the key shape is stable.
pub fn context_key(metadata: &AuditMetadata, fields: &[String]) -> String {
    fields
        .iter()
        .map(|f| {
            metadata
                .field(f)
                .unwrap_or_default()
                .trim()
                .to_lowercase()
        })
        .collect::<Vec<_>>()
        .join("|")
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct ContextLearning {
    /// Evidence phrases of findings judged not valid, lowercase
    #[serde(default)]
    ignore_phrases: BTreeSet<String>,
    /// Words the spelling pass must not flag in this context, lowercase
    #[serde(default)]
    allow_words: BTreeSet<String>,
}

/// Persistent per-context learning state.
#[derive(Debug)]
pub struct LearningStore {
    path: PathBuf,
    contexts: BTreeMap<String, ContextLearning>,
}

impl LearningStore {
    /// Open the store; a missing file starts empty.
    pub fn open(config: &LearningConfig) -> Result<Self> {
        let contexts = if config.path.exists() {
            let content =
                std::fs::read_to_string(&config.path).map_err(|e| AuditError::LearningStore {
                    path: config.path.display().to_string(),
                    details: format!("failed to read learning store: {}", e),
                })?;
            serde_json::from_str(&content).map_err(|e| AuditError::LearningStore {
                path: config.path.display().to_string(),
                details: format!("failed to parse learning store: {}", e),
            })?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path: config.path.clone(),
            contexts,
        })
    }

    /// Whether a finding's evidence matches an ignore-phrase learned for
    /// the given context.
    pub fn is_suppressed(&self, context: &str, finding: &Finding) -> bool {
        let Some(evidence) = finding.evidence.as_deref() else {
            return false;
        };
        let phrase = evidence.trim().to_lowercase();
        if phrase.is_empty() {
            return false;
        }
        self.contexts
            .get(context)
            .map(|c| c.ignore_phrases.contains(&phrase))
            .unwrap_or(false)
    }

    /// Record an ignore-phrase. Returns `true` when the set changed.
    pub fn add_ignore_phrase(&mut self, context: &str, phrase: &str) -> Result<bool> {
        let inserted = self
            .contexts
            .entry(context.to_string())
            .or_default()
            .ignore_phrases
            .insert(phrase.trim().to_lowercase());
        if inserted {
            self.save()?;
        }
        Ok(inserted)
    }

    /// Learned allow-words for a context, lowercase.
    pub fn allow_words(&self, context: &str) -> HashSet<String> {
        self.contexts
            .get(context)
            .map(|c| c.allow_words.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Record an allow-word. Returns `true` when the set changed.
    pub fn add_allow_word(&mut self, context: &str, word: &str) -> Result<bool> {
        let inserted = self
            .contexts
            .entry(context.to_string())
            .or_default()
            .allow_words
            .insert(word.trim().to_lowercase());
        if inserted {
            self.save()?;
        }
        Ok(inserted)
    }

    /// Number of contexts with learned state.
    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }

    fn save(&self) -> Result<()> {
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;
        let content = serde_json::to_string_pretty(&self.contexts)?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(content.as_bytes())?;
        tmp.persist(&self.path)
            .map_err(|e| AuditError::LearningStore {
                path: self.path.display().to_string(),
                details: format!("failed to persist learning store: {}", e),
            })?;
        Ok(())
    }
}

/// Reviewer verdict on a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackVerdict {
    Valid,
    NotValid,
}

/// Request to promote a confirmed finding into a standing rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulePromotion {
    /// Name for the new rule
    pub name: String,
    /// Terms the drawing must contain
    pub must_contain: Vec<String>,
}

/// Reviewer feedback on one finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackItem {
    /// Rule that produced the finding
    pub rule_id: String,
    /// Kind of the finding
    pub kind: FindingKind,
    /// Evidence text the finding was anchored to
    #[serde(default)]
    pub evidence: Option<String>,
    /// The reviewer's verdict
    pub verdict: FeedbackVerdict,
    /// Optional promotion, honored only for valid verdicts
    #[serde(default)]
    pub promote: Option<RulePromotion>,
}

/// A feedback batch for one audited drawing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackBatch {
    /// Metadata of the audited drawing, used for context scoping
    pub metadata: AuditMetadata,
    /// Verdicts, one per reviewed finding
    pub items: Vec<FeedbackItem>,
}

/// Apply a feedback batch and return the number of mutations actually
/// applied (already-learned verdicts count zero).
///
/// Not-valid verdicts on spelling findings learn the flagged word;
/// not-valid verdicts on other kinds learn the evidence as an
/// ignore-phrase. Valid verdicts with a promotion append a major rule
/// scoped to the drawing's client, project, vendor, and site type;
/// an equivalent existing rule makes the promotion a no-op.
pub fn apply_feedback(
    batch: &FeedbackBatch,
    context_fields: &[String],
    learning: &mut LearningStore,
    rules: &mut RuleStore,
) -> Result<usize> {
    let context = context_key(&batch.metadata, context_fields);
    let mut mutations = 0;
    for item in &batch.items {
        match item.verdict {
            FeedbackVerdict::NotValid => {
                let Some(evidence) = item.evidence.as_deref().filter(|e| !e.trim().is_empty())
                else {
                    debug!(rule_id = %item.rule_id, "not-valid verdict without evidence, nothing to learn");
                    continue;
                };
                let changed = if item.kind == FindingKind::Spelling {
                    learning.add_allow_word(&context, evidence)?
                } else {
                    learning.add_ignore_phrase(&context, evidence)?
                };
                if changed {
                    mutations += 1;
                    info!(context = %context, rule_id = %item.rule_id, "finding suppressed for context");
                }
            }
            FeedbackVerdict::Valid => {
                let Some(promotion) = &item.promote else {
                    continue;
                };
                let rule = build_promoted_rule(promotion, &batch.metadata)?;
                if rules
                    .effective_rules()
                    .iter()
                    .any(|r| r.name == rule.name && r.check == rule.check && r.trigger == rule.trigger)
                {
                    debug!(name = %rule.name, "equivalent rule already present, promotion skipped");
                    continue;
                }
                let rule_id = rule.id.clone();
                rules.upsert_custom(rule)?;
                mutations += 1;
                info!(rule_id = %rule_id, "feedback promoted to learned rule");
            }
        }
    }
    Ok(mutations)
}

fn build_promoted_rule(promotion: &RulePromotion, metadata: &AuditMetadata) -> Result<Rule> {
    let mut trigger = BTreeMap::new();
    for field in PROMOTION_SCOPE_FIELDS {
        if let Some(value) = metadata.field(field) {
            if !value.trim().is_empty() {
                trigger.insert(
                    field.to_string(),
                    TriggerValues::One(value.trim().to_string()),
                );
            }
        }
    }
    let rule = Rule {
        id: promoted_rule_id(&promotion.name),
        name: promotion.name.trim().to_string(),
        severity: Severity::Major,
        trigger,
        check: CheckSpec::MustContain {
            terms: promotion.must_contain.clone(),
        },
        origin: RuleOrigin::Learned,
        enabled: true,
    };
    crate::rules::validate_rule(&rule)?;
    Ok(rule)
}

fn promoted_rule_id(name: &str) -> String {
    let slug: String = name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("learned-{}-{}", slug, &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tempfile::tempdir;

    fn stores(dir: &Path) -> (LearningStore, RuleStore) {
        let mut lc = Config::default().learning;
        lc.path = dir.join("learning.json");
        let mut rc = Config::default().rules;
        rc.base_path = dir.join("base.toml");
        rc.overlay_path = dir.join("custom.toml");
        (
            LearningStore::open(&lc).unwrap(),
            RuleStore::open(&rc).unwrap(),
        )
    }

    fn metadata() -> AuditMetadata {
        AuditMetadata {
            client: "BTEE".to_string(),
            project: "RAN".to_string(),
            vendor: "Ericsson".to_string(),
            site_type: "Greenfield".to_string(),
            ..Default::default()
        }
    }

    fn finding(rule_id: &str, evidence: Option<&str>) -> Finding {
        Finding {
            rule_id: rule_id.to_string(),
            rule_name: rule_id.to_string(),
            kind: FindingKind::GuidanceEvidence,
            severity: Severity::Major,
            message: String::new(),
            page: None,
            evidence: evidence.map(|e| e.to_string()),
            citation: None,
        }
    }

    fn batch(items: Vec<FeedbackItem>) -> FeedbackBatch {
        FeedbackBatch {
            metadata: metadata(),
            items,
        }
    }

    fn not_valid(rule_id: &str, kind: FindingKind, evidence: &str) -> FeedbackItem {
        FeedbackItem {
            rule_id: rule_id.to_string(),
            kind,
            evidence: Some(evidence.to_string()),
            verdict: FeedbackVerdict::NotValid,
            promote: None,
        }
    }

    #[test]
    fn test_context_key_shape() {
        let fields = Config::default().engine.context_fields;
        let key = context_key(&metadata(), &fields);
        assert_eq!(key, "btee|ran|ericsson|greenfield");
        let empty = context_key(&AuditMetadata::default(), &fields);
        assert_eq!(empty, "|||");
    }

    #[test]
    fn test_not_valid_feedback_suppresses_in_context_only() {
        let dir = tempdir().unwrap();
        let (mut learning, mut rules) = stores(dir.path());
        let fields = Config::default().engine.context_fields;
        let fb = batch(vec![not_valid(
            "power-resilience-eltek-psu",
            FindingKind::GuidanceEvidence,
            "ELTEK PSU",
        )]);
        assert_eq!(
            apply_feedback(&fb, &fields, &mut learning, &mut rules).unwrap(),
            1
        );

        let ctx = context_key(&metadata(), &fields);
        assert!(learning.is_suppressed(&ctx, &finding("any-rule", Some("eltek psu"))));
        assert!(!learning.is_suppressed(&ctx, &finding("any-rule", Some("other"))));
        assert!(!learning.is_suppressed(&ctx, &finding("any-rule", None)));
        let other = AuditMetadata {
            project: "Beacon 4".to_string(),
            ..metadata()
        };
        let other_ctx = context_key(&other, &fields);
        assert!(!learning.is_suppressed(&other_ctx, &finding("any-rule", Some("ELTEK PSU"))));

        // persisted across reopen
        let mut lc = Config::default().learning;
        lc.path = dir.path().join("learning.json");
        let reopened = LearningStore::open(&lc).unwrap();
        assert!(reopened.is_suppressed(&ctx, &finding("any-rule", Some("ELTEK PSU"))));
    }

    #[test]
    fn test_repeated_feedback_is_idempotent() {
        let dir = tempdir().unwrap();
        let (mut learning, mut rules) = stores(dir.path());
        let fields = Config::default().engine.context_fields;
        let fb = batch(vec![not_valid(
            "scale-shown",
            FindingKind::MustContain,
            "SCALE",
        )]);
        assert_eq!(
            apply_feedback(&fb, &fields, &mut learning, &mut rules).unwrap(),
            1
        );
        assert_eq!(
            apply_feedback(&fb, &fields, &mut learning, &mut rules).unwrap(),
            0
        );
    }

    #[test]
    fn test_spelling_feedback_learns_allow_word() {
        let dir = tempdir().unwrap();
        let (mut learning, mut rules) = stores(dir.path());
        let fields = Config::default().engine.context_fields;
        let fb = batch(vec![not_valid("spelling", FindingKind::Spelling, "TDEE")]);
        apply_feedback(&fb, &fields, &mut learning, &mut rules).unwrap();
        let ctx = context_key(&metadata(), &fields);
        assert!(learning.allow_words(&ctx).contains("tdee"));
    }

    #[test]
    fn test_valid_feedback_with_promotion_creates_scoped_rule() {
        let dir = tempdir().unwrap();
        let (mut learning, mut rules) = stores(dir.path());
        let fields = Config::default().engine.context_fields;
        let fb = batch(vec![FeedbackItem {
            rule_id: "power-resilience-eltek-psu".to_string(),
            kind: FindingKind::GuidanceEvidence,
            evidence: None,
            verdict: FeedbackVerdict::Valid,
            promote: Some(RulePromotion {
                name: "ELTEK PSU note required".to_string(),
                must_contain: vec!["IMPORTANT NOTE".to_string()],
            }),
        }]);
        assert_eq!(
            apply_feedback(&fb, &fields, &mut learning, &mut rules).unwrap(),
            1
        );
        // re-promoting the same rule is a no-op
        assert_eq!(
            apply_feedback(&fb, &fields, &mut learning, &mut rules).unwrap(),
            0
        );

        let rule = rules
            .effective_rules()
            .into_iter()
            .find(|r| r.name == "ELTEK PSU note required")
            .cloned()
            .unwrap();
        assert_eq!(rule.severity, Severity::Major);
        assert_eq!(rule.origin, RuleOrigin::Learned);
        assert_eq!(
            rule.trigger.get("vendor"),
            Some(&TriggerValues::One("Ericsson".to_string()))
        );
        assert!(rule.applies_to(&metadata()));
        assert!(!rule.applies_to(&AuditMetadata::default()));
    }

    #[test]
    fn test_valid_feedback_without_promotion_mutates_nothing() {
        let dir = tempdir().unwrap();
        let (mut learning, mut rules) = stores(dir.path());
        let fields = Config::default().engine.context_fields;
        let fb = batch(vec![FeedbackItem {
            rule_id: "scale-shown".to_string(),
            kind: FindingKind::MustContain,
            evidence: None,
            verdict: FeedbackVerdict::Valid,
            promote: None,
        }]);
        assert_eq!(
            apply_feedback(&fb, &fields, &mut learning, &mut rules).unwrap(),
            0
        );
        assert_eq!(learning.context_count(), 0);
    }
}
