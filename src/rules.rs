//! # Rule Store Module
//!
//! ## Purpose
//! Rule definitions and their persistence. Rules live in two TOML files:
//! a read-only base ruleset seeded on first run, and a mutable custom
//! overlay holding user-added and learned rules. Overlay rules shadow base
//! rules with the same id.
//!
//! ## Input/Output Specification
//! - **Input**: TOML rule files, rule upserts from the API and the
//!   feedback processor
//! - **Output**: The effective ruleset for a given drawing's metadata
//!
//! ## Key Features
//! - Trigger gates scope rules to matching metadata (case-insensitive)
//! - Validation rejects empty checks and non-compiling regex patterns
//! - Atomic overlay saves (write to temp file, then rename)

use crate::config::RulesConfig;
use crate::errors::{AuditError, Result};
use crate::{AuditMetadata, Severity};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

/// Accepted value(s) for one trigger gate. Serializes as either a bare
/// string or a list, so hand-edited rule files stay terse.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TriggerValues {
    One(String),
    Many(Vec<String>),
}

impl TriggerValues {
    /// Case-insensitive membership test.
    pub fn matches(&self, value: &str) -> bool {
        let value = value.trim();
        match self {
            TriggerValues::One(v) => v.trim().eq_ignore_ascii_case(value),
            TriggerValues::Many(vs) => vs.iter().any(|v| v.trim().eq_ignore_ascii_case(value)),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            TriggerValues::One(v) => v.trim().is_empty(),
            TriggerValues::Many(vs) => vs.is_empty(),
        }
    }
}

/// What a rule checks against the drawing text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckSpec {
    /// Every term must appear somewhere in the drawing (case-insensitive).
    MustContain { terms: Vec<String> },
    /// No term may appear anywhere in the drawing (case-insensitive).
    /// Terms match as plain substrings; a `regex:` prefix matches the
    /// remainder as a case-insensitive pattern.
    Forbid { terms: Vec<String> },
    /// The pattern must match somewhere in the drawing.
    RegexPresence { pattern: String },
    /// The metadata site address (first component, placeholder-stripped)
    /// must appear in the page-one title block.
    SiteAddressInTitle,
    /// At least one phrase must be evidenced in the drawing or the
    /// guidance corpus above the evidence threshold.
    GuidanceEvidence {
        search_any: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        guidance_hint: Option<String>,
    },
}

/// Where a rule came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RuleOrigin {
    /// Shipped in the base ruleset
    Base,
    /// Added by a user through the API
    Custom,
    /// Promoted from reviewer feedback
    Learned,
}

impl Default for RuleOrigin {
    fn default() -> Self {
        RuleOrigin::Custom
    }
}

/// A single audit rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    /// Stable identifier, unique within the effective ruleset
    pub id: String,
    /// Human-readable name shown in findings and reports
    pub name: String,
    /// Severity of a failed check
    pub severity: Severity,
    /// Metadata gates: every listed field must match one of its accepted
    /// values for the rule to apply. Empty means the rule always applies.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub trigger: BTreeMap<String, TriggerValues>,
    /// The check to evaluate
    pub check: CheckSpec,
    /// Origin of the rule
    #[serde(default)]
    pub origin: RuleOrigin,
    /// Whether the rule participates in audits
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Rule {
    /// Whether this rule applies to a drawing with the given metadata.
    /// Every trigger gate must pass; a gate on a field the metadata does
    /// not populate fails.
    pub fn applies_to(&self, metadata: &AuditMetadata) -> bool {
        self.trigger.iter().all(|(field, accepted)| {
            match metadata.field(field) {
                Some(value) if !value.trim().is_empty() => accepted.matches(&value),
                _ => false,
            }
        })
    }
}

/// Validate a rule before it enters the store.
pub fn validate_rule(rule: &Rule) -> Result<()> {
    if rule.id.trim().is_empty() {
        return Err(AuditError::RuleValidation {
            field: "id".to_string(),
            reason: "rule id cannot be empty".to_string(),
        });
    }
    if rule.name.trim().is_empty() {
        return Err(AuditError::RuleValidation {
            field: "name".to_string(),
            reason: "rule name cannot be empty".to_string(),
        });
    }
    match &rule.check {
        // empty term lists are legal and vacuously pass
        CheckSpec::MustContain { .. } => {}
        CheckSpec::Forbid { terms } => {
            for pattern in terms.iter().filter_map(|t| t.strip_prefix("regex:")) {
                Regex::new(pattern).map_err(|e| AuditError::InvalidRulePattern {
                    pattern: pattern.to_string(),
                    details: e.to_string(),
                })?;
            }
        }
        CheckSpec::RegexPresence { pattern } => {
            Regex::new(pattern).map_err(|e| AuditError::InvalidRulePattern {
                pattern: pattern.clone(),
                details: e.to_string(),
            })?;
        }
        CheckSpec::SiteAddressInTitle => {}
        CheckSpec::GuidanceEvidence { search_any, .. } => {
            if search_any.is_empty() || search_any.iter().all(|t| t.trim().is_empty()) {
                return Err(AuditError::RuleValidation {
                    field: "check.search_any".to_string(),
                    reason: "guidance evidence requires at least one non-empty phrase"
                        .to_string(),
                });
            }
        }
    }
    for (field, accepted) in &rule.trigger {
        if field.trim().is_empty() || accepted.is_empty() {
            return Err(AuditError::RuleValidation {
                field: format!("trigger.{}", field),
                reason: "trigger gates require a field name and at least one value".to_string(),
            });
        }
    }
    Ok(())
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RuleFile {
    #[serde(default)]
    rules: Vec<Rule>,
}

/// The starter ruleset written to the base path on first run.
pub fn starter_rules() -> Vec<Rule> {
    vec![
        Rule {
            id: "title-block-present".to_string(),
            name: "Title block present".to_string(),
            severity: Severity::Major,
            trigger: BTreeMap::new(),
            check: CheckSpec::MustContain {
                terms: vec!["TITLE".to_string()],
            },
            origin: RuleOrigin::Base,
            enabled: true,
        },
        Rule {
            id: "scale-shown".to_string(),
            name: "Scale shown".to_string(),
            severity: Severity::Minor,
            trigger: BTreeMap::new(),
            check: CheckSpec::MustContain {
                terms: vec!["SCALE".to_string()],
            },
            origin: RuleOrigin::Base,
            enabled: true,
        },
        Rule {
            id: "site-address-in-title".to_string(),
            name: "Site address in title block".to_string(),
            severity: Severity::Major,
            trigger: BTreeMap::new(),
            check: CheckSpec::SiteAddressInTitle,
            origin: RuleOrigin::Base,
            enabled: true,
        },
        Rule {
            id: "power-resilience-eltek-psu".to_string(),
            name: "Power Resilience ELTEK PSU policy".to_string(),
            severity: Severity::Major,
            trigger: BTreeMap::from([(
                "project".to_string(),
                TriggerValues::One("Power Resilience".to_string()),
            )]),
            check: CheckSpec::GuidanceEvidence {
                search_any: vec!["ELTEK PSU".to_string(), "IMPORTANT NOTE".to_string()],
                guidance_hint: Some("See TDEE43001 section 3.8.1".to_string()),
            },
            origin: RuleOrigin::Base,
            enabled: true,
        },
    ]
}

/// Two-layer rule store: read-only base plus mutable custom overlay.
#[derive(Debug)]
pub struct RuleStore {
    base: Vec<Rule>,
    overlay: Vec<Rule>,
    config: RulesConfig,
}

impl RuleStore {
    /// Open the store, seeding the base ruleset on first run and loading
    /// the overlay when present.
    pub fn open(config: &RulesConfig) -> Result<Self> {
        let base = if config.base_path.exists() {
            load_rule_file(&config.base_path)?
        } else {
            let rules = starter_rules();
            save_rule_file(&config.base_path, &rules)?;
            info!(path = %config.base_path.display(), count = rules.len(), "seeded base ruleset");
            rules
        };
        let overlay = if config.overlay_path.exists() {
            load_rule_file(&config.overlay_path)?
        } else {
            Vec::new()
        };
        for rule in base.iter().chain(overlay.iter()) {
            validate_rule(rule)?;
        }
        debug!(base = base.len(), overlay = overlay.len(), "rule store opened");
        Ok(Self {
            base,
            overlay,
            config: config.clone(),
        })
    }

    /// The effective ruleset: base rules, with overlay rules shadowing
    /// base rules of the same id, followed by overlay-only rules.
    pub fn effective_rules(&self) -> Vec<&Rule> {
        let mut rules: Vec<&Rule> = Vec::with_capacity(self.base.len() + self.overlay.len());
        for rule in &self.base {
            match self.overlay.iter().find(|o| o.id == rule.id) {
                Some(shadow) => rules.push(shadow),
                None => rules.push(rule),
            }
        }
        for rule in &self.overlay {
            if !self.base.iter().any(|b| b.id == rule.id) {
                rules.push(rule);
            }
        }
        rules
    }

    /// Enabled rules applicable to the given metadata.
    pub fn applicable_rules(&self, metadata: &AuditMetadata) -> Vec<Rule> {
        self.effective_rules()
            .into_iter()
            .filter(|r| r.enabled && r.applies_to(metadata))
            .cloned()
            .collect()
    }

    /// Look up a rule by id in the effective ruleset.
    pub fn get(&self, id: &str) -> Option<&Rule> {
        self.effective_rules().into_iter().find(|r| r.id == id)
    }

    /// Insert or replace a rule in the custom overlay and persist it.
    pub fn upsert_custom(&mut self, rule: Rule) -> Result<()> {
        validate_rule(&rule)?;
        match self.overlay.iter_mut().find(|o| o.id == rule.id) {
            Some(existing) => *existing = rule,
            None => self.overlay.push(rule),
        }
        self.save_overlay()
    }

    /// Remove a rule from the custom overlay. Base rules cannot be
    /// removed, only shadowed.
    pub fn remove_custom(&mut self, id: &str) -> Result<bool> {
        let before = self.overlay.len();
        self.overlay.retain(|r| r.id != id);
        if self.overlay.len() == before {
            return Ok(false);
        }
        self.save_overlay()?;
        Ok(true)
    }

    /// Number of rules in the effective ruleset.
    pub fn rule_count(&self) -> usize {
        self.effective_rules().len()
    }

    fn save_overlay(&self) -> Result<()> {
        save_rule_file(&self.config.overlay_path, &self.overlay)
    }
}

fn load_rule_file(path: &Path) -> Result<Vec<Rule>> {
    let content = std::fs::read_to_string(path).map_err(|e| AuditError::RuleStore {
        path: path.display().to_string(),
        details: format!("failed to read rule file: {}", e),
    })?;
    let file: RuleFile = toml::from_str(&content).map_err(|e| AuditError::RuleStore {
        path: path.display().to_string(),
        details: format!("failed to parse rule file: {}", e),
    })?;
    Ok(file.rules)
}

const RULE_FILE_HEADER: &str = "\
# Audit rules. `forbid` terms match as plain substrings; prefix a term
# with `regex:` to match the remainder as a case-insensitive pattern.
";

fn save_rule_file(path: &Path, rules: &[Rule]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    let file = RuleFile {
        rules: rules.to_vec(),
    };
    let content = toml::to_string_pretty(&file).map_err(|e| AuditError::SerializationFailed {
        message: format!("failed to serialize rules: {}", e),
    })?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(RULE_FILE_HEADER.as_bytes())?;
    tmp.write_all(b"\n")?;
    tmp.write_all(content.as_bytes())?;
    tmp.persist(path).map_err(|e| AuditError::RuleStore {
        path: path.display().to_string(),
        details: format!("failed to persist rule file: {}", e),
    })?;
    Ok(())
}
