//! # Design Quality Audit Engine
//!
//! ## Overview
//! This library implements a rule-driven quality auditor for engineering
//! drawings: it evaluates a configurable rule set against page-indexed
//! document text plus structured metadata, cross-references a guidance
//! corpus for evidentiary support, and learns from human verdicts.
//!
//! ## Architecture
//! The system is composed of several key modules:
//! - `text`: Tokenization, normalization, snippets, and fuzzy matching
//! - `guidance`: Inverted-index corpus of reference documents with ranked search
//! - `rules`: Rule definitions, validation, and the base/overlay rule store
//! - `engine`: The finding engine evaluating rules against documents
//! - `spelling`: Dictionary spell pass with learned allow-lists
//! - `learning`: Context-scoped feedback processing and learned tables
//! - `mining`: Proposing rules from imperative guidance sentences
//! - `annotate`: Annotation location resolution for the PDF marker layer
//! - `report`: Tabular report rows for the spreadsheet emitter
//! - `history`: Persistent audit history and artifact storage
//! - `api`: REST API endpoints
//! - `config`: Configuration management and settings
//! - `errors`: Centralized error handling and types
//!
//! ## Input/Output Specification
//! - **Input**: Page-indexed document text, audit metadata, rule definitions
//! - **Output**: Findings with severity/page/evidence, document status,
//!   annotation markers, report rows, history records
//! - **Guarantee**: rule evaluation never fails for well-formed inputs;
//!   degraded collaborators (missing guidance, unreadable pages) reduce
//!   output quality, never abort the audit

// Core modules
pub mod config;
pub mod errors;
pub mod text;
pub mod guidance;
pub mod rules;
pub mod engine;
pub mod spelling;
pub mod learning;
pub mod mining;
pub mod annotate;
pub mod report;
pub mod history;
pub mod api;

// Re-exports for convenience
pub use config::Config;
pub use errors::{AuditError, Result};
pub use engine::FindingEngine;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Finding severity, inherited from the owning rule at evaluation time
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Minor,
    Major,
    Critical,
}

impl Severity {
    /// Whether a finding of this severity rejects the document
    pub fn is_rejecting(&self) -> bool {
        matches!(self, Severity::Major | Severity::Critical)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Minor => write!(f, "minor"),
            Severity::Major => write!(f, "major"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Outcome of one audit run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditStatus {
    Pass,
    Rejected,
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditStatus::Pass => write!(f, "Pass"),
            AuditStatus::Rejected => write!(f, "Rejected"),
        }
    }
}

impl AuditStatus {
    /// Derive the document status from a finding list: any major or critical
    /// finding rejects the document.
    pub fn derive(findings: &[Finding]) -> Self {
        if findings.iter().any(|f| f.severity.is_rejecting()) {
            AuditStatus::Rejected
        } else {
            AuditStatus::Pass
        }
    }
}

/// Structured metadata describing the document under audit. Assembled once
/// per request and passed by value through the pipeline; nothing below the
/// API boundary reads ambient state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditMetadata {
    /// Supplier that produced the drawing (analytics only)
    #[serde(default)]
    pub supplier: String,
    /// Client the drawing was produced for
    #[serde(default)]
    pub client: String,
    /// Project within the client programme
    #[serde(default)]
    pub project: String,
    /// Site type (e.g. Greenfield, Rooftop, Streetworks)
    #[serde(default)]
    pub site_type: String,
    /// Proposed equipment vendor
    #[serde(default)]
    pub vendor: String,
    /// Proposed cabinet location
    #[serde(default)]
    pub cabinet_location: String,
    /// Proposed radio location
    #[serde(default)]
    pub radio_location: String,
    /// Drawing type (e.g. General Arrangement, Detailed Design)
    #[serde(default)]
    pub drawing_type: String,
    /// Quantity of sectors
    #[serde(default)]
    pub sectors: u32,
    /// Site address expected in the drawing title area
    #[serde(default)]
    pub site_address: String,
    /// Proposed MIMO configuration per sector (blank when unused)
    #[serde(default)]
    pub mimo: Vec<String>,
}

impl AuditMetadata {
    /// Look up a metadata field by name, as used by rule triggers and
    /// context keys. Unknown names return `None`.
    pub fn field(&self, name: &str) -> Option<String> {
        match name {
            "supplier" => Some(self.supplier.clone()),
            "client" => Some(self.client.clone()),
            "project" => Some(self.project.clone()),
            "site_type" => Some(self.site_type.clone()),
            "vendor" => Some(self.vendor.clone()),
            "cabinet_location" => Some(self.cabinet_location.clone()),
            "radio_location" => Some(self.radio_location.clone()),
            "drawing_type" => Some(self.drawing_type.clone()),
            "sectors" => Some(self.sectors.to_string()),
            "site_address" => Some(self.site_address.clone()),
            _ => None,
        }
    }
}

/// Kind of check a finding originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    MustContain,
    Forbid,
    RegexPresence,
    MetadataDerived,
    GuidanceEvidence,
    Spelling,
}

/// Supporting citation from the guidance corpus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuidanceCitation {
    /// Source document the snippet came from
    pub source: String,
    /// Context snippet around the match
    pub snippet: String,
    /// Relevance score in [0, 1]
    pub score: f32,
}

/// The output of evaluating one rule against one document. Created
/// transiently during an audit run and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Identifier of the rule that fired
    pub rule_id: String,
    /// Human name of the rule
    pub rule_name: String,
    /// Which check kind produced this finding
    pub kind: FindingKind,
    /// Severity inherited from the rule at evaluation time
    pub severity: Severity,
    /// Human message describing the failure
    pub message: String,
    /// 1-based page number; `None` means document-wide
    pub page: Option<u32>,
    /// The specific text the finding is anchored to, used for review,
    /// annotation placement, and ignore-phrase suppression
    pub evidence: Option<String>,
    /// Best guidance citation, when the guidance corpus was consulted
    pub citation: Option<GuidanceCitation>,
}

/// Application state shared across API handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Config>,
    pub engine: Arc<engine::FindingEngine>,
    pub rules: Arc<RwLock<rules::RuleStore>>,
    pub guidance: Arc<RwLock<guidance::GuidanceIndex>>,
    pub learning: Arc<RwLock<learning::LearningStore>>,
    pub history: Arc<history::HistoryStore>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}
