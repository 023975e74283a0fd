//! # Report Module
//!
//! ## Purpose
//! Shapes an audit outcome into tabular sheets for the spreadsheet layer.
//! The spreadsheet format itself is external and reached through the
//! [`SheetWriter`] trait; this module owns the row content only.
//!
//! ## Input/Output Specification
//! - **Input**: An [`AuditOutcome`]
//! - **Output**: Three sheets: Metadata, Findings, Summary
//!
//! ## Key Features
//! - Stable column order so downstream templates keep working
//! - Findings carry their guidance citation columns when present
//! - Sheets serialize to JSON for artifact storage

use crate::engine::AuditOutcome;
use crate::errors::Result;
use crate::Severity;
use serde::{Deserialize, Serialize};

/// One tabular sheet of the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sheet {
    pub name: String,
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Sheet {
    fn new(name: &str, header: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            header: header.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    fn push_row<I: IntoIterator<Item = String>>(&mut self, row: I) {
        self.rows.push(row.into_iter().collect());
    }
}

/// The external spreadsheet emitter.
pub trait SheetWriter {
    fn write_sheet(&mut self, sheet: &Sheet) -> Result<()>;
}

/// Build the report sheets for an audit outcome.
pub fn build_report(outcome: &AuditOutcome) -> Vec<Sheet> {
    vec![
        metadata_sheet(outcome),
        findings_sheet(outcome),
        summary_sheet(outcome),
    ]
}

/// Emit the full report through a sheet writer, in sheet order.
pub fn write_report<W: SheetWriter>(outcome: &AuditOutcome, writer: &mut W) -> Result<()> {
    for sheet in build_report(outcome) {
        writer.write_sheet(&sheet)?;
    }
    Ok(())
}

fn metadata_sheet(outcome: &AuditOutcome) -> Sheet {
    let mut sheet = Sheet::new("Metadata", &["Field", "Value"]);
    let m = &outcome.metadata;
    let pairs: Vec<(&str, String)> = vec![
        ("File name", outcome.file_name.clone()),
        ("Run id", outcome.run_id.to_string()),
        ("Audited at", outcome.created_at.to_rfc3339()),
        ("Status", outcome.status.to_string()),
        ("Supplier", m.supplier.clone()),
        ("Client", m.client.clone()),
        ("Project", m.project.clone()),
        ("Site type", m.site_type.clone()),
        ("Vendor", m.vendor.clone()),
        ("Cabinet location", m.cabinet_location.clone()),
        ("Radio location", m.radio_location.clone()),
        ("Drawing type", m.drawing_type.clone()),
        ("Sectors", m.sectors.to_string()),
        ("Site address", m.site_address.clone()),
        ("MIMO", m.mimo.join(", ")),
    ];
    for (field, value) in pairs {
        sheet.push_row([field.to_string(), value]);
    }
    sheet
}

fn findings_sheet(outcome: &AuditOutcome) -> Sheet {
    let mut sheet = Sheet::new(
        "Findings",
        &[
            "Rule",
            "Severity",
            "Page",
            "Message",
            "Evidence",
            "Guidance source",
            "Guidance snippet",
        ],
    );
    for finding in &outcome.findings {
        sheet.push_row([
            finding.rule_name.clone(),
            finding.severity.to_string(),
            finding
                .page
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string()),
            finding.message.clone(),
            finding.evidence.clone().unwrap_or_default(),
            finding
                .citation
                .as_ref()
                .map(|c| c.source.clone())
                .unwrap_or_default(),
            finding
                .citation
                .as_ref()
                .map(|c| c.snippet.clone())
                .unwrap_or_default(),
        ]);
    }
    sheet
}

fn summary_sheet(outcome: &AuditOutcome) -> Sheet {
    let count = |s: Severity| {
        outcome
            .findings
            .iter()
            .filter(|f| f.severity == s)
            .count()
            .to_string()
    };
    let mut sheet = Sheet::new("Summary", &["Field", "Value"]);
    sheet.push_row(["Status".to_string(), outcome.status.to_string()]);
    sheet.push_row(["Total findings".to_string(), outcome.findings.len().to_string()]);
    sheet.push_row(["Critical".to_string(), count(Severity::Critical)]);
    sheet.push_row(["Major".to_string(), count(Severity::Major)]);
    sheet.push_row(["Minor".to_string(), count(Severity::Minor)]);
    sheet.push_row(["Rules evaluated".to_string(), outcome.evaluated_rules.to_string()]);
    sheet.push_row(["Findings suppressed".to_string(), outcome.suppressed.to_string()]);
    sheet
}
