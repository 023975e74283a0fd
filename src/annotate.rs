//! # Annotation Resolution Module
//!
//! ## Purpose
//! Resolves where each finding's marker belongs on the drawing. The PDF
//! layer itself is external; it is reached through the [`PageGeometry`]
//! and [`AnnotationSink`] traits, so resolution stays testable and the
//! marker-count guarantee is enforced here.
//!
//! ## Input/Output Specification
//! - **Input**: Findings, a page geometry that can locate text, a sink
//!   that draws markers
//! - **Output**: One marker per finding, located on the evidence when it
//!   can be found, at the fallback corner otherwise
//!
//! ## Key Features
//! - Every finding gets exactly one marker; unlocatable evidence degrades
//!   to a fallback note, never to silence
//! - Findings with a known page search that page first

use crate::errors::Result;
use crate::Finding;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A point in page coordinates (points, origin top-left).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// An axis-aligned rectangle in page coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl Rect {
    /// Top-right corner, where the note icon sits.
    pub fn note_corner(&self) -> Point {
        Point {
            x: self.x1,
            y: self.y0,
        }
    }
}

/// Where a fallback note lands when the evidence cannot be located.
pub const FALLBACK_NOTE_POINT: Point = Point { x: 36.0, y: 36.0 };

/// Read-side view of the rendered document.
pub trait PageGeometry {
    /// Number of pages in the document.
    fn page_count(&self) -> u32;
    /// Bounding box of the first occurrence of `needle` on a 1-based
    /// page, if present.
    fn find_text(&self, page: u32, needle: &str) -> Option<Rect>;
}

/// Write-side marker layer.
pub trait AnnotationSink {
    /// Draw a highlight rectangle on a 1-based page.
    fn draw_rect(&mut self, page: u32, rect: Rect) -> Result<()>;
    /// Place a note icon with a title and body on a 1-based page.
    fn place_note(&mut self, page: u32, at: Point, title: &str, body: &str) -> Result<()>;
}

/// One marker instruction for the client-side PDF layer: search for the
/// needle, highlight it, and drop a note; fall back to the fixed point
/// when the needle is absent or empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkerInstruction {
    /// 1-based page to search first; `None` means search all pages
    pub page: Option<u32>,
    /// Evidence text to locate; empty means go straight to the fallback
    pub needle: String,
    /// Note title (the rule name)
    pub title: String,
    /// Note body (the finding message)
    pub body: String,
    /// Where the note lands when the needle cannot be located
    pub fallback: Point,
}

/// Build the marker plan for a finding list, one instruction per finding.
/// Used by callers that hold the PDF on their side of the API.
pub fn plan_markers(findings: &[Finding]) -> Vec<MarkerInstruction> {
    findings
        .iter()
        .map(|f| MarkerInstruction {
            page: f.page,
            needle: f.evidence.clone().unwrap_or_default(),
            title: f.rule_name.clone(),
            body: f.message.clone(),
            fallback: FALLBACK_NOTE_POINT,
        })
        .collect()
}

/// How each finding's marker was resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationSummary {
    /// Markers anchored to located evidence
    pub located: usize,
    /// Markers placed at the fallback corner
    pub fallback: usize,
}

impl AnnotationSummary {
    pub fn total(&self) -> usize {
        self.located + self.fallback
    }
}

/// Place one marker per finding. Evidence is searched on the finding's
/// page first, then across the whole document; findings without evidence
/// or whose evidence cannot be located get a fallback note.
pub fn annotate_findings<G: PageGeometry, S: AnnotationSink>(
    findings: &[Finding],
    geometry: &G,
    sink: &mut S,
) -> Result<AnnotationSummary> {
    let mut summary = AnnotationSummary::default();
    for finding in findings {
        match locate(finding, geometry) {
            Some((page, rect)) => {
                sink.draw_rect(page, rect)?;
                sink.place_note(page, rect.note_corner(), &finding.rule_name, &finding.message)?;
                summary.located += 1;
            }
            None => {
                let page = finding.page.unwrap_or(1).min(geometry.page_count().max(1));
                sink.place_note(
                    page,
                    FALLBACK_NOTE_POINT,
                    &finding.rule_name,
                    &finding.message,
                )?;
                summary.fallback += 1;
            }
        }
    }
    debug!(
        located = summary.located,
        fallback = summary.fallback,
        "annotation resolution complete"
    );
    Ok(summary)
}

fn locate<G: PageGeometry>(finding: &Finding, geometry: &G) -> Option<(u32, Rect)> {
    let evidence = finding.evidence.as_deref()?.trim();
    if evidence.is_empty() {
        return None;
    }
    // second attempt with collapsed whitespace covers extraction layers
    // that fold line breaks inside the evidence
    let collapsed = crate::text::collapse_whitespace(evidence);
    let mut needles: Vec<&str> = vec![evidence];
    if collapsed != evidence {
        needles.push(&collapsed);
    }
    let mut pages: Vec<u32> = Vec::with_capacity(geometry.page_count() as usize);
    pages.extend(finding.page);
    pages.extend((1..=geometry.page_count()).filter(|p| Some(*p) != finding.page));
    for page in pages {
        for needle in &needles {
            if let Some(rect) = geometry.find_text(page, needle) {
                return Some((page, rect));
            }
        }
    }
    None
}
