//! # Audit History Module
//!
//! ## Purpose
//! Persistent record of every audit run plus its full artifact (outcome
//! and report sheets), backed by sled. Records carry an exclude flag so
//! superseded or test runs can be hidden from analytics without losing
//! the data.
//!
//! ## Input/Output Specification
//! - **Input**: Audit outcomes and their report sheets
//! - **Output**: History records (newest first), full artifacts, stats
//!
//! ## Key Features
//! - Separate trees for lightweight records and heavyweight artifacts
//! - Optional gzip compression of artifacts
//! - Health check validating database responsiveness

use crate::config::HistoryConfig;
use crate::engine::AuditOutcome;
use crate::errors::{AuditError, Result};
use crate::report::Sheet;
use crate::{AuditMetadata, AuditStatus, Severity};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use tracing::{debug, info};
use uuid::Uuid;

const RUNS_TREE: &str = "runs";
const ARTIFACTS_TREE: &str = "artifacts";

const ARTIFACT_RAW: u8 = 0;
const ARTIFACT_GZIP: u8 = 1;

/// Lightweight per-run record kept in the runs tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub run_id: Uuid,
    pub file_name: String,
    pub metadata: AuditMetadata,
    pub context: String,
    pub status: AuditStatus,
    pub finding_count: usize,
    pub major_count: usize,
    pub created_at: DateTime<Utc>,
    /// Hidden from analytics when set; the artifact is retained
    pub excluded: bool,
}

/// Full stored artifact of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditArtifact {
    pub outcome: AuditOutcome,
    pub sheets: Vec<Sheet>,
}

/// Aggregate statistics over the history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryStats {
    pub total_runs: usize,
    pub excluded_runs: usize,
    pub rejected_runs: usize,
    pub db_size_bytes: u64,
}

/// Sled-backed audit history.
pub struct HistoryStore {
    db: sled::Db,
    runs: sled::Tree,
    artifacts: sled::Tree,
    compress: bool,
}

impl HistoryStore {
    /// Open (or create) the history database.
    pub fn open(config: &HistoryConfig) -> Result<Self> {
        let db = sled::open(&config.db_path).map_err(|e| AuditError::HistoryStore {
            db_path: config.db_path.display().to_string(),
            reason: format!("failed to open database: {}", e),
        })?;
        let runs = db.open_tree(RUNS_TREE)?;
        let artifacts = db.open_tree(ARTIFACTS_TREE)?;
        info!(
            path = %config.db_path.display(),
            runs = runs.len(),
            compression = config.enable_compression,
            "history store opened"
        );
        Ok(Self {
            db,
            runs,
            artifacts,
            compress: config.enable_compression,
        })
    }

    /// Record a completed run together with its report sheets.
    pub fn record(&self, outcome: &AuditOutcome, sheets: &[Sheet]) -> Result<HistoryRecord> {
        let record = HistoryRecord {
            run_id: outcome.run_id,
            file_name: outcome.file_name.clone(),
            metadata: outcome.metadata.clone(),
            context: outcome.context.clone(),
            status: outcome.status,
            finding_count: outcome.findings.len(),
            major_count: outcome
                .findings
                .iter()
                .filter(|f| f.severity >= Severity::Major)
                .count(),
            created_at: outcome.created_at,
            excluded: false,
        };
        let key = outcome.run_id.as_bytes();
        self.runs.insert(key, bincode::serialize(&record)?)?;

        let artifact = AuditArtifact {
            outcome: outcome.clone(),
            sheets: sheets.to_vec(),
        };
        let payload = self.encode_artifact(&artifact)?;
        self.artifacts.insert(key, payload)?;
        self.db.flush()?;
        debug!(run_id = %outcome.run_id, "audit run recorded");
        Ok(record)
    }

    /// Fetch one record by run id.
    pub fn get(&self, run_id: Uuid) -> Result<HistoryRecord> {
        match self.runs.get(run_id.as_bytes())? {
            Some(bytes) => Ok(bincode::deserialize(&bytes)?),
            None => Err(AuditError::HistoryRecordNotFound {
                key: run_id.to_string(),
            }),
        }
    }

    /// Fetch the full artifact for a run.
    pub fn artifact(&self, run_id: Uuid) -> Result<AuditArtifact> {
        match self.artifacts.get(run_id.as_bytes())? {
            Some(bytes) => self.decode_artifact(&bytes),
            None => Err(AuditError::HistoryRecordNotFound {
                key: run_id.to_string(),
            }),
        }
    }

    /// All records, newest first. Excluded records are filtered out unless
    /// requested.
    pub fn list(&self, include_excluded: bool) -> Result<Vec<HistoryRecord>> {
        let mut records = Vec::with_capacity(self.runs.len());
        for entry in self.runs.iter() {
            let (_, bytes) = entry?;
            let record: HistoryRecord = bincode::deserialize(&bytes)?;
            if include_excluded || !record.excluded {
                records.push(record);
            }
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    /// Set or clear a record's exclude flag.
    pub fn set_excluded(&self, run_id: Uuid, excluded: bool) -> Result<HistoryRecord> {
        let mut record = self.get(run_id)?;
        record.excluded = excluded;
        self.runs
            .insert(run_id.as_bytes(), bincode::serialize(&record)?)?;
        self.db.flush()?;
        debug!(run_id = %run_id, excluded, "history record exclusion updated");
        Ok(record)
    }

    /// Aggregate statistics over all records.
    pub fn stats(&self) -> Result<HistoryStats> {
        let records = self.list(true)?;
        Ok(HistoryStats {
            total_runs: records.len(),
            excluded_runs: records.iter().filter(|r| r.excluded).count(),
            rejected_runs: records
                .iter()
                .filter(|r| r.status == AuditStatus::Rejected)
                .count(),
            db_size_bytes: self.db.size_on_disk()?,
        })
    }

    /// Verify the database is responsive with a write/read/delete cycle.
    pub fn health_check(&self) -> Result<()> {
        let key = b"__health_check__";
        self.runs.insert(key, b"ok")?;
        match self.runs.get(key)? {
            Some(v) if v.as_ref() == b"ok" => {}
            _ => {
                return Err(AuditError::HistoryStore {
                    db_path: "".to_string(),
                    reason: "health check read-back mismatch".to_string(),
                })
            }
        }
        self.runs.remove(key)?;
        Ok(())
    }

    fn encode_artifact(&self, artifact: &AuditArtifact) -> Result<Vec<u8>> {
        let raw = bincode::serialize(artifact)?;
        if !self.compress {
            let mut out = Vec::with_capacity(raw.len() + 1);
            out.push(ARTIFACT_RAW);
            out.extend_from_slice(&raw);
            return Ok(out);
        }
        let mut encoder = GzEncoder::new(vec![ARTIFACT_GZIP], Compression::default());
        encoder.write_all(&raw)?;
        Ok(encoder.finish()?)
    }

    fn decode_artifact(&self, bytes: &[u8]) -> Result<AuditArtifact> {
        match bytes.split_first() {
            Some((&ARTIFACT_RAW, raw)) => Ok(bincode::deserialize(raw)?),
            Some((&ARTIFACT_GZIP, compressed)) => {
                let mut decoder = GzDecoder::new(compressed);
                let mut raw = Vec::new();
                decoder.read_to_end(&mut raw)?;
                Ok(bincode::deserialize(&raw)?)
            }
            _ => Err(AuditError::SerializationFailed {
                message: "artifact payload has no format marker".to_string(),
            }),
        }
    }
}
