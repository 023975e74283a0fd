//! # Configuration Module
//!
//! ## Purpose
//! Central configuration for the audit service: server binding, rule store
//! paths, guidance corpus settings, spelling pass, learning store, and the
//! history database. Supports TOML files and environment overrides.
//!
//! ## Input/Output Specification
//! - **Input**: TOML configuration files, `DESIGN_AUDIT_*` environment
//!   variables
//! - **Output**: Validated [`Config`] tree consumed by every component
//!
//! ## Key Features
//! - Sensible defaults for every field
//! - Environment variable overrides for deployment
//! - Validation that catches inconsistent settings at startup

use crate::errors::{AuditError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server settings
    pub server: ServerConfig,
    /// Rule store paths (base + custom overlay)
    pub rules: RulesConfig,
    /// Guidance corpus and matching thresholds
    pub guidance: GuidanceConfig,
    /// Spelling pass settings
    pub spelling: SpellingConfig,
    /// Finding-engine settings
    pub engine: EngineConfig,
    /// Learning store settings
    pub learning: LearningConfig,
    /// Audit history database settings
    pub history: HistoryConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Number of HTTP workers
    pub workers: usize,
    /// Maximum accepted request body in bytes
    pub max_payload_size: usize,
}

/// Rule store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Read-only base ruleset, seeded on first run
    pub base_path: PathBuf,
    /// Mutable overlay for learned and user-added rules
    pub overlay_path: PathBuf,
}

/// Guidance index configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuidanceConfig {
    /// Root directory scanned for guidance text files
    pub root: PathBuf,
    /// Minimum fuzzy partial-ratio for a term to count as matched
    pub fuzzy_floor: f32,
    /// Minimum best-citation score for guidance evidence to count as found
    pub evidence_threshold: f32,
    /// Maximum citations returned per search
    pub top_k: usize,
    /// Minimum indexed term length
    pub min_term_len: usize,
}

/// Spelling pass configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpellingConfig {
    /// Whether the spelling pass runs at all
    pub enabled: bool,
    /// Optional dictionary word list, one word per line
    pub dictionary_path: Option<PathBuf>,
    /// Domain terms never flagged as misspellings
    pub allow_words: Vec<String>,
    /// Minimum token length considered
    pub min_token_len: usize,
    /// Hard cap on spelling findings per audit
    pub max_findings: usize,
}

/// Finding-engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Metadata fields composing the learning context key, in order
    pub context_fields: Vec<String>,
    /// Characters of page-one text treated as the title block
    pub title_head_chars: usize,
}

/// Learning store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    /// JSON file holding per-context ignore sets
    pub path: PathBuf,
}

/// Audit history configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Sled database directory
    pub db_path: PathBuf,
    /// Gzip-compress stored report artifacts
    pub enable_compression: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Emit JSON-structured logs
    pub json_format: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                workers: 4,
                max_payload_size: 16 * 1024 * 1024,
            },
            rules: RulesConfig {
                base_path: PathBuf::from("./data/base_rules.toml"),
                overlay_path: PathBuf::from("./data/custom_rules.toml"),
            },
            guidance: GuidanceConfig {
                root: PathBuf::from("./guidance"),
                fuzzy_floor: 0.80,
                evidence_threshold: 0.30,
                top_k: 5,
                min_term_len: 3,
            },
            spelling: SpellingConfig {
                enabled: true,
                dictionary_path: None,
                allow_words: Vec::new(),
                min_token_len: 3,
                max_findings: 200,
            },
            engine: EngineConfig {
                context_fields: vec![
                    "client".to_string(),
                    "project".to_string(),
                    "vendor".to_string(),
                    "site_type".to_string(),
                ],
                title_head_chars: 1500,
            },
            learning: LearningConfig {
                path: PathBuf::from("./data/learning.json"),
            },
            history: HistoryConfig {
                db_path: PathBuf::from("./data/history_db"),
                enable_compression: true,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                json_format: false,
            },
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then apply environment
    /// overrides and validate.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| AuditError::Config {
            message: format!(
                "failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ),
        })?;
        let mut config: Config = toml::from_str(&content).map_err(|e| AuditError::Config {
            message: format!("failed to parse config file: {}", e),
        })?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load defaults with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("DESIGN_AUDIT_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("DESIGN_AUDIT_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
        if let Ok(root) = std::env::var("DESIGN_AUDIT_GUIDANCE_ROOT") {
            self.guidance.root = PathBuf::from(root);
        }
        if let Ok(db_path) = std::env::var("DESIGN_AUDIT_HISTORY_DB") {
            self.history.db_path = PathBuf::from(db_path);
        }
        if let Ok(level) = std::env::var("DESIGN_AUDIT_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Validate the configuration for internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(AuditError::Config {
                message: "server port must be non-zero".to_string(),
            });
        }
        if self.server.workers == 0 {
            return Err(AuditError::Config {
                message: "server workers must be at least 1".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.guidance.fuzzy_floor) {
            return Err(AuditError::Config {
                message: "guidance fuzzy_floor must be in [0, 1]".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.guidance.evidence_threshold) {
            return Err(AuditError::Config {
                message: "guidance evidence_threshold must be in [0, 1]".to_string(),
            });
        }
        if self.guidance.top_k == 0 {
            return Err(AuditError::Config {
                message: "guidance top_k must be at least 1".to_string(),
            });
        }
        if self.rules.base_path == self.rules.overlay_path {
            return Err(AuditError::Config {
                message: "rules base_path and overlay_path must differ".to_string(),
            });
        }
        if self.engine.context_fields.is_empty() {
            return Err(AuditError::Config {
                message: "engine context_fields must not be empty".to_string(),
            });
        }
        if self.engine.title_head_chars == 0 {
            return Err(AuditError::Config {
                message: "engine title_head_chars must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.guidance.fuzzy_floor, 0.80);
        assert_eq!(config.guidance.evidence_threshold, 0.30);
        assert_eq!(config.spelling.max_findings, 200);
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let mut config = Config::default();
        config.guidance.evidence_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_same_rule_paths_rejected() {
        let mut config = Config::default();
        config.rules.overlay_path = config.rules.base_path.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[server]
host = "0.0.0.0"
port = 9090
workers = 2
max_payload_size = 1048576

[rules]
base_path = "./b.toml"
overlay_path = "./c.toml"

[guidance]
root = "./g"
fuzzy_floor = 0.8
evidence_threshold = 0.3
top_k = 5
min_term_len = 3

[spelling]
enabled = false
allow_words = ["eltek"]
min_token_len = 3
max_findings = 50

[engine]
context_fields = ["client", "project"]
title_head_chars = 1500

[learning]
path = "./l.json"

[history]
db_path = "./h"
enable_compression = true

[logging]
level = "debug"
json_format = false
"#,
        )
        .unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.server.port, 9090);
        assert!(!config.spelling.enabled);
        assert_eq!(config.spelling.allow_words, vec!["eltek"]);
    }
}
