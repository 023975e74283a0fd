//! # Design Audit Service Main Driver
//!
//! ## Purpose
//! Main entry point for the design audit service. Orchestrates
//! initialization of all components and starts the web server for handling
//! audit requests.
//!
//! ## Input/Output Specification
//! - **Input**: Configuration files, command line arguments, environment
//!   variables
//! - **Output**: Running web server with audit API endpoints
//!
//! ## Key Features
//! - Graceful startup and shutdown
//! - Component health checks
//! - Configuration validation
//! - Structured logging
//!
//! ## Architecture Flow
//! 1. Parse command line arguments and load configuration
//! 2. Initialize logging and tracing
//! 3. Open the rule, learning, and history stores; build the guidance index
//! 4. Start the web API server
//! 5. Handle shutdown signals gracefully

use clap::{Arg, Command};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use design_audit::{
    api::ApiServer,
    config::Config,
    engine::FindingEngine,
    errors::{AuditError, Result},
    guidance::GuidanceIndex,
    history::HistoryStore,
    learning::LearningStore,
    rules::RuleStore,
    AppState,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let matches = Command::new("design-audit")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Design Quality Team")
        .about("Rule-driven quality auditor for engineering drawings")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("config.toml"),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .help("Server port")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("rebuild-guidance")
                .long("rebuild-guidance")
                .help("Rebuild the guidance index on startup")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("check-health")
                .long("check-health")
                .help("Run health checks and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    // Load configuration; a missing file falls back to defaults so a
    // fresh checkout runs without setup
    let config_path = matches.get_one::<String>("config").unwrap();
    let mut config = if std::path::Path::new(config_path).exists() {
        Config::from_file(config_path)?
    } else {
        Config::from_env()?
    };

    // Override port if specified
    if let Some(port) = matches.get_one::<u16>("port") {
        config.server.port = *port;
    }

    let config = Arc::new(config);

    // Initialize logging
    init_logging(&config)?;

    info!("Starting Design Audit Service v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from: {}", config_path);

    // Run health checks if requested
    if matches.get_flag("check-health") {
        return run_health_checks(&config);
    }

    // Initialize application components
    let app_state = initialize_components(config.clone())?;

    // Rebuild the guidance index if requested
    if matches.get_flag("rebuild-guidance") {
        info!("Rebuilding guidance index...");
        let index = GuidanceIndex::build(&config.guidance)?;
        info!(
            documents = index.document_count(),
            terms = index.term_count(),
            "Guidance index rebuilt"
        );
        *app_state.guidance.write().await = index;
    }

    // Start the API server
    let server = ApiServer::new(app_state.clone());
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!("Server error: {}", e);
        }
    });

    info!(
        "Design Audit Service started successfully on {}:{}",
        config.server.host, config.server.port
    );

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = server_handle => {
            warn!("Server stopped unexpectedly");
        }
    }

    info!("Design Audit Service shut down successfully");
    Ok(())
}

/// Initialize logging and tracing
fn init_logging(config: &Config) -> Result<()> {
    let log_level: tracing::Level =
        config
            .logging
            .level
            .parse()
            .map_err(|_| AuditError::Config {
                message: format!("Invalid log level: {}", config.logging.level),
            })?;
    let filter = tracing_subscriber::filter::LevelFilter::from_level(log_level);

    if config.logging.json_format {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .json()
                    .with_filter(filter),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_filter(filter),
            )
            .init();
    }

    info!("Logging initialized with level: {}", config.logging.level);
    Ok(())
}

/// Initialize all application components
fn initialize_components(config: Arc<Config>) -> Result<AppState> {
    info!("Initializing application components...");

    info!("Opening rule store...");
    let rules = RuleStore::open(&config.rules)?;

    info!("Building guidance index...");
    let guidance = GuidanceIndex::build_or_empty(&config.guidance);

    info!("Opening learning store...");
    let learning = LearningStore::open(&config.learning)?;

    info!("Opening history store...");
    let history = Arc::new(HistoryStore::open(&config.history)?);
    history.health_check()?;

    let engine = Arc::new(FindingEngine::new(config.clone()));

    let app_state = AppState {
        config,
        engine,
        rules: Arc::new(RwLock::new(rules)),
        guidance: Arc::new(RwLock::new(guidance)),
        learning: Arc::new(RwLock::new(learning)),
        history,
        started_at: chrono::Utc::now(),
    };

    info!("All components initialized successfully");
    Ok(app_state)
}

/// Run startup health checks and exit
fn run_health_checks(config: &Config) -> Result<()> {
    info!("Running health checks...");

    config.validate()?;
    info!("✓ Configuration is valid");

    check_required_paths(config)?;
    info!("✓ Required paths exist");

    let history = HistoryStore::open(&config.history)?;
    history.health_check()?;
    info!("✓ History store is healthy");

    let rules = RuleStore::open(&config.rules)?;
    info!("✓ Rule store is healthy ({} rules)", rules.rule_count());

    if config.guidance.root.is_dir() {
        info!("✓ Guidance root is present");
    } else {
        warn!("Guidance root {} is missing; audits will run without guidance evidence", config.guidance.root.display());
    }

    info!("All health checks passed!");
    Ok(())
}

/// Check that required parent directories exist, creating them if needed
fn check_required_paths(config: &Config) -> Result<()> {
    let paths_to_check = vec![
        &config.rules.base_path,
        &config.rules.overlay_path,
        &config.learning.path,
        &config.history.db_path,
    ];

    for path in paths_to_check {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
                info!("Created directory: {:?}", parent);
            }
        }
    }

    Ok(())
}
