//! # API Server Module
//!
//! ## Purpose
//! REST API server exposing the audit pipeline: run audits, apply
//! reviewer feedback, manage rules, probe and rebuild the guidance index,
//! and browse the audit history.
//!
//! ## Input/Output Specification
//! - **Input**: HTTP requests with audit metadata, page texts, verdicts,
//!   rule definitions
//! - **Output**: JSON responses with findings, report sheets, marker
//!   plans, history rows, system status
//!
//! ## Key Features
//! - Audit requests run start-to-finish: evaluate, plan markers, build
//!   report rows, persist history
//! - Rule and guidance mutations behind write locks
//! - Structured error responses
//! - CORS support for web frontends

use crate::annotate::{self, MarkerInstruction};
use crate::engine::AuditInput;
use crate::errors::{AuditError, Result};
use crate::guidance::GuidanceIndex;
use crate::learning::{self, FeedbackBatch};
use crate::mining;
use crate::report::{self, Sheet};
use crate::rules::Rule;
use crate::{AuditMetadata, AuditStatus, Finding};
use actix_cors::Cors;
use actix_web::{web, App, HttpResponse, HttpServer, Result as ActixResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Audit request payload
#[derive(Debug, Deserialize)]
pub struct AuditRequest {
    pub file_name: String,
    #[serde(default)]
    pub metadata: AuditMetadata,
    pub pages: Vec<String>,
}

/// Audit response payload
#[derive(Debug, Serialize)]
pub struct AuditResponse {
    pub run_id: Uuid,
    pub status: AuditStatus,
    pub findings: Vec<Finding>,
    pub markers: Vec<MarkerInstruction>,
    pub sheets: Vec<Sheet>,
    pub evaluated_rules: usize,
    pub suppressed: usize,
}

/// Feedback response payload
#[derive(Debug, Serialize)]
pub struct FeedbackResponse {
    pub mutations: usize,
}

/// Guidance rebuild response payload
#[derive(Debug, Serialize)]
pub struct RebuildResponse {
    pub documents: usize,
    pub terms: usize,
}

#[derive(Debug, Deserialize)]
pub struct GuidanceSearchParams {
    pub q: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryListParams {
    #[serde(default)]
    pub include_excluded: bool,
}

#[derive(Debug, Deserialize)]
pub struct ExcludeRequest {
    pub run_id: Uuid,
    pub excluded: bool,
}

#[derive(Debug, Deserialize)]
pub struct MineRequest {
    /// Append the mined rules to the custom overlay instead of only
    /// returning proposals
    #[serde(default)]
    pub append: bool,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub components: HealthComponents,
}

/// Component health status
#[derive(Debug, Serialize)]
pub struct HealthComponents {
    pub history: String,
    pub guidance: String,
    pub rules: String,
    pub spelling: String,
}

/// The API server wrapping shared application state.
pub struct ApiServer {
    app_state: crate::AppState,
}

impl ApiServer {
    pub fn new(app_state: crate::AppState) -> Self {
        Self { app_state }
    }

    /// Run the API server until the process is stopped.
    pub async fn run(self) -> Result<()> {
        let config = self.app_state.config.clone();
        let bind_addr = format!("{}:{}", config.server.host, config.server.port);
        tracing::info!("Starting API server on {}", bind_addr);

        let app_state = self.app_state;
        let max_payload_size = config.server.max_payload_size;
        // bound separately so no non-Send temporary is held across the
        // await; the spawned task must stay Send
        let server = HttpServer::new(move || {
            App::new()
                .wrap(Cors::permissive())
                .app_data(web::Data::new(app_state.clone()))
                .app_data(web::JsonConfig::default().limit(max_payload_size))
                .route("/audit", web::post().to(audit_handler))
                .route("/feedback", web::post().to(feedback_handler))
                .route("/rules", web::get().to(list_rules_handler))
                .route("/rules", web::post().to(upsert_rule_handler))
                .route("/rules/{id}", web::delete().to(delete_rule_handler))
                .route("/rules/mine", web::post().to(mine_rules_handler))
                .route("/guidance/rebuild", web::post().to(rebuild_handler))
                .route("/guidance/search", web::get().to(guidance_search_handler))
                .route("/history", web::get().to(history_list_handler))
                .route("/history/exclude", web::post().to(history_exclude_handler))
                .route("/history/{run_id}", web::get().to(history_artifact_handler))
                .route("/health", web::get().to(health_handler))
                .route("/stats", web::get().to(stats_handler))
                .route("/", web::get().to(index_handler))
        })
        .workers(config.server.workers)
        .bind(&bind_addr)
        .map_err(|e| crate::internal_error!("Failed to bind server to {}: {}", bind_addr, e))?;

        server
            .run()
            .await
            .map_err(|e| crate::internal_error!("Server error: {}", e))?;

        Ok(())
    }
}

fn error_response(error: &AuditError) -> HttpResponse {
    let body = serde_json::json!({
        "error": error.category(),
        "message": error.to_string(),
        "recoverable": error.is_recoverable(),
    });
    match error {
        AuditError::ValidationFailed { .. }
        | AuditError::RuleValidation { .. }
        | AuditError::InvalidRulePattern { .. } => HttpResponse::BadRequest().json(body),
        AuditError::HistoryRecordNotFound { .. } => HttpResponse::NotFound().json(body),
        AuditError::GuidanceCorpusUnavailable { .. } => {
            HttpResponse::ServiceUnavailable().json(body)
        }
        _ => HttpResponse::InternalServerError().json(body),
    }
}

/// Audit endpoint handler: evaluate, plan markers, build the report,
/// persist the run.
async fn audit_handler(
    app_state: web::Data<crate::AppState>,
    request: web::Json<AuditRequest>,
) -> ActixResult<HttpResponse> {
    if request.file_name.trim().is_empty() {
        return Ok(error_response(&crate::validation_error!(
            "file_name",
            "file name cannot be empty"
        )));
    }
    let input = AuditInput {
        file_name: request.file_name.clone(),
        metadata: request.metadata.clone(),
        pages: request.pages.clone(),
    };

    let outcome = {
        let rules = app_state.rules.read().await;
        let guidance = app_state.guidance.read().await;
        let learning = app_state.learning.read().await;
        app_state.engine.evaluate(&input, &rules, &guidance, &learning)
    };
    let markers = annotate::plan_markers(&outcome.findings);
    let sheets = report::build_report(&outcome);

    if let Err(e) = app_state.history.record(&outcome, &sheets) {
        tracing::error!("Failed to record audit run: {}", e);
        return Ok(error_response(&e));
    }

    Ok(HttpResponse::Ok().json(AuditResponse {
        run_id: outcome.run_id,
        status: outcome.status,
        findings: outcome.findings,
        markers,
        sheets,
        evaluated_rules: outcome.evaluated_rules,
        suppressed: outcome.suppressed,
    }))
}

/// Feedback endpoint handler
async fn feedback_handler(
    app_state: web::Data<crate::AppState>,
    request: web::Json<FeedbackBatch>,
) -> ActixResult<HttpResponse> {
    // lock order matches the audit path: rules before learning
    let mut rules = app_state.rules.write().await;
    let mut learning = app_state.learning.write().await;
    match learning::apply_feedback(
        &request,
        &app_state.config.engine.context_fields,
        &mut learning,
        &mut rules,
    ) {
        Ok(mutations) => Ok(HttpResponse::Ok().json(FeedbackResponse { mutations })),
        Err(e) => {
            tracing::error!("Feedback application failed: {}", e);
            Ok(error_response(&e))
        }
    }
}

/// Rule listing endpoint handler
async fn list_rules_handler(
    app_state: web::Data<crate::AppState>,
) -> ActixResult<HttpResponse> {
    let rules = app_state.rules.read().await;
    let effective: Vec<Rule> = rules.effective_rules().into_iter().cloned().collect();
    Ok(HttpResponse::Ok().json(effective))
}

/// Rule upsert endpoint handler
async fn upsert_rule_handler(
    app_state: web::Data<crate::AppState>,
    request: web::Json<Rule>,
) -> ActixResult<HttpResponse> {
    let mut rules = app_state.rules.write().await;
    match rules.upsert_custom(request.into_inner()) {
        Ok(()) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "rules": rules.rule_count(),
        }))),
        Err(e) => Ok(error_response(&e)),
    }
}

/// Rule deletion endpoint handler. Base rules cannot be deleted.
async fn delete_rule_handler(
    app_state: web::Data<crate::AppState>,
    path: web::Path<String>,
) -> ActixResult<HttpResponse> {
    let mut rules = app_state.rules.write().await;
    match rules.remove_custom(&path) {
        Ok(true) => Ok(HttpResponse::Ok().json(serde_json::json!({ "removed": true }))),
        Ok(false) => Ok(HttpResponse::NotFound().json(serde_json::json!({
            "error": "rules",
            "message": format!("no custom rule with id '{}'", path.as_str()),
        }))),
        Err(e) => Ok(error_response(&e)),
    }
}

/// Guidance mining endpoint handler: return proposals, optionally
/// appending them to the overlay.
async fn mine_rules_handler(
    app_state: web::Data<crate::AppState>,
    request: web::Json<MineRequest>,
) -> ActixResult<HttpResponse> {
    let proposals = mining::mine_guidance(&app_state.config.guidance);
    let mut appended = 0;
    if request.append {
        let mut rules = app_state.rules.write().await;
        for proposal in proposals.clone() {
            let id = format!("mined-{}", uuid::Uuid::new_v4().simple());
            match proposal.into_rule(id, Default::default()) {
                Ok(rule) => {
                    if let Err(e) = rules.upsert_custom(rule) {
                        tracing::error!("Failed to append mined rule: {}", e);
                        return Ok(error_response(&e));
                    }
                    appended += 1;
                }
                Err(e) => {
                    tracing::warn!("Skipping unconvertible proposal: {}", e);
                }
            }
        }
    }
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "proposals": proposals,
        "appended": appended,
    })))
}

/// Guidance rebuild endpoint handler (admin batch operation)
async fn rebuild_handler(app_state: web::Data<crate::AppState>) -> ActixResult<HttpResponse> {
    match GuidanceIndex::build(&app_state.config.guidance) {
        Ok(index) => {
            let response = RebuildResponse {
                documents: index.document_count(),
                terms: index.term_count(),
            };
            *app_state.guidance.write().await = index;
            Ok(HttpResponse::Ok().json(response))
        }
        Err(e) => {
            tracing::error!("Guidance rebuild failed: {}", e);
            Ok(error_response(&e))
        }
    }
}

/// Guidance search endpoint handler (ad hoc probe)
async fn guidance_search_handler(
    app_state: web::Data<crate::AppState>,
    params: web::Query<GuidanceSearchParams>,
) -> ActixResult<HttpResponse> {
    let guidance = app_state.guidance.read().await;
    Ok(HttpResponse::Ok().json(guidance.search(&params.q)))
}

/// History listing endpoint handler
async fn history_list_handler(
    app_state: web::Data<crate::AppState>,
    params: web::Query<HistoryListParams>,
) -> ActixResult<HttpResponse> {
    match app_state.history.list(params.include_excluded) {
        Ok(records) => Ok(HttpResponse::Ok().json(records)),
        Err(e) => Ok(error_response(&e)),
    }
}

/// History exclusion toggle endpoint handler
async fn history_exclude_handler(
    app_state: web::Data<crate::AppState>,
    request: web::Json<ExcludeRequest>,
) -> ActixResult<HttpResponse> {
    match app_state.history.set_excluded(request.run_id, request.excluded) {
        Ok(record) => Ok(HttpResponse::Ok().json(record)),
        Err(e) => Ok(error_response(&e)),
    }
}

/// History artifact endpoint handler
async fn history_artifact_handler(
    app_state: web::Data<crate::AppState>,
    path: web::Path<Uuid>,
) -> ActixResult<HttpResponse> {
    match app_state.history.artifact(*path) {
        Ok(artifact) => Ok(HttpResponse::Ok().json(artifact)),
        Err(e) => Ok(error_response(&e)),
    }
}

/// Health check endpoint handler
async fn health_handler(app_state: web::Data<crate::AppState>) -> ActixResult<HttpResponse> {
    let history_status = match app_state.history.health_check() {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };
    let guidance_status = if app_state.guidance.read().await.document_count() > 0 {
        "healthy"
    } else {
        "empty"
    };
    let rules_status = if app_state.rules.read().await.rule_count() > 0 {
        "healthy"
    } else {
        "empty"
    };
    let spelling_status = if app_state.engine.spelling_active() {
        "active"
    } else {
        "inactive"
    };

    let response = HealthResponse {
        status: if history_status == "healthy" {
            "healthy".to_string()
        } else {
            "unhealthy".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: (chrono::Utc::now() - app_state.started_at).num_seconds().max(0) as u64,
        components: HealthComponents {
            history: history_status.to_string(),
            guidance: guidance_status.to_string(),
            rules: rules_status.to_string(),
            spelling: spelling_status.to_string(),
        },
    };
    Ok(HttpResponse::Ok().json(response))
}

/// Statistics endpoint handler
async fn stats_handler(app_state: web::Data<crate::AppState>) -> ActixResult<HttpResponse> {
    let history_stats = match app_state.history.stats() {
        Ok(stats) => serde_json::to_value(stats).unwrap_or_default(),
        Err(_) => serde_json::Value::Null,
    };
    let guidance = app_state.guidance.read().await;
    let response = serde_json::json!({
        "rules": app_state.rules.read().await.rule_count(),
        "guidance": {
            "documents": guidance.document_count(),
            "terms": guidance.term_count(),
        },
        "learning_contexts": app_state.learning.read().await.context_count(),
        "history": history_stats,
    });
    Ok(HttpResponse::Ok().json(response))
}

/// Index page handler
async fn index_handler() -> ActixResult<HttpResponse> {
    let html = r#"
    <!DOCTYPE html>
    <html>
    <head>
        <title>Design Audit Service</title>
        <style>
            body { font-family: Arial, sans-serif; margin: 40px; }
            .header { color: #2c3e50; }
            .endpoint { margin: 20px 0; padding: 15px; background: #f8f9fa; border-radius: 5px; }
            .method { font-weight: bold; color: #27ae60; }
        </style>
    </head>
    <body>
        <h1 class="header">Design Audit API</h1>
        <p>Rule-driven quality auditing for engineering drawings with guidance cross-referencing.</p>

        <h2>Available Endpoints</h2>

        <div class="endpoint">
            <span class="method">POST</span> /audit
            <p>Audit a drawing: metadata plus per-page extracted text.</p>
        </div>

        <div class="endpoint">
            <span class="method">POST</span> /feedback
            <p>Apply reviewer verdicts on findings.</p>
        </div>

        <div class="endpoint">
            <span class="method">GET/POST/DELETE</span> /rules
            <p>List, add, and remove custom rules.</p>
        </div>

        <div class="endpoint">
            <span class="method">POST</span> /guidance/rebuild, <span class="method">GET</span> /guidance/search?q=
            <p>Rebuild and probe the guidance index.</p>
        </div>

        <div class="endpoint">
            <span class="method">GET</span> /history, <span class="method">POST</span> /history/exclude
            <p>Browse audit history and toggle record exclusion.</p>
        </div>

        <h2>Example Audit Request</h2>
        <pre>{
  "file_name": "site-layout.pdf",
  "metadata": { "client": "BTEE", "project": "Power Resilience" },
  "pages": ["TITLE: Site Layout SCALE 1:500 ..."]
}</pre>
    </body>
    </html>
    "#;
    Ok(HttpResponse::Ok().content_type("text/html").body(html))
}
