use actix_web::{web, HttpResponse, Responder};
use std::sync::{Arc, Mutex};
use uuid::Uuid;
use validator::Validate;

use crate::core::{CancelFlag, EngineError, MatchingEngine, SweepOptions};
use crate::models::{
    DecisionRequest, ErrorResponse, ExplainRequest, HealthResponse, LenderId, MatchId,
    MatchListResponse, Party, ProjectId, ScopeQuery, SweepRequest,
};
use crate::services::PgRepository;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: MatchingEngine,
    /// Present when running against PostgreSQL, for health reporting
    pub database: Option<PgRepository>,
    /// Cancel handle of the sweep currently running, if any
    pub running_sweep: Arc<Mutex<Option<CancelFlag>>>,
}

impl AppState {
    pub fn new(engine: MatchingEngine, database: Option<PgRepository>) -> Self {
        Self {
            engine,
            database,
            running_sweep: Arc::new(Mutex::new(None)),
        }
    }
}

/// Configure all match-related routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        .route("/health", web::get().to(health_check))
        .route("/matches", web::get().to(list_matches))
        .route("/matches/sweep", web::post().to(run_sweep))
        .route("/matches/sweep/cancel", web::post().to(cancel_sweep))
        .route("/matches/explain", web::post().to(explain))
        .route("/matches/{id}/decision", web::post().to(decide))
        .route("/projects/{id}/matches", web::post().to(generate_for_project))
        .route("/dashboard", web::get().to(dashboard));
}

const SCOPE_REQUIRED: &str = "exactly one of projectId or lenderId is required";

fn error_body(status: u16, error: &str, message: String) -> ErrorResponse {
    ErrorResponse {
        error: error.to_string(),
        message,
        status_code: status,
    }
}

fn bad_request(error: &str, message: String) -> HttpResponse {
    HttpResponse::BadRequest().json(error_body(400, error, message))
}

/// Map engine failures onto HTTP statuses
fn engine_error(err: EngineError) -> HttpResponse {
    match &err {
        EngineError::Validation(_) => bad_request("validation_failed", err.to_string()),
        EngineError::InvalidTransition { .. } => {
            HttpResponse::Conflict().json(error_body(409, "invalid_transition", err.to_string()))
        }
        EngineError::Conflict { .. } | EngineError::ActiveMatchExists { .. } => {
            HttpResponse::Conflict().json(error_body(409, "conflict", err.to_string()))
        }
        EngineError::NotFound(_) => {
            HttpResponse::NotFound().json(error_body(404, "not_found", err.to_string()))
        }
        EngineError::UpstreamUnavailable(_) => {
            tracing::error!(error = %err, "repository unavailable");
            HttpResponse::ServiceUnavailable().json(error_body(
                503,
                "upstream_unavailable",
                err.to_string(),
            ))
        }
    }
}

/// Health check endpoint
async fn health_check(state: web::Data<AppState>) -> impl Responder {
    let healthy = match &state.database {
        Some(db) => db.health_check().await.unwrap_or(false),
        None => true,
    };

    let status = if healthy { "healthy" } else { "degraded" };

    HttpResponse::Ok().json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
    })
}

/// Registration of the running sweep, released when dropped
///
/// Held across the sweep so the registry is cleared on every exit path,
/// including a dropped request future.
struct SweepSlot {
    registry: Arc<Mutex<Option<CancelFlag>>>,
}

impl SweepSlot {
    /// `Ok(None)` when another sweep already holds the registry
    fn claim(
        registry: &Arc<Mutex<Option<CancelFlag>>>,
        cancel: &CancelFlag,
    ) -> Result<Option<Self>, ()> {
        let mut running = registry.lock().map_err(|_| ())?;
        if running.is_some() {
            return Ok(None);
        }
        *running = Some(cancel.clone());
        Ok(Some(Self {
            registry: Arc::clone(registry),
        }))
    }
}

impl Drop for SweepSlot {
    fn drop(&mut self) {
        let mut running = match self.registry.lock() {
            Ok(running) => running,
            Err(poisoned) => poisoned.into_inner(),
        };
        *running = None;
    }
}

/// Run a full matching sweep
///
/// POST /api/v1/matches/sweep
///
/// Request body:
/// ```json
/// { "resumeAfter": "project-id" }
/// ```
async fn run_sweep(state: web::Data<AppState>, req: web::Json<SweepRequest>) -> HttpResponse {
    if let Err(errors) = req.validate() {
        return bad_request("validation_failed", errors.to_string());
    }

    let cancel = CancelFlag::new();
    let _slot = match SweepSlot::claim(&state.running_sweep, &cancel) {
        Ok(Some(slot)) => slot,
        Ok(None) => {
            return HttpResponse::Conflict().json(error_body(
                409,
                "sweep_running",
                "a sweep is already running".to_string(),
            ))
        }
        Err(()) => {
            return HttpResponse::ServiceUnavailable().json(error_body(
                503,
                "state_unavailable",
                "sweep registry is unavailable".to_string(),
            ))
        }
    };

    let options = SweepOptions {
        resume_after: req.resume_after.clone().map(ProjectId),
        cancel,
    };

    match state.engine.sweep(options).await {
        Ok(report) => HttpResponse::Ok().json(report),
        Err(err) => engine_error(err),
    }
}

/// Ask the running sweep to stop after the pair it is on
async fn cancel_sweep(state: web::Data<AppState>) -> impl Responder {
    let running = match state.running_sweep.lock() {
        Ok(running) => running.clone(),
        Err(_) => None,
    };

    match running {
        Some(flag) => {
            flag.cancel();
            tracing::info!("sweep cancellation requested");
            HttpResponse::Accepted().json(serde_json::json!({ "cancelled": true }))
        }
        None => HttpResponse::NotFound().json(error_body(
            404,
            "not_found",
            "no sweep is running".to_string(),
        )),
    }
}

/// Explain how a project fares against one lender
///
/// POST /api/v1/matches/explain
async fn explain(state: web::Data<AppState>, req: web::Json<ExplainRequest>) -> impl Responder {
    if let Err(errors) = req.validate() {
        return bad_request("validation_failed", errors.to_string());
    }

    let project_id = ProjectId(req.project_id.clone());
    let lender_id = LenderId(req.lender_id.clone());

    match state.engine.explain(&project_id, &lender_id).await {
        Ok(evaluation) => HttpResponse::Ok().json(evaluation),
        Err(err) => engine_error(err),
    }
}

/// Active matches for a project or a lender
///
/// GET /api/v1/matches?projectId=... or ?lenderId=...
async fn list_matches(state: web::Data<AppState>, query: web::Query<ScopeQuery>) -> impl Responder {
    let Some(scope) = query.scope() else {
        return bad_request("invalid_query", SCOPE_REQUIRED.to_string());
    };

    match state.engine.matches_for(&scope).await {
        Ok(matches) => {
            let total_results = matches.len();
            HttpResponse::Ok().json(MatchListResponse { matches, total_results })
        }
        Err(err) => engine_error(err),
    }
}

/// Mediator decision or withdrawal
///
/// POST /api/v1/matches/{id}/decision
///
/// Request body:
/// ```json
/// { "decision": "approve|reject|withdraw", "party": "borrower|lender" }
/// ```
async fn decide(
    state: web::Data<AppState>,
    path: web::Path<String>,
    req: web::Json<DecisionRequest>,
) -> impl Responder {
    if let Err(errors) = req.validate() {
        return bad_request("validation_failed", errors.to_string());
    }

    let id = match Uuid::parse_str(&path.into_inner()) {
        Ok(id) => MatchId(id),
        Err(e) => return bad_request("invalid_match_id", e.to_string()),
    };

    let lifecycle = state.engine.lifecycle();
    let result = match req.decision.to_lowercase().as_str() {
        "approve" => lifecycle.approve(id).await,
        "reject" => lifecycle.reject(id).await,
        "withdraw" => {
            let party = match req.party.as_deref().map(str::to_lowercase).as_deref() {
                Some("borrower") => Party::Borrower,
                Some("lender") => Party::Lender,
                _ => {
                    return bad_request(
                        "invalid_party",
                        "withdraw requires party: borrower or lender".to_string(),
                    )
                }
            };
            lifecycle.withdraw(id, party).await
        }
        _ => {
            return bad_request(
                "invalid_decision",
                "decision must be one of: approve, reject, withdraw".to_string(),
            )
        }
    };

    match result {
        Ok(updated) => HttpResponse::Ok().json(updated),
        Err(err) => engine_error(err),
    }
}

/// Generate matches for one project now
///
/// POST /api/v1/projects/{id}/matches
async fn generate_for_project(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let project_id = ProjectId(path.into_inner());

    match state.engine.generate_for_project(&project_id).await {
        Ok(result) => HttpResponse::Ok().json(result),
        Err(err) => engine_error(err),
    }
}

/// Dashboard counts for a project or a lender
///
/// GET /api/v1/dashboard?projectId=... or ?lenderId=...
async fn dashboard(state: web::Data<AppState>, query: web::Query<ScopeQuery>) -> impl Responder {
    let Some(scope) = query.scope() else {
        return bad_request("invalid_query", SCOPE_REQUIRED.to_string());
    };

    match state.engine.summary_for(scope).await {
        Ok(summary) => HttpResponse::Ok().json(summary),
        Err(err) => engine_error(err),
    }
}
