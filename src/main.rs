use actix_cors::Cors;
use actix_web::{error, http::StatusCode, middleware, web, App, HttpResponse, HttpServer};
use lendmatch::config::{LoggingSettings, Settings};
use lendmatch::core::MatchingEngine;
use lendmatch::routes::{self, AppState};
use lendmatch::services::{InMemoryBackend, PgRepository, Repositories, SeedData, TracingNotifier};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// JSON error response for JSON payload errors
#[derive(Debug, serde::Serialize)]
pub struct JsonError {
    pub error: String,
    pub message: String,
    pub status_code: u16,
}

impl std::fmt::Display for JsonError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error, self.message)
    }
}

impl std::error::Error for JsonError {}

impl error::ResponseError for JsonError {
    fn error_response(&self) -> HttpResponse {
        let status = StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::BAD_REQUEST);
        HttpResponse::build(status).json(self)
    }
}

/// Handle JSON payload errors
pub fn handle_json_payload_error(
    err: error::JsonPayloadError,
    req: &actix_web::HttpRequest,
) -> actix_web::Error {
    tracing::info!(path = req.path(), error = %err, "JSON payload error");
    JsonError {
        error: "invalid_json".to_string(),
        message: format!("Invalid JSON: {}", err),
        status_code: 400,
    }
    .into()
}

/// Handle query payload errors
pub fn handle_query_payload_error(
    err: error::QueryPayloadError,
    _req: &actix_web::HttpRequest,
) -> actix_web::Error {
    JsonError {
        error: "invalid_query".to_string(),
        message: format!("Invalid query: {}", err),
        status_code: 400,
    }
    .into()
}

/// Handle path segment errors
pub fn handle_path_error(err: error::PathError, _req: &actix_web::HttpRequest) -> actix_web::Error {
    JsonError {
        error: "invalid_path".to_string(),
        message: format!("Invalid path: {}", err),
        status_code: 400,
    }
    .into()
}

fn init_logging(logging: &LoggingSettings) {
    // RUST_LOG wins over the configured level
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true);

    if logging.format == "pretty" {
        subscriber.pretty().init();
    } else {
        subscriber.json().init();
    }
}

async fn build_repositories(
    settings: &Settings,
) -> std::io::Result<(Repositories, Option<PgRepository>)> {
    let notifier = Arc::new(TracingNotifier);

    if let Some(db) = &settings.database {
        let max_connections = db.max_connections.unwrap_or(10);
        let repo = PgRepository::connect(
            &db.url,
            max_connections,
            db.min_connections.unwrap_or(1),
            db.acquire_timeout(),
        )
        .await
        .map_err(|e| {
            error!(error = %e, "failed to connect to PostgreSQL");
            std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
        })?;

        info!(max_connections, "using PostgreSQL repositories");
        let shared = Arc::new(repo.clone());
        let repos = Repositories {
            projects: shared.clone(),
            criteria: shared.clone(),
            matches: shared,
            notifier,
        };
        return Ok((repos, Some(repo)));
    }

    let backend = InMemoryBackend::new();
    if let Some(path) = &settings.matching.seed_file {
        SeedData::load(path)
            .and_then(|seed| seed.apply(&backend))
            .map_err(|e| {
                error!(error = %e, "failed to load seed data");
                std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
            })?;
    }

    info!("no database configured, using in-memory repositories");
    Ok((backend.repositories(notifier), None))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenv::dotenv().ok();

    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()));
        }
    };

    init_logging(&settings.logging);
    info!("Starting lendmatch matching service...");

    let weights = settings
        .matching
        .weights
        .to_weights()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;

    let (repos, database) = build_repositories(&settings).await?;
    let engine = MatchingEngine::new(repos, weights, settings.matching.workers);

    info!(
        weights = ?weights,
        sweep_workers = settings.matching.workers,
        "matching engine initialized"
    );

    let app_state = AppState::new(engine, database);

    // Configure HTTP server
    let host = settings.server.host.clone();
    let port = settings.server.port;
    let workers = settings.server.workers.unwrap_or(4);

    info!("Starting HTTP server on {}:{}", host, port);

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::JsonConfig::default().error_handler(handle_json_payload_error))
            .app_data(web::QueryConfig::default().error_handler(handle_query_payload_error))
            .app_data(web::PathConfig::default().error_handler(handle_path_error))
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .configure(routes::configure_routes)
    })
    .workers(workers)
    .bind((host, port))?
    .run()
    .await
}
