//! API Service - upload endpoint and ledger views for mite monitoring
//!
//! Endpoints:
//! - GET /health - Health check
//! - POST /uploads?filename=&user= - Ingest the request body as a .csv/.xlsx file
//! - GET /uploads?limit= - Most recent upload records
//! - GET /uploads/:id - One upload record

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use ingest::store::PgStore;
use ingest::validate::{display_errors, Rejection};
use ingest::{CancellationToken, Config, IngestError, IngestOutcome, IngestRequest, Ingestor};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

// ============================================================================
// State
// ============================================================================

#[derive(Clone)]
struct AppState {
    ingestor: Ingestor,
    error_display_limit: usize,
}

// ============================================================================
// Request / response types
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: &'static str,
}

#[derive(Deserialize)]
struct UploadQuery {
    filename: String,
    user: Option<String>,
}

#[derive(Deserialize)]
struct ListQuery {
    limit: Option<i64>,
}

#[derive(Serialize)]
struct UploadResponse<'a> {
    upload_id: Uuid,
    outcome: IngestOutcome,
    total: usize,
    valid: usize,
    rejected: usize,
    uploaded: usize,
    errors: &'a [Rejection],
    errors_not_shown: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, error: impl ToString) -> axum::response::Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

fn ingest_error_status(err: &IngestError) -> StatusCode {
    match err {
        e if e.is_unsupported_file_type() => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        IngestError::Decode(_) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: "0.1.0",
    })
}

async fn upload_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UploadQuery>,
    body: Bytes,
) -> impl IntoResponse {
    let request = IngestRequest {
        user_id: params.user.unwrap_or_else(|| "anonymous".to_string()),
        filename: params.filename,
        bytes: body.to_vec(),
    };
    info!(filename = %request.filename, size = request.bytes.len(), "upload received");

    let result = state
        .ingestor
        .ingest(request, &mut |_| {}, &CancellationToken::new())
        .await;

    match result {
        Ok(summary) => {
            let (shown, rest) = display_errors(&summary.errors, state.error_display_limit);
            Json(UploadResponse {
                upload_id: summary.upload_id,
                outcome: summary.outcome,
                total: summary.total,
                valid: summary.valid,
                rejected: summary.rejected,
                uploaded: summary.uploaded,
                errors: shown,
                errors_not_shown: rest,
            })
            .into_response()
        }
        Err(e) => {
            warn!(error = %e, "upload failed");
            error_response(ingest_error_status(&e), e)
        }
    }
}

async fn list_uploads_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListQuery>,
) -> impl IntoResponse {
    let limit = params.limit.unwrap_or(50).clamp(1, 500);

    match state.ingestor.ledger().list_upload_records(limit).await {
        Ok(records) => Json(serde_json::json!({ "uploads": records })).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn get_upload_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.ingestor.ledger().get_upload_record(id).await {
        Ok(Some(record)) => Json(record).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "Upload not found"),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

fn app(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    // CORS for the admin frontend
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/uploads", get(list_uploads_handler).post(upload_handler))
        .route("/uploads/:id", get(get_upload_handler))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;

    println!("=== Monitoreo de Ácaros API ===");
    println!("Connecting to database...");

    let store = PgStore::connect(&config.db_url, config.db_max_connections)
        .await
        .context("Failed to connect to database")?;

    println!("Database connected");

    let state = Arc::new(AppState {
        ingestor: Ingestor::new(Arc::new(store)).with_batch_size(config.batch_size),
        error_display_limit: config.error_display_limit,
    });

    let app = app(state, config.max_upload_bytes);

    println!("API listening on http://{}", config.api_bind);
    println!("\nEndpoints:");
    println!("  GET  /health");
    println!("  POST /uploads?filename=&user=");
    println!("  GET  /uploads?limit=");
    println!("  GET  /uploads/:id");

    let listener = tokio::net::TcpListener::bind(&config.api_bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest::error::DecodeError;
    use ingest::store::StoreError;

    #[test]
    fn test_ingest_error_status() {
        let unsupported = IngestError::Decode(DecodeError::UnsupportedFileType("a.pdf".into()));
        assert_eq!(ingest_error_status(&unsupported), StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let corrupt = IngestError::Decode(DecodeError::Workbook("bad zip".into()));
        assert_eq!(ingest_error_status(&corrupt), StatusCode::UNPROCESSABLE_ENTITY);

        let batch = IngestError::Batch {
            batch: 1,
            uploaded: 0,
            source: StoreError::Rejected("down".into()),
        };
        assert_eq!(ingest_error_status(&batch), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
