//! API routes for the tracker server

pub mod documents;
pub mod extractions;
pub mod notifications;
pub mod status;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use crate::error::Result;
use crate::server::state::AppState;

/// Build all API routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Status queries: identity by query string, body, or path
        .route(
            "/status",
            get(status::status_by_query).post(status::status_by_body),
        )
        .route("/status/*identity", get(status::status_by_path))
        // Documents
        .route("/documents", get(documents::list_documents))
        .route("/documents/history", get(documents::document_history))
        // Lifecycle intake
        .route("/notifications", post(notifications::ingest_notifications))
        .route("/progress/reconcile", post(notifications::reconcile_progress))
        // Extraction jobs
        .route(
            "/extractions",
            get(extractions::list_extractions).post(extractions::submit_extraction),
        )
        .route("/extractions/:id", get(extractions::get_extraction))
        // Maintenance
        .route("/maintenance/purge", post(purge_expired))
        // Info
        .route("/info", get(info))
}

/// POST /api/maintenance/purge - drop versions past retention
async fn purge_expired(State(state): State<AppState>) -> Result<Json<Value>> {
    let purged = state.tracker().purge_expired()?;
    Ok(Json(json!({ "purged": purged })))
}

/// API info endpoint
async fn info(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "name": "ingest-tracker",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Document version tracking and progress aggregation for ingestion pipelines",
        "tracking_store": state.store().name(),
        "blob_store": state.blobs().name(),
        "endpoints": {
            "GET /api/status?identity=..&use_base_id=..": "Status of a document or version",
            "POST /api/status": "Status lookup with identity in the body",
            "GET /api/status/*identity": "Status lookup with identity in the path",
            "GET /api/documents": "Latest version of every document",
            "GET /api/documents/history?base_document_id=..": "All versions of a document",
            "POST /api/notifications": "Replay lifecycle messages into the tracker",
            "POST /api/progress/reconcile": "Repair a progress counter with an absolute count",
            "POST /api/extractions": "Queue a document for text extraction",
            "GET /api/extractions": "List extraction jobs and queue stats",
            "GET /api/extractions/:id": "Extraction job progress",
            "POST /api/maintenance/purge": "Delete versions past retention"
        },
        "subjects": {
            "inbound": ["processing.started", "unit.indexed", "processing.completed"],
            "outbound": [
                "document.started",
                "document.superseded",
                "document.progress",
                "document.completed"
            ]
        }
    }))
}
