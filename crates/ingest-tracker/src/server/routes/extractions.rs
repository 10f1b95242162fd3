//! Extraction job endpoints

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::processing::{ExtractionProgress, ExtractionRequest, QueueStats};
use crate::server::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SubmitExtraction {
    pub bucket: String,
    pub key: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub id: Uuid,
    pub message: String,
}

/// POST /api/extractions - queue a document for text extraction
pub async fn submit_extraction(
    State(state): State<AppState>,
    Json(request): Json<SubmitExtraction>,
) -> Result<Json<SubmitResponse>> {
    let id = state
        .extraction_queue()
        .submit(ExtractionRequest::new(request.bucket, request.key))
        .await?;

    Ok(Json(SubmitResponse {
        id,
        message: format!("Extraction queued. Poll /api/extractions/{} for progress.", id),
    }))
}

#[derive(Debug, Serialize)]
pub struct ExtractionListResponse {
    pub extractions: Vec<ExtractionProgress>,
    pub stats: QueueStats,
}

/// GET /api/extractions
pub async fn list_extractions(State(state): State<AppState>) -> Json<ExtractionListResponse> {
    let queue = state.extraction_queue();
    Json(ExtractionListResponse {
        extractions: queue.list(),
        stats: queue.stats(),
    })
}

/// GET /api/extractions/:id
pub async fn get_extraction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ExtractionProgress>> {
    state
        .extraction_queue()
        .get(id)
        .map(Json)
        .ok_or_else(|| Error::DocumentNotFound(format!("extraction {}", id)))
}
