//! Document listing and history endpoints

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::server::state::AppState;
use crate::types::{DocumentHistoryResponse, DocumentListResponse};

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub base_document_id: String,
}

/// GET /api/documents - latest version of every document
pub async fn list_documents(State(state): State<AppState>) -> Result<Json<DocumentListResponse>> {
    Ok(Json(state.query().all_documents()?))
}

/// GET /api/documents/history?base_document_id=..
pub async fn document_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<DocumentHistoryResponse>> {
    let history = state.query().history(&query.base_document_id)?;
    if history.versions.is_empty() {
        return Err(Error::DocumentNotFound(query.base_document_id));
    }
    Ok(Json(history))
}
