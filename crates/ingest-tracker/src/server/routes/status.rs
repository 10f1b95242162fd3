//! Status query endpoints

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::server::state::AppState;
use crate::types::DocumentStatusResponse;

/// Identity supplied in the query string or body
#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub identity: String,
    #[serde(default)]
    pub use_base_id: bool,
}

#[derive(Debug, Deserialize)]
pub struct BaseFlag {
    #[serde(default)]
    pub use_base_id: bool,
}

/// GET /api/status?identity=..&use_base_id=..
pub async fn status_by_query(
    State(state): State<AppState>,
    Query(request): Query<StatusRequest>,
) -> Result<Json<DocumentStatusResponse>> {
    lookup(&state, &request.identity, request.use_base_id)
}

/// POST /api/status
pub async fn status_by_body(
    State(state): State<AppState>,
    Json(request): Json<StatusRequest>,
) -> Result<Json<DocumentStatusResponse>> {
    lookup(&state, &request.identity, request.use_base_id)
}

/// GET /api/status/*identity
pub async fn status_by_path(
    State(state): State<AppState>,
    Path(identity): Path<String>,
    Query(flag): Query<BaseFlag>,
) -> Result<Json<DocumentStatusResponse>> {
    lookup(&state, &identity, flag.use_base_id)
}

fn lookup(
    state: &AppState,
    identity: &str,
    use_base_id: bool,
) -> Result<Json<DocumentStatusResponse>> {
    if identity.trim().is_empty() {
        return Err(Error::malformed("identity must not be empty"));
    }
    let response = state.query().status(identity, use_base_id)?;
    Ok(Json(response))
}
