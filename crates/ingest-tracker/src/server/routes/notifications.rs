//! Inbound lifecycle notifications and progress repair

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::server::state::AppState;
use crate::tracking::ProgressOutcome;
use crate::types::{BatchReport, InboundMessage, VersionSummary};

/// A batch is either a bare array or `{"messages": [...]}`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum NotificationBatch {
    Wrapped { messages: Vec<InboundMessage> },
    Bare(Vec<InboundMessage>),
}

impl NotificationBatch {
    fn into_messages(self) -> Vec<InboundMessage> {
        match self {
            NotificationBatch::Wrapped { messages } | NotificationBatch::Bare(messages) => messages,
        }
    }
}

/// POST /api/notifications - replay lifecycle messages into the tracker.
///
/// Always 200; per-message failures are in the report.
pub async fn ingest_notifications(
    State(state): State<AppState>,
    Json(batch): Json<NotificationBatch>,
) -> Json<BatchReport> {
    let report = state.relay().process_batch(batch.into_messages()).await;
    Json(report)
}

#[derive(Debug, Deserialize)]
pub struct ReconcileRequest {
    pub document_id: String,
    pub indexed_units: u32,
}

#[derive(Debug, Serialize)]
pub struct ReconcileResponse {
    pub document_id: String,
    /// `applied` or `already_accounted`
    pub outcome: &'static str,
    pub completed_now: bool,
    pub document: Option<VersionSummary>,
}

/// POST /api/progress/reconcile - set an absolute indexed count
pub async fn reconcile_progress(
    State(state): State<AppState>,
    Json(request): Json<ReconcileRequest>,
) -> Result<Json<ReconcileResponse>> {
    let outcome = state
        .relay()
        .reconcile_progress(&request.document_id, request.indexed_units)
        .await?;

    let (label, completed_now, document) = match &outcome {
        ProgressOutcome::Applied {
            record,
            completed_now,
        } => ("applied", *completed_now, Some(VersionSummary::from(record))),
        ProgressOutcome::AlreadyAccounted { .. } | ProgressOutcome::NotReady { .. } => {
            let current = state.tracker().get_record(&request.document_id)?;
            ("already_accounted", false, current.as_ref().map(VersionSummary::from))
        }
        ProgressOutcome::Untracked { document_id } => {
            return Err(Error::DocumentNotFound(document_id.clone()));
        }
    };

    Ok(Json(ReconcileResponse {
        document_id: request.document_id,
        outcome: label,
        completed_now,
        document,
    }))
}
