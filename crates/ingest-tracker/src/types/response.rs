//! Response types for status queries and notification intake

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::record::{DocumentVersionRecord, TrackingStatus};

/// Status reported to external callers. Adds `NotFound` to the record states.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryStatus {
    Processing,
    Completed,
    Cancelled,
    NotFound,
}

impl From<TrackingStatus> for QueryStatus {
    fn from(status: TrackingStatus) -> Self {
        match status {
            TrackingStatus::Processing => QueryStatus::Processing,
            TrackingStatus::Completed => QueryStatus::Completed,
            TrackingStatus::Cancelled => QueryStatus::Cancelled,
        }
    }
}

/// Display view of one document version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionSummary {
    pub document_id: String,
    pub base_document_id: String,
    pub document_name: String,
    pub document_version: String,
    pub status: TrackingStatus,
    pub indexed_units: u32,
    pub total_units: u32,
    /// `"indexed/total"`
    pub progress: String,
    pub percent_complete: f32,
    pub upload_timestamp: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
    pub completion_time: Option<DateTime<Utc>>,
}

impl From<&DocumentVersionRecord> for VersionSummary {
    fn from(record: &DocumentVersionRecord) -> Self {
        Self {
            document_id: record.document_id.clone(),
            base_document_id: record.base_document_id.clone(),
            document_name: record.document_name.clone(),
            document_version: record.document_version.clone(),
            status: record.status,
            indexed_units: record.indexed_units,
            total_units: record.total_units,
            progress: record.progress_label(),
            percent_complete: record.percent_complete(),
            upload_timestamp: record.upload_timestamp,
            start_time: record.start_time,
            completion_time: record.completion_time,
        }
    }
}

/// Answer to a status query for one document identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentStatusResponse {
    /// Identity as supplied by the caller
    pub identity: String,
    /// Whether `identity` was treated as a base document id
    pub use_base_id: bool,
    pub status: QueryStatus,
    /// The version the status refers to
    pub document: Option<VersionSummary>,
    /// Sibling versions still `PROCESSING`
    pub processing_versions: usize,
    /// All versions known for the base document
    pub total_versions: usize,
    /// Most recent versions, newest first
    pub history: Vec<VersionSummary>,
}

impl DocumentStatusResponse {
    pub fn not_found(identity: impl Into<String>, use_base_id: bool) -> Self {
        Self {
            identity: identity.into(),
            use_base_id,
            status: QueryStatus::NotFound,
            document: None,
            processing_versions: 0,
            total_versions: 0,
            history: Vec::new(),
        }
    }
}

/// Latest version of every tracked document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentListResponse {
    pub documents: Vec<VersionSummary>,
    pub total_documents: usize,
    pub processing: usize,
    pub completed: usize,
    pub cancelled: usize,
}

/// Full version history of one base document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentHistoryResponse {
    pub base_document_id: String,
    pub versions: Vec<VersionSummary>,
}

/// Outcome of a single message in a relay batch
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageOutcome {
    /// Tracker state changed
    Applied,
    /// Already accounted for; the store was left unchanged
    Duplicate,
    /// Unknown subject or untracked document; handled without effect
    Ignored,
    /// Validation or store failure for this message only
    Failed,
}

impl MessageOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, MessageOutcome::Failed)
    }
}

/// Per-message result reported back to the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResult {
    pub index: usize,
    pub message_id: Option<String>,
    pub subject: String,
    pub outcome: MessageOutcome,
    pub document_id: Option<String>,
    pub error: Option<String>,
}

/// Batch-level relay report. Never an error, whatever the message outcomes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<MessageResult>,
}

impl BatchReport {
    pub fn push(&mut self, result: MessageResult) {
        self.processed += 1;
        if result.outcome.is_success() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.results.push(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_report_counts() {
        let mut report = BatchReport::default();
        for (index, outcome) in [
            MessageOutcome::Applied,
            MessageOutcome::Failed,
            MessageOutcome::Ignored,
            MessageOutcome::Duplicate,
        ]
        .into_iter()
        .enumerate()
        {
            report.push(MessageResult {
                index,
                message_id: None,
                subject: "unit.indexed".to_string(),
                outcome,
                document_id: None,
                error: None,
            });
        }

        assert_eq!(report.processed, 4);
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.failed, 1);
    }

    #[test]
    fn test_not_found_serializes_screaming_case() {
        let response = DocumentStatusResponse::not_found("doc/missing.pdf", true);
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["status"], "NOT_FOUND");
        assert!(value["document"].is_null());
    }
}
