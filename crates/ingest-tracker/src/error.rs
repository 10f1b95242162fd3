//! Error types for the ingest tracker

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::driver::DriverError;

/// Result type alias for tracker operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ingest tracker errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Tracking store could not be reached. Soft: only observability degrades.
    #[error("Tracking unavailable: {0}")]
    TrackingUnavailable(String),

    /// Absolute progress report outside `0..=total_units`
    #[error("Invalid progress for '{document_id}': {indexed_units} exceeds total {total_units}")]
    InvalidProgress {
        document_id: String,
        indexed_units: u32,
        total_units: u32,
    },

    /// A version record with the same document id already exists
    #[error("Document version already tracked: {0}")]
    DuplicateVersion(String),

    /// Inbound notification failed schema validation
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Document not found
    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    /// Extraction job driver error
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// Notification bus error
    #[error("Notification error: {0}")]
    Notification(String),

    /// Blob store error
    #[error("Blob store error: {0}")]
    BlobStore(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a tracking-unavailable error
    pub fn tracking(message: impl Into<String>) -> Self {
        Self::TrackingUnavailable(message.into())
    }

    /// Create a malformed-message error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedMessage(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether the error only degrades observability and must not fail ingestion
    pub fn is_soft(&self) -> bool {
        matches!(self, Error::TrackingUnavailable(_) | Error::Notification(_))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::TrackingUnavailable(err.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            Error::Config(msg) => (StatusCode::BAD_REQUEST, "config_error", msg.clone()),
            Error::TrackingUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "tracking_unavailable",
                msg.clone(),
            ),
            Error::InvalidProgress { .. } => {
                (StatusCode::BAD_REQUEST, "invalid_progress", self.to_string())
            }
            Error::DuplicateVersion(id) => (
                StatusCode::CONFLICT,
                "duplicate_version",
                format!("Document version already tracked: {}", id),
            ),
            Error::MalformedMessage(msg) => {
                (StatusCode::BAD_REQUEST, "malformed_message", msg.clone())
            }
            Error::DocumentNotFound(id) => (
                StatusCode::NOT_FOUND,
                "not_found",
                format!("Document not found: {}", id),
            ),
            Error::Driver(err) => (StatusCode::BAD_GATEWAY, err.kind(), err.to_string()),
            Error::Notification(msg) => {
                (StatusCode::BAD_GATEWAY, "notification_error", msg.clone())
            }
            Error::BlobStore(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "blob_store_error", msg.clone())
            }
            Error::Io(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "io_error",
                err.to_string(),
            ),
            Error::Json(err) => (StatusCode::BAD_REQUEST, "json_error", err.to_string()),
            Error::Http(err) => (StatusCode::BAD_GATEWAY, "http_error", err.to_string()),
            Error::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg.clone())
            }
        };

        let body = Json(json!({
            "error": {
                "type": error_type,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}
