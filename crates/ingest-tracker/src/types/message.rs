//! Lifecycle message schemas
//!
//! Inbound messages arrive from the notification bus as `{subject, payload}`
//! envelopes. Each known subject has its own payload schema; payloads that do
//! not match are rejected per message instead of being filled with defaults.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::types::record::{DocumentVersionRecord, TrackingStatus};

/// Subject of a processing-started message
pub const SUBJECT_STARTED: &str = "processing.started";
/// Subject of a unit-indexed message
pub const SUBJECT_UNIT_INDEXED: &str = "unit.indexed";
/// Subject of a processing-completed message
pub const SUBJECT_COMPLETED: &str = "processing.completed";

/// Raw inbound envelope as delivered by the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Bus-assigned id, echoed back in per-message results only
    #[serde(default)]
    pub message_id: Option<String>,
    pub subject: String,
    #[serde(default)]
    pub payload: Value,
}

impl InboundMessage {
    pub fn new(subject: impl Into<String>, payload: Value) -> Self {
        Self {
            message_id: None,
            subject: subject.into(),
            payload,
        }
    }
}

/// A new document version entered the indexing stages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartedPayload {
    pub base_document_id: String,
    pub document_name: String,
    pub total_units: u32,
    /// Explicit version tag; derived from `upload_timestamp` when absent
    #[serde(default)]
    pub document_version: Option<String>,
    #[serde(default)]
    pub upload_timestamp: Option<DateTime<Utc>>,
}

/// One derived unit finished indexing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnitIndexedPayload {
    pub document_id: String,
    /// Position of the unit within the document, for logging only
    #[serde(default)]
    pub unit_index: Option<u32>,
    /// Producer-side `"indexed/total"` view, for logging only
    #[serde(default)]
    pub progress: Option<String>,
}

/// The pipeline believes a document version is done
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompletedPayload {
    pub document_id: String,
}

/// Validated inbound lifecycle message
#[derive(Debug, Clone)]
pub enum LifecycleMessage {
    Started(StartedPayload),
    UnitIndexed(UnitIndexedPayload),
    Completed(CompletedPayload),
    /// Subject this build does not know about
    Unrecognized(String),
}

impl LifecycleMessage {
    /// Validate an inbound envelope against the schema of its subject
    pub fn parse(message: &InboundMessage) -> Result<Self> {
        let parsed = match message.subject.as_str() {
            SUBJECT_STARTED => {
                let payload: StartedPayload = decode(&message.subject, &message.payload)?;
                require_non_empty("base_document_id", &payload.base_document_id)?;
                require_non_empty("document_name", &payload.document_name)?;
                // identity must be derivable from the message alone
                if payload.document_version.is_none() && payload.upload_timestamp.is_none() {
                    return Err(Error::malformed(
                        "processing.started needs document_version or upload_timestamp",
                    ));
                }
                if let Some(version) = &payload.document_version {
                    require_non_empty("document_version", version)?;
                }
                LifecycleMessage::Started(payload)
            }
            SUBJECT_UNIT_INDEXED => {
                let payload: UnitIndexedPayload = decode(&message.subject, &message.payload)?;
                require_non_empty("document_id", &payload.document_id)?;
                LifecycleMessage::UnitIndexed(payload)
            }
            SUBJECT_COMPLETED => {
                let payload: CompletedPayload = decode(&message.subject, &message.payload)?;
                require_non_empty("document_id", &payload.document_id)?;
                LifecycleMessage::Completed(payload)
            }
            other => LifecycleMessage::Unrecognized(other.to_string()),
        };
        Ok(parsed)
    }
}

fn decode<T: serde::de::DeserializeOwned>(subject: &str, payload: &Value) -> Result<T> {
    serde_json::from_value(payload.clone())
        .map_err(|e| Error::malformed(format!("{} payload: {}", subject, e)))
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::malformed(format!("{} must not be empty", field)));
    }
    Ok(())
}

/// Domain notifications republished by the relay
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainNotification {
    DocumentStarted {
        document_id: String,
        base_document_id: String,
        document_name: String,
        total_units: u32,
    },
    DocumentSuperseded {
        document_id: String,
        base_document_id: String,
        superseded_by: String,
    },
    DocumentProgress {
        document_id: String,
        indexed_units: u32,
        total_units: u32,
    },
    DocumentCompleted {
        document_id: String,
        base_document_id: String,
        total_units: u32,
        completion_time: DateTime<Utc>,
    },
}

impl DomainNotification {
    /// Bus subject the notification is published under
    pub fn subject(&self) -> &'static str {
        match self {
            DomainNotification::DocumentStarted { .. } => "document.started",
            DomainNotification::DocumentSuperseded { .. } => "document.superseded",
            DomainNotification::DocumentProgress { .. } => "document.progress",
            DomainNotification::DocumentCompleted { .. } => "document.completed",
        }
    }

    pub fn document_id(&self) -> &str {
        match self {
            DomainNotification::DocumentStarted { document_id, .. }
            | DomainNotification::DocumentSuperseded { document_id, .. }
            | DomainNotification::DocumentProgress { document_id, .. }
            | DomainNotification::DocumentCompleted { document_id, .. } => document_id,
        }
    }

    pub fn started(record: &DocumentVersionRecord) -> Self {
        DomainNotification::DocumentStarted {
            document_id: record.document_id.clone(),
            base_document_id: record.base_document_id.clone(),
            document_name: record.document_name.clone(),
            total_units: record.total_units,
        }
    }

    pub fn progress(record: &DocumentVersionRecord) -> Self {
        DomainNotification::DocumentProgress {
            document_id: record.document_id.clone(),
            indexed_units: record.indexed_units,
            total_units: record.total_units,
        }
    }

    /// Completion notification; `None` unless the record is `COMPLETED`
    pub fn completed(record: &DocumentVersionRecord) -> Option<Self> {
        if record.status != TrackingStatus::Completed {
            return None;
        }
        record.completion_time.map(|completion_time| DomainNotification::DocumentCompleted {
            document_id: record.document_id.clone(),
            base_document_id: record.base_document_id.clone(),
            total_units: record.total_units,
            completion_time,
        })
    }
}
