//! Document version records kept by the tracking store

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Lifecycle status of a document version.
///
/// Only two transitions exist: `Processing -> Completed` and
/// `Processing -> Cancelled`. Both terminal states are final.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackingStatus {
    Processing,
    Completed,
    Cancelled,
}

impl TrackingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingStatus::Processing => "PROCESSING",
            TrackingStatus::Completed => "COMPLETED",
            TrackingStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TrackingStatus::Processing)
    }
}

impl fmt::Display for TrackingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackingStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "PROCESSING" => Ok(TrackingStatus::Processing),
            "COMPLETED" => Ok(TrackingStatus::Completed),
            "CANCELLED" => Ok(TrackingStatus::Cancelled),
            other => Err(format!("unknown tracking status '{}'", other)),
        }
    }
}

/// Identity of one upload of a logical document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentIdentity {
    /// Stable identity of the logical document
    pub base_document_id: String,
    /// Monotonic version tag derived from the upload time
    pub document_version: String,
    /// Unique per-upload identifier (`{base}@{version}`)
    pub document_id: String,
}

impl DocumentIdentity {
    /// Derive an identity from a storage location and upload time
    pub fn from_location(bucket: &str, key: &str, uploaded_at: DateTime<Utc>) -> Self {
        Self::new(base_id_for_location(bucket, key), uploaded_at)
    }

    /// Build an identity for an already-known base id
    pub fn new(base_document_id: impl Into<String>, uploaded_at: DateTime<Utc>) -> Self {
        let base_document_id = base_document_id.into();
        let document_version = version_tag(uploaded_at);
        let document_id = compose_document_id(&base_document_id, &document_version);
        Self {
            base_document_id,
            document_version,
            document_id,
        }
    }
}

/// Version tag for an upload time. Lexicographic order matches time order.
pub fn version_tag(uploaded_at: DateTime<Utc>) -> String {
    format!("v{:020}", uploaded_at.timestamp_micros().max(0))
}

/// Compose a per-upload document id
pub fn compose_document_id(base_document_id: &str, document_version: &str) -> String {
    format!("{}@{}", base_document_id, document_version)
}

/// Split a document id into `(base, version)`
pub fn split_document_id(document_id: &str) -> Option<(&str, &str)> {
    document_id.rsplit_once('@')
}

/// Normalise a bucket/key pair into a base document id
pub fn base_id_for_location(bucket: &str, key: &str) -> String {
    let key = key.trim_start_matches('/');
    let bucket = bucket.trim_matches('/');
    if bucket.is_empty() {
        key.to_string()
    } else {
        format!("{}/{}", bucket, key)
    }
}

/// One tracked upload attempt of a document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentVersionRecord {
    pub document_id: String,
    pub base_document_id: String,
    pub document_name: String,
    pub document_version: String,
    pub upload_timestamp: DateTime<Utc>,
    pub total_units: u32,
    pub indexed_units: u32,
    pub status: TrackingStatus,
    pub start_time: DateTime<Utc>,
    pub completion_time: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
    pub expiry: DateTime<Utc>,
}

impl DocumentVersionRecord {
    /// New `PROCESSING` record with no indexed units.
    ///
    /// A version with zero expected units has nothing to wait for and starts
    /// out `COMPLETED`. Fails when `retention_days` is not positive or the
    /// expiry falls outside the representable time range.
    pub fn new(
        identity: &DocumentIdentity,
        document_name: impl Into<String>,
        upload_timestamp: DateTime<Utc>,
        total_units: u32,
        retention_days: i64,
    ) -> Result<Self> {
        let now = Utc::now();
        let expiry = Duration::try_days(retention_days)
            .filter(|_| retention_days > 0)
            .and_then(|retention| now.checked_add_signed(retention))
            .ok_or_else(|| {
                Error::Config(format!("retention of {} days is out of range", retention_days))
            })?;
        let (status, completion_time) = if total_units == 0 {
            (TrackingStatus::Completed, Some(now))
        } else {
            (TrackingStatus::Processing, None)
        };

        Ok(Self {
            document_id: identity.document_id.clone(),
            base_document_id: identity.base_document_id.clone(),
            document_name: document_name.into(),
            document_version: identity.document_version.clone(),
            upload_timestamp,
            total_units,
            indexed_units: 0,
            status,
            start_time: now,
            completion_time,
            last_updated: now,
            expiry,
        })
    }

    /// Whether every expected unit has been indexed
    pub fn is_fully_indexed(&self) -> bool {
        self.indexed_units >= self.total_units
    }

    /// Progress as a percentage, derived for display
    pub fn percent_complete(&self) -> f32 {
        if self.total_units == 0 {
            return 100.0;
        }
        self.indexed_units as f32 / self.total_units as f32 * 100.0
    }

    /// `"indexed/total"` display form
    pub fn progress_label(&self) -> String {
        format!("{}/{}", self.indexed_units, self.total_units)
    }
}
