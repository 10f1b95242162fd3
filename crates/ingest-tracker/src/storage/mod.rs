//! Tracking store for document version records
//!
//! The store is the only shared state in the system. Every progress or
//! status change goes through [`TrackingStore::update`], which applies a
//! [`RecordMutation`] only when the mutation's guard holds. A guard that does
//! not hold is reported as [`UpdateOutcome::ConditionFailed`], an expected
//! concurrency outcome rather than an error.

mod database;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::DocumentVersionRecord;

pub use database::SqliteTrackingStore;

/// Guarded mutation of a single record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordMutation {
    /// `indexed_units += 1` while `PROCESSING` and `indexed_units < total_units`
    IncrementIndexed,
    /// `indexed_units = n` while `PROCESSING` and `indexed_units < n <= total_units`
    AdvanceIndexed(u32),
    /// `PROCESSING -> COMPLETED` once `indexed_units == total_units`
    Complete { at: DateTime<Utc> },
    /// `PROCESSING -> CANCELLED`
    Cancel { at: DateTime<Utc> },
}

/// Result of a guarded update
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// Guard held; the record as written
    Applied(DocumentVersionRecord),
    /// Guard did not hold (or the record does not exist); nothing was written
    ConditionFailed,
}

impl UpdateOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, UpdateOutcome::Applied(_))
    }
}

/// Durable key-value table of document versions, keyed by `document_id`,
/// with a secondary index on `base_document_id`.
pub trait TrackingStore: Send + Sync {
    /// Fetch one record by document id
    fn get(&self, document_id: &str) -> Result<Option<DocumentVersionRecord>>;

    /// Insert a new record. Document ids are never reused, so an existing id
    /// is rejected with `Error::DuplicateVersion`.
    fn put(&self, record: &DocumentVersionRecord) -> Result<()>;

    /// Apply a guarded mutation atomically
    fn update(&self, document_id: &str, mutation: RecordMutation) -> Result<UpdateOutcome>;

    /// Versions of one base document, newest upload first
    fn query_by_base(
        &self,
        base_document_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<DocumentVersionRecord>>;

    /// Every record in the table
    fn scan(&self) -> Result<Vec<DocumentVersionRecord>>;

    /// Delete records whose retention horizon has passed
    fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize>;

    /// Check the store is reachable
    fn health_check(&self) -> Result<bool>;

    /// Backend name for logging
    fn name(&self) -> &str;
}
