//! Version & progress tracker
//!
//! Owns the lifecycle of a document version record:
//!
//! ```text
//!   initialize ──► PROCESSING ──(indexed == total)──► COMPLETED
//!                      │
//!                      └──(newer upload of same base)──► CANCELLED
//! ```
//!
//! All writes are guarded store mutations. Concurrent workers may report
//! units for the same record in any order, more than once, and after the
//! record reached a terminal state; the guards make the extra reports no-ops.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::TrackingConfig;
use crate::error::{Error, Result};
use crate::storage::{RecordMutation, TrackingStore, UpdateOutcome};
use crate::types::record::{compose_document_id, version_tag};
use crate::types::{DocumentIdentity, DocumentVersionRecord, TrackingStatus};

/// Request to start tracking a new document version
#[derive(Debug, Clone)]
pub struct NewVersion {
    pub base_document_id: String,
    pub document_name: String,
    pub total_units: u32,
    /// Explicit version tag; derived from the upload time when absent
    pub document_version: Option<String>,
    /// Upload time; defaults to now
    pub upload_timestamp: Option<DateTime<Utc>>,
}

impl NewVersion {
    pub fn new(
        base_document_id: impl Into<String>,
        document_name: impl Into<String>,
        total_units: u32,
    ) -> Self {
        Self {
            base_document_id: base_document_id.into(),
            document_name: document_name.into(),
            total_units,
            document_version: None,
            upload_timestamp: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.document_version = Some(version.into());
        self
    }

    pub fn uploaded_at(mut self, at: DateTime<Utc>) -> Self {
        self.upload_timestamp = Some(at);
        self
    }
}

/// Result of [`VersionTracker::initialize`]
#[derive(Debug, Clone)]
pub struct InitializeOutcome {
    /// The tracked version
    pub record: DocumentVersionRecord,
    /// Sibling versions moved from `PROCESSING` to `CANCELLED` by this call
    pub superseded: Vec<DocumentVersionRecord>,
    /// False when the version was already tracked (replayed start signal)
    pub created: bool,
}

impl InitializeOutcome {
    pub fn document_id(&self) -> &str {
        &self.record.document_id
    }
}

/// Result of a progress report
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressOutcome {
    /// The report was applied
    Applied {
        record: DocumentVersionRecord,
        /// True only for the single call that moved the record to `COMPLETED`
        completed_now: bool,
    },
    /// The report was already accounted for (duplicate, stale or late)
    AlreadyAccounted { document_id: String },
    /// Completion was confirmed before every unit was indexed
    NotReady {
        document_id: String,
        indexed_units: u32,
        total_units: u32,
    },
    /// No record exists; tracking degraded for this document
    Untracked { document_id: String },
}

impl ProgressOutcome {
    pub fn completed_now(&self) -> bool {
        matches!(self, ProgressOutcome::Applied { completed_now: true, .. })
    }

    pub fn record(&self) -> Option<&DocumentVersionRecord> {
        match self {
            ProgressOutcome::Applied { record, .. } => Some(record),
            _ => None,
        }
    }
}

/// Status summary for one base document
#[derive(Debug, Clone)]
pub struct LatestStatus {
    /// Most recent version
    pub latest: DocumentVersionRecord,
    /// Versions still `PROCESSING`
    pub processing_versions: usize,
    /// All versions on record
    pub total_versions: usize,
    /// Most recent versions, newest first, bounded by the history limit
    pub history: Vec<DocumentVersionRecord>,
}

/// Version & progress tracker over an injected tracking store
pub struct VersionTracker {
    store: Arc<dyn TrackingStore>,
    config: TrackingConfig,
}

impl VersionTracker {
    pub fn new(store: Arc<dyn TrackingStore>, config: TrackingConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<dyn TrackingStore> {
        &self.store
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    /// Start tracking a new version and supersede older in-flight siblings.
    ///
    /// Supersession and creation are separate writes; for a short window
    /// both versions may be `PROCESSING`. A start signal for a version older
    /// than one already on record is stored directly as `CANCELLED`.
    pub fn initialize(&self, request: NewVersion) -> Result<InitializeOutcome> {
        if request.base_document_id.trim().is_empty() {
            return Err(Error::malformed("base_document_id must not be empty"));
        }

        let upload_timestamp = request.upload_timestamp.unwrap_or_else(Utc::now);
        let document_version = request
            .document_version
            .clone()
            .unwrap_or_else(|| version_tag(upload_timestamp));
        let identity = DocumentIdentity {
            document_id: compose_document_id(&request.base_document_id, &document_version),
            base_document_id: request.base_document_id.clone(),
            document_version,
        };

        let siblings = self.store.query_by_base(&identity.base_document_id, None)?;

        if let Some(existing) = siblings.iter().find(|r| r.document_id == identity.document_id) {
            tracing::debug!(
                "Version {} already tracked ({}), ignoring repeated start",
                existing.document_id,
                existing.status
            );
            return Ok(InitializeOutcome {
                record: existing.clone(),
                superseded: Vec::new(),
                created: false,
            });
        }

        let is_newer = |other: &DocumentVersionRecord| {
            (other.upload_timestamp, other.document_version.as_str())
                > (upload_timestamp, identity.document_version.as_str())
        };
        let newer_sibling = siblings.iter().find(|r| is_newer(r)).map(|r| r.document_id.clone());

        // before supersession, so a rejected record leaves siblings untouched
        let mut record = DocumentVersionRecord::new(
            &identity,
            request.document_name,
            upload_timestamp,
            request.total_units,
            self.config.retention_days,
        )?;

        let now = Utc::now();
        let mut superseded = Vec::new();
        for sibling in siblings
            .iter()
            .filter(|r| r.status == TrackingStatus::Processing && !is_newer(r))
        {
            match self.store.update(&sibling.document_id, RecordMutation::Cancel { at: now })? {
                UpdateOutcome::Applied(cancelled) => {
                    tracing::info!(
                        "Superseded {} by new upload {}",
                        cancelled.document_id,
                        identity.document_id
                    );
                    superseded.push(cancelled);
                }
                UpdateOutcome::ConditionFailed => {
                    tracing::debug!(
                        "Sibling {} left PROCESSING before it could be superseded",
                        sibling.document_id
                    );
                }
            }
        }

        if let Some(newer) = newer_sibling {
            if record.status == TrackingStatus::Processing {
                tracing::warn!(
                    "Start signal for {} arrived after newer version {}; recording as cancelled",
                    record.document_id,
                    newer
                );
                record.status = TrackingStatus::Cancelled;
            }
        }

        self.store.put(&record)?;

        tracing::info!(
            "Tracking {} ({} units, status {})",
            record.document_id,
            record.total_units,
            record.status
        );

        Ok(InitializeOutcome {
            record,
            superseded,
            created: true,
        })
    }

    /// Count one more indexed unit.
    ///
    /// Increments only while `indexed_units < total_units`; a report that
    /// arrives after the count is full is dropped rather than over-counted.
    pub fn record_unit_indexed(&self, document_id: &str) -> Result<ProgressOutcome> {
        match self.store.update(document_id, RecordMutation::IncrementIndexed)? {
            UpdateOutcome::Applied(record) => self.complete_if_full(record),
            UpdateOutcome::ConditionFailed => self.resolve_rejected(document_id),
        }
    }

    /// Apply an absolute progress count. Accepted only if it is strictly
    /// greater than the stored count; used to repair drifted counters.
    pub fn reconcile_progress(&self, document_id: &str, indexed_units: u32) -> Result<ProgressOutcome> {
        let Some(current) = self.store.get(document_id)? else {
            return Ok(ProgressOutcome::Untracked {
                document_id: document_id.to_string(),
            });
        };

        if indexed_units > current.total_units {
            return Err(Error::InvalidProgress {
                document_id: document_id.to_string(),
                indexed_units,
                total_units: current.total_units,
            });
        }

        match self
            .store
            .update(document_id, RecordMutation::AdvanceIndexed(indexed_units))?
        {
            UpdateOutcome::Applied(record) => {
                tracing::info!(
                    "Reconciled {} progress to {}",
                    document_id,
                    record.progress_label()
                );
                self.complete_if_full(record)
            }
            UpdateOutcome::ConditionFailed => self.resolve_rejected(document_id),
        }
    }

    /// Confirm completion announced by the pipeline. Never completes a
    /// version that still has unindexed units.
    pub fn confirm_completion(&self, document_id: &str) -> Result<ProgressOutcome> {
        let Some(current) = self.store.get(document_id)? else {
            return Ok(ProgressOutcome::Untracked {
                document_id: document_id.to_string(),
            });
        };

        if current.status == TrackingStatus::Processing && !current.is_fully_indexed() {
            return Ok(ProgressOutcome::NotReady {
                document_id: document_id.to_string(),
                indexed_units: current.indexed_units,
                total_units: current.total_units,
            });
        }

        if current.status.is_terminal() {
            return Ok(ProgressOutcome::AlreadyAccounted {
                document_id: document_id.to_string(),
            });
        }

        self.complete_if_full(current)
    }

    /// Versions of one base document, newest first
    pub fn get_history(&self, base_document_id: &str) -> Result<Vec<DocumentVersionRecord>> {
        self.store.query_by_base(base_document_id, None)
    }

    /// Latest version of one base document with sibling counts
    pub fn get_latest_status(&self, base_document_id: &str) -> Result<Option<LatestStatus>> {
        let history = self.store.query_by_base(base_document_id, None)?;
        Ok(self.summarize(history))
    }

    /// One version by document id
    pub fn get_record(&self, document_id: &str) -> Result<Option<DocumentVersionRecord>> {
        self.store.get(document_id)
    }

    /// Every tracked version
    pub fn all_records(&self) -> Result<Vec<DocumentVersionRecord>> {
        self.store.scan()
    }

    /// Delete versions past their retention horizon
    pub fn purge_expired(&self) -> Result<usize> {
        let removed = self.store.delete_expired(Utc::now())?;
        if removed > 0 {
            tracing::info!("Purged {} expired document versions", removed);
        }
        Ok(removed)
    }

    fn summarize(&self, history: Vec<DocumentVersionRecord>) -> Option<LatestStatus> {
        let latest = history.first()?.clone();
        let processing_versions = history
            .iter()
            .filter(|r| r.status == TrackingStatus::Processing)
            .count();
        let total_versions = history.len();
        let history = history.into_iter().take(self.config.history_limit).collect();

        Some(LatestStatus {
            latest,
            processing_versions,
            total_versions,
            history,
        })
    }

    /// Move a fully indexed record to `COMPLETED`. The guarded transition
    /// succeeds for exactly one caller; everyone else sees `completed_now = false`.
    fn complete_if_full(&self, record: DocumentVersionRecord) -> Result<ProgressOutcome> {
        if record.status != TrackingStatus::Processing || !record.is_fully_indexed() {
            return Ok(ProgressOutcome::Applied {
                record,
                completed_now: false,
            });
        }

        match self
            .store
            .update(&record.document_id, RecordMutation::Complete { at: Utc::now() })?
        {
            UpdateOutcome::Applied(done) => {
                tracing::info!(
                    "Document {} completed ({} units)",
                    done.document_id,
                    done.total_units
                );
                Ok(ProgressOutcome::Applied {
                    record: done,
                    completed_now: true,
                })
            }
            UpdateOutcome::ConditionFailed => Ok(ProgressOutcome::Applied {
                record,
                completed_now: false,
            }),
        }
    }

    /// Classify a rejected progress write
    fn resolve_rejected(&self, document_id: &str) -> Result<ProgressOutcome> {
        match self.store.get(document_id)? {
            None => {
                tracing::warn!("Progress reported for untracked document {}", document_id);
                Ok(ProgressOutcome::Untracked {
                    document_id: document_id.to_string(),
                })
            }
            // Full count but never flipped (e.g. the completing writer died
            // between its two writes): finish the transition now.
            Some(record)
                if record.status == TrackingStatus::Processing && record.is_fully_indexed() =>
            {
                match self.complete_if_full(record)? {
                    ProgressOutcome::Applied { completed_now: true, record } => {
                        Ok(ProgressOutcome::Applied {
                            record,
                            completed_now: true,
                        })
                    }
                    _ => Ok(ProgressOutcome::AlreadyAccounted {
                        document_id: document_id.to_string(),
                    }),
                }
            }
            Some(record) => {
                tracing::debug!(
                    "Progress for {} already accounted for ({}, {})",
                    document_id,
                    record.status,
                    record.progress_label()
                );
                Ok(ProgressOutcome::AlreadyAccounted {
                    document_id: document_id.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteTrackingStore;
    use chrono::Duration;

    fn tracker() -> VersionTracker {
        let store = Arc::new(SqliteTrackingStore::in_memory().unwrap());
        VersionTracker::new(store, TrackingConfig::default())
    }

    #[test]
    fn test_three_units_complete_and_duplicate_is_dropped() {
        let tracker = tracker();
        let id = tracker
            .initialize(NewVersion::new("doc/a.pdf", "a.pdf", 3))
            .unwrap()
            .record
            .document_id;

        assert!(!tracker.record_unit_indexed(&id).unwrap().completed_now());
        assert!(!tracker.record_unit_indexed(&id).unwrap().completed_now());
        let third = tracker.record_unit_indexed(&id).unwrap();
        assert!(third.completed_now());

        let fourth = tracker.record_unit_indexed(&id).unwrap();
        assert_eq!(fourth, ProgressOutcome::AlreadyAccounted { document_id: id.clone() });

        let record = tracker.get_record(&id).unwrap().unwrap();
        assert_eq!(record.status, TrackingStatus::Completed);
        assert_eq!(record.indexed_units, 3);
        assert_eq!(
            record.completion_time,
            third.record().and_then(|r| r.completion_time)
        );
    }

    #[test]
    fn test_reupload_supersedes_processing_version() {
        let tracker = tracker();
        let t0 = Utc::now();
        let v1 = tracker
            .initialize(NewVersion::new("doc/a.pdf", "a.pdf", 4).uploaded_at(t0))
            .unwrap();
        tracker.record_unit_indexed(v1.document_id()).unwrap();

        let v2 = tracker
            .initialize(NewVersion::new("doc/a.pdf", "a.pdf", 2).uploaded_at(t0 + Duration::seconds(1)))
            .unwrap();

        assert_eq!(v2.superseded.len(), 1);
        assert_eq!(v2.superseded[0].document_id, v1.document_id());

        let history = tracker.get_history("doc/a.pdf").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].document_id, v2.document_id());
        assert_eq!(history[0].status, TrackingStatus::Processing);
        assert_eq!(history[1].status, TrackingStatus::Cancelled);

        // Late unit from the superseded upload must not touch it
        assert!(matches!(
            tracker.record_unit_indexed(v1.document_id()).unwrap(),
            ProgressOutcome::AlreadyAccounted { .. }
        ));
        assert_eq!(tracker.get_record(v1.document_id()).unwrap().unwrap().indexed_units, 1);
    }

    #[test]
    fn test_completed_version_is_not_superseded() {
        let tracker = tracker();
        let t0 = Utc::now();
        let v1 = tracker
            .initialize(NewVersion::new("doc/a.pdf", "a.pdf", 1).uploaded_at(t0))
            .unwrap();
        tracker.record_unit_indexed(v1.document_id()).unwrap();

        let v2 = tracker
            .initialize(NewVersion::new("doc/a.pdf", "a.pdf", 1).uploaded_at(t0 + Duration::seconds(1)))
            .unwrap();

        assert!(v2.superseded.is_empty());
        assert_eq!(
            tracker.get_record(v1.document_id()).unwrap().unwrap().status,
            TrackingStatus::Completed
        );
    }

    #[test]
    fn test_late_start_of_older_version_is_recorded_cancelled() {
        let tracker = tracker();
        let t0 = Utc::now();
        let newer = tracker
            .initialize(NewVersion::new("doc/a.pdf", "a.pdf", 2).uploaded_at(t0))
            .unwrap();
        let older = tracker
            .initialize(NewVersion::new("doc/a.pdf", "a.pdf", 2).uploaded_at(t0 - Duration::minutes(5)))
            .unwrap();

        assert!(older.superseded.is_empty());
        assert_eq!(older.record.status, TrackingStatus::Cancelled);
        assert_eq!(
            tracker.get_record(newer.document_id()).unwrap().unwrap().status,
            TrackingStatus::Processing
        );
    }

    #[test]
    fn test_repeated_start_is_idempotent() {
        let tracker = tracker();
        let request = NewVersion::new("doc/a.pdf", "a.pdf", 2).with_version("v7");

        let first = tracker.initialize(request.clone()).unwrap();
        tracker.record_unit_indexed(first.document_id()).unwrap();
        let second = tracker.initialize(request).unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(second.document_id(), "doc/a.pdf@v7");
        assert_eq!(second.record.indexed_units, 1);
        assert_eq!(tracker.get_history("doc/a.pdf").unwrap().len(), 1);
    }

    #[test]
    fn test_reconcile_is_monotonic_and_bounded() {
        let tracker = tracker();
        let id = tracker
            .initialize(NewVersion::new("doc/a.pdf", "a.pdf", 5))
            .unwrap()
            .record
            .document_id;

        assert!(matches!(
            tracker.reconcile_progress(&id, 3).unwrap(),
            ProgressOutcome::Applied { completed_now: false, .. }
        ));
        assert!(matches!(
            tracker.reconcile_progress(&id, 2).unwrap(),
            ProgressOutcome::AlreadyAccounted { .. }
        ));
        assert!(matches!(
            tracker.reconcile_progress(&id, 6),
            Err(Error::InvalidProgress { .. })
        ));
        assert!(tracker.reconcile_progress(&id, 5).unwrap().completed_now());
        assert_eq!(tracker.get_record(&id).unwrap().unwrap().indexed_units, 5);
    }

    #[test]
    fn test_confirm_completion_waits_for_all_units() {
        let tracker = tracker();
        let id = tracker
            .initialize(NewVersion::new("doc/a.pdf", "a.pdf", 2))
            .unwrap()
            .record
            .document_id;

        assert!(matches!(
            tracker.confirm_completion(&id).unwrap(),
            ProgressOutcome::NotReady { indexed_units: 0, total_units: 2, .. }
        ));

        tracker.reconcile_progress(&id, 2).unwrap();
        assert!(matches!(
            tracker.confirm_completion(&id).unwrap(),
            ProgressOutcome::AlreadyAccounted { .. }
        ));
    }

    #[test]
    fn test_untracked_document() {
        let tracker = tracker();
        assert!(matches!(
            tracker.record_unit_indexed("doc/ghost.pdf@v1").unwrap(),
            ProgressOutcome::Untracked { .. }
        ));
        assert!(tracker.get_latest_status("doc/ghost.pdf").unwrap().is_none());
    }

    #[test]
    fn test_latest_status_bounds_history() {
        let store = Arc::new(SqliteTrackingStore::in_memory().unwrap());
        let tracker = VersionTracker::new(
            store,
            TrackingConfig {
                history_limit: 2,
                retention_days: 30,
            },
        );
        let t0 = Utc::now();
        for i in 0..4 {
            tracker
                .initialize(NewVersion::new("doc/a.pdf", "a.pdf", 1).uploaded_at(t0 + Duration::seconds(i)))
                .unwrap();
        }

        let status = tracker.get_latest_status("doc/a.pdf").unwrap().unwrap();
        assert_eq!(status.total_versions, 4);
        assert_eq!(status.processing_versions, 1);
        assert_eq!(status.history.len(), 2);
        assert_eq!(status.latest.document_id, status.history[0].document_id);
        assert_eq!(status.latest.status, TrackingStatus::Processing);
    }

    #[test]
    fn test_zero_unit_version_is_complete_on_creation() {
        let tracker = tracker();
        let outcome = tracker
            .initialize(NewVersion::new("doc/blank.pdf", "blank.pdf", 0))
            .unwrap();

        assert_eq!(outcome.record.status, TrackingStatus::Completed);
        assert!(matches!(
            tracker.record_unit_indexed(outcome.document_id()).unwrap(),
            ProgressOutcome::AlreadyAccounted { .. }
        ));
    }

    #[test]
    fn test_out_of_range_retention_is_an_error() {
        let store = Arc::new(SqliteTrackingStore::in_memory().unwrap());
        let ok = VersionTracker::new(store.clone(), TrackingConfig::default());
        ok.initialize(NewVersion::new("doc/a.pdf", "a.pdf", 2).with_version("v1"))
            .unwrap();

        for retention_days in [i64::MAX, 0, -1] {
            let tracker = VersionTracker::new(
                store.clone(),
                TrackingConfig {
                    retention_days,
                    ..TrackingConfig::default()
                },
            );
            let err = tracker
                .initialize(NewVersion::new("doc/a.pdf", "a.pdf", 2).with_version("v2"))
                .unwrap_err();
            assert!(matches!(err, Error::Config(_)));
        }

        let history = ok.get_history("doc/a.pdf").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, TrackingStatus::Processing);
    }
}
