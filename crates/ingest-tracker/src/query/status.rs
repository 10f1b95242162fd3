//! Status, listing and history queries

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::tracking::{LatestStatus, VersionTracker};
use crate::types::record::split_document_id;
use crate::types::{
    DocumentHistoryResponse, DocumentListResponse, DocumentStatusResponse, DocumentVersionRecord,
    QueryStatus, TrackingStatus, VersionSummary,
};

/// Answers external status reads. Absent documents yield `NOT_FOUND`
/// responses rather than errors.
#[derive(Clone)]
pub struct StatusQuery {
    tracker: Arc<VersionTracker>,
}

impl StatusQuery {
    pub fn new(tracker: Arc<VersionTracker>) -> Self {
        Self { tracker }
    }

    /// Status of one identity.
    ///
    /// With `use_base_id` the identity names a base document and the latest
    /// version answers. Otherwise it names one version; an identity without
    /// a version separator is treated as a base id.
    pub fn status(&self, identity: &str, use_base_id: bool) -> Result<DocumentStatusResponse> {
        let identity = identity.trim();
        if use_base_id || split_document_id(identity).is_none() {
            return self.base_status(identity, use_base_id);
        }

        // base ids may themselves contain '@'
        let Some(record) = self.tracker.get_record(identity)? else {
            return self.base_status(identity, use_base_id);
        };

        let siblings = self.tracker.get_latest_status(&record.base_document_id)?;
        Ok(respond(identity, use_base_id, &record, siblings.as_ref()))
    }

    fn base_status(&self, base: &str, use_base_id: bool) -> Result<DocumentStatusResponse> {
        match self.tracker.get_latest_status(base)? {
            Some(summary) => Ok(respond(base, use_base_id, &summary.latest, Some(&summary))),
            None => Ok(DocumentStatusResponse::not_found(base, use_base_id)),
        }
    }

    /// Latest version of every base document, ordered by base id
    pub fn all_documents(&self) -> Result<DocumentListResponse> {
        let mut latest: HashMap<String, DocumentVersionRecord> = HashMap::new();
        for record in self.tracker.all_records()? {
            match latest.get(&record.base_document_id) {
                Some(current) if !is_more_recent(&record, current) => {}
                _ => {
                    latest.insert(record.base_document_id.clone(), record);
                }
            }
        }

        let mut records: Vec<_> = latest.into_values().collect();
        records.sort_by(|a, b| a.base_document_id.cmp(&b.base_document_id));

        let count = |status: TrackingStatus| records.iter().filter(|r| r.status == status).count();
        let processing = count(TrackingStatus::Processing);
        let completed = count(TrackingStatus::Completed);
        let cancelled = count(TrackingStatus::Cancelled);

        Ok(DocumentListResponse {
            total_documents: records.len(),
            documents: records.iter().map(VersionSummary::from).collect(),
            processing,
            completed,
            cancelled,
        })
    }

    /// Every version of one base document, newest first
    pub fn history(&self, base_document_id: &str) -> Result<DocumentHistoryResponse> {
        let versions = self.tracker.get_history(base_document_id)?;
        Ok(DocumentHistoryResponse {
            base_document_id: base_document_id.to_string(),
            versions: versions.iter().map(VersionSummary::from).collect(),
        })
    }
}

fn is_more_recent(candidate: &DocumentVersionRecord, current: &DocumentVersionRecord) -> bool {
    (candidate.upload_timestamp, &candidate.document_version)
        > (current.upload_timestamp, &current.document_version)
}

fn respond(
    identity: &str,
    use_base_id: bool,
    record: &DocumentVersionRecord,
    siblings: Option<&LatestStatus>,
) -> DocumentStatusResponse {
    DocumentStatusResponse {
        identity: identity.to_string(),
        use_base_id,
        status: QueryStatus::from(record.status),
        document: Some(VersionSummary::from(record)),
        processing_versions: siblings.map_or(0, |s| s.processing_versions),
        total_versions: siblings.map_or(1, |s| s.total_versions),
        history: siblings
            .map(|s| s.history.iter().map(VersionSummary::from).collect())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackingConfig;
    use crate::storage::SqliteTrackingStore;
    use crate::tracking::NewVersion;
    use chrono::{Duration, Utc};

    fn setup() -> (Arc<VersionTracker>, StatusQuery) {
        let store = Arc::new(SqliteTrackingStore::in_memory().unwrap());
        let tracker = Arc::new(VersionTracker::new(store, TrackingConfig::default()));
        let query = StatusQuery::new(tracker.clone());
        (tracker, query)
    }

    #[test]
    fn test_unknown_identity_is_not_found() {
        let (_, query) = setup();

        let by_base = query.status("nope/a.pdf", true).unwrap();
        assert_eq!(by_base.status, QueryStatus::NotFound);
        assert!(by_base.document.is_none());

        let by_version = query.status("nope/a.pdf@v1", false).unwrap();
        assert_eq!(by_version.status, QueryStatus::NotFound);
    }

    #[test]
    fn test_base_status_reports_latest_version() {
        let (tracker, query) = setup();
        let t0 = Utc::now() - Duration::minutes(5);
        tracker
            .initialize(NewVersion::new("b/a.pdf", "a.pdf", 2).uploaded_at(t0))
            .unwrap();
        let v2 = tracker
            .initialize(NewVersion::new("b/a.pdf", "a.pdf", 3).uploaded_at(Utc::now()))
            .unwrap();

        let response = query.status("b/a.pdf", true).unwrap();
        assert_eq!(response.status, QueryStatus::Processing);
        assert_eq!(
            response.document.as_ref().unwrap().document_id,
            v2.document_id()
        );
        assert_eq!(response.total_versions, 2);
        assert_eq!(response.processing_versions, 1);
        assert_eq!(response.history[1].status, TrackingStatus::Cancelled);
    }

    #[test]
    fn test_version_status_reports_that_version() {
        let (tracker, query) = setup();
        let t0 = Utc::now() - Duration::minutes(5);
        let v1 = tracker
            .initialize(NewVersion::new("b/a.pdf", "a.pdf", 2).uploaded_at(t0))
            .unwrap();
        tracker
            .initialize(NewVersion::new("b/a.pdf", "a.pdf", 2).uploaded_at(Utc::now()))
            .unwrap();

        let response = query.status(v1.document_id(), false).unwrap();
        assert_eq!(response.status, QueryStatus::Cancelled);
        assert_eq!(response.total_versions, 2);
    }

    #[test]
    fn test_all_documents_keeps_latest_per_base() {
        let (tracker, query) = setup();
        let t0 = Utc::now() - Duration::hours(1);

        tracker
            .initialize(NewVersion::new("b/a.pdf", "a.pdf", 1).uploaded_at(t0))
            .unwrap();
        let a2 = tracker
            .initialize(NewVersion::new("b/a.pdf", "a.pdf", 1).uploaded_at(Utc::now()))
            .unwrap();
        let c = tracker
            .initialize(NewVersion::new("b/c.pdf", "c.pdf", 1).uploaded_at(t0))
            .unwrap();
        tracker.record_unit_indexed(c.document_id()).unwrap();

        let list = query.all_documents().unwrap();
        assert_eq!(list.total_documents, 2);
        assert_eq!(list.documents[0].document_id, a2.document_id());
        assert_eq!(list.documents[1].status, TrackingStatus::Completed);
        assert_eq!(list.processing, 1);
        assert_eq!(list.completed, 1);
        assert_eq!(list.cancelled, 0);
    }

    #[test]
    fn test_base_id_containing_at_sign_falls_back_to_base_lookup() {
        let (tracker, query) = setup();
        tracker
            .initialize(NewVersion::new("mail/ops@example.com/a.pdf", "a.pdf", 2).with_version("v1"))
            .unwrap();

        let by_base = query.status("mail/ops@example.com/a.pdf", false).unwrap();
        assert_eq!(by_base.status, QueryStatus::Processing);
        assert_eq!(
            by_base.document.unwrap().document_id,
            "mail/ops@example.com/a.pdf@v1"
        );

        let by_version = query.status("mail/ops@example.com/a.pdf@v1", false).unwrap();
        assert_eq!(by_version.status, QueryStatus::Processing);

        let missing = query.status("mail/ops@example.com/a.pdf@v9", false).unwrap();
        assert_eq!(missing.status, QueryStatus::NotFound);
    }

    #[test]
    fn test_history_is_newest_first() {
        let (tracker, query) = setup();
        let t0 = Utc::now() - Duration::hours(1);
        for i in 0..3 {
            tracker
                .initialize(
                    NewVersion::new("b/a.pdf", "a.pdf", 1).uploaded_at(t0 + Duration::minutes(i)),
                )
                .unwrap();
        }

        let history = query.history("b/a.pdf").unwrap();
        assert_eq!(history.versions.len(), 3);
        assert!(history.versions[0].upload_timestamp > history.versions[2].upload_timestamp);
    }
}
