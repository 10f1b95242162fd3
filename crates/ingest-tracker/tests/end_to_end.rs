//! Tracker, relay and driver scenarios across module boundaries

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use ingest_tracker::config::{DriverConfig, TrackingConfig};
use ingest_tracker::driver::{
    JobDriver, JobOutcome, JobSpec, JobStatusPage, OcrJobProvider, ProviderError, Sleeper,
};
use ingest_tracker::providers::BroadcastBus;
use ingest_tracker::types::message::{SUBJECT_COMPLETED, SUBJECT_STARTED, SUBJECT_UNIT_INDEXED};
use ingest_tracker::types::{DomainNotification, InboundMessage, MessageOutcome};
use ingest_tracker::{
    Error, NewVersion, NotificationRelay, ProgressOutcome, SqliteTrackingStore, TrackingStatus,
    VersionTracker,
};
use proptest::prelude::*;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn tracker() -> Arc<VersionTracker> {
    let store = Arc::new(SqliteTrackingStore::in_memory().unwrap());
    Arc::new(VersionTracker::new(store, TrackingConfig::default()))
}

#[test]
fn scenario_three_units_then_duplicate() {
    let tracker = tracker();
    let id = tracker
        .initialize(NewVersion::new("doc/a.pdf", "a.pdf", 3))
        .unwrap()
        .record
        .document_id;

    for _ in 0..3 {
        tracker.record_unit_indexed(&id).unwrap();
    }
    let done = tracker.get_record(&id).unwrap().unwrap();
    assert_eq!(done.status, TrackingStatus::Completed);
    assert_eq!(done.indexed_units, 3);

    let duplicate = tracker.record_unit_indexed(&id).unwrap();
    assert!(matches!(duplicate, ProgressOutcome::AlreadyAccounted { .. }));
    assert_eq!(tracker.get_record(&id).unwrap().unwrap(), done);
}

#[test]
fn scenario_reupload_before_completion() {
    let tracker = tracker();
    let t0 = Utc::now() - ChronoDuration::minutes(1);
    tracker
        .initialize(NewVersion::new("doc/a.pdf", "a.pdf", 3).with_version("v1").uploaded_at(t0))
        .unwrap();
    tracker
        .initialize(
            NewVersion::new("doc/a.pdf", "a.pdf", 3)
                .with_version("v2")
                .uploaded_at(Utc::now()),
        )
        .unwrap();

    let history = tracker.get_history("doc/a.pdf").unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].document_id, "doc/a.pdf@v2");
    assert_eq!(history[0].status, TrackingStatus::Processing);
    assert_eq!(history[1].document_id, "doc/a.pdf@v1");
    assert_eq!(history[1].status, TrackingStatus::Cancelled);

    // late unit for the superseded version is dropped
    tracker.record_unit_indexed("doc/a.pdf@v1").unwrap();
    let v1 = tracker.get_record("doc/a.pdf@v1").unwrap().unwrap();
    assert_eq!(v1.indexed_units, 0);
    assert_eq!(v1.status, TrackingStatus::Cancelled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_unit_events_complete_exactly_once() {
    let tracker = tracker();
    let total = 40;
    let id = tracker
        .initialize(NewVersion::new("doc/big.pdf", "big.pdf", total))
        .unwrap()
        .record
        .document_id;

    // more events than units: duplicates race with real ones
    let mut handles = Vec::new();
    for _ in 0..(total + 15) {
        let tracker = tracker.clone();
        let id = id.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            tracker.record_unit_indexed(&id).unwrap()
        }));
    }

    let mut completions = 0;
    for handle in handles {
        if handle.await.unwrap().completed_now() {
            completions += 1;
        }
    }

    let record = tracker.get_record(&id).unwrap().unwrap();
    assert_eq!(completions, 1);
    assert_eq!(record.indexed_units, total);
    assert_eq!(record.status, TrackingStatus::Completed);
    assert!(record.completion_time.is_some());
}

#[tokio::test]
async fn completing_signal_twice_publishes_one_completion() {
    let tracker = tracker();
    let bus = Arc::new(BroadcastBus::new(64));
    let mut rx = bus.subscribe();
    let relay = NotificationRelay::new(tracker.clone(), bus);

    let start = InboundMessage::new(
        SUBJECT_STARTED,
        json!({
            "base_document_id": "doc/a.pdf",
            "document_name": "a.pdf",
            "total_units": 1,
            "document_version": "v1"
        }),
    );
    let unit = InboundMessage::new(SUBJECT_UNIT_INDEXED, json!({"document_id": "doc/a.pdf@v1"}));
    let completed = InboundMessage::new(SUBJECT_COMPLETED, json!({"document_id": "doc/a.pdf@v1"}));

    relay.process_batch(vec![start, unit.clone()]).await;
    let first = tracker.get_record("doc/a.pdf@v1").unwrap().unwrap();

    let report = relay.process_batch(vec![unit, completed]).await;
    assert!(report
        .results
        .iter()
        .all(|r| r.outcome == MessageOutcome::Duplicate));

    let second = tracker.get_record("doc/a.pdf@v1").unwrap().unwrap();
    assert_eq!(first.completion_time, second.completion_time);

    let mut completions = 0;
    while let Ok(notification) = rx.try_recv() {
        if matches!(notification, DomainNotification::DocumentCompleted { .. }) {
            completions += 1;
        }
    }
    assert_eq!(completions, 1);
}

#[test]
fn absolute_count_above_total_is_rejected() {
    let tracker = tracker();
    let id = tracker
        .initialize(NewVersion::new("doc/a.pdf", "a.pdf", 2))
        .unwrap()
        .record
        .document_id;

    let err = tracker.reconcile_progress(&id, 3).unwrap_err();
    assert!(matches!(err, Error::InvalidProgress { total_units: 2, .. }));
}

#[test]
fn tracking_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tracking.db");

    let id = {
        let store = Arc::new(SqliteTrackingStore::new(&path).unwrap());
        let tracker = VersionTracker::new(store, TrackingConfig::default());
        let id = tracker
            .initialize(NewVersion::new("doc/a.pdf", "a.pdf", 4))
            .unwrap()
            .record
            .document_id;
        tracker.record_unit_indexed(&id).unwrap();
        tracker.record_unit_indexed(&id).unwrap();
        id
    };

    let store = Arc::new(SqliteTrackingStore::new(&path).unwrap());
    let tracker = VersionTracker::new(store, TrackingConfig::default());
    let record = tracker.get_record(&id).unwrap().unwrap();
    assert_eq!(record.indexed_units, 2);
    assert_eq!(record.status, TrackingStatus::Processing);
}

#[derive(Default)]
struct CountingSleeper {
    waits: AtomicU32,
}

#[async_trait]
impl Sleeper for CountingSleeper {
    async fn sleep(&self, _duration: Duration) {
        self.waits.fetch_add(1, Ordering::SeqCst);
    }
}

/// Rate limits the first `throttled` starts; jobs never leave IN_PROGRESS
struct ThrottledProvider {
    throttled: u32,
    starts: AtomicU32,
}

#[async_trait]
impl OcrJobProvider for ThrottledProvider {
    async fn start_job(&self, _spec: &JobSpec) -> Result<String, ProviderError> {
        let n = self.starts.fetch_add(1, Ordering::SeqCst);
        if n < self.throttled {
            Err(ProviderError::RateLimited("ThrottlingException".to_string()))
        } else {
            Ok("job-77".to_string())
        }
    }

    async fn get_job(
        &self,
        _job_id: &str,
        _next_token: Option<&str>,
    ) -> Result<JobStatusPage, ProviderError> {
        Ok(JobStatusPage::in_progress())
    }

    fn name(&self) -> &str {
        "throttled"
    }
}

#[tokio::test]
async fn driver_backs_off_then_times_out_with_job_reference() {
    let config = DriverConfig {
        start_max_attempts: 6,
        max_poll_rounds: 3,
        ..DriverConfig::default()
    };
    let sleeper = Arc::new(CountingSleeper::default());
    let provider = Arc::new(ThrottledProvider {
        throttled: 4,
        starts: AtomicU32::new(0),
    });
    let driver = JobDriver::with_sleeper(provider, sleeper.clone(), &config);

    let outcome = tokio_test::assert_ok!(driver.drive(&JobSpec::new("uploads", "scan.pdf")).await);

    let JobOutcome::TimedOut(job) = outcome else {
        panic!("expected a timed out job");
    };
    assert_eq!(job.job_id, "job-77");
    assert_eq!(job.run.rate_limit_waits, 4);
    // four backoff waits plus two poll intervals
    assert_eq!(sleeper.waits.load(Ordering::SeqCst), 6);
}

#[derive(Debug, Clone)]
enum Report {
    Unit,
    Absolute(u32),
}

fn report_strategy(total: u32) -> impl Strategy<Value = Report> {
    prop_oneof![
        3 => Just(Report::Unit),
        1 => (0..=total + 2).prop_map(Report::Absolute),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn unit_increments_never_exceed_total(total in 1u32..12, events in 0usize..30) {
        let tracker = tracker();
        let id = tracker
            .initialize(NewVersion::new("doc/p.pdf", "p.pdf", total))
            .unwrap()
            .record
            .document_id;

        let mut applied = 0u32;
        for _ in 0..events {
            if let ProgressOutcome::Applied { .. } = tracker.record_unit_indexed(&id).unwrap() {
                applied += 1;
            }
        }

        let record = tracker.get_record(&id).unwrap().unwrap();
        prop_assert_eq!(record.indexed_units, applied);
        prop_assert_eq!(record.indexed_units, (events as u32).min(total));
        prop_assert_eq!(record.status == TrackingStatus::Completed, events as u32 >= total);
    }

    #[test]
    fn mixed_reports_are_monotonic_and_bounded(
        (total, reports) in (1u32..10).prop_flat_map(|total| {
            (Just(total), prop::collection::vec(report_strategy(total), 0..25))
        })
    ) {
        let tracker = tracker();
        let id = tracker
            .initialize(NewVersion::new("doc/m.pdf", "m.pdf", total))
            .unwrap()
            .record
            .document_id;

        let mut last = 0u32;
        for report in reports {
            match report {
                Report::Unit => {
                    tracker.record_unit_indexed(&id).unwrap();
                }
                Report::Absolute(n) => {
                    let result = tracker.reconcile_progress(&id, n);
                    prop_assert_eq!(result.is_err(), n > total);
                }
            }
            let current = tracker.get_record(&id).unwrap().unwrap().indexed_units;
            prop_assert!(current >= last);
            prop_assert!(current <= total);
            last = current;
        }
    }
}
