//! SQLite tracking store
//!
//! Guards are expressed in the `WHERE` clause of a single `UPDATE ... RETURNING`
//! statement, so the check and the write are one atomic step for SQLite.

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::{RecordMutation, TrackingStore, UpdateOutcome};
use crate::error::{Error, Result};
use crate::types::{DocumentVersionRecord, TrackingStatus};

const COLUMNS: &str = "document_id, base_document_id, document_name, document_version, \
    upload_timestamp, total_units, indexed_units, status, start_time, completion_time, \
    last_updated, expiry";

/// SQLite-backed tracking store
pub struct SqliteTrackingStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTrackingStore {
    /// Create or open the database at the given path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| Error::tracking(format!("Failed to open database: {}", e)))?;

        // WAL lets status reads proceed while progress updates are written
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))
            .map_err(|e| Error::tracking(format!("Failed to enable WAL: {}", e)))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| Error::tracking(format!("Failed to set busy timeout: {}", e)))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Create an in-memory database
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::tracking(format!("Failed to open in-memory database: {}", e)))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA synchronous=NORMAL;
            PRAGMA temp_store=MEMORY;

            CREATE TABLE IF NOT EXISTS document_versions (
                document_id TEXT PRIMARY KEY,
                base_document_id TEXT NOT NULL,
                document_name TEXT NOT NULL,
                document_version TEXT NOT NULL,
                upload_timestamp TEXT NOT NULL,
                total_units INTEGER NOT NULL CHECK (total_units >= 0),
                indexed_units INTEGER NOT NULL DEFAULT 0
                    CHECK (indexed_units >= 0 AND indexed_units <= total_units),
                status TEXT NOT NULL
                    CHECK (status IN ('PROCESSING', 'COMPLETED', 'CANCELLED')),
                start_time TEXT NOT NULL,
                completion_time TEXT,
                last_updated TEXT NOT NULL,
                expiry TEXT NOT NULL
            );

            -- Secondary index: versions of a base document, newest first
            CREATE INDEX IF NOT EXISTS idx_versions_base_upload
                ON document_versions(base_document_id, upload_timestamp DESC);
            CREATE INDEX IF NOT EXISTS idx_versions_status ON document_versions(status);
            CREATE INDEX IF NOT EXISTS idx_versions_expiry ON document_versions(expiry);
            "#,
        )
        .map_err(|e| Error::tracking(format!("Failed to run migrations: {}", e)))?;

        tracing::info!("Tracking store migrations complete");
        Ok(())
    }

    fn run_update(
        conn: &Connection,
        document_id: &str,
        mutation: RecordMutation,
    ) -> rusqlite::Result<Option<DocumentVersionRecord>> {
        let now = ts_to_sql(Utc::now());
        match mutation {
            RecordMutation::IncrementIndexed => conn
                .query_row(
                    &format!(
                        "UPDATE document_versions \
                         SET indexed_units = indexed_units + 1, last_updated = ?2 \
                         WHERE document_id = ?1 AND status = 'PROCESSING' \
                           AND indexed_units < total_units \
                         RETURNING {}",
                        COLUMNS
                    ),
                    params![document_id, now],
                    row_to_record,
                )
                .optional(),
            RecordMutation::AdvanceIndexed(count) => conn
                .query_row(
                    &format!(
                        "UPDATE document_versions \
                         SET indexed_units = ?2, last_updated = ?3 \
                         WHERE document_id = ?1 AND status = 'PROCESSING' \
                           AND indexed_units < ?2 AND ?2 <= total_units \
                         RETURNING {}",
                        COLUMNS
                    ),
                    params![document_id, count as i64, now],
                    row_to_record,
                )
                .optional(),
            RecordMutation::Complete { at } => conn
                .query_row(
                    &format!(
                        "UPDATE document_versions \
                         SET status = 'COMPLETED', completion_time = ?2, last_updated = ?2 \
                         WHERE document_id = ?1 AND status = 'PROCESSING' \
                           AND indexed_units = total_units AND completion_time IS NULL \
                         RETURNING {}",
                        COLUMNS
                    ),
                    params![document_id, ts_to_sql(at)],
                    row_to_record,
                )
                .optional(),
            RecordMutation::Cancel { at } => conn
                .query_row(
                    &format!(
                        "UPDATE document_versions \
                         SET status = 'CANCELLED', last_updated = ?2 \
                         WHERE document_id = ?1 AND status = 'PROCESSING' \
                         RETURNING {}",
                        COLUMNS
                    ),
                    params![document_id, ts_to_sql(at)],
                    row_to_record,
                )
                .optional(),
        }
    }
}

impl TrackingStore for SqliteTrackingStore {
    fn get(&self, document_id: &str) -> Result<Option<DocumentVersionRecord>> {
        let conn = self.conn.lock();

        let record = conn
            .query_row(
                &format!("SELECT {} FROM document_versions WHERE document_id = ?1", COLUMNS),
                params![document_id],
                row_to_record,
            )
            .optional()
            .map_err(|e| Error::tracking(format!("Failed to get record: {}", e)))?;

        Ok(record)
    }

    fn put(&self, record: &DocumentVersionRecord) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            &format!(
                "INSERT INTO document_versions ({}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                COLUMNS
            ),
            params![
                record.document_id,
                record.base_document_id,
                record.document_name,
                record.document_version,
                ts_to_sql(record.upload_timestamp),
                record.total_units as i64,
                record.indexed_units as i64,
                record.status.as_str(),
                ts_to_sql(record.start_time),
                record.completion_time.map(ts_to_sql),
                ts_to_sql(record.last_updated),
                ts_to_sql(record.expiry),
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(ref failure, _)
                if failure.code == ErrorCode::ConstraintViolation =>
            {
                Error::DuplicateVersion(record.document_id.clone())
            }
            other => Error::tracking(format!("Failed to insert record: {}", other)),
        })?;

        Ok(())
    }

    fn update(&self, document_id: &str, mutation: RecordMutation) -> Result<UpdateOutcome> {
        let conn = self.conn.lock();

        let updated = Self::run_update(&conn, document_id, mutation)
            .map_err(|e| Error::tracking(format!("Failed to update {}: {}", document_id, e)))?;

        Ok(match updated {
            Some(record) => UpdateOutcome::Applied(record),
            None => UpdateOutcome::ConditionFailed,
        })
    }

    fn query_by_base(
        &self,
        base_document_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<DocumentVersionRecord>> {
        let conn = self.conn.lock();
        // SQLite treats a negative LIMIT as "no limit"
        let limit = limit.map(|l| l as i64).unwrap_or(-1);

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM document_versions WHERE base_document_id = ?1 \
                 ORDER BY upload_timestamp DESC, document_version DESC LIMIT ?2",
                COLUMNS
            ))
            .map_err(|e| Error::tracking(format!("Failed to prepare query: {}", e)))?;

        let records = stmt
            .query_map(params![base_document_id, limit], row_to_record)
            .map_err(|e| Error::tracking(format!("Failed to query history: {}", e)))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::tracking(format!("Failed to read history row: {}", e)))?;

        Ok(records)
    }

    fn scan(&self) -> Result<Vec<DocumentVersionRecord>> {
        let conn = self.conn.lock();

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM document_versions ORDER BY upload_timestamp DESC",
                COLUMNS
            ))
            .map_err(|e| Error::tracking(format!("Failed to prepare scan: {}", e)))?;

        let records = stmt
            .query_map([], row_to_record)
            .map_err(|e| Error::tracking(format!("Failed to scan records: {}", e)))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::tracking(format!("Failed to read scanned row: {}", e)))?;

        Ok(records)
    }

    fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock();

        let count = conn
            .execute(
                "DELETE FROM document_versions WHERE expiry <= ?1",
                params![ts_to_sql(now)],
            )
            .map_err(|e| Error::tracking(format!("Failed to delete expired records: {}", e)))?;

        Ok(count)
    }

    fn health_check(&self) -> Result<bool> {
        let conn = self.conn.lock();
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map(|v| v == 1)
            .map_err(|e| Error::tracking(format!("Health check failed: {}", e)))
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

// Fixed-width UTC form so that text order equals time order in SQL comparisons
fn ts_to_sql(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn ts_from_sql(idx: usize, value: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<DocumentVersionRecord> {
    let total_units: i64 = row.get(5)?;
    let indexed_units: i64 = row.get(6)?;
    let status_str: String = row.get(7)?;
    let completion_time: Option<String> = row.get(9)?;

    let status = status_str.parse::<TrackingStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            7,
            rusqlite::types::Type::Text,
            e.into(),
        )
    })?;

    Ok(DocumentVersionRecord {
        document_id: row.get(0)?,
        base_document_id: row.get(1)?,
        document_name: row.get(2)?,
        document_version: row.get(3)?,
        upload_timestamp: ts_from_sql(4, row.get(4)?)?,
        total_units: total_units as u32,
        indexed_units: indexed_units as u32,
        status,
        start_time: ts_from_sql(8, row.get(8)?)?,
        completion_time: completion_time.map(|s| ts_from_sql(9, s)).transpose()?,
        last_updated: ts_from_sql(10, row.get(10)?)?,
        expiry: ts_from_sql(11, row.get(11)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DocumentIdentity;
    use chrono::Duration as ChronoDuration;

    fn record(base: &str, uploaded_at: DateTime<Utc>, total: u32) -> DocumentVersionRecord {
        let identity = DocumentIdentity::new(base, uploaded_at);
        DocumentVersionRecord::new(&identity, "a.pdf", uploaded_at, total, 30).unwrap()
    }

    #[test]
    fn test_put_and_get() {
        let store = SqliteTrackingStore::in_memory().unwrap();
        let rec = record("doc/a.pdf", Utc::now(), 3);

        store.put(&rec).unwrap();

        let fetched = store.get(&rec.document_id).unwrap().unwrap();
        assert_eq!(fetched.document_id, rec.document_id);
        assert_eq!(fetched.status, TrackingStatus::Processing);
        assert_eq!(fetched.total_units, 3);
        assert!(store.get("doc/missing.pdf@v1").unwrap().is_none());
    }

    #[test]
    fn test_put_rejects_reused_document_id() {
        let store = SqliteTrackingStore::in_memory().unwrap();
        let rec = record("doc/a.pdf", Utc::now(), 3);

        store.put(&rec).unwrap();
        assert!(matches!(store.put(&rec), Err(Error::DuplicateVersion(_))));
    }

    #[test]
    fn test_increment_stops_at_total() {
        let store = SqliteTrackingStore::in_memory().unwrap();
        let rec = record("doc/a.pdf", Utc::now(), 2);
        store.put(&rec).unwrap();

        assert!(store.update(&rec.document_id, RecordMutation::IncrementIndexed).unwrap().is_applied());
        assert!(store.update(&rec.document_id, RecordMutation::IncrementIndexed).unwrap().is_applied());
        assert_eq!(
            store.update(&rec.document_id, RecordMutation::IncrementIndexed).unwrap(),
            UpdateOutcome::ConditionFailed
        );
        assert_eq!(store.get(&rec.document_id).unwrap().unwrap().indexed_units, 2);
    }

    #[test]
    fn test_advance_requires_strictly_greater() {
        let store = SqliteTrackingStore::in_memory().unwrap();
        let rec = record("doc/a.pdf", Utc::now(), 5);
        store.put(&rec).unwrap();

        assert!(store.update(&rec.document_id, RecordMutation::AdvanceIndexed(3)).unwrap().is_applied());
        assert!(!store.update(&rec.document_id, RecordMutation::AdvanceIndexed(3)).unwrap().is_applied());
        assert!(!store.update(&rec.document_id, RecordMutation::AdvanceIndexed(2)).unwrap().is_applied());
        assert!(!store.update(&rec.document_id, RecordMutation::AdvanceIndexed(6)).unwrap().is_applied());
        assert_eq!(store.get(&rec.document_id).unwrap().unwrap().indexed_units, 3);
    }

    #[test]
    fn test_complete_requires_full_count_and_applies_once() {
        let store = SqliteTrackingStore::in_memory().unwrap();
        let rec = record("doc/a.pdf", Utc::now(), 1);
        store.put(&rec).unwrap();
        let at = Utc::now();

        assert!(!store.update(&rec.document_id, RecordMutation::Complete { at }).unwrap().is_applied());

        store.update(&rec.document_id, RecordMutation::IncrementIndexed).unwrap();
        let first = store.update(&rec.document_id, RecordMutation::Complete { at }).unwrap();
        let second = store
            .update(&rec.document_id, RecordMutation::Complete { at: at + ChronoDuration::seconds(5) })
            .unwrap();

        match first {
            UpdateOutcome::Applied(done) => {
                assert_eq!(done.status, TrackingStatus::Completed);
                assert!(done.completion_time.is_some());
            }
            other => panic!("expected completion, got {:?}", other),
        }
        assert_eq!(second, UpdateOutcome::ConditionFailed);
    }

    #[test]
    fn test_cancelled_record_ignores_progress() {
        let store = SqliteTrackingStore::in_memory().unwrap();
        let rec = record("doc/a.pdf", Utc::now(), 3);
        store.put(&rec).unwrap();

        assert!(store.update(&rec.document_id, RecordMutation::Cancel { at: Utc::now() }).unwrap().is_applied());
        assert!(!store.update(&rec.document_id, RecordMutation::IncrementIndexed).unwrap().is_applied());
        assert!(!store.update(&rec.document_id, RecordMutation::Cancel { at: Utc::now() }).unwrap().is_applied());

        let fetched = store.get(&rec.document_id).unwrap().unwrap();
        assert_eq!(fetched.status, TrackingStatus::Cancelled);
        assert_eq!(fetched.indexed_units, 0);
    }

    #[test]
    fn test_query_by_base_newest_first_with_limit() {
        let store = SqliteTrackingStore::in_memory().unwrap();
        let t0 = Utc::now() - ChronoDuration::hours(2);
        for i in 0..3 {
            store.put(&record("doc/a.pdf", t0 + ChronoDuration::minutes(i), 1)).unwrap();
        }
        store.put(&record("doc/b.pdf", t0, 1)).unwrap();

        let history = store.query_by_base("doc/a.pdf", None).unwrap();
        assert_eq!(history.len(), 3);
        assert!(history[0].upload_timestamp > history[1].upload_timestamp);
        assert!(history[1].upload_timestamp > history[2].upload_timestamp);

        let limited = store.query_by_base("doc/a.pdf", Some(2)).unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].document_id, history[0].document_id);
    }

    #[test]
    fn test_delete_expired() {
        let store = SqliteTrackingStore::in_memory().unwrap();
        let mut stale = record("doc/old.pdf", Utc::now(), 1);
        stale.expiry = Utc::now() - ChronoDuration::days(1);
        store.put(&stale).unwrap();
        store.put(&record("doc/new.pdf", Utc::now(), 1)).unwrap();

        assert_eq!(store.delete_expired(Utc::now()).unwrap(), 1);
        assert_eq!(store.scan().unwrap().len(), 1);
    }

    #[test]
    fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tracking.db");
        let rec = record("doc/a.pdf", Utc::now(), 2);

        {
            let store = SqliteTrackingStore::new(&path).unwrap();
            store.put(&rec).unwrap();
            store.update(&rec.document_id, RecordMutation::IncrementIndexed).unwrap();
        }

        let reopened = SqliteTrackingStore::new(&path).unwrap();
        assert_eq!(reopened.get(&rec.document_id).unwrap().unwrap().indexed_units, 1);
        assert!(reopened.health_check().unwrap());
    }
}
