//! ingest-tracker: document version tracking and progress aggregation for
//! ingestion pipelines
//!
//! Every upload of a document becomes a new tracked version. Older in-flight
//! versions are superseded, per-unit indexing events are counted with
//! conditional updates that tolerate duplicate and reordered delivery, and
//! a version flips to completed exactly once. Text extraction runs on a
//! long-running OCR provider through a driver that backs off on rate limits.

pub mod config;
pub mod driver;
pub mod error;
pub mod processing;
pub mod providers;
pub mod query;
pub mod relay;
pub mod server;
pub mod storage;
pub mod tracking;
pub mod types;

pub use config::TrackerConfig;
pub use driver::{DriverError, JobDriver, JobOutcome};
pub use error::{Error, Result};
pub use query::StatusQuery;
pub use relay::NotificationRelay;
pub use storage::{SqliteTrackingStore, TrackingStore};
pub use tracking::{NewVersion, ProgressOutcome, VersionTracker};
pub use types::{DocumentVersionRecord, InboundMessage, TrackingStatus};
