//! Document version and progress tracking

mod tracker;

pub use tracker::{InitializeOutcome, LatestStatus, NewVersion, ProgressOutcome, VersionTracker};
