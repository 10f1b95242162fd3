//! Core types for the ingest tracker

pub mod message;
pub mod record;
pub mod response;

pub use message::{
    CompletedPayload, DomainNotification, InboundMessage, LifecycleMessage, StartedPayload,
    UnitIndexedPayload,
};
pub use record::{DocumentIdentity, DocumentVersionRecord, TrackingStatus};
pub use response::{
    BatchReport, DocumentHistoryResponse, DocumentListResponse, DocumentStatusResponse,
    MessageOutcome, MessageResult, QueryStatus, VersionSummary,
};
