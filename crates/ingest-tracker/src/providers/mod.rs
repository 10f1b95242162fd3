//! Provider abstractions for OCR jobs, notifications, and blob storage

pub mod blob_store;
pub mod http_ocr;
pub mod notification_bus;

pub use blob_store::{BlobStore, LocalBlobStore};
pub use http_ocr::HttpOcrProvider;
pub use notification_bus::{BroadcastBus, FanoutBus, NotificationBus, WebhookBus};
