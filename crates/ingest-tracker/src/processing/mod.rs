//! Background text extraction with a request queue and progress tracking

mod extraction_queue;
mod extraction_worker;

pub use extraction_queue::{
    ExtractionProgress, ExtractionQueue, ExtractionRequest, ExtractionStatus, QueueStats,
};
pub use extraction_worker::{output_key, parallel_extractions, ExtractionWorker};
