pub mod cli;
pub mod config;
pub mod dedup;
pub mod pipeline;
pub mod source;
pub mod storage;

pub use pipeline::{start_ingest, IngestHandle, IngestOptions, StoredDetection};
