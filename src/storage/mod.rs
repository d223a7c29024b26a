pub mod duckdb;
pub mod traits;

pub use self::duckdb::DuckDbSink;
pub use traits::{DetectionId, DetectionRecord, DetectionSink, StorageError};
