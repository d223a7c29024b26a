use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Identifier assigned by the sink to a stored detection.
pub type DetectionId = i64;

/// Destination for accepted detections.
///
/// One call per accepted event; callers do not retry.
#[async_trait]
pub trait DetectionSink: Send + Sync {
    async fn write(
        &self,
        timestamp: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<DetectionId, StorageError>;
}

/// A stored detection as read back from storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub id: DetectionId,
    pub time: NaiveDateTime,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl From<duckdb::Error> for StorageError {
    fn from(e: duckdb::Error) -> Self {
        StorageError::Database(e.to_string())
    }
}
