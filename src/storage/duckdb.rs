use super::traits::{DetectionId, DetectionRecord, DetectionSink, StorageError};
use crate::source::event::TIMESTAMP_FORMAT;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use duckdb::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Check if a process with the given PID is still running
fn is_process_running(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use std::process::Command;
        Command::new("ps")
            .arg("-p")
            .arg(pid.to_string())
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        // Without ps, assume the holder is alive
        let _ = pid;
        true
    }
}

/// Extract PID from DuckDB lock error message
fn extract_pid_from_lock_error(error_msg: &str) -> Option<u32> {
    // Error format: "... (PID 12345) ..."
    let start = error_msg.find("(PID ")? + 5;
    let end = error_msg[start..].find(')')?;
    error_msg[start..start + end].parse().ok()
}

fn remove_lock_files(db_path: &Path) -> std::io::Result<()> {
    let wal_path = PathBuf::from(format!("{}.wal", db_path.display()));
    let lock_path = PathBuf::from(format!("{}.lock", db_path.display()));

    if wal_path.exists() {
        std::fs::remove_file(&wal_path)?;
        tracing::info!("Removed stale WAL file: {}", wal_path.display());
    }

    if lock_path.exists() {
        std::fs::remove_file(&lock_path)?;
        tracing::info!("Removed stale lock file: {}", lock_path.display());
    }

    Ok(())
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, StorageError> {
    conn.lock()
        .map_err(|_| StorageError::Database("connection mutex poisoned".to_string()))
}

/// Detection sink backed by a DuckDB file.
pub struct DuckDbSink {
    conn: Arc<Mutex<Connection>>,
}

impl DuckDbSink {
    /// Open (or create) the database at `path`, clearing a lock left behind
    /// by a process that no longer exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Database(format!(
                    "failed to create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        match Connection::open(path) {
            Ok(conn) => Ok(Self::from_connection(conn)),
            Err(e) => {
                let error_msg = e.to_string();

                if error_msg.contains("Could not set lock") {
                    tracing::warn!("Database lock detected: {}", error_msg);

                    if let Some(pid) = extract_pid_from_lock_error(&error_msg) {
                        if !is_process_running(pid) {
                            tracing::warn!(
                                "Process {} is not running, removing stale lock files",
                                pid
                            );

                            if let Err(io_err) = remove_lock_files(path) {
                                tracing::error!("Failed to remove lock files: {}", io_err);
                                return Err(e.into());
                            }

                            let conn = Connection::open(path)?;
                            return Ok(Self::from_connection(conn));
                        }
                        tracing::error!("Process {} is still running, cannot acquire lock", pid);
                    }
                }

                Err(e.into())
            }
        }
    }

    /// In-memory database, mostly for tests.
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    pub async fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;

            conn.execute_batch(
                "CREATE SEQUENCE IF NOT EXISTS detections_id_seq START 1;
                 CREATE TABLE IF NOT EXISTS detections (
                    id BIGINT PRIMARY KEY DEFAULT nextval('detections_id_seq'),
                    time TIMESTAMP NOT NULL,
                    latitude DOUBLE NOT NULL,
                    longitude DOUBLE NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_detections_time ON detections(time);",
            )?;

            Ok::<(), StorageError>(())
        })
        .await
        .map_err(|e| StorageError::Database(format!("Task join error: {}", e)))?
    }

    /// Most recent detections, newest first.
    pub async fn recent(&self, limit: usize) -> Result<Vec<DetectionRecord>, StorageError> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let mut stmt = conn.prepare(&format!(
                "SELECT id, strftime(time, '{}'), latitude, longitude
                 FROM detections ORDER BY id DESC LIMIT {}",
                TIMESTAMP_FORMAT, limit
            ))?;

            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, f64>(3)?,
                ))
            })?;

            let mut records = Vec::new();
            for row in rows {
                let (id, time, latitude, longitude) = row?;
                let time = NaiveDateTime::parse_from_str(&time, TIMESTAMP_FORMAT).map_err(|e| {
                    StorageError::InvalidData(format!("bad time '{}' for id {}: {}", time, id, e))
                })?;
                records.push(DetectionRecord {
                    id,
                    time,
                    latitude,
                    longitude,
                });
            }
            Ok(records)
        })
        .await
        .map_err(|e| StorageError::Database(format!("Task join error: {}", e)))?
    }
}

#[async_trait]
impl DetectionSink for DuckDbSink {
    async fn write(
        &self,
        timestamp: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<DetectionId, StorageError> {
        let conn = self.conn.clone();
        let timestamp = timestamp.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            // The database owns timestamp interpretation; an unparseable
            // value fails the insert.
            let id = conn.query_row(
                "INSERT INTO detections (time, latitude, longitude)
                 VALUES (CAST(? AS TIMESTAMP), ?, ?)
                 RETURNING id",
                duckdb::params![timestamp, latitude, longitude],
                |row| row.get::<_, i64>(0),
            )?;
            Ok::<DetectionId, StorageError>(id)
        })
        .await
        .map_err(|e| StorageError::Database(format!("Task join error: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_sink() -> DuckDbSink {
        let sink = DuckDbSink::in_memory().unwrap();
        sink.init_schema().await.unwrap();
        sink
    }

    #[tokio::test]
    async fn test_schema_initialization_is_idempotent() {
        let sink = setup_sink().await;
        sink.init_schema().await.unwrap();
        assert!(sink.recent(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_write_returns_increasing_ids() {
        let sink = setup_sink().await;

        let first = sink.write("2024-01-01 10:00:00", 12.345678, 98.765432).await.unwrap();
        let second = sink.write("2024-01-01 10:05:00", 1.0, 2.0).await.unwrap();
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_recent_newest_first() {
        let sink = setup_sink().await;
        sink.write("2024-01-01 10:00:00", 1.0, 1.0).await.unwrap();
        sink.write("2024-01-01 10:01:00", 2.0, 2.0).await.unwrap();
        sink.write("2024-01-01 10:02:00", 3.0, 3.0).await.unwrap();

        let records = sink.recent(2).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].latitude, 3.0);
        assert_eq!(records[0].time.to_string(), "2024-01-01 10:02:00");
        assert_eq!(records[1].longitude, 2.0);
    }

    #[tokio::test]
    async fn test_unparseable_timestamp_fails_write() {
        let sink = setup_sink().await;
        let result = sink.write("not a time", 1.0, 2.0).await;
        assert!(result.is_err());
        assert!(sink.recent(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("detections.duckdb");

        let sink = DuckDbSink::open(&path).unwrap();
        sink.init_schema().await.unwrap();
        let id = sink.write("2024-06-01 08:30:00", -1.5, 36.8).await.unwrap();
        drop(sink);

        let reopened = DuckDbSink::open(&path).unwrap();
        let records = reopened.recent(5).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, id);
    }

    #[test]
    fn test_extract_pid_from_lock_error() {
        let error_msg = "IO Error: Could not set lock on file \"/path/to/db.duckdb\": Conflicting lock is held in /path/to/binary (deleted) (PID 12345). See also https://duckdb.org/docs/stable/connect/concurrency";
        assert_eq!(extract_pid_from_lock_error(error_msg), Some(12345));
        assert_eq!(extract_pid_from_lock_error("Some other error"), None);
        assert_eq!(extract_pid_from_lock_error("Error (PID abc)"), None);
    }

    #[test]
    #[cfg(unix)]
    fn test_is_process_running() {
        assert!(is_process_running(std::process::id()));
        assert!(!is_process_running(999999));
    }
}
