/// End-to-end tests for the ingestion pipeline
///
/// These tests drive a real file through the tail reader, parser, cooldown
/// gate and a DuckDB sink:
/// - appended lines land in storage with sink-assigned ids
/// - repeats at the same rounded location are stored once per window
/// - truncation restarts reading without losing later lines
/// - an unterminated last line is stored after the quiet period
/// - a slow sink never causes overlapping read cycles
use async_trait::async_trait;
use spotwatch::dedup::CooldownGate;
use spotwatch::pipeline::{start_ingest, DetectionForwarder, IngestOptions, StoredDetection};
use spotwatch::source::tail::{PollOutcome, TailReader};
use spotwatch::storage::traits::{DetectionId, DetectionSink, StorageError};
use spotwatch::storage::DuckDbSink;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: append text to the watched file
    fn append(path: &Path, text: &str) {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(path)
            .unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file.flush().unwrap();
    }

    /// Helper: options with a fast poll and a short quiet period
    fn fast_options(path: PathBuf) -> IngestOptions {
        IngestOptions {
            path,
            poll_interval: Duration::from_millis(5),
            flush_quiet_period: Duration::from_millis(100),
            ..IngestOptions::default()
        }
    }

    async fn duckdb_sink() -> Arc<DuckDbSink> {
        let sink = DuckDbSink::in_memory().unwrap();
        sink.init_schema().await.unwrap();
        Arc::new(sink)
    }

    /// Sink that takes a while per write and counts concurrent writers
    struct SlowSink {
        delay: Duration,
        active: AtomicUsize,
        max_active: AtomicUsize,
        written: Mutex<Vec<String>>,
    }

    impl SlowSink {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                written: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl DetectionSink for SlowSink {
        async fn write(
            &self,
            timestamp: &str,
            _latitude: f64,
            _longitude: f64,
        ) -> Result<DetectionId, StorageError> {
            let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now_active, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            let mut written = self.written.lock().unwrap();
            written.push(timestamp.to_string());
            Ok(written.len() as DetectionId)
        }
    }

    #[tokio::test]
    async fn test_appended_detections_are_stored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detections.txt");
        let sink = duckdb_sink().await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = seen.clone();

        let options = fast_options(path.clone())
            .on_detection(move |d: StoredDetection| seen_cb.lock().unwrap().push(d));
        let handle = start_ingest(options, sink.clone()).await.unwrap();

        append(
            &path,
            "2024-01-01 10:00:00,12.345678,98.765432\nbad,data\n2024-01-01 10:00:03,-1.25,36.5\n",
        );
        tokio::time::sleep(Duration::from_millis(300)).await;

        handle.stop();
        let stats = handle.stats();
        handle.stopped().await.unwrap();

        let records = sink.recent(10).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].latitude, -1.25);
        assert_eq!(records[1].time.to_string(), "2024-01-01 10:00:00");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].id, records[1].id);
        assert_eq!(seen[0].timestamp, "2024-01-01 10:00:00");

        assert_eq!(stats.stored, 2);
        assert_eq!(stats.rejected, 1);
    }

    #[tokio::test]
    async fn test_repeat_location_stored_once_per_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detections.txt");
        let sink = duckdb_sink().await;

        let handle = start_ingest(fast_options(path.clone()), sink.clone())
            .await
            .unwrap();

        append(&path, "2024-01-01 10:00:00,12.3456781,98.765432\n");
        tokio::time::sleep(Duration::from_millis(100)).await;
        // Same location once rounded to six decimals
        append(&path, "2024-01-01 10:00:01,12.3456784,98.765432\n");
        append(&path, "2024-01-01 10:00:02,12.345679,98.765432\n");
        tokio::time::sleep(Duration::from_millis(200)).await;

        handle.stop();
        let stats = handle.stats();
        handle.stopped().await.unwrap();

        assert_eq!(sink.recent(10).await.unwrap().len(), 2);
        assert_eq!(stats.suppressed, 1);
    }

    #[tokio::test]
    async fn test_short_cooldown_lets_repeat_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detections.txt");
        let sink = duckdb_sink().await;

        let options = IngestOptions {
            cooldown: Duration::from_millis(50),
            ..fast_options(path.clone())
        };
        let handle = start_ingest(options, sink.clone()).await.unwrap();

        append(&path, "2024-01-01 10:00:00,1.5,2.5\n");
        tokio::time::sleep(Duration::from_millis(150)).await;
        append(&path, "2024-01-01 10:00:10,1.5,2.5\n");
        tokio::time::sleep(Duration::from_millis(150)).await;

        handle.stop();
        handle.stopped().await.unwrap();

        assert_eq!(sink.recent(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_truncated_file_is_read_from_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detections.txt");
        let sink = duckdb_sink().await;

        let handle = start_ingest(fast_options(path.clone()), sink.clone())
            .await
            .unwrap();

        append(&path, "2024-01-01 10:00:00,1,1\n2024-01-01 10:00:01,2,2\n");
        tokio::time::sleep(Duration::from_millis(100)).await;

        std::fs::write(&path, "").unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.reader().offset().await, 0);

        append(&path, "2024-01-01 10:05:00,3,3\n");
        tokio::time::sleep(Duration::from_millis(100)).await;

        handle.stop();
        handle.stopped().await.unwrap();

        let records = sink.recent(10).await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].latitude, 3.0);
    }

    #[tokio::test]
    async fn test_unterminated_last_line_is_flushed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detections.txt");
        let sink = duckdb_sink().await;

        let handle = start_ingest(fast_options(path.clone()), sink.clone())
            .await
            .unwrap();

        append(&path, "2024-01-01 10:00:00,7.5,8.5");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sink.recent(10).await.unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(250)).await;

        handle.stop();
        handle.stopped().await.unwrap();

        let records = sink.recent(10).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].longitude, 8.5);
    }

    #[tokio::test]
    async fn test_failed_write_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detections.txt");
        let sink = duckdb_sink().await;

        let handle = start_ingest(fast_options(path.clone()), sink.clone())
            .await
            .unwrap();

        // The database rejects this timestamp, so the write fails
        append(&path, "sometime,4.0,5.0\n");
        tokio::time::sleep(Duration::from_millis(100)).await;
        // Same location, valid timestamp, still inside the cooldown
        append(&path, "2024-01-01 10:00:00,4.0,5.0\n");
        tokio::time::sleep(Duration::from_millis(100)).await;

        handle.stop();
        let stats = handle.stats();
        handle.stopped().await.unwrap();

        assert!(sink.recent(10).await.unwrap().is_empty());
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.suppressed, 1);
    }

    #[tokio::test]
    async fn test_slow_sink_never_overlaps_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detections.txt");
        let sink = Arc::new(SlowSink::new(Duration::from_millis(40)));

        // Poll far faster than a single write completes
        let options = IngestOptions {
            poll_interval: Duration::from_millis(1),
            ..fast_options(path.clone())
        };
        let handle = start_ingest(options, sink.clone()).await.unwrap();

        let mut batch = String::new();
        for i in 0..5 {
            batch.push_str(&format!("2024-01-01 10:00:0{},{}.0,1.0\n", i, i));
        }
        append(&path, &batch);
        tokio::time::sleep(Duration::from_millis(400)).await;

        handle.stop();
        handle.stopped().await.unwrap();

        let written = sink.written.lock().unwrap().clone();
        assert_eq!(written.len(), 5);
        assert_eq!(written[0], "2024-01-01 10:00:00");
        assert_eq!(written[4], "2024-01-01 10:00:04");
        assert_eq!(sink.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_manual_poll_reports_busy_during_slow_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detections.txt");
        let sink = Arc::new(SlowSink::new(Duration::from_millis(100)));
        let gate = Arc::new(CooldownGate::new(Duration::from_secs(300), 6));
        let forwarder = Arc::new(DetectionForwarder::new(gate, sink.clone(), None));

        let reader = TailReader::open(&path, Duration::from_millis(300), forwarder)
            .await
            .unwrap();
        append(&path, "2024-01-01 10:00:00,1,2\n");

        let slow = {
            let reader = reader.clone();
            tokio::spawn(async move { reader.poll().await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;

        append(&path, "2024-01-01 10:00:01,3,4\n");
        assert_eq!(reader.poll().await, PollOutcome::Busy);
        assert_eq!(
            slow.await.unwrap(),
            PollOutcome::Read { bytes: 24, lines: 1 }
        );
        assert_eq!(sink.written.lock().unwrap().len(), 1);

        assert_eq!(
            reader.poll().await,
            PollOutcome::Read { bytes: 24, lines: 1 }
        );
        assert_eq!(sink.written.lock().unwrap().len(), 2);
    }
}
