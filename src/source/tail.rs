//! Incremental tailing of the detection file.
//!
//! A [`TailReader`] remembers how many bytes of the file it has consumed and,
//! on every [`poll`](TailReader::poll), reads only what was appended since.
//! Its state sits behind one async mutex which doubles as the read-in-flight
//! guard: a poll that finds the mutex held returns [`PollOutcome::Busy`]
//! without touching anything, so polls never overlap. One cycle reads at most
//! [`MAX_READ_CHUNK_BYTES`]; anything beyond that waits for the next poll.
//!
//! A trailing line without a terminator is held back as a fragment. If no
//! further read replaces it within the quiet period, a flush task hands it to
//! the line handler as if it had been terminated.

use crate::source::frame::assemble;
use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, error, trace, warn};

/// Most bytes a single cycle reads. A larger backlog is drained over
/// consecutive polls.
pub const MAX_READ_CHUNK_BYTES: u64 = 8 * 1024 * 1024;

/// Receives every complete line, in file order.
#[async_trait]
pub trait LineHandler: Send + Sync {
    async fn handle_line(&self, line: &str);
}

/// What a single poll did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Another cycle was still running; nothing was done.
    Busy,
    /// No new bytes.
    Idle,
    /// New bytes were consumed.
    Read { bytes: u64, lines: usize },
    /// Stat or read failed; the offset is unchanged and the next poll retries.
    Failed,
}

#[derive(Debug, Default)]
struct WatchState {
    offset: u64,
    fragment: Vec<u8>,
    /// Bumped whenever the fragment is replaced or cleared, so a flush that
    /// was scheduled for an older fragment can tell it is stale.
    generation: u64,
    pending_flush: Option<AbortHandle>,
}

impl WatchState {
    fn cancel_flush(&mut self) {
        if let Some(handle) = self.pending_flush.take() {
            handle.abort();
        }
    }

    fn discard_fragment(&mut self) {
        self.cancel_flush();
        self.fragment.clear();
        self.generation += 1;
    }
}

pub struct TailReader {
    path: PathBuf,
    quiet_period: Duration,
    max_read: u64,
    handler: Arc<dyn LineHandler>,
    state: Mutex<WatchState>,
}

impl TailReader {
    /// Start watching `path` from its current end. The file is created empty
    /// if it does not exist; existing content is never replayed.
    pub async fn open(
        path: impl Into<PathBuf>,
        quiet_period: Duration,
        handler: Arc<dyn LineHandler>,
    ) -> std::io::Result<Arc<Self>> {
        Self::open_with_read_limit(path, quiet_period, handler, MAX_READ_CHUNK_BYTES).await
    }

    /// Like [`open`](Self::open), reading at most `max_read` bytes per cycle.
    pub async fn open_with_read_limit(
        path: impl Into<PathBuf>,
        quiet_period: Duration,
        handler: Arc<dyn LineHandler>,
        max_read: u64,
    ) -> std::io::Result<Arc<Self>> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        let offset = fs::metadata(&path).await?.len();
        debug!(path = %path.display(), offset, "Tailing from end of file");

        Ok(Arc::new(Self {
            path,
            quiet_period,
            max_read: max_read.max(1),
            handler,
            state: Mutex::new(WatchState {
                offset,
                ..WatchState::default()
            }),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes consumed so far. Waits for any running cycle to finish.
    pub async fn offset(&self) -> u64 {
        self.state.lock().await.offset
    }

    /// The unterminated tail currently held back.
    pub async fn pending_fragment(&self) -> Vec<u8> {
        self.state.lock().await.fragment.clone()
    }

    /// True while a read cycle or a stall flush is running.
    pub fn is_busy(&self) -> bool {
        self.state.try_lock().is_err()
    }

    /// Run one read cycle: pick up appended bytes, split them into lines and
    /// pass each line to the handler before returning.
    pub async fn poll(self: &Arc<Self>) -> PollOutcome {
        let Ok(mut state) = self.state.try_lock() else {
            trace!("Read already in flight, skipping poll");
            return PollOutcome::Busy;
        };

        let size = match fs::metadata(&self.path).await {
            Ok(metadata) => metadata.len(),
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Failed to stat watched file");
                return PollOutcome::Failed;
            }
        };

        if size < state.offset {
            warn!(
                path = %self.path.display(),
                previous_offset = state.offset,
                current_size = size,
                "File truncated or rotated, reading from the start"
            );
            state.offset = 0;
            state.discard_fragment();
        }

        if size == state.offset {
            return PollOutcome::Idle;
        }

        let end = size.min(state.offset.saturating_add(self.max_read));
        let bytes = match read_range(&self.path, state.offset, end).await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(
                    path = %self.path.display(),
                    offset = state.offset,
                    error = %e,
                    "Failed to read appended bytes"
                );
                return PollOutcome::Failed;
            }
        };
        let read = bytes.len() as u64;
        state.offset += read;

        let frames = assemble(&state.fragment, &bytes);
        state.fragment = frames.fragment;
        state.generation += 1;

        // Mid-backlog the fragment is just a chunk boundary; the next cycle
        // continues it.
        if state.fragment.is_empty() || state.offset < size {
            state.cancel_flush();
        } else {
            self.schedule_flush(&mut state);
        }

        debug!(
            bytes = read,
            remaining = size.saturating_sub(state.offset),
            lines = frames.lines.len(),
            offset = state.offset,
            "Read appended data"
        );

        for line in &frames.lines {
            self.handler.handle_line(line).await;
        }

        PollOutcome::Read {
            bytes: read,
            lines: frames.lines.len(),
        }
    }

    fn schedule_flush(self: &Arc<Self>, state: &mut WatchState) {
        state.cancel_flush();

        let generation = state.generation;
        let quiet_period = self.quiet_period;
        let reader = Arc::clone(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(quiet_period).await;
            reader.flush_stalled(generation).await;
        });
        state.pending_flush = Some(task.abort_handle());
    }

    /// Deliver the held-back fragment as a complete line, provided it is
    /// still the one that was current at `generation`.
    async fn flush_stalled(&self, generation: u64) -> bool {
        let mut state = self.state.lock().await;
        if state.generation != generation || state.fragment.is_empty() {
            return false;
        }

        let fragment = std::mem::take(&mut state.fragment);
        state.generation += 1;
        state.pending_flush = None;

        let line = String::from_utf8_lossy(&fragment);
        debug!(len = fragment.len(), "Flushing unterminated line after quiet period");
        self.handler.handle_line(&line).await;
        true
    }
}

async fn read_range(path: &Path, start: u64, end: u64) -> std::io::Result<Vec<u8>> {
    let mut file = File::open(path).await?;
    file.seek(SeekFrom::Start(start)).await?;

    let len = end - start;
    let mut buf = Vec::with_capacity(usize::try_from(len).unwrap_or(0));
    file.take(len).read_to_end(&mut buf).await?;
    Ok(buf)
}
