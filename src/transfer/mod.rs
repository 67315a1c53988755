use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::config::DEFAULT_CHUNK_SIZE;
use crate::network::{Connection, Deadline};
use crate::protocol::unix_seconds;
use crate::{Error, Result};

/// Milestone step when the total size is unknown.
const UNKNOWN_SIZE_QUANTUM: u64 = 256 * 1024;
const UNKNOWN: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

/// Bookkeeping for one transfer, owned by the engine call driving it.
#[derive(Debug)]
pub struct TransferState {
    pub direction: Direction,
    pub expected_bytes: Option<u64>,
    pub transferred_bytes: u64,
    pub started_at: Instant,
    pub deadline: Deadline,
}

impl TransferState {
    fn new(direction: Direction, expected_bytes: Option<u64>, deadline: Deadline) -> Self {
        Self {
            direction,
            expected_bytes,
            transferred_bytes: 0,
            started_at: Instant::now(),
            deadline,
        }
    }

    fn finish(&self) {
        tracing::debug!(
            direction = ?self.direction,
            bytes = self.transferred_bytes,
            elapsed_ms = self.started_at.elapsed().as_millis() as u64,
            "transfer finished"
        );
    }
}

/// Monotonic byte counter for one transfer.
///
/// Poll [`Progress::transferred`] at any time, or [`Progress::subscribe`] to be woken at
/// milestones: every 25% of the expected size, or every 256 KiB when the size is unknown.
#[derive(Debug)]
pub struct Progress {
    transferred: AtomicU64,
    expected: AtomicU64,
    milestones: watch::Sender<u64>,
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

impl Progress {
    pub fn new() -> Self {
        let (milestones, _) = watch::channel(0);
        Self {
            transferred: AtomicU64::new(0),
            expected: AtomicU64::new(UNKNOWN),
            milestones,
        }
    }

    pub fn set_expected(&self, expected: Option<u64>) {
        self.expected
            .store(expected.unwrap_or(UNKNOWN), Ordering::Relaxed);
    }

    pub fn expected(&self) -> Option<u64> {
        match self.expected.load(Ordering::Relaxed) {
            UNKNOWN => None,
            n => Some(n),
        }
    }

    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Relaxed)
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.milestones.subscribe()
    }

    /// Log each milestone at debug level until this counter is dropped.
    pub fn trace(&self, label: &str) {
        let mut rx = self.subscribe();
        let label = label.to_string();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let bytes = *rx.borrow_and_update();
                tracing::debug!(file = %label, bytes, "transfer progress");
            }
        });
    }

    fn quantum(&self) -> u64 {
        match self.expected() {
            Some(0) | None => UNKNOWN_SIZE_QUANTUM,
            Some(n) => n.div_ceil(4),
        }
    }

    fn add(&self, n: u64) {
        let before = self.transferred.fetch_add(n, Ordering::Relaxed);
        let after = before + n;
        let quantum = self.quantum();
        if after / quantum > before / quantum {
            self.milestones.send_replace(after);
        }
    }

    fn complete(&self) {
        self.milestones.send_replace(self.transferred());
    }
}

/// An opened file ready to stream to a peer.
pub struct Source {
    file: File,
    size: u64,
    modified: u64,
}

impl Source {
    /// Open a regular file. Any failure to open counts as not found.
    pub async fn open(path: &Path) -> Result<Self> {
        let not_found = || Error::FileNotFound(path.to_path_buf());
        let file = File::open(path).await.map_err(|_| not_found())?;
        let metadata = file.metadata().await.map_err(|_| not_found())?;
        if !metadata.is_file() {
            return Err(not_found());
        }
        Ok(Self {
            file,
            size: metadata.len(),
            modified: unix_seconds(metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH)),
        })
    }

    /// Size at open time; never more than this is sent.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Seconds since the Unix epoch
    pub fn modified(&self) -> u64 {
        self.modified
    }
}

/// Streams file bytes to and from a [`Connection`] in bounded chunks.
#[derive(Debug, Clone, Copy)]
pub struct TransferEngine {
    chunk_size: usize,
}

impl Default for TransferEngine {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl TransferEngine {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Open `path` and send its contents until EOF. Returns bytes sent.
    pub async fn send_file(
        &self,
        conn: &mut Connection,
        path: &Path,
        direction: Direction,
        deadline: Deadline,
        progress: Option<&Progress>,
    ) -> Result<u64> {
        let source = Source::open(path).await?;
        self.send_source(conn, source, direction, deadline, progress)
            .await
    }

    /// Send an already opened file, stopping at EOF or at its announced size, whichever is first.
    ///
    /// A short count means the file shrank after opening; the peer sees it as a truncated stream.
    pub async fn send_source(
        &self,
        conn: &mut Connection,
        mut source: Source,
        direction: Direction,
        deadline: Deadline,
        progress: Option<&Progress>,
    ) -> Result<u64> {
        let mut state = TransferState::new(direction, Some(source.size), deadline);
        if let Some(p) = progress {
            p.set_expected(Some(source.size));
        }

        let mut buffer = vec![0u8; self.chunk_size];
        while state.transferred_bytes < source.size {
            let remaining = source.size - state.transferred_bytes;
            let want = remaining.min(self.chunk_size as u64) as usize;
            let n = source.file.read(&mut buffer[..want]).await?;
            if n == 0 {
                tracing::warn!(
                    expected = source.size,
                    sent = state.transferred_bytes,
                    "source file shrank during send"
                );
                break;
            }
            conn.send_exact(&buffer[..n], state.deadline).await?;
            state.transferred_bytes += n as u64;
            if let Some(p) = progress {
                p.add(n as u64);
            }
        }

        if let Some(p) = progress {
            p.complete();
        }
        state.finish();
        Ok(state.transferred_bytes)
    }

    /// Create (or truncate) `path` and fill it from the connection.
    ///
    /// With `expected` set, exactly that many bytes are read and an early close is
    /// [`Error::Truncated`]. Without it, bytes are copied until the peer closes.
    /// A partially written file is left in place.
    pub async fn receive_file(
        &self,
        conn: &mut Connection,
        path: &Path,
        direction: Direction,
        expected: Option<u64>,
        deadline: Deadline,
        progress: Option<&Progress>,
    ) -> Result<u64> {
        let file = File::create(path).await?;
        self.receive_into(conn, file, direction, expected, deadline, progress)
            .await
    }

    /// Same as [`receive_file`](Self::receive_file) with a destination the caller already created.
    pub async fn receive_into(
        &self,
        conn: &mut Connection,
        mut file: File,
        direction: Direction,
        expected: Option<u64>,
        deadline: Deadline,
        progress: Option<&Progress>,
    ) -> Result<u64> {
        let mut state = TransferState::new(direction, expected, deadline);
        if let Some(p) = progress {
            p.set_expected(expected);
        }

        let mut buffer = vec![0u8; self.chunk_size];
        loop {
            let want = match state.expected_bytes {
                Some(total) if state.transferred_bytes >= total => break,
                Some(total) => (total - state.transferred_bytes).min(self.chunk_size as u64) as usize,
                None => self.chunk_size,
            };

            let n = conn.recv_some(&mut buffer[..want], state.deadline).await?;
            if n == 0 {
                match state.expected_bytes {
                    Some(total) => {
                        file.flush().await?;
                        return Err(Error::Truncated {
                            expected: total,
                            received: state.transferred_bytes,
                        });
                    }
                    None => break,
                }
            }

            file.write_all(&buffer[..n]).await?;
            state.transferred_bytes += n as u64;
            if let Some(p) = progress {
                p.add(n as u64);
            }
        }

        file.flush().await?;
        file.sync_all().await?;
        if let Some(p) = progress {
            p.complete();
        }
        state.finish();
        Ok(state.transferred_bytes)
    }
}

/// Resolve where a downloaded file should land: an explicit path, or the remote name in the cwd.
pub fn output_path(name: &str, output: Option<PathBuf>) -> PathBuf {
    output.unwrap_or_else(|| PathBuf::from(name))
}
