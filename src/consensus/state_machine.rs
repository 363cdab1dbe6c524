//! Callback contract between a replicated log and the state it drives.
//!
//! The log delivers committed entries to [`StateMachine::apply`] one at a
//! time, in index order. For compaction it asks for a [`Snapshot`] and later
//! feeds the persisted bytes back through [`StateMachine::restore`].

use crate::consensus::fsm::ApplyError;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// One committed log entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    /// Position in the log, starting at 1.
    pub index: u64,
    /// Opaque payload; for the ledger, one JSON transaction definition.
    pub data: Vec<u8>,
}

/// Errors while writing or reading a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("failed to encode snapshot entry: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("invalid snapshot line {line}: {source}")]
    Decode {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Destination of a snapshot.
///
/// Exactly one of [`SnapshotSink::close`] or [`SnapshotSink::cancel`] is
/// called once writing ends.
pub trait SnapshotSink: Write + Send {
    /// Commits the written bytes.
    fn close(&mut self) -> io::Result<()>;

    /// Discards the written bytes.
    fn cancel(&mut self) -> io::Result<()>;
}

/// Point-in-time state captured by [`StateMachine::snapshot`].
pub trait Snapshot: Send {
    /// Writes the snapshot into `sink`, then closes or cancels it.
    fn persist(&self, sink: &mut dyn SnapshotSink) -> Result<(), SnapshotError>;

    /// Called once the log no longer needs the snapshot.
    fn release(&mut self);
}

/// State driven by a replicated log.
#[async_trait::async_trait]
pub trait StateMachine: Send {
    type Snapshot: Snapshot;

    /// Applies one committed entry.
    async fn apply(&mut self, entry: &LogEntry) -> Result<(), ApplyError>;

    /// Captures the current state; later mutation does not affect it.
    ///
    /// Work the state machine has handed off but not yet folded back in is
    /// not part of the snapshot. Implementations expose a way to wait for
    /// that work; a log should do so before compacting.
    fn snapshot(&self) -> Self::Snapshot;

    /// Replaces the current state with a persisted snapshot.
    fn restore(&mut self, source: &mut dyn Read) -> Result<(), SnapshotError>;
}

/// [`SnapshotSink`] writing to a temporary file renamed into place on close.
pub struct FileSink {
    path: PathBuf,
    tmp_path: PathBuf,
    file: Option<File>,
}

impl FileSink {
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut tmp_path = path.clone().into_os_string();
        tmp_path.push(".tmp");
        let tmp_path = PathBuf::from(tmp_path);
        let file = File::create(&tmp_path)?;
        Ok(Self {
            path,
            tmp_path,
            file: Some(file),
        })
    }

    fn file(&mut self) -> io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("snapshot sink already finished"))
    }
}

impl Write for FileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file()?.flush()
    }
}

impl SnapshotSink for FileSink {
    fn close(&mut self) -> io::Result<()> {
        let file = self.file()?;
        file.sync_all()?;
        self.file = None;
        fs::rename(&self.tmp_path, &self.path)
    }

    fn cancel(&mut self) -> io::Result<()> {
        if self.file.take().is_some() {
            fs::remove_file(&self.tmp_path)?;
        }
        Ok(())
    }
}
