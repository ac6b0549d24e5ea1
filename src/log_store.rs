//! The shared append-log.
//!
//! Provides an async `append`/`stream_to`/`purge` surface backed by a single
//! file at a fixed path. Every operation acquires the store's mutex for its
//! entire open-use-close sequence, which is what gives the store its total
//! ordering: any append that completes before a `stream_to` begins is fully
//! present in that `stream_to`'s output, and no operation ever observes
//! another's partial bytes.

use crate::Result;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, error};

/// Shared handle to the append-log.
///
/// Cloning a `LogStore` is shallow: the path is shared and the mutex is
/// reference-counted, so every clone serializes against every other.
#[derive(Debug, Clone)]
pub struct LogStore {
    path: PathBuf,
    // Guards the open-use-close sequence of every operation below. The unit
    // payload is intentional: the thing being protected is the file at
    // `path`, not any in-memory state.
    gate: std::sync::Arc<Mutex<()>>,
}

impl LogStore {
    /// Creates a store for the log file at `path`. The file itself is not
    /// created until the first `append`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            gate: std::sync::Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `record` verbatim to the log.
    ///
    /// Opens the file in append mode, writes, flushes and closes it, all
    /// while holding the store's mutex. A failure here is reported to the
    /// caller and logged; the store itself is not poisoned and remains
    /// usable for subsequent operations.
    pub async fn append(&self, record: &[u8]) -> Result<()> {
        let _guard = self.gate.lock().await;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .inspect_err(|err| error!(path = %self.path.display(), %err, "failed to open log for append"))?;

        file.write_all(record)
            .await
            .inspect_err(|err| error!(path = %self.path.display(), %err, "failed to write to log"))?;
        file.flush().await?;

        debug!(bytes = record.len(), "appended record to log");
        Ok(())
    }

    /// Streams the full current contents of the log into `sink`, from offset
    /// zero to end-of-file as observed at the moment this call acquires the
    /// mutex. A log that does not exist yet (no record has ever been
    /// appended) streams as empty rather than as an error.
    pub async fn stream_to<W>(&self, sink: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let _guard = self.gate.lock().await;

        let mut file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => {
                error!(path = %self.path.display(), %err, "failed to open log for read");
                return Err(err.into());
            }
        };

        tokio::io::copy(&mut file, sink)
            .await
            .inspect_err(|err| error!(%err, "failed to stream log contents to client"))?;
        Ok(())
    }

    /// Removes the log file from the filesystem. Called once, by the
    /// supervisor, after every worker has joined. A log that never existed
    /// purges as a no-op.
    pub async fn purge(&self) -> Result<()> {
        let _guard = self.gate.lock().await;

        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                error!(path = %self.path.display(), %err, "failed to purge log");
                Err(err.into())
            }
        }
    }
}
