pub mod error;
mod record;

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use stream_api::{Event, EventStore, StreamError};

pub use error::StorageError;
pub use record::{StoredRecord, encode_record};

/// Append-only binary event log.
///
/// One writer lock guards the file handle; every record is written as a
/// single buffer and flushed before the lock is released. A failed write is
/// rolled back to the previous length, so the file only ever holds whole
/// records. There is no index: [`LogStorage::retrieve`] scans the file up to
/// the length it had when the scan began.
pub struct LogStorage {
    path: PathBuf,
    file: Mutex<File>,
}

impl std::fmt::Debug for LogStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStorage").field("path", &self.path).finish()
    }
}

impl LogStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::Open {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| StorageError::Open { path: path.clone(), source })?;
        tracing::info!(path = %path.display(), "storage opened");
        Ok(Self { path, file: Mutex::new(file) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn store_event(&self, event: &Event) -> Result<(), StorageError> {
        let mut buf = Vec::new();
        encode_record(event, &mut buf);

        let mut file = self.lock_file();
        append_record(&mut *file, &buf).map_err(|source| StorageError::Write { id: event.id(), source })
    }

    /// Linear scan for the first record with `id`.
    pub fn retrieve_event(&self, id: u32) -> Result<Option<StoredRecord>, StorageError> {
        let limit = self.committed_len()?;
        self.scan(limit, id)
    }

    /// Length of the log covering only whole records. Writers append under
    /// the same lock, so bytes below this length never change afterwards.
    fn committed_len(&self) -> Result<u64, StorageError> {
        let file = self.lock_file();
        Ok(file.metadata()?.len())
    }

    fn scan(&self, limit: u64, id: u32) -> Result<Option<StoredRecord>, StorageError> {
        let file = File::open(&self.path).map_err(|source| StorageError::Open {
            path: self.path.clone(),
            source,
        })?;
        let mut reader = BufReader::new(file.take(limit));
        let mut offset = 0u64;

        loop {
            match StoredRecord::read_from(&mut reader, offset) {
                Ok(Some((record, size))) => {
                    if record.id == id {
                        return Ok(Some(record));
                    }
                    offset += size;
                }
                Ok(None) => return Ok(None),
                Err(StorageError::Truncated { offset }) => {
                    tracing::warn!(path = %self.path.display(), offset, "truncated tail record, stopping scan");
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn lock_file(&self) -> MutexGuard<'_, File> {
        match self.file.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("storage lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Append with rollback
// ═══════════════════════════════════════════════════════════════

/// Log file handle that can report and cut its length.
trait LogFile: Write {
    fn len(&mut self) -> io::Result<u64>;
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl LogFile for File {
    fn len(&mut self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Write one whole record or nothing: on error the partial bytes are cut off
/// so the next record starts on a record boundary.
fn append_record<F: LogFile>(file: &mut F, record: &[u8]) -> io::Result<()> {
    let before = file.len()?;
    let result = file.write_all(record).and_then(|()| file.flush());
    if result.is_err() {
        if let Err(e) = file.truncate(before) {
            tracing::error!(len = before, error = %e, "failed to roll back partial record");
        }
    }
    result
}

impl EventStore for LogStorage {
    fn store(&self, event: &Event) -> Result<(), StreamError> {
        self.store_event(event).map_err(StreamError::from)
    }

    fn retrieve(&self, id: u32) -> Result<Option<Event>, StreamError> {
        match self.retrieve_event(id)? {
            Some(record) => record.into_event().map(Some),
            None => Ok(None),
        }
    }
}
