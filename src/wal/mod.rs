//! Write-Ahead Logging (WAL) Module
//!
//! An append-only, durable redo log of every mutation accepted by the
//! database. The WAL is written **before** the in-memory memtable is
//! touched, so replaying it after a crash reconstructs the active
//! memtable exactly.
//!
//! # On-disk layout
//!
//! ```text
//! [type:1][timestamp:i64 LE][key_len:u32 LE][key_bytes][has_value:1][value_bytes?]
//! [type:1][timestamp:i64 LE][key_len:u32 LE][key_bytes][has_value:1][value_bytes?]
//! ...
//! ```
//!
//! - **type** — `0` for a put, `1` for a delete.
//! - **value_bytes** — present only when `has_value = 1`; a [`Value`] in
//!   its standard wire encoding.
//!
//! # Torn tails
//!
//! A record at the end of the file may be incomplete if the process died
//! mid-write. Replay treats any truncated or undecodable tail as
//! end-of-log: it stops yielding records and logs the position at `warn`.
//! This is deliberate — everything before the torn record was acknowledged
//! and is recovered; the torn record itself was never acknowledged.
//!
//! # Concurrency model
//!
//! All file access — appends, truncation, and replay reads — is serialized
//! through a shared `Arc<Mutex<File>>`. [`WalIter`] tracks its own logical
//! offset and seeks before every read, so replay interleaves safely with
//! concurrent appenders.
//!
//! # Durability
//!
//! `append` issues a single `write_all` of the fully-encoded record. With
//! `sync_on_write` enabled every append is followed by `fsync`, extending
//! the durability guarantee from process crashes to OS crashes.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------


// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use crate::value::Value;
use thiserror::Error;
use tracing::{error, info, trace, warn};

/// Record type byte for a put.
const REC_PUT: u8 = 0;

/// Record type byte for a delete.
const REC_DELETE: u8 = 1;

/// Upper bound on a single key or value payload read back during replay.
///
/// A length prefix beyond this is treated as tail corruption rather than
/// an allocation request.
const MAX_REPLAY_PAYLOAD: u32 = 256 * 1024 * 1024;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by WAL operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WalError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Internal consistency or locking error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// WalRecord
// ------------------------------------------------------------------------------------------------

/// A single logical mutation persisted in the WAL.
#[derive(Debug, Clone, PartialEq)]
pub enum WalRecord {
    /// Insert or update a key.
    Put {
        /// The key being written.
        key: String,
        /// The value being written.
        value: Value,
        /// Version clock of the write, unix milliseconds.
        timestamp: i64,
    },

    /// Delete a key (point tombstone).
    Delete {
        /// The key being deleted.
        key: String,
        /// Version clock of the delete, unix milliseconds.
        timestamp: i64,
    },
}

impl WalRecord {
    /// Returns the key this record mutates.
    pub fn key(&self) -> &str {
        match self {
            WalRecord::Put { key, .. } => key,
            WalRecord::Delete { key, .. } => key,
        }
    }

    /// Returns the record's timestamp.
    pub fn timestamp(&self) -> i64 {
        match self {
            WalRecord::Put { timestamp, .. } => *timestamp,
            WalRecord::Delete { timestamp, .. } => *timestamp,
        }
    }

    /// Appends the wire encoding of this record to `buf`.
    fn encode_to(&self, buf: &mut Vec<u8>) {
        match self {
            WalRecord::Put {
                key,
                value,
                timestamp,
            } => {
                buf.push(REC_PUT);
                buf.extend_from_slice(&timestamp.to_le_bytes());
                buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
                buf.extend_from_slice(key.as_bytes());
                buf.push(1);
                value.encode_to(buf);
            }
            WalRecord::Delete { key, timestamp } => {
                buf.push(REC_DELETE);
                buf.extend_from_slice(&timestamp.to_le_bytes());
                buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
                buf.extend_from_slice(key.as_bytes());
                buf.push(0);
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// WAL Core
// ------------------------------------------------------------------------------------------------

/// The append-only write-ahead log backing the active memtable.
///
/// See the [module-level documentation](self) for format, torn-tail
/// handling, and the concurrency model.
#[derive(Debug)]
pub struct Wal {
    /// Thread-safe file handle shared with replay iterators.
    inner_file: Arc<Mutex<File>>,

    /// Path to the WAL file on disk.
    path: PathBuf,

    /// Whether every append is followed by an fsync.
    sync_on_write: bool,
}

impl Wal {
    /// Opens or creates the WAL file at the given path.
    pub fn open<P: AsRef<Path>>(path: P, sync_on_write: bool) -> Result<Self, WalError> {
        let path_ref = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path_ref)?;

        info!(path = %path_ref.display(), sync_on_write, "WAL opened");

        Ok(Self {
            inner_file: Arc::new(Mutex::new(file)),
            path: path_ref.to_path_buf(),
            sync_on_write,
        })
    }

    /// Appends one record to the log.
    ///
    /// The record is fully encoded in memory and written with a single
    /// `write_all` under the file lock, then fsynced when the WAL was
    /// opened with `sync_on_write`. The write path must not apply the
    /// mutation in memory unless this returns `Ok`.
    pub fn append(&self, record: &WalRecord) -> Result<(), WalError> {
        let mut buf = Vec::new();
        record.encode_to(&mut buf);

        let mut guard = self.lock_file()?;
        guard.write_all(&buf)?;
        guard.flush()?;
        if self.sync_on_write {
            guard.sync_all()?;
        }

        trace!(
            key = record.key(),
            timestamp = record.timestamp(),
            len = buf.len(),
            "WAL record appended"
        );
        Ok(())
    }

    /// Returns an iterator that replays records from offset zero.
    ///
    /// The iterator stops silently at the first truncated or undecodable
    /// record — see the module docs on torn tails.
    pub fn replay_iter(&self) -> WalIter {
        trace!(path = %self.path.display(), "WAL replay started");
        WalIter {
            file: Arc::clone(&self.inner_file),
            offset: 0,
            done: false,
        }
    }

    /// Resets the log to zero length.
    ///
    /// Called when the active memtable rotates: every record in the log is
    /// now held by an immutable memtable awaiting flush, so the log's
    /// contents are no longer the only copy.
    pub fn truncate(&self) -> Result<(), WalError> {
        let mut guard = self.lock_file()?;
        guard.set_len(0)?;
        guard.seek(SeekFrom::Start(0))?;
        guard.sync_all()?;

        info!(path = %self.path.display(), "WAL truncated");
        Ok(())
    }

    /// Forces all buffered log data to stable storage.
    pub fn sync(&self) -> Result<(), WalError> {
        let guard = self.lock_file()?;
        guard.sync_all()?;
        Ok(())
    }

    /// Returns the current on-disk file size in bytes.
    pub fn file_size(&self) -> Result<u64, WalError> {
        let guard = self.lock_file()?;
        Ok(guard.metadata()?.len())
    }

    /// Path of the underlying log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_file(&self) -> Result<std::sync::MutexGuard<'_, File>, WalError> {
        self.inner_file
            .lock()
            .map_err(|_| WalError::Internal("WAL mutex poisoned".into()))
    }
}

impl Drop for Wal {
    fn drop(&mut self) {
        match self.inner_file.lock() {
            Ok(guard) => {
                if let Err(e) = guard.sync_all() {
                    error!(path = %self.path.display(), error = %e, "WAL sync failed on drop");
                }
            }
            Err(poisoned) => {
                let file = poisoned.into_inner();
                if let Err(e) = file.sync_all() {
                    error!(path = %self.path.display(), error = %e, "WAL sync failed on drop (poisoned lock)");
                }
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// WalIter
// ------------------------------------------------------------------------------------------------

/// Streaming WAL replay iterator.
///
/// Reads one record at a time under the shared file lock, seeking to its
/// own logical offset before each read so interleaved appends do not
/// disturb the cursor. Yields `Err` only for genuine I/O failures; a
/// truncated or corrupt tail ends iteration instead.
pub struct WalIter {
    /// Shared file handle protected by a mutex.
    file: Arc<Mutex<File>>,

    /// Current byte offset within the log.
    offset: u64,

    /// Set once the tail has been reached (cleanly or otherwise).
    done: bool,
}

/// Outcome of reading one field from the log.
enum FieldRead<T> {
    Ok(T),
    /// Hit end-of-file or an undecodable prefix: the tail is torn.
    Torn,
    Err(io::Error),
}

impl WalIter {
    /// Reads exactly `N` bytes, mapping a short read to [`FieldRead::Torn`].
    fn read_array<const N: usize>(file: &mut File) -> FieldRead<[u8; N]> {
        let mut buf = [0u8; N];
        match file.read_exact(&mut buf) {
            Ok(()) => FieldRead::Ok(buf),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => FieldRead::Torn,
            Err(e) => FieldRead::Err(e),
        }
    }

    /// Reads exactly `len` bytes, mapping a short read to [`FieldRead::Torn`].
    fn read_vec(file: &mut File, len: usize) -> FieldRead<Vec<u8>> {
        let mut buf = vec![0u8; len];
        match file.read_exact(&mut buf) {
            Ok(()) => FieldRead::Ok(buf),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => FieldRead::Torn,
            Err(e) => FieldRead::Err(e),
        }
    }
}

macro_rules! field {
    ($self:ident, $read:expr) => {
        match $read {
            FieldRead::Ok(v) => v,
            FieldRead::Torn => {
                warn!(offset = $self.offset, "WAL torn tail, treating as end of log");
                $self.done = true;
                return None;
            }
            FieldRead::Err(e) => {
                $self.done = true;
                return Some(Err(WalError::Io(e)));
            }
        }
    };
}

impl Iterator for WalIter {
    type Item = Result<WalRecord, WalError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut guard = match self.file.lock() {
            Ok(g) => g,
            Err(_) => {
                self.done = true;
                return Some(Err(WalError::Internal("WAL mutex poisoned".into())));
            }
        };

        if let Err(e) = guard.seek(SeekFrom::Start(self.offset)) {
            self.done = true;
            return Some(Err(WalError::Io(e)));
        }

        // Record type; a clean EOF here is the normal end of the log.
        let record_type = match Self::read_array::<1>(&mut guard) {
            FieldRead::Ok([b]) => b,
            FieldRead::Torn => {
                self.done = true;
                return None;
            }
            FieldRead::Err(e) => {
                self.done = true;
                return Some(Err(WalError::Io(e)));
            }
        };
        if record_type != REC_PUT && record_type != REC_DELETE {
            warn!(
                offset = self.offset,
                record_type, "WAL unknown record type, treating as end of log"
            );
            self.done = true;
            return None;
        }

        let timestamp = i64::from_le_bytes(field!(self, Self::read_array::<8>(&mut guard)));

        let key_len = u32::from_le_bytes(field!(self, Self::read_array::<4>(&mut guard)));
        if key_len == 0 || key_len > MAX_REPLAY_PAYLOAD {
            warn!(
                offset = self.offset,
                key_len, "WAL implausible key length, treating as end of log"
            );
            self.done = true;
            return None;
        }

        let key_bytes = field!(self, Self::read_vec(&mut guard, key_len as usize));
        let key = match String::from_utf8(key_bytes) {
            Ok(k) => k,
            Err(_) => {
                warn!(offset = self.offset, "WAL non-UTF-8 key, treating as end of log");
                self.done = true;
                return None;
            }
        };

        let has_value = field!(self, Self::read_array::<1>(&mut guard))[0];

        let record = match (record_type, has_value) {
            (REC_DELETE, 0) => WalRecord::Delete { key, timestamp },
            (REC_PUT, 1) => {
                // Value header first, then the payload it declares.
                let header = field!(self, Self::read_array::<5>(&mut guard));
                let payload_len =
                    u32::from_le_bytes([header[1], header[2], header[3], header[4]]);
                if payload_len > MAX_REPLAY_PAYLOAD {
                    warn!(
                        offset = self.offset,
                        payload_len, "WAL implausible value length, treating as end of log"
                    );
                    self.done = true;
                    return None;
                }

                let payload = field!(self, Self::read_vec(&mut guard, payload_len as usize));
                let mut value_bytes = header.to_vec();
                value_bytes.extend_from_slice(&payload);

                match Value::decode_from(&value_bytes) {
                    Ok((value, _)) => WalRecord::Put {
                        key,
                        value,
                        timestamp,
                    },
                    Err(e) => {
                        warn!(
                            offset = self.offset,
                            error = %e,
                            "WAL undecodable value, treating as end of log"
                        );
                        self.done = true;
                        return None;
                    }
                }
            }
            _ => {
                warn!(
                    offset = self.offset,
                    record_type, has_value, "WAL inconsistent record flags, treating as end of log"
                );
                self.done = true;
                return None;
            }
        };

        // Advance to the next record using the file cursor position.
        match guard.stream_position() {
            Ok(pos) => self.offset = pos,
            Err(e) => {
                self.done = true;
                return Some(Err(WalError::Io(e)));
            }
        }

        trace!(
            offset = self.offset,
            key = record.key(),
            "WAL record replayed"
        );
        Some(Ok(record))
    }
}
