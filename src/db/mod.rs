//! Database Module
//!
//! The orchestrator tying the storage layers together: a WAL-backed
//! active memtable, a queue of immutable memtables awaiting flush, and
//! the compaction manager's set of on-disk SSTables.
//!
//! ## Design Overview
//!
//! Reads consult the layers newest-first:
//!
//! 1. **Active memtable** — the only mutable structure.
//! 2. **Immutable memtables** — rotated-out buffers, newest to oldest.
//! 3. **SSTables** — on-disk tables, newest to oldest.
//!
//! The first layer holding a record for the key is authoritative: a live
//! value is returned, a tombstone is a definitive miss. Scans instead
//! merge **all** layers oldest-to-newest through a timestamp-resolving
//! accumulator, so the emitted value for every key equals what `get`
//! would return.
//!
//! ## Write path
//!
//! All mutations serialize on a single database-wide mutex: stamp a
//! monotonic timestamp, append to the WAL, apply to the active memtable.
//! The WAL append comes first and failures abort the write — the WAL is
//! the durability source of truth. When the active memtable's footprint
//! reaches the flush threshold it rotates into the immutable queue, a
//! fresh memtable takes its place, and the WAL is truncated (every record
//! it held now lives in the immutable queue awaiting flush).
//!
//! ## Background workers
//!
//! A flush worker wakes every second and writes queued immutable
//! memtables to SSTables, oldest first. Each new table is registered with
//! the compaction manager **before** its source memtable leaves the
//! queue, so concurrent reads always find the data in at least one of the
//! two structures. The compaction worker (owned by
//! [`CompactionManager`]) merges tables when their count crosses the
//! configured threshold. Both workers observe the running flag and stop
//! promptly on [`Database::close`].
//!
//! ## Crash recovery
//!
//! [`Database::open`] replays `wal.log` into a fresh active memtable
//! (torn tails are end-of-log), then discovers `sstable_<unix_ms>.sst`
//! files and registers them oldest-first by their embedded timestamps. A
//! corrupt SSTable aborts the open; the database refuses to serve from a
//! directory it cannot fully interpret.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicBool, AtomicI64, Ordering},
    },
    thread::JoinHandle,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use crate::compaction::{self, CompactionError, CompactionManager, DEFAULT_COMPACTION_THRESHOLD};
use crate::memtable::{MemRecord, MemTable, MemtableError, MemtableLookup};
use crate::sstable::{SsTable, SsTableError, SstBuilder, TableRecord};
use crate::value::Value;
use crate::wal::{Wal, WalError, WalRecord};
use crossbeam::channel::{RecvTimeoutError, Sender, bounded};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Name of the write-ahead log inside the database directory.
pub const WAL_FILE_NAME: &str = "wal.log";

/// Active-memtable footprint at which rotation is triggered (64 MiB).
pub const DEFAULT_FLUSH_THRESHOLD: i64 = 64 * 1024 * 1024;

/// How often the flush worker drains the immutable queue.
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors that can occur during database operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// Error originating from the write-ahead log.
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    /// Error originating from a memtable.
    #[error("Memtable error: {0}")]
    Memtable(#[from] MemtableError),

    /// Error originating from an SSTable.
    #[error("SSTable error: {0}")]
    Table(#[from] SsTableError),

    /// Error originating from the compaction manager.
    #[error("Compaction error: {0}")]
    Compaction(#[from] CompactionError),

    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The caller supplied an unusable key.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Internal invariant violation (poisoned lock, unexpected state).
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Configuration for a [`Database`] instance.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Fsync the WAL on every write. Extends durability of acknowledged
    /// writes from process crashes to OS crashes, at a latency cost.
    pub sync_on_write: bool,

    /// Active-memtable footprint (bytes) at which rotation happens.
    pub flush_threshold: i64,

    /// Live-SSTable count at which background compaction merges.
    pub compaction_threshold: usize,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            sync_on_write: false,
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
        }
    }
}

/// Snapshot of database statistics returned by [`Database::stats`].
#[derive(Debug)]
pub struct DbStats {
    /// Approximate footprint of the active memtable in bytes.
    pub active_bytes: i64,

    /// Number of immutable memtables pending flush.
    pub immutable_count: usize,

    /// Number of live SSTables on disk.
    pub table_count: usize,

    /// Sum of all live SSTable file sizes in bytes.
    pub total_table_bytes: u64,
}

// ------------------------------------------------------------------------------------------------
// Shared state
// ------------------------------------------------------------------------------------------------

struct DbShared {
    /// Root directory of the database.
    dir: PathBuf,

    /// Runtime configuration.
    config: DbConfig,

    /// Write-ahead log for the active memtable.
    wal: Wal,

    /// Active memtable; swapped atomically on rotation.
    active: RwLock<Arc<MemTable>>,

    /// Immutable memtables awaiting flush, oldest first.
    immutables: RwLock<Vec<Arc<MemTable>>>,

    /// Owner of the live SSTable set and the compaction worker.
    compaction: CompactionManager,

    /// Serializes the write path: WAL order, timestamp order, and
    /// memtable order are all this mutex's lock order.
    write_mutex: Mutex<()>,

    /// Monotonic non-decreasing version clock, unix milliseconds.
    clock: AtomicI64,

    /// Cleared on close; background workers exit when they observe it.
    running: AtomicBool,
}

// ------------------------------------------------------------------------------------------------
// Database
// ------------------------------------------------------------------------------------------------

/// The embedded LSM key-value store.
///
/// See the [module-level documentation](self) for the layering, write
/// path, and recovery behavior.
pub struct Database {
    shared: Arc<DbShared>,

    /// Handle of the flush worker, present while it runs.
    flush_worker: Mutex<Option<JoinHandle<()>>>,

    /// Wake/stop channel for the flush worker.
    flush_stop_tx: Mutex<Option<Sender<()>>>,

    /// Set by the first `close`; later calls become no-ops.
    closed: AtomicBool,
}

impl Database {
    /// Opens (or creates) a database at the given directory with default
    /// configuration.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, DbError> {
        Self::open_with(dir, DbConfig::default())
    }

    /// Opens (or creates) a database with explicit configuration.
    ///
    /// Replays the WAL into a fresh active memtable, registers existing
    /// SSTables oldest-first, and starts the flush and compaction
    /// workers.
    pub fn open_with(dir: impl AsRef<Path>, config: DbConfig) -> Result<Self, DbError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let wal = Wal::open(dir.join(WAL_FILE_NAME), config.sync_on_write)?;

        // Recover the active memtable from the log. Record timestamps are
        // preserved so last-writer-wins keeps holding across the restart.
        let active = Arc::new(MemTable::new());
        let mut max_timestamp: i64 = 0;
        let mut replayed = 0usize;
        for result in wal.replay_iter() {
            let record = result?;
            max_timestamp = max_timestamp.max(record.timestamp());
            replayed += 1;
            match record {
                WalRecord::Put {
                    key,
                    value,
                    timestamp,
                } => active.apply(key, MemRecord::put(value, timestamp))?,
                WalRecord::Delete { key, timestamp } => {
                    active.apply(key, MemRecord::tombstone(timestamp))?
                }
            }
        }

        // Discover on-disk tables, oldest first by the timestamp embedded
        // in their filenames. A table that fails to open is fatal.
        let compaction = CompactionManager::new(&dir);
        let mut discovered = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if let Some(timestamp) = parse_table_timestamp(&path) {
                discovered.push((timestamp, path));
            }
        }
        discovered.sort_by_key(|(timestamp, _)| *timestamp);

        let table_count = discovered.len();
        for (timestamp, path) in discovered {
            max_timestamp = max_timestamp.max(timestamp);
            let table = SsTable::open(&path)?;
            compaction.add(Arc::new(table))?;
        }

        info!(
            dir = %dir.display(),
            wal_records = replayed,
            sstables = table_count,
            "database opened"
        );

        let shared = Arc::new(DbShared {
            dir,
            config,
            wal,
            active: RwLock::new(active),
            immutables: RwLock::new(Vec::new()),
            compaction,
            write_mutex: Mutex::new(()),
            clock: AtomicI64::new(max_timestamp),
            running: AtomicBool::new(true),
        });

        let db = Self {
            shared: Arc::clone(&shared),
            flush_worker: Mutex::new(None),
            flush_stop_tx: Mutex::new(None),
            closed: AtomicBool::new(false),
        };
        db.start_flush_worker()?;
        shared
            .compaction
            .start(shared.config.compaction_threshold)?;

        Ok(db)
    }

    /// Inserts or updates a key.
    ///
    /// Accepts any type convertible into a [`Value`] — booleans, all
    /// integer widths, floats, strings, and byte vectors.
    pub fn put(&self, key: impl Into<String>, value: impl Into<Value>) -> Result<(), DbError> {
        let key = key.into();
        let value = value.into();
        validate_key(&key)?;

        let _guard = self.write_lock()?;
        let timestamp = self.next_timestamp();

        // WAL first: the mutation is applied in memory only once it is
        // durable in the log.
        self.shared.wal.append(&WalRecord::Put {
            key: key.clone(),
            value: value.clone(),
            timestamp,
        })?;
        self.active()?.apply(key, MemRecord::put(value, timestamp))?;

        self.maybe_rotate()
    }

    /// Deletes a key by writing a tombstone.
    ///
    /// Deleting an absent key still records the tombstone — it must mask
    /// any value for the key that lives in older layers.
    pub fn delete(&self, key: impl Into<String>) -> Result<(), DbError> {
        let key = key.into();
        validate_key(&key)?;

        let _guard = self.write_lock()?;
        let timestamp = self.next_timestamp();

        self.shared.wal.append(&WalRecord::Delete {
            key: key.clone(),
            timestamp,
        })?;
        self.active()?.apply(key, MemRecord::tombstone(timestamp))?;

        self.maybe_rotate()
    }

    /// Looks up a key, returning its live value or `None` when the key is
    /// absent or deleted.
    ///
    /// Layers are consulted newest-first; a tombstone at any layer is a
    /// definitive miss. A failing SSTable is logged and treated as a
    /// miss, surfacing an error only when every table failed.
    pub fn get(&self, key: &str) -> Result<Option<Value>, DbError> {
        match self.active()?.get(key)? {
            MemtableLookup::Value(value) => return Ok(Some(value)),
            MemtableLookup::Tombstone => return Ok(None),
            MemtableLookup::Absent => {}
        }

        for memtable in self.immutable_snapshot()?.iter().rev() {
            match memtable.get(key)? {
                MemtableLookup::Value(value) => return Ok(Some(value)),
                MemtableLookup::Tombstone => return Ok(None),
                MemtableLookup::Absent => {}
            }
        }

        let tables = self.shared.compaction.snapshot()?;
        let mut failed = 0usize;
        let mut last_error: Option<SsTableError> = None;
        for table in tables.iter().rev() {
            match table.lookup(key) {
                Ok(Some(record)) => {
                    return Ok(if record.deleted { None } else { record.value });
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(path = %table.path().display(), error = %e, "SSTable read failed, continuing to older layers");
                    failed += 1;
                    last_error = Some(e);
                }
            }
        }

        if failed > 0
            && failed == tables.len()
            && let Some(e) = last_error
        {
            return Err(e.into());
        }
        Ok(None)
    }

    /// Ordered scan over `[start, end]`, both bounds inclusive and
    /// optional.
    ///
    /// The visitor is invoked once per surviving key in ascending order
    /// with the value `get` would return for it. Tombstoned keys are
    /// skipped.
    pub fn scan<F>(&self, start: Option<&str>, end: Option<&str>, mut visit: F) -> Result<(), DbError>
    where
        F: FnMut(&str, &Value),
    {
        let mut acc: BTreeMap<String, MemRecord> = BTreeMap::new();

        // Feed the accumulator oldest layer first; within a timestamp tie
        // the later-fed (newer) layer wins.
        for table in self.shared.compaction.snapshot()?.iter() {
            table.scan(start, end, |record| {
                merge_into(
                    &mut acc,
                    record.key,
                    MemRecord {
                        value: record.value,
                        deleted: record.deleted,
                        timestamp: record.timestamp,
                    },
                );
            })?;
        }

        let immutables = self.immutable_snapshot()?;
        let active = self.active()?;
        for memtable in immutables.iter().chain(std::iter::once(&active)) {
            for (key, record) in memtable.sorted_records()? {
                if within_bounds(&key, start, end) {
                    merge_into(&mut acc, key, record);
                }
            }
        }

        for (key, record) in &acc {
            if !record.deleted
                && let Some(value) = &record.value
            {
                visit(key.as_str(), value);
            }
        }
        Ok(())
    }

    /// Forces a merge of the current SSTable set, regardless of the
    /// background threshold. Returns `true` when a merge ran.
    pub fn compact(&self) -> Result<bool, DbError> {
        Ok(self.shared.compaction.compact_now()?)
    }

    /// Returns a snapshot of database statistics.
    pub fn stats(&self) -> Result<DbStats, DbError> {
        let tables = self.shared.compaction.snapshot()?;
        Ok(DbStats {
            active_bytes: self.active()?.byte_size()?,
            immutable_count: self.immutable_snapshot()?.len(),
            table_count: tables.len(),
            total_table_bytes: tables.iter().map(|t| t.file_size()).sum(),
        })
    }

    /// Gracefully shuts down the database.
    ///
    /// Stops both background workers, flushes every pending immutable
    /// memtable to disk, and syncs the WAL. Idempotent: the second and
    /// later calls return immediately.
    pub fn close(&self) -> Result<(), DbError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.shared.running.store(false, Ordering::SeqCst);

        if let Ok(mut tx) = self.flush_stop_tx.lock() {
            tx.take();
        }
        if let Ok(mut worker) = self.flush_worker.lock()
            && let Some(handle) = worker.take()
            && handle.join().is_err()
        {
            warn!("flush worker panicked");
        }

        // Whatever the worker did not get to is flushed directly; the
        // active memtable stays recoverable through the WAL.
        flush_immutables(&self.shared)?;

        self.shared.compaction.close();
        self.shared.wal.sync()?;

        info!(dir = %self.shared.dir.display(), "database closed");
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Write-path internals
    // --------------------------------------------------------------------------------------------

    /// Rotates the active memtable once it crosses the flush threshold.
    ///
    /// Called with the write mutex held. The retiring memtable enters the
    /// immutable queue before the fresh one becomes active, and only then
    /// is the WAL truncated — at every instant the data is reachable
    /// in memory or in the log.
    fn maybe_rotate(&self) -> Result<(), DbError> {
        let active = self.active()?;
        if active.byte_size()? < self.shared.config.flush_threshold {
            return Ok(());
        }

        {
            let mut immutables = self
                .shared
                .immutables
                .write()
                .map_err(|_| DbError::Internal("immutable queue lock poisoned".into()))?;
            immutables.push(Arc::clone(&active));
        }
        {
            let mut slot = self
                .shared
                .active
                .write()
                .map_err(|_| DbError::Internal("active memtable lock poisoned".into()))?;
            *slot = Arc::new(MemTable::new());
        }
        self.shared.wal.truncate()?;

        info!(
            rotated_bytes = active.byte_size()?,
            rotated_rows = active.len()?,
            "active memtable rotated"
        );
        Ok(())
    }

    /// Stamps the next write with a monotonic non-decreasing timestamp.
    fn next_timestamp(&self) -> i64 {
        let now = unix_millis();
        let prev = self.shared.clock.fetch_max(now, Ordering::SeqCst);
        prev.max(now)
    }

    fn write_lock(&self) -> Result<std::sync::MutexGuard<'_, ()>, DbError> {
        self.shared
            .write_mutex
            .lock()
            .map_err(|_| DbError::Internal("write mutex poisoned".into()))
    }

    fn active(&self) -> Result<Arc<MemTable>, DbError> {
        Ok(Arc::clone(
            &*self
                .shared
                .active
                .read()
                .map_err(|_| DbError::Internal("active memtable lock poisoned".into()))?,
        ))
    }

    fn immutable_snapshot(&self) -> Result<Vec<Arc<MemTable>>, DbError> {
        Ok(self
            .shared
            .immutables
            .read()
            .map_err(|_| DbError::Internal("immutable queue lock poisoned".into()))?
            .clone())
    }

    // --------------------------------------------------------------------------------------------
    // Flush worker
    // --------------------------------------------------------------------------------------------

    fn start_flush_worker(&self) -> Result<(), DbError> {
        let (tx, rx) = bounded::<()>(0);
        let shared = Arc::clone(&self.shared);

        let handle = std::thread::Builder::new()
            .name("stardb-flush".into())
            .spawn(move || {
                info!("flush worker started");
                loop {
                    match rx.recv_timeout(FLUSH_INTERVAL) {
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {
                            if !shared.running.load(Ordering::SeqCst) {
                                break;
                            }
                            if let Err(e) = flush_immutables(&shared) {
                                warn!(error = %e, "background flush failed, will retry");
                            }
                        }
                    }
                }
                info!("flush worker stopped");
            })
            .map_err(DbError::Io)?;

        *self
            .flush_worker
            .lock()
            .map_err(|_| DbError::Internal("flush worker mutex poisoned".into()))? = Some(handle);
        *self
            .flush_stop_tx
            .lock()
            .map_err(|_| DbError::Internal("flush channel mutex poisoned".into()))? = Some(tx);
        Ok(())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst)
            && let Err(e) = self.close()
        {
            warn!(error = %e, "database close failed on drop");
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Flush
// ------------------------------------------------------------------------------------------------

/// Writes every queued immutable memtable to a new SSTable, oldest first.
///
/// Each new table is registered with the compaction manager **before**
/// its source memtable is removed from the queue, so a concurrent read
/// always finds the records in at least one of the two structures.
fn flush_immutables(shared: &DbShared) -> Result<(), DbError> {
    loop {
        let oldest = {
            let immutables = shared
                .immutables
                .read()
                .map_err(|_| DbError::Internal("immutable queue lock poisoned".into()))?;
            match immutables.first() {
                Some(memtable) => Arc::clone(memtable),
                None => break,
            }
        };

        let records = oldest.sorted_records()?;
        if records.is_empty() {
            debug!("skipping flush of empty immutable memtable");
        } else {
            let table_records: Vec<TableRecord> = records
                .into_iter()
                .map(|(key, record)| TableRecord {
                    key,
                    value: record.value,
                    deleted: record.deleted,
                    timestamp: record.timestamp,
                })
                .collect();

            let path = compaction::next_table_path(&shared.dir);
            let record_count = table_records.len();
            SstBuilder::new(&path).build(table_records)?;
            let table = Arc::new(SsTable::open(&path)?);
            shared.compaction.add(table)?;

            info!(
                path = %path.display(),
                records = record_count,
                "immutable memtable flushed to SSTable"
            );
        }

        let mut immutables = shared
            .immutables
            .write()
            .map_err(|_| DbError::Internal("immutable queue lock poisoned".into()))?;
        if let Some(pos) = immutables.iter().position(|m| Arc::ptr_eq(m, &oldest)) {
            immutables.remove(pos);
        }
    }
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

/// Keys must be non-empty; everything else about a UTF-8 string is legal.
fn validate_key(key: &str) -> Result<(), DbError> {
    if key.is_empty() {
        return Err(DbError::InvalidKey("key must not be empty".into()));
    }
    Ok(())
}

/// Inclusive-bounds interval check used by the scan path.
fn within_bounds(key: &str, start: Option<&str>, end: Option<&str>) -> bool {
    if let Some(start) = start
        && key < start
    {
        return false;
    }
    if let Some(end) = end
        && key > end
    {
        return false;
    }
    true
}

/// Keeps the greatest-timestamp record per key; on ties the later-fed
/// (newer-layer) record wins.
fn merge_into(acc: &mut BTreeMap<String, MemRecord>, key: String, record: MemRecord) {
    match acc.get(&key) {
        Some(existing) if existing.timestamp > record.timestamp => {}
        _ => {
            acc.insert(key, record);
        }
    }
}

/// Extracts the creation timestamp from an `sstable_<unix_ms>.sst` path.
///
/// Returns `None` for any file that is not a well-named SSTable (the WAL,
/// temporary build files, strangers).
fn parse_table_timestamp(path: &Path) -> Option<i64> {
    if !path.is_file() {
        return None;
    }
    path.file_name()?
        .to_str()?
        .strip_prefix("sstable_")?
        .strip_suffix(".sst")?
        .parse::<i64>()
        .ok()
}

/// Current wall-clock time in milliseconds since the unix epoch.
fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
