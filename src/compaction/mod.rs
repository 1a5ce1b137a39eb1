//! Compaction Module
//!
//! Owns the set of live SSTables and merges them when their count crosses
//! a threshold. The live list is the single source of truth for on-disk
//! state: readers take a snapshot of it before scanning and the snapshot
//! outlives any concurrent list mutation.
//!
//! ## Merge semantics
//!
//! A compaction performs a **full merge** of the snapshot it selected:
//!
//! 1. Scan every input table, oldest first.
//! 2. Coalesce records per key, keeping the one with the greatest
//!    timestamp; on equal timestamps the newer table wins.
//! 3. Drop every key whose winning record is a tombstone — the merge
//!    covers the whole table set, so nothing older can resurrect.
//! 4. Write the survivors as one new table and atomically swap it for the
//!    inputs in the live list. When nothing survives, no table is written
//!    and the inputs are simply removed.
//! 5. Unlink the input files.
//!
//! Input files are unlinked but **not** closed: a reader holding a
//! snapshot keeps the mapping (and therefore the unlinked inode) alive
//! until it drops its `Arc`, which is exactly the lifetime the snapshot
//! contract requires.
//!
//! ## Background worker
//!
//! [`CompactionManager::start`] spawns a thread that wakes on an interval,
//! runs [`compact_if_needed`](CompactionManager::compact_if_needed), and
//! exits when [`stop`](CompactionManager::stop) drops its wake channel.
//! Failures on the background path are logged and retried on the next
//! tick.

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
    sync::{Arc, Mutex, RwLock},
    thread::JoinHandle,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use crate::sstable::{SsTable, SsTableError, SstBuilder, TableRecord};
use crossbeam::channel::{RecvTimeoutError, Sender, bounded};
use thiserror::Error;
use tracing::{debug, info, warn};

/// How often the background worker checks the table count.
pub const COMPACTION_INTERVAL: Duration = Duration::from_secs(10);

/// Live-table count at which a merge is triggered.
pub const DEFAULT_COMPACTION_THRESHOLD: usize = 4;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by compaction operations.
#[derive(Debug, Error)]
pub enum CompactionError {
    /// Error reading an input table or building the output table.
    #[error("SSTable error: {0}")]
    Table(#[from] SsTableError),

    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Internal invariant violation or poisoned lock.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// CompactionManager
// ------------------------------------------------------------------------------------------------

/// Owner of the live SSTable set and the background merge worker.
pub struct CompactionManager {
    shared: Arc<CompactionShared>,

    /// Handle of the background worker, present while it runs.
    worker: Mutex<Option<JoinHandle<()>>>,

    /// Wake/stop channel for the worker; dropping it stops the loop.
    stop_tx: Mutex<Option<Sender<()>>>,
}

struct CompactionShared {
    /// Live tables, oldest first. Insertion order is preserved.
    tables: RwLock<Vec<Arc<SsTable>>>,

    /// Directory where merged tables are written.
    dir: PathBuf,

    /// Serializes merges: the background worker and an explicit
    /// `compact()` must never merge the same inputs concurrently.
    merge_lock: Mutex<()>,
}

impl CompactionManager {
    /// Creates a manager over the given table directory with an empty
    /// live list.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            shared: Arc::new(CompactionShared {
                tables: RwLock::new(Vec::new()),
                dir: dir.as_ref().to_path_buf(),
                merge_lock: Mutex::new(()),
            }),
            worker: Mutex::new(None),
            stop_tx: Mutex::new(None),
        }
    }

    /// Registers a new live table at the newest position.
    pub fn add(&self, table: Arc<SsTable>) -> Result<(), CompactionError> {
        let mut tables = write_tables(&self.shared)?;
        debug!(path = %table.path().display(), live = tables.len() + 1, "SSTable registered");
        tables.push(table);
        Ok(())
    }

    /// Returns the live tables, oldest first.
    ///
    /// The returned `Arc`s keep every table readable even if a concurrent
    /// compaction removes and unlinks it.
    pub fn snapshot(&self) -> Result<Vec<Arc<SsTable>>, CompactionError> {
        Ok(read_tables(&self.shared)?.clone())
    }

    /// Number of live tables.
    pub fn table_count(&self) -> Result<usize, CompactionError> {
        Ok(read_tables(&self.shared)?.len())
    }

    /// Merges the current snapshot when it holds at least `threshold`
    /// tables. Returns `true` when a merge ran.
    pub fn compact_if_needed(&self, threshold: usize) -> Result<bool, CompactionError> {
        compact_if_needed(&self.shared, threshold)
    }

    /// Merges the current snapshot regardless of the threshold, as long
    /// as there are at least two tables to merge.
    pub fn compact_now(&self) -> Result<bool, CompactionError> {
        compact_if_needed(&self.shared, 2)
    }

    /// Starts the background worker.
    ///
    /// The worker wakes every [`COMPACTION_INTERVAL`], merges when the
    /// live count reaches `threshold`, and exits promptly once
    /// [`stop`](Self::stop) runs. Starting twice is a no-op.
    pub fn start(&self, threshold: usize) -> Result<(), CompactionError> {
        let mut worker = self
            .worker
            .lock()
            .map_err(|_| CompactionError::Internal("worker mutex poisoned".into()))?;
        if worker.is_some() {
            return Ok(());
        }

        let (tx, rx) = bounded::<()>(0);
        let shared = Arc::clone(&self.shared);

        let handle = std::thread::Builder::new()
            .name("stardb-compaction".into())
            .spawn(move || {
                info!("compaction worker started");
                loop {
                    match rx.recv_timeout(COMPACTION_INTERVAL) {
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {
                            if let Err(e) = compact_if_needed(&shared, threshold) {
                                warn!(error = %e, "background compaction failed, will retry");
                            }
                        }
                    }
                }
                info!("compaction worker stopped");
            })?;

        *worker = Some(handle);
        *self
            .stop_tx
            .lock()
            .map_err(|_| CompactionError::Internal("stop channel mutex poisoned".into()))? =
            Some(tx);
        Ok(())
    }

    /// Signals the background worker and waits for it to exit.
    ///
    /// Idempotent: stopping an already-stopped manager does nothing.
    pub fn stop(&self) {
        if let Ok(mut tx) = self.stop_tx.lock() {
            tx.take();
        }
        if let Ok(mut worker) = self.worker.lock()
            && let Some(handle) = worker.take()
            && handle.join().is_err()
        {
            warn!("compaction worker panicked");
        }
    }

    /// Stops the worker and releases every live table's file mapping.
    pub fn close(&self) {
        self.stop();
        if let Ok(tables) = read_tables(&self.shared) {
            for table in tables.iter() {
                table.close();
            }
        }
        info!("compaction manager closed");
    }
}

fn read_tables(
    shared: &CompactionShared,
) -> Result<std::sync::RwLockReadGuard<'_, Vec<Arc<SsTable>>>, CompactionError> {
    shared
        .tables
        .read()
        .map_err(|_| CompactionError::Internal("table list lock poisoned".into()))
}

fn write_tables(
    shared: &CompactionShared,
) -> Result<std::sync::RwLockWriteGuard<'_, Vec<Arc<SsTable>>>, CompactionError> {
    shared
        .tables
        .write()
        .map_err(|_| CompactionError::Internal("table list lock poisoned".into()))
}

// ------------------------------------------------------------------------------------------------
// Merge
// ------------------------------------------------------------------------------------------------

fn compact_if_needed(shared: &CompactionShared, threshold: usize) -> Result<bool, CompactionError> {
    let _merging = shared
        .merge_lock
        .lock()
        .map_err(|_| CompactionError::Internal("merge lock poisoned".into()))?;

    let inputs = read_tables(shared)?.clone();
    if inputs.len() < threshold.max(2) {
        return Ok(false);
    }
    merge(shared, inputs)?;
    Ok(true)
}

/// Merges `inputs` into at most one new table and swaps it into the live
/// list.
fn merge(shared: &CompactionShared, inputs: Vec<Arc<SsTable>>) -> Result<(), CompactionError> {
    let survivors = merge_records(&inputs)?;

    let output = if survivors.is_empty() {
        // Every key resolved to a tombstone; the inputs cancel out.
        info!(inputs = inputs.len(), "compaction eliminated all records");
        None
    } else {
        let path = next_table_path(&shared.dir);
        SstBuilder::new(&path).build(survivors)?;
        let table = Arc::new(SsTable::open(&path)?);
        info!(
            inputs = inputs.len(),
            output = %path.display(),
            records = table.len(),
            "compaction merged tables"
        );
        Some(table)
    };

    // Swap inputs for the output atomically. Tables registered while the
    // merge ran are all newer than the output, so the output goes to the
    // oldest position.
    {
        let mut tables = write_tables(shared)?;
        tables.retain(|t| !inputs.iter().any(|input| input.path() == t.path()));
        if let Some(table) = output {
            tables.insert(0, table);
        }
    }

    // Unlink the inputs. Snapshots taken before the swap keep reading
    // through their live mappings until the last Arc drops.
    for input in &inputs {
        if let Err(e) = fs::remove_file(input.path()) {
            warn!(path = %input.path().display(), error = %e, "failed to unlink compacted SSTable");
        }
    }

    Ok(())
}

/// Coalesces all records from `inputs` (oldest first) under
/// last-writer-wins, dropping keys whose winner is a tombstone.
///
/// The returned records are in ascending key order.
fn merge_records(inputs: &[Arc<SsTable>]) -> Result<Vec<TableRecord>, CompactionError> {
    let mut acc: BTreeMap<String, TableRecord> = BTreeMap::new();

    for table in inputs {
        table.scan(None, None, |record| {
            match acc.get(&record.key) {
                // An older table already holds a strictly newer record.
                Some(existing) if existing.timestamp > record.timestamp => {}
                // Equal timestamps resolve to the newer table, which is
                // the one being scanned now.
                _ => {
                    acc.insert(record.key.clone(), record);
                }
            }
        })?;
    }

    Ok(acc
        .into_values()
        .filter(|record| !record.deleted)
        .collect())
}

// ------------------------------------------------------------------------------------------------
// Table naming
// ------------------------------------------------------------------------------------------------

/// Picks a unique `sstable_<unix_ms>.sst` path under `dir`.
///
/// The embedded timestamp provides age ordering at database open; on a
/// collision the timestamp is advanced until the name is free.
pub(crate) fn next_table_path(dir: &Path) -> PathBuf {
    let mut millis = unix_millis();
    loop {
        let candidate = dir.join(format!("sstable_{millis}.sst"));
        if !candidate.exists() {
            return candidate;
        }
        millis += 1;
    }
}

/// Current wall-clock time in milliseconds since the unix epoch.
fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
