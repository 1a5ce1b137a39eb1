//! Memtable Module
//!
//! The in-memory ordered write buffer of the storage engine.
//!
//! ## Design Invariants
//!
//! - The memtable holds exactly **one record per key** — the latest write
//!   wins, so a put followed by a delete (or vice versa) still counts as a
//!   single logical row.
//! - Deletes are represented via tombstones, not physical removal, so a
//!   flush can mask older values living in SSTables below.
//! - Iteration visits keys in ascending byte order; this is the input the
//!   flush path streams into an SSTable builder.
//! - All state is guarded by an internal `RwLock`, so the database's read
//!   fast path can consult the active memtable without taking the
//!   database-wide write mutex.
//!
//! ## Timestamps
//!
//! The database's serialized write path stamps each mutation and applies
//! it via [`MemTable::apply`], keeping WAL order and memtable order
//! identical. The [`MemTable::put`] / [`MemTable::delete`] conveniences
//! stamp the current wall clock and exist for direct use of the buffer.
//! WAL replay also goes through `apply` so recovered records keep their
//! original timestamps.

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
    sync::RwLock,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::value::Value;
use thiserror::Error;
use tracing::{error, trace};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by [`MemTable`] operations.
#[derive(Debug, Error)]
pub enum MemtableError {
    /// Internal invariant violation or poisoned lock.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Records
// ------------------------------------------------------------------------------------------------

/// The latest record stored for a key.
///
/// A tombstone has `deleted = true` and no value. The timestamp is the
/// version clock used for last-writer-wins resolution across layers.
#[derive(Debug, Clone, PartialEq)]
pub struct MemRecord {
    /// The stored value; `None` for a tombstone.
    pub value: Option<Value>,

    /// Whether this record marks the key as deleted.
    pub deleted: bool,

    /// Version clock of the mutation, unix milliseconds.
    pub timestamp: i64,
}

impl MemRecord {
    /// A live value record.
    pub fn put(value: Value, timestamp: i64) -> Self {
        Self {
            value: Some(value),
            deleted: false,
            timestamp,
        }
    }

    /// A tombstone record.
    pub fn tombstone(timestamp: i64) -> Self {
        Self {
            value: None,
            deleted: true,
            timestamp,
        }
    }

    /// Approximate in-memory footprint of this record under `key`.
    fn footprint(&self, key: &str) -> i64 {
        let value_size = self.value.as_ref().map_or(0, Value::encoded_size);
        (std::mem::size_of::<MemRecord>() + key.len() + value_size) as i64
    }
}

/// Result of a point lookup in a memtable.
#[derive(Debug, PartialEq)]
pub enum MemtableLookup {
    /// A live value is stored for the key.
    Value(Value),

    /// The key is tombstoned; older layers must not be consulted.
    Tombstone,

    /// The memtable has no record for the key.
    Absent,
}

// ------------------------------------------------------------------------------------------------
// MemTable Core
// ------------------------------------------------------------------------------------------------

/// An internally-synchronized ordered map from key to its latest record.
///
/// Created empty at database open and after every rotation; mutated only
/// through the database's serialized write path; retired into the
/// immutable queue by rotation and dropped after its contents reach an
/// SSTable.
pub struct MemTable {
    inner: RwLock<MemTableInner>,
}

struct MemTableInner {
    /// Key → latest record, in ascending key order.
    tree: BTreeMap<String, MemRecord>,

    /// Approximate in-memory footprint, maintained incrementally.
    approximate_size: i64,
}

impl MemTable {
    /// Creates an empty memtable.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemTableInner {
                tree: BTreeMap::new(),
                approximate_size: 0,
            }),
        }
    }

    /// Inserts or updates a key with a fresh current-time timestamp.
    pub fn put(&self, key: impl Into<String>, value: Value) -> Result<(), MemtableError> {
        self.apply(key.into(), MemRecord::put(value, current_millis()))
    }

    /// Tombstones a key with a fresh current-time timestamp.
    pub fn delete(&self, key: impl Into<String>) -> Result<(), MemtableError> {
        self.apply(key.into(), MemRecord::tombstone(current_millis()))
    }

    /// Applies a fully-formed record, replacing any prior record for the key.
    ///
    /// Used by the database write path (which stamps timestamps under its
    /// write mutex) and by WAL replay (which carries recovered timestamps).
    pub fn apply(&self, key: String, record: MemRecord) -> Result<(), MemtableError> {
        let mut guard = self.write_lock()?;

        trace!(key = %key, deleted = record.deleted, timestamp = record.timestamp, "memtable apply");

        let replaced = guard.tree.get(&key).map(|old| old.footprint(&key));
        if let Some(old_footprint) = replaced {
            guard.approximate_size -= old_footprint;
        }
        guard.approximate_size += record.footprint(&key);
        guard.tree.insert(key, record);

        Ok(())
    }

    /// Looks up the record stored for `key`.
    pub fn get(&self, key: &str) -> Result<MemtableLookup, MemtableError> {
        let guard = self.read_lock()?;

        Ok(match guard.tree.get(key) {
            None => MemtableLookup::Absent,
            Some(record) if record.deleted => MemtableLookup::Tombstone,
            Some(record) => match &record.value {
                Some(value) => MemtableLookup::Value(value.clone()),
                // A non-tombstone record always carries a value; treat a
                // violation as absence rather than panicking.
                None => MemtableLookup::Absent,
            },
        })
    }

    /// Returns every record in ascending key order, tombstones included.
    ///
    /// This is the flush input: the consumer must preserve tombstones so
    /// they keep masking older SSTable data.
    pub fn sorted_records(&self) -> Result<Vec<(String, MemRecord)>, MemtableError> {
        let guard = self.read_lock()?;
        Ok(guard
            .tree
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    /// Visits every record in ascending key order, tombstones included.
    pub fn each<F>(&self, mut visit: F) -> Result<(), MemtableError>
    where
        F: FnMut(&str, &MemRecord),
    {
        let guard = self.read_lock()?;
        for (key, record) in guard.tree.iter() {
            visit(key, record);
        }
        Ok(())
    }

    /// Approximate in-memory footprint in bytes.
    ///
    /// The database compares this against its flush threshold to decide
    /// when to rotate the active memtable.
    pub fn byte_size(&self) -> Result<i64, MemtableError> {
        Ok(self.read_lock()?.approximate_size)
    }

    /// Number of logical rows (distinct keys, tombstones included).
    pub fn len(&self) -> Result<i32, MemtableError> {
        Ok(self.read_lock()?.tree.len() as i32)
    }

    /// Returns `true` when no records are buffered.
    pub fn is_empty(&self) -> Result<bool, MemtableError> {
        Ok(self.read_lock()?.tree.is_empty())
    }

    /// Removes all records and resets the size accounting.
    pub fn clear(&self) -> Result<(), MemtableError> {
        let mut guard = self.write_lock()?;
        guard.tree.clear();
        guard.approximate_size = 0;
        Ok(())
    }

    fn read_lock(&self) -> Result<std::sync::RwLockReadGuard<'_, MemTableInner>, MemtableError> {
        self.inner.read().map_err(|_| {
            error!("memtable lock poisoned");
            MemtableError::Internal("memtable lock poisoned".into())
        })
    }

    fn write_lock(&self) -> Result<std::sync::RwLockWriteGuard<'_, MemTableInner>, MemtableError> {
        self.inner.write().map_err(|_| {
            error!("memtable lock poisoned");
            MemtableError::Internal("memtable lock poisoned".into())
        })
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Current wall-clock time in milliseconds since the unix epoch.
fn current_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
