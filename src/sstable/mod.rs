//! Sorted String Table (SSTable) Module
//!
//! An **immutable**, **disk-backed**, key-sorted table produced by a
//! memtable flush or a compaction. Each table is self-describing: a fixed
//! prefix points at a trailer holding the key index, the bloom filter, and
//! the min/max key bounds, so no sidecar files exist.
//!
//! # On-disk layout
//!
//! ```text
//! [magic:"STDB"][version:u32 LE][trailer_offset:u64 LE]
//! [record][record]...                                      ← data section
//! trailer:
//!   [index_count:u32 LE]
//!     per entry: [key_len:u32][key_bytes][offset:u64][size:u32]
//!   [bloom_bit_count:i32][bloom_hash_count:i32][bloom_bits]
//!   [min_key_len:u32][min_key_bytes]
//!   [max_key_len:u32][max_key_bytes]
//! ```
//!
//! Data records:
//!
//! ```text
//! [timestamp:i64 LE][deleted:1][key_len:u32 LE][key_bytes][has_value:1][value_bytes?]
//! ```
//!
//! The data section is strictly ordered by key and keys are unique within
//! one table. Tombstones are first-class records so they keep masking
//! older tables until compaction retires them.
//!
//! # Point lookup pipeline
//!
//! 1. Reject keys outside `[min_key, max_key]`.
//! 2. Consult the bloom filter; a definitive "absent" skips all I/O.
//! 3. Binary-search the in-memory index for an exact key match.
//! 4. Decode the single record at the index entry's offset.
//!
//! # Concurrency model
//!
//! Tables are immutable, so reads share a memory-mapped view with no
//! locking beyond the handle cell. [`SsTable::close`] drops the mapping;
//! any later read transparently remaps the file, so a closed table remains
//! usable on demand.
//!
//! # Corruption
//!
//! A bad magic, unsupported version, out-of-range trailer offset, or a
//! record overrunning its bounds is [`SsTableError::Corrupt`] — fatal for
//! the file, and at database open fatal for the database.

// ------------------------------------------------------------------------------------------------
// Sub-modules
// ------------------------------------------------------------------------------------------------

pub mod builder;

#[cfg(test)]
mod tests;

pub use builder::SstBuilder;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    fs::File,
    io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use crate::bloom::{BloomError, BloomFilter};
use crate::value::{Value, ValueError};
use memmap2::Mmap;
use thiserror::Error;
use tracing::{debug, trace};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Magic bytes identifying an SSTable file.
pub(crate) const SST_MAGIC: [u8; 4] = *b"STDB";

/// Current SSTable format version.
pub(crate) const SST_VERSION: u32 = 1;

/// Size of the fixed prefix: magic + version + trailer offset.
pub(crate) const SST_PREFIX_SIZE: usize = 4 + 4 + 8;

/// Byte position of the trailer offset within the prefix.
pub(crate) const SST_TRAILER_OFFSET_POS: u64 = 8;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by SSTable operations (read, write, build).
#[derive(Debug, Error)]
pub enum SsTableError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The file does not describe a well-formed SSTable.
    #[error("corrupt SSTable: {0}")]
    Corrupt(String),

    /// Internal invariant violation or poisoned lock.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<BloomError> for SsTableError {
    fn from(e: BloomError) -> Self {
        SsTableError::Corrupt(e.to_string())
    }
}

impl From<ValueError> for SsTableError {
    fn from(e: ValueError) -> Self {
        SsTableError::Corrupt(e.to_string())
    }
}

// ------------------------------------------------------------------------------------------------
// Records
// ------------------------------------------------------------------------------------------------

/// One decoded data record: a put or a tombstone with its version clock.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRecord {
    /// The record's key.
    pub key: String,

    /// The stored value; `None` for a tombstone.
    pub value: Option<Value>,

    /// Whether this record marks the key as deleted.
    pub deleted: bool,

    /// Version clock of the mutation, unix milliseconds.
    pub timestamp: i64,
}

impl TableRecord {
    /// A live value record.
    pub fn put(key: impl Into<String>, value: Value, timestamp: i64) -> Self {
        Self {
            key: key.into(),
            value: Some(value),
            deleted: false,
            timestamp,
        }
    }

    /// A tombstone record.
    pub fn tombstone(key: impl Into<String>, timestamp: i64) -> Self {
        Self {
            key: key.into(),
            value: None,
            deleted: true,
            timestamp,
        }
    }

    /// Appends the wire encoding of this record to `buf`.
    pub(crate) fn encode_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.push(u8::from(self.deleted));
        buf.extend_from_slice(&(self.key.len() as u32).to_le_bytes());
        buf.extend_from_slice(self.key.as_bytes());
        match &self.value {
            Some(value) => {
                buf.push(1);
                value.encode_to(buf);
            }
            None => buf.push(0),
        }
    }

    /// Decodes one record from the beginning of `buf`.
    ///
    /// Returns `(record, bytes_consumed)`. Any overrun of `buf` or an
    /// inconsistent deleted/has-value combination is corruption.
    pub(crate) fn decode_from(buf: &[u8]) -> Result<(Self, usize), SsTableError> {
        let mut cur = Cursor::new(buf);

        let timestamp = i64::from_le_bytes(cur.read_array::<8>("record timestamp")?);
        let deleted = match cur.read_array::<1>("record deleted flag")?[0] {
            0 => false,
            1 => true,
            other => {
                return Err(SsTableError::Corrupt(format!(
                    "invalid deleted flag 0x{other:02x}"
                )));
            }
        };

        let key_len = u32::from_le_bytes(cur.read_array::<4>("record key length")?) as usize;
        let key_bytes = cur.read_slice(key_len, "record key")?;
        let key = std::str::from_utf8(key_bytes)
            .map_err(|e| SsTableError::Corrupt(format!("non-UTF-8 record key: {e}")))?
            .to_string();

        let has_value = cur.read_array::<1>("record value flag")?[0];
        let value = match (deleted, has_value) {
            (true, 0) => None,
            (false, 1) => {
                let (value, consumed) = Value::decode_from(cur.remaining())?;
                cur.advance(consumed);
                Some(value)
            }
            _ => {
                return Err(SsTableError::Corrupt(format!(
                    "inconsistent record flags: deleted={deleted} has_value={has_value}"
                )));
            }
        };

        Ok((
            Self {
                key,
                value,
                deleted,
                timestamp,
            },
            cur.position(),
        ))
    }
}

/// One in-memory index entry pointing at a data record.
#[derive(Debug, Clone)]
pub(crate) struct IndexEntry {
    /// The record's key.
    pub(crate) key: String,

    /// Byte offset of the record within the file.
    pub(crate) offset: u64,

    /// Encoded size of the record in bytes.
    pub(crate) size: u32,
}

// ------------------------------------------------------------------------------------------------
// Bounds-checked cursor over a byte slice
// ------------------------------------------------------------------------------------------------

/// Sequential reader over a byte slice that turns every overrun into
/// [`SsTableError::Corrupt`] with a description of the field being read.
pub(crate) struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    pub(crate) fn advance(&mut self, n: usize) {
        self.pos += n;
    }

    pub(crate) fn read_slice(&mut self, n: usize, field: &str) -> Result<&'a [u8], SsTableError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                SsTableError::Corrupt(format!(
                    "{field} overruns buffer ({n} bytes at {}, have {})",
                    self.pos,
                    self.buf.len()
                ))
            })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub(crate) fn read_array<const N: usize>(
        &mut self,
        field: &str,
    ) -> Result<[u8; N], SsTableError> {
        let slice = self.read_slice(N, field)?;
        let mut arr = [0u8; N];
        arr.copy_from_slice(slice);
        Ok(arr)
    }

    pub(crate) fn read_u32(&mut self, field: &str) -> Result<u32, SsTableError> {
        Ok(u32::from_le_bytes(self.read_array::<4>(field)?))
    }

    pub(crate) fn read_u64(&mut self, field: &str) -> Result<u64, SsTableError> {
        Ok(u64::from_le_bytes(self.read_array::<8>(field)?))
    }

    pub(crate) fn read_key(&mut self, field: &str) -> Result<String, SsTableError> {
        let len = self.read_u32(field)? as usize;
        let bytes = self.read_slice(len, field)?;
        Ok(std::str::from_utf8(bytes)
            .map_err(|e| SsTableError::Corrupt(format!("non-UTF-8 {field}: {e}")))?
            .to_string())
    }
}

// ------------------------------------------------------------------------------------------------
// SsTable — immutable reader
// ------------------------------------------------------------------------------------------------

/// A memory-mapped, immutable sorted table.
///
/// The index, bloom filter, and key bounds are parsed once at open and
/// kept in memory; data records are decoded on demand from the mapping.
pub struct SsTable {
    /// Path of the backing file.
    path: PathBuf,

    /// Lazily re-creatable mapping of the file. `None` after [`close`](Self::close).
    mmap: Mutex<Option<Arc<Mmap>>>,

    /// Sorted index over every data record.
    index: Vec<IndexEntry>,

    /// Bloom filter over every key in the table.
    bloom: BloomFilter,

    /// Smallest key in the table.
    min_key: String,

    /// Largest key in the table.
    max_key: String,

    /// Total file size in bytes.
    file_size: u64,
}

impl SsTable {
    /// Opens an SSTable, validates its structure, and loads the trailer.
    ///
    /// # Errors
    ///
    /// [`SsTableError::Corrupt`] when the magic, version, trailer offset,
    /// or any trailer field is malformed. Such a file must not be served.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SsTableError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        let file_size = mmap.len() as u64;

        if mmap.len() < SST_PREFIX_SIZE {
            return Err(SsTableError::Corrupt(format!(
                "file too small for prefix ({} bytes)",
                mmap.len()
            )));
        }

        let mut prefix = Cursor::new(&mmap[..SST_PREFIX_SIZE]);
        let magic = prefix.read_array::<4>("magic")?;
        if magic != SST_MAGIC {
            return Err(SsTableError::Corrupt(format!("bad magic {magic:02x?}")));
        }
        let version = prefix.read_u32("version")?;
        if version != SST_VERSION {
            return Err(SsTableError::Corrupt(format!(
                "unsupported version {version}"
            )));
        }
        let trailer_offset = prefix.read_u64("trailer offset")? as usize;
        if trailer_offset < SST_PREFIX_SIZE || trailer_offset > mmap.len() {
            return Err(SsTableError::Corrupt(format!(
                "trailer offset {trailer_offset} out of range (file is {} bytes)",
                mmap.len()
            )));
        }

        let mut trailer = Cursor::new(&mmap[trailer_offset..]);

        let index_count = trailer.read_u32("index count")? as usize;
        let mut index = Vec::with_capacity(index_count);
        for _ in 0..index_count {
            let key = trailer.read_key("index key")?;
            let offset = trailer.read_u64("index offset")?;
            let size = trailer.read_u32("index size")?;

            let end = offset.checked_add(size as u64);
            if offset < SST_PREFIX_SIZE as u64 || end.is_none_or(|e| e > trailer_offset as u64) {
                return Err(SsTableError::Corrupt(format!(
                    "index entry for {key:?} points outside the data section"
                )));
            }
            index.push(IndexEntry { key, offset, size });
        }

        let (bloom, consumed) = BloomFilter::deserialize(trailer.remaining())?;
        trailer.advance(consumed);

        let min_key = trailer.read_key("min key")?;
        let max_key = trailer.read_key("max key")?;

        if !trailer.remaining().is_empty() {
            return Err(SsTableError::Corrupt(format!(
                "{} unexpected bytes after trailer",
                trailer.remaining().len()
            )));
        }

        debug!(
            path = %path.display(),
            records = index.len(),
            min_key = %min_key,
            max_key = %max_key,
            "SSTable opened"
        );

        Ok(Self {
            path,
            mmap: Mutex::new(Some(Arc::new(mmap))),
            index,
            bloom,
            min_key,
            max_key,
            file_size,
        })
    }

    /// Point lookup returning the live value for `key`.
    ///
    /// Absent and tombstoned keys both return `None`; callers that must
    /// distinguish the two (the database's layered read path) use
    /// [`lookup`](Self::lookup).
    pub fn get(&self, key: &str) -> Result<Option<Value>, SsTableError> {
        Ok(self.lookup(key)?.and_then(|record| {
            if record.deleted {
                None
            } else {
                record.value
            }
        }))
    }

    /// Point lookup returning the raw record for `key`, tombstones included.
    pub fn lookup(&self, key: &str) -> Result<Option<TableRecord>, SsTableError> {
        if key < self.min_key.as_str() || key > self.max_key.as_str() {
            return Ok(None);
        }
        if !self.bloom.might_contain(key.as_bytes()) {
            trace!(key, path = %self.path.display(), "bloom filter excluded key");
            return Ok(None);
        }

        let Ok(pos) = self.index.binary_search_by(|e| e.key.as_str().cmp(key)) else {
            return Ok(None);
        };
        let entry = &self.index[pos];

        let record = self.read_record(entry)?;
        if record.key != key {
            return Err(SsTableError::Corrupt(format!(
                "index key {key:?} resolved to record key {:?}",
                record.key
            )));
        }
        Ok(Some(record))
    }

    /// Ordered scan over `[start, end]`, both bounds inclusive and
    /// optional.
    ///
    /// Yields every decoded record in the interval — tombstones included,
    /// so layered consumers can apply masking themselves.
    pub fn scan<F>(
        &self,
        start: Option<&str>,
        end: Option<&str>,
        mut visit: F,
    ) -> Result<(), SsTableError>
    where
        F: FnMut(TableRecord),
    {
        for entry in &self.index {
            if let Some(start) = start
                && entry.key.as_str() < start
            {
                continue;
            }
            if let Some(end) = end
                && entry.key.as_str() > end
            {
                break;
            }
            visit(self.read_record(entry)?);
        }
        Ok(())
    }

    /// Drops the file mapping.
    ///
    /// The table stays usable: the next read remaps the file on demand.
    pub fn close(&self) {
        if let Ok(mut guard) = self.mmap.lock() {
            *guard = None;
            trace!(path = %self.path.display(), "SSTable mapping released");
        }
    }

    /// Smallest key stored in this table.
    pub fn min_key(&self) -> &str {
        &self.min_key
    }

    /// Largest key stored in this table.
    pub fn max_key(&self) -> &str {
        &self.max_key
    }

    /// Number of records (live and tombstoned) in this table.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns `true` when the table holds no records.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Total on-disk size of this table in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decodes the record behind one index entry.
    fn read_record(&self, entry: &IndexEntry) -> Result<TableRecord, SsTableError> {
        let mmap = self.map()?;
        let start = entry.offset as usize;
        let end = start + entry.size as usize;
        // The mapping may have been re-created since open; bounds must
        // hold against the current length.
        if end > mmap.len() {
            return Err(SsTableError::Corrupt(format!(
                "record at {start} overruns file of {} bytes",
                mmap.len()
            )));
        }
        let (record, consumed) = TableRecord::decode_from(&mmap[start..end])?;
        if consumed != entry.size as usize {
            return Err(SsTableError::Corrupt(format!(
                "record at {start} decoded {consumed} bytes, index declared {}",
                entry.size
            )));
        }
        Ok(record)
    }

    /// Returns the current mapping, re-creating it after a `close`.
    fn map(&self) -> Result<Arc<Mmap>, SsTableError> {
        let mut guard = self
            .mmap
            .lock()
            .map_err(|_| SsTableError::Internal("SSTable mapping mutex poisoned".into()))?;

        if let Some(mmap) = guard.as_ref() {
            return Ok(Arc::clone(mmap));
        }

        let file = File::open(&self.path)?;
        let mmap = Arc::new(unsafe { Mmap::map(&file)? });
        trace!(path = %self.path.display(), "SSTable remapped on demand");
        *guard = Some(Arc::clone(&mmap));
        Ok(mmap)
    }
}

impl std::fmt::Debug for SsTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SsTable")
            .field("path", &self.path)
            .field("records", &self.index.len())
            .field("min_key", &self.min_key)
            .field("max_key", &self.max_key)
            .finish_non_exhaustive()
    }
}
