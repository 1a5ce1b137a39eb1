//! SSTable builder — writes a complete table file from a batch of records.
//!
//! The [`SstBuilder`] accepts the records drained from a memtable or
//! produced by a compaction merge, re-sorts them by key (callers usually
//! provide sorted input, but the builder does not rely on it), and writes
//! the full file: prefix, data section, and trailer.
//!
//! # Input requirements
//!
//! - At least one record; building an empty table is a caller error.
//! - Keys must be unique — the upstream structures (memtable map,
//!   compaction accumulator) guarantee this.
//!
//! # Atomicity
//!
//! 1. Write everything to `path.tmp`.
//! 2. Patch the trailer offset into the prefix.
//! 3. Flush and fsync the file.
//! 4. Rename `path.tmp` → `path`.
//!
//! A crash cannot produce a partially-written table under the final name,
//! and the file is durable before it is announced to the compaction
//! manager.

use std::{
    fs::{OpenOptions, rename},
    io::{BufWriter, Seek, SeekFrom, Write},
    path::Path,
};

use crate::bloom::{BloomFilter, DEFAULT_FALSE_POSITIVE_RATE};
use tracing::debug;

use super::{SST_MAGIC, SST_PREFIX_SIZE, SST_TRAILER_OFFSET_POS, SST_VERSION, SsTableError, TableRecord};

// ------------------------------------------------------------------------------------------------
// SstBuilder — public entry point
// ------------------------------------------------------------------------------------------------

/// Builds one complete SSTable file on disk.
///
/// # Example
///
/// ```rust,ignore
/// SstBuilder::new(&path).build(records)?;
/// let table = SsTable::open(&path)?;
/// ```
pub struct SstBuilder<P: AsRef<Path>> {
    path: P,
}

impl<P: AsRef<Path>> SstBuilder<P> {
    /// Creates a builder targeting the given output path.
    pub fn new(path: P) -> Self {
        Self { path }
    }

    /// Consumes the record batch and writes a complete table.
    ///
    /// # Errors
    ///
    /// - [`SsTableError::Internal`] when `records` is empty.
    /// - I/O errors from writing, syncing, or renaming.
    pub fn build(self, mut records: Vec<TableRecord>) -> Result<(), SsTableError> {
        if records.is_empty() {
            return Err(SsTableError::Internal(
                "cannot build an SSTable from zero records".into(),
            ));
        }

        records.sort_by(|a, b| a.key.cmp(&b.key));

        let mut bloom = BloomFilter::with_rate(records.len(), DEFAULT_FALSE_POSITIVE_RATE);
        for record in &records {
            bloom.add(record.key.as_bytes());
        }

        let final_path = self.path.as_ref();
        let tmp_path = final_path.with_extension("tmp");
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;

        let mut writer = BufWriter::new(&mut file);

        // 1. Prefix with a placeholder trailer offset, patched in step 4.
        writer.write_all(&SST_MAGIC)?;
        writer.write_all(&SST_VERSION.to_le_bytes())?;
        writer.write_all(&0u64.to_le_bytes())?;

        // 2. Data section, collecting the index as records stream out.
        let mut offset = SST_PREFIX_SIZE as u64;
        let mut index = Vec::with_capacity(records.len());
        let mut buf = Vec::new();
        for record in &records {
            buf.clear();
            record.encode_to(&mut buf);
            writer.write_all(&buf)?;
            index.push((record.key.as_str(), offset, buf.len() as u32));
            offset += buf.len() as u64;
        }

        // 3. Trailer: index, bloom filter, key bounds.
        let trailer_offset = offset;
        let mut trailer = Vec::new();
        trailer.extend_from_slice(&(index.len() as u32).to_le_bytes());
        for (key, record_offset, size) in &index {
            trailer.extend_from_slice(&(key.len() as u32).to_le_bytes());
            trailer.extend_from_slice(key.as_bytes());
            trailer.extend_from_slice(&record_offset.to_le_bytes());
            trailer.extend_from_slice(&size.to_le_bytes());
        }
        bloom.serialize_to(&mut trailer);

        // Records are sorted, so the bounds are the first and last keys.
        let min_key = records[0].key.as_str();
        let max_key = records[records.len() - 1].key.as_str();
        trailer.extend_from_slice(&(min_key.len() as u32).to_le_bytes());
        trailer.extend_from_slice(min_key.as_bytes());
        trailer.extend_from_slice(&(max_key.len() as u32).to_le_bytes());
        trailer.extend_from_slice(max_key.as_bytes());

        writer.write_all(&trailer)?;
        writer.flush()?;
        drop(writer);

        // 4. Patch the real trailer offset into the prefix, then make the
        //    file durable before it becomes visible under the final name.
        file.seek(SeekFrom::Start(SST_TRAILER_OFFSET_POS))?;
        file.write_all(&trailer_offset.to_le_bytes())?;
        file.sync_all()?;
        drop(file);

        rename(&tmp_path, final_path)?;

        debug!(
            path = %final_path.display(),
            records = records.len(),
            min_key,
            max_key,
            trailer_offset,
            "SSTable built"
        );
        Ok(())
    }
}
