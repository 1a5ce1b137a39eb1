//! Bloom Filter Module
//!
//! A space-efficient probabilistic set used to answer "is this key
//! definitely absent from this SSTable?" without touching its data
//! section. False positives are permitted at a configurable rate;
//! false negatives are forbidden.
//!
//! # Hash family
//!
//! The `k` hash functions are derived from a single cryptographic digest:
//! hash `i` feeds SHA-256 with the 0-based index byte followed by the raw
//! key bytes, takes the first four digest bytes as a big-endian `u32`, and
//! reduces it modulo the bit count. Deriving the family from a seeded
//! digest keeps the serialized filter readable across platforms and
//! builds — there is no process-local hasher state.
//!
//! # Sizing
//!
//! For `n` expected items and false-positive rate `p` (default `0.01`):
//!
//! ```text
//! m = ⌈-n·ln(p) / (ln 2)²⌉        bits
//! k = clamp(⌈(m/n)·ln 2⌉, 1, 10)  hash functions
//! ```
//!
//! # Serialization
//!
//! ```text
//! [bit_count:i32 LE][hash_count:i32 LE][bits:⌈bit_count/8⌉ bytes]
//! ```
//!
//! The bit array is packed most-significant-bit first within each byte,
//! with the final partial byte zero-padded.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use bit_vec::BitVec;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Default false-positive rate used when sizing a filter.
pub const DEFAULT_FALSE_POSITIVE_RATE: f64 = 0.01;

/// Upper bound on the number of hash functions.
pub const MAX_HASH_COUNT: u32 = 10;

/// Serialized header size: bit count plus hash count, both `i32`.
const BLOOM_HEADER_SIZE: usize = 8;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned when deserializing a bloom filter.
#[derive(Debug, Error)]
pub enum BloomError {
    /// The serialized bytes do not describe a well-formed filter.
    #[error("corrupt bloom filter: {0}")]
    Corrupt(String),
}

// ------------------------------------------------------------------------------------------------
// BloomFilter
// ------------------------------------------------------------------------------------------------

/// A fixed-size bloom filter over raw key bytes.
///
/// Built once per SSTable at construction time and serialized into the
/// table's trailer. Lookups are read-only, so a shared reference suffices
/// for concurrent readers.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    /// The bit array.
    bits: BitVec,

    /// Number of hash functions applied per key.
    hash_count: u32,
}

impl BloomFilter {
    /// Creates a filter sized for `expected_items` at the default
    /// false-positive rate.
    pub fn new(expected_items: usize) -> Self {
        Self::with_rate(expected_items, DEFAULT_FALSE_POSITIVE_RATE)
    }

    /// Creates a filter sized for `expected_items` at the given
    /// false-positive rate.
    ///
    /// `expected_items` of zero is treated as one so the filter always has
    /// at least one bit and one hash function.
    pub fn with_rate(expected_items: usize, false_positive_rate: f64) -> Self {
        let n = expected_items.max(1);
        let bit_count = Self::optimal_bit_count(n, false_positive_rate);
        let hash_count = Self::optimal_hash_count(bit_count, n);

        Self {
            bits: BitVec::from_elem(bit_count, false),
            hash_count,
        }
    }

    /// Optimal bit count `m = ⌈-n·ln(p) / (ln 2)²⌉` for `n` items at
    /// false-positive rate `p`.
    pub fn optimal_bit_count(expected_items: usize, false_positive_rate: f64) -> usize {
        let n = expected_items.max(1) as f64;
        let m = (-(n * false_positive_rate.ln()) / 2.0_f64.ln().powi(2)).ceil();
        (m as usize).max(1)
    }

    /// Optimal hash count `k = ⌈(m/n)·ln 2⌉`, clamped to `1..=10`.
    pub fn optimal_hash_count(bit_count: usize, expected_items: usize) -> u32 {
        let k = ((bit_count as f64 / expected_items.max(1) as f64) * 2.0_f64.ln()).ceil();
        (k as u32).clamp(1, MAX_HASH_COUNT)
    }

    /// Number of bits in the filter.
    pub fn bit_count(&self) -> usize {
        self.bits.len()
    }

    /// Number of hash functions applied per key.
    pub fn hash_count(&self) -> u32 {
        self.hash_count
    }

    /// Inserts a key into the filter.
    pub fn add(&mut self, key: &[u8]) {
        for i in 0..self.hash_count {
            let index = self.bit_index(i, key);
            self.bits.set(index, true);
        }
    }

    /// Returns `false` only when `key` is definitely not in the set.
    ///
    /// A `true` result means "possibly present" and must be confirmed
    /// against the backing data.
    pub fn might_contain(&self, key: &[u8]) -> bool {
        (0..self.hash_count).all(|i| self.bits.get(self.bit_index(i, key)).unwrap_or(false))
    }

    /// Bit position for hash function `i` applied to `key`.
    fn bit_index(&self, i: u32, key: &[u8]) -> usize {
        let mut hasher = Sha256::new();
        hasher.update([i as u8]);
        hasher.update(key);
        let digest = hasher.finalize();
        let prefix = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
        (prefix as usize) % self.bits.len()
    }

    /// Total serialized size in bytes.
    pub fn serialized_size(&self) -> usize {
        BLOOM_HEADER_SIZE + self.bits.len().div_ceil(8)
    }

    /// Appends the serialized filter to `buf`.
    pub fn serialize_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(self.bits.len() as i32).to_le_bytes());
        buf.extend_from_slice(&(self.hash_count as i32).to_le_bytes());
        buf.extend_from_slice(&self.bits.to_bytes());
    }

    /// Decodes a filter from the beginning of `buf`.
    ///
    /// Returns `(filter, bytes_consumed)` so callers embedding the filter
    /// inside a larger structure can advance their cursor.
    pub fn deserialize(buf: &[u8]) -> Result<(Self, usize), BloomError> {
        if buf.len() < BLOOM_HEADER_SIZE {
            return Err(BloomError::Corrupt(format!(
                "header needs {BLOOM_HEADER_SIZE} bytes, have {}",
                buf.len()
            )));
        }

        let bit_count = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let hash_count = i32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);

        if bit_count <= 0 {
            return Err(BloomError::Corrupt(format!("invalid bit count {bit_count}")));
        }
        if hash_count <= 0 || hash_count as u32 > MAX_HASH_COUNT {
            return Err(BloomError::Corrupt(format!(
                "invalid hash count {hash_count}"
            )));
        }

        let bit_count = bit_count as usize;
        let byte_count = bit_count.div_ceil(8);
        let body = &buf[BLOOM_HEADER_SIZE..];
        if body.len() < byte_count {
            return Err(BloomError::Corrupt(format!(
                "bit array needs {byte_count} bytes, have {}",
                body.len()
            )));
        }

        let mut bits = BitVec::from_bytes(&body[..byte_count]);
        bits.truncate(bit_count);

        Ok((
            Self {
                bits,
                hash_count: hash_count as u32,
            },
            BLOOM_HEADER_SIZE + byte_count,
        ))
    }
}
