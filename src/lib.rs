//! # StarDB
//!
//! An embeddable, persistent key-value storage engine built on a
//! **Log-Structured Merge Tree (LSM-tree)** architecture, storing
//! **typed scalar values** under string keys. Designed for fast writes
//! and crash-safe operation.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    Database                         │
//! │  ┌────────────┐  ┌──────────────┐  ┌────────────┐   │
//! │  │  Active    │  │  Immutable   │  │  SSTables  │   │
//! │  │  Memtable  │  │  Memtables   │  │  (on disk) │   │
//! │  │  + WAL     │  │              │  │            │   │
//! │  └─────┬──────┘  └──────┬───────┘  └─────┬──────┘   │
//! │        │   rotate       │   flush        │          │
//! │        └─────────►      └────────►       │          │
//! │                                          │          │
//! │  ┌───────────────────────────────────────┘          │
//! │  │  Compaction (threshold-triggered full merge)     │
//! │  └──────────────────────────────────────────────────┤
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`db`] | Core database — open, read, write, scan, flush, compact |
//! | [`value`] | Typed scalar values with a stable binary encoding |
//! | [`wal`] | Append-only write-ahead log for crash recovery |
//! | [`memtable`] | In-memory ordered write buffer |
//! | [`sstable`] | Immutable, sorted, on-disk tables with bloom filters |
//! | [`compaction`] | Live SSTable set and background merging |
//! | [`bloom`] | Probabilistic set membership for SSTable keys |
//!
//! ## Key Features
//!
//! - **Write-ahead logging** — every mutation is persisted to the WAL
//!   before being acknowledged, guaranteeing durability and crash recovery.
//! - **Typed values** — booleans, integers of every width, floats, strings,
//!   and raw byte sequences, round-tripped exactly through disk.
//! - **Last-writer-wins** — reads resolve the record with the greatest
//!   timestamp across all layers, with tombstones masking older writes.
//! - **Bloom filter lookups** — each SSTable carries a bloom filter for
//!   fast negative point-lookup responses.
//! - **Background maintenance** — memtable flushes and SSTable compaction
//!   run on dedicated worker threads and stop cleanly on close.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stardb::Database;
//!
//! let db = Database::open("/tmp/my_db").unwrap();
//!
//! // Write typed values
//! db.put("name", "Alice").unwrap();
//! db.put("age", 30i32).unwrap();
//! db.put("active", true).unwrap();
//!
//! // Read
//! let age = db.get("age").unwrap().unwrap();
//! assert_eq!(age.as_i32().unwrap(), 30);
//!
//! // Delete
//! db.delete("name").unwrap();
//! assert!(db.get("name").unwrap().is_none());
//!
//! // Ordered scan (inclusive bounds)
//! db.scan(Some("a"), Some("z"), |key, value| {
//!     println!("{key} = {value:?}");
//! })
//! .unwrap();
//!
//! // Graceful shutdown
//! db.close().unwrap();
//! ```

pub mod bloom;
pub mod compaction;
pub mod db;
pub mod memtable;
pub mod sstable;
pub mod value;
pub mod wal;

pub use db::{Database, DbConfig, DbError, DbStats};
pub use value::{Value, ValueError};
