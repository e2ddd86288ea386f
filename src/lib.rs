//! `lsmdb` — the core in-memory write path and on-disk table read cache of
//! an embedded, ordered key-value storage engine built on the
//! Log-Structured Merge-tree design.
//!
//! This crate covers four things, leaves first:
//!
//! - [`coding`] and [`arena`]: the byte-level primitives (fixed/varint
//!   encoding, length-prefixed slices, a bump-pointer block allocator) the
//!   rest of the crate is built from.
//! - [`comparator`] and [`key`]: the pluggable byte-slice ordering, and the
//!   packed `(user_key, sequence, type)` "internal key" format that is this
//!   engine's canonical sort key.
//! - [`skiplist`] and [`memtable`]: the write-path accumulator — a
//!   memory-bounded, single-writer/multi-reader ordered structure that
//!   every write and point lookup passes through before anything reaches
//!   disk.
//! - [`lru_cache`], [`table_cache`], and [`environment`]: the read-path
//!   cache that bounds how many on-disk table files are open at once, keyed
//!   by file number.
//!
//! Deliberately out of scope: the write-ahead log, the on-disk table file
//! format itself (block layout, index blocks, bloom filters), the
//! compaction scheduler, the manifest/version set, and the public database
//! facade that would tie all of the above into a `put`/`get`/`delete` API
//! backed by real files. Those are external collaborators this crate is
//! written to plug into, not things it implements.
//!
//! [`environment`] names the one seam this crate has onto that larger
//! system: "open a random-access file by name" and "build a table from a
//! (file, size) pair." A real engine supplies both; this crate supplies
//! everything above them.

#![allow(dead_code)]

pub mod arena;
pub mod coding;
pub mod comparator;
pub mod environment;
pub mod key;
pub mod lru_cache;
pub mod memtable;
pub mod skiplist;
pub mod status;
pub mod table_cache;

pub use comparator::{BytewiseComparator, Comparator};
pub use environment::{Environment, RandomAccessFile, Table};
pub use key::{SequenceNumber, ValueType};
pub use memtable::MemTable;
pub use status::{Error, Result};
pub use table_cache::TableCache;
