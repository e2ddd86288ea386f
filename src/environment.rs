//! The narrow capability surface the table cache consumes from its host:
//! open a random-access file by name, and construct a [`Table`] given a file
//! and its size. Everything about *how* a table is laid out on disk — block
//! encoding, index blocks, bloom filters — is explicitly out of scope for
//! this crate (see `DESIGN.md`); this module only names the seam a real
//! implementation would plug into.

use crate::status::Result;

/// A handle supporting positional reads, as the table cache's opened-table
/// value pairs with its parsed [`Table`].
///
/// Narrower than a full filesystem abstraction: the core never opens
/// sequential or writable files, lists directories, or locks anything. Those
/// capabilities belong to the write-ahead log and compaction machinery this
/// crate does not implement.
pub trait RandomAccessFile: Send + Sync {
    /// Reads up to `len` bytes starting at `offset`. May return fewer bytes
    /// than requested only at end-of-file.
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>>;
}

/// Interpretive state for one on-disk table file, opened from a
/// [`RandomAccessFile`] and its size. Produces iterators over the table's
/// contents.
///
/// A real implementation parses the table's footer, index block, and
/// (optionally) bloom filter; that parsing is the on-disk table format this
/// crate's scope explicitly excludes. What the table cache needs from this
/// trait is only that opening can fail, and that an opened table can be
/// iterated.
pub trait Table: Send + Sync + Sized {
    type File: RandomAccessFile;
    type Iter: Iterator<Item = (Vec<u8>, Vec<u8>)>;

    fn open(file: &Self::File, file_size: u64) -> Result<Self>;
    fn iter(&self) -> Self::Iter;
}

/// The host capability the table cache depends on: open a random-access
/// file for a table by `(dbname, file_number)`.
///
/// `dbname` and the file-naming scheme are opaque to this crate; a host
/// implementation derives the on-disk path however its directory layout
/// requires (the filesystem abstraction named in the scope note above).
pub trait Environment: Send + Sync {
    type File: RandomAccessFile;

    fn open_random_access_file(&self, dbname: &str, file_number: u64) -> Result<Self::File>;
}
