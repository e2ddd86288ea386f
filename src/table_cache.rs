//! Specialization of the [`LruCache`] whose keys are 64-bit table file
//! numbers and whose values are opened `(random_access_file, table)` pairs.
//! Produces iterators that hold a cache handle for their entire lifetime and
//! release it on destruction, giving a hard ceiling — the cache's configured
//! capacity — on the number of table files open at once.

use std::sync::Arc;

use tracing::{trace, warn};

use crate::environment::{Environment, RandomAccessFile, Table};
use crate::lru_cache::{Handle, LruCache};
use crate::status::{Error, Result};

/// Keys are 8-byte little-endian file numbers, matching the encoding the
/// reference implementation uses to name a table cache entry.
type FileNumberKey = [u8; 8];

fn encode_file_number(file_number: u64) -> FileNumberKey {
    file_number.to_le_bytes()
}

/// The pair a successful cache hit or miss-then-open resolves to: the open
/// file handle and the table built on top of it. Both outlive every
/// iterator produced from them, since the iterator holds the cache handle
/// that keeps this entry (and its refcount) alive.
struct OpenedTable<F, T> {
    file: Arc<F>,
    table: Arc<T>,
}

/// A bounded cache of opened table files, keyed by file number.
pub struct TableCache<E: Environment, T: Table<File = E::File>> {
    env: E,
    dbname: String,
    cache: LruCache<FileNumberKey, OpenedTable<E::File, T>>,
}

impl<E: Environment + 'static, T: Table<File = E::File> + 'static> TableCache<E, T> {
    /// `capacity` bounds the number of simultaneously open table files,
    /// since every entry's charge is exactly 1.
    pub fn new(env: E, dbname: impl Into<String>, capacity: usize) -> Self {
        TableCache {
            env,
            dbname: dbname.into(),
            cache: LruCache::new(capacity),
        }
    }

    /// Opens (or reuses a cached) iterator over the table identified by
    /// `file_number`/`file_size`. On a fresh open, stores the parsed table
    /// in `out_table` if requested.
    ///
    /// A transient I/O or table-open error is surfaced as `Err` and is never
    /// cached: a repair or a retry on a later call can still succeed.
    pub fn new_iterator(
        &self,
        file_number: u64,
        file_size: u64,
        out_table: Option<&mut Option<Arc<T>>>,
    ) -> Result<TableCacheIterator<E, T>> {
        let key = encode_file_number(file_number);

        let handle = match self.cache.lookup(&key) {
            Some(handle) => {
                trace!(file_number, "table cache hit");
                handle
            }
            None => {
                trace!(file_number, "table cache miss, opening");
                let file = self
                    .env
                    .open_random_access_file(&self.dbname, file_number)
                    .map_err(|e| {
                        warn!(file_number, error = %e, "failed to open table file");
                        e
                    })?;
                let table = T::open(&file, file_size).map_err(|e| {
                    warn!(file_number, error = %e, "failed to open table");
                    e
                })?;
                let opened = OpenedTable {
                    file: Arc::new(file),
                    table: Arc::new(table),
                };
                self.cache.insert(key, opened, 1, |_key, _value| {
                    // Dropping `OpenedTable` drops the `Arc<file>`/`Arc<table>`,
                    // which is the reference implementation's `DeleteEntry`.
                })
            }
        };

        if let Some(out) = out_table {
            *out = Some(Arc::clone(&self.cache.value(&handle).table));
        }

        Ok(TableCacheIterator::new(self, handle))
    }

    /// Removes `file_number` from the cache. Destruction is deferred until
    /// any outstanding iterator handles for it are dropped.
    pub fn evict(&self, file_number: u64) {
        self.cache.erase(&encode_file_number(file_number));
    }

    fn release(&self, handle: Handle<FileNumberKey, OpenedTable<E::File, T>>) {
        self.cache.release(handle);
    }
}

/// An iterator over one table's contents that owns a table-cache handle for
/// its entire lifetime, releasing it on `Drop` — the Rust-idiomatic
/// equivalent of the reference implementation's `RegisterCleanup` callback.
pub struct TableCacheIterator<'a, E: Environment + 'static, T: Table<File = E::File> + 'static> {
    cache: &'a TableCache<E, T>,
    handle: Option<Handle<FileNumberKey, OpenedTable<E::File, T>>>,
    inner: T::Iter,
}

impl<'a, E: Environment + 'static, T: Table<File = E::File> + 'static> TableCacheIterator<'a, E, T> {
    fn new(cache: &'a TableCache<E, T>, handle: Handle<FileNumberKey, OpenedTable<E::File, T>>) -> Self {
        let inner = cache.cache.value(&handle).table.iter();
        TableCacheIterator {
            cache,
            handle: Some(handle),
            inner,
        }
    }
}

impl<E: Environment + 'static, T: Table<File = E::File> + 'static> Iterator for TableCacheIterator<'_, E, T> {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

impl<E: Environment + 'static, T: Table<File = E::File> + 'static> Drop for TableCacheIterator<'_, E, T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.cache.release(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeFile {
        bytes: Vec<u8>,
    }

    impl RandomAccessFile for FakeFile {
        fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
            let offset = offset as usize;
            Ok(self.bytes.get(offset..offset + len).unwrap_or(&[]).to_vec())
        }
    }

    struct FakeTable {
        entries: Vec<(Vec<u8>, Vec<u8>)>,
    }

    impl Table for FakeTable {
        type File = FakeFile;
        type Iter = std::vec::IntoIter<(Vec<u8>, Vec<u8>)>;

        fn open(file: &FakeFile, file_size: u64) -> Result<Self> {
            if file.bytes.len() as u64 != file_size {
                return Err(Error::corruption("size mismatch"));
            }
            // A trivial "format": one entry, the whole file as both key and value.
            Ok(FakeTable {
                entries: vec![(file.bytes.clone(), file.bytes.clone())],
            })
        }

        fn iter(&self) -> Self::Iter {
            self.entries.clone().into_iter()
        }
    }

    struct FakeEnv {
        files: Mutex<std::collections::HashMap<u64, Vec<u8>>>,
        opens: AtomicUsize,
    }

    impl Environment for FakeEnv {
        type File = FakeFile;

        fn open_random_access_file(&self, _dbname: &str, file_number: u64) -> Result<FakeFile> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let files = self.files.lock().unwrap();
            match files.get(&file_number) {
                Some(bytes) => Ok(FakeFile { bytes: bytes.clone() }),
                None => Err(Error::not_found(format!("no such file: {file_number}"))),
            }
        }
    }

    fn env_with(file_number: u64, bytes: &[u8]) -> FakeEnv {
        let mut files = std::collections::HashMap::new();
        files.insert(file_number, bytes.to_vec());
        FakeEnv {
            files: Mutex::new(files),
            opens: AtomicUsize::new(0),
        }
    }

    #[test]
    fn miss_then_hit_opens_the_file_exactly_once() {
        let env = env_with(1, b"hello");
        let cache: TableCache<FakeEnv, FakeTable> = TableCache::new(env, "db", 10);

        let it1 = cache.new_iterator(1, 5, None).unwrap();
        drop(it1);
        let it2 = cache.new_iterator(1, 5, None).unwrap();
        let entries: Vec<_> = it2.collect();
        assert_eq!(entries, vec![(b"hello".to_vec(), b"hello".to_vec())]);

        assert_eq!(cache.env.opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn open_error_is_not_cached() {
        let env = env_with(1, b"hello");
        let cache: TableCache<FakeEnv, FakeTable> = TableCache::new(env, "db", 10);

        assert!(cache.new_iterator(99, 5, None).is_err());
        assert!(cache.new_iterator(99, 5, None).is_err());
        assert_eq!(cache.env.opens.load(Ordering::SeqCst), 2, "each miss retries the open");
    }

    #[test]
    fn out_table_is_populated_on_open() {
        let env = env_with(1, b"hello");
        let cache: TableCache<FakeEnv, FakeTable> = TableCache::new(env, "db", 10);
        let mut out_table = None;
        let _it = cache.new_iterator(1, 5, Some(&mut out_table)).unwrap();
        assert!(out_table.is_some());
    }

    #[test]
    fn evict_forces_a_fresh_open() {
        let env = env_with(1, b"hello");
        let cache: TableCache<FakeEnv, FakeTable> = TableCache::new(env, "db", 10);
        let it1 = cache.new_iterator(1, 5, None).unwrap();
        drop(it1);
        cache.evict(1);
        let _it2 = cache.new_iterator(1, 5, None).unwrap();
        assert_eq!(cache.env.opens.load(Ordering::SeqCst), 2);
    }
}
