//! The write-path accumulator: an append-only, sorted, memory-bounded
//! structure built atop an [`Arena`](crate::arena::Arena) and a
//! [`SkipList`](crate::skiplist::SkipList), shared across a single writer and
//! any number of concurrent readers via [`Arc`].

use crate::comparator::{BytewiseComparator, Comparator, InternalKeyComparator, MemtableKeyComparator};
use crate::key::{
    decode_memtable_record, encode_memtable_record, split_internal_key, LookupKey, SequenceNumber,
    ValueType,
};
use crate::skiplist::SkipList;
use std::sync::Arc;
use tracing::trace;

/// An in-memory, sorted, append-only store backed by an arena and a skip
/// list. Construct once via [`MemTable::new`] and share with
/// [`Arc::clone`]/`ref_()`; dropped (via `unref`/the last `Arc` going away)
/// it releases the arena's blocks as a group.
///
/// See `DESIGN.md` for the disposition of the reference implementation's
/// explicit zero-initial-refcount contract: this type is always constructed
/// already wrapped in an `Arc`, so `ref_()`/`unref()` are thin wrappers
/// around `Clone`/`Drop` rather than a hand-rolled atomic counter.
pub struct MemTable<C: Comparator = BytewiseComparator> {
    table: SkipList<MemtableKeyComparator<C>>,
    user_comparator_name: &'static str,
}

impl<C: Comparator + Clone> MemTable<C> {
    /// Builds a new, empty memtable and returns it already wrapped in an
    /// `Arc`, since every handle to a memtable is a shared-ownership handle.
    pub fn new(comparator: C) -> Arc<Self> {
        let user_comparator_name = comparator.name();
        let internal_comparator = InternalKeyComparator::new(comparator);
        let key_comparator = MemtableKeyComparator::new(internal_comparator);
        Arc::new(MemTable {
            table: SkipList::new(key_comparator),
            user_comparator_name,
        })
    }
}

impl MemTable<BytewiseComparator> {
    pub fn with_default_comparator() -> Arc<Self> {
        Self::new(BytewiseComparator)
    }
}

impl<C: Comparator> MemTable<C> {
    /// Returns a new reference to this memtable. Equivalent to
    /// `Arc::clone(self)`; provided for call-site fidelity with the
    /// reference implementation's `Ref`/`Unref` API.
    pub fn ref_(self: &Arc<Self>) -> Arc<Self> {
        Arc::clone(self)
    }

    /// Drops one reference. The memtable and its arena are released once the
    /// last `Arc` (including this one) is dropped.
    pub fn unref(self: Arc<Self>) {
        drop(self);
    }

    pub fn approximate_memory_usage(&self) -> usize {
        // SAFETY: read-only access; the arena's own memory_usage counter is
        // atomic specifically so this is sound to call from any thread while
        // the writer allocates.
        unsafe { (*self.table.arena_ptr()).memory_usage() }
    }

    /// Encodes one record and inserts it. Never fails except via allocation
    /// failure (which, per the core's error policy, is fatal and not
    /// propagated as a `Result`).
    ///
    /// No duplicate detection: the caller assigns strictly increasing
    /// sequence numbers, so `(user_key, sequence)` is unique by construction.
    pub fn add(&self, seq: SequenceNumber, value_type: ValueType, user_key: &[u8], value: &[u8]) {
        let mut record = Vec::with_capacity(user_key.len() + value.len() + 18);
        encode_memtable_record(&mut record, seq, value_type, user_key, value);
        trace!(user_key_len = user_key.len(), value_len = value.len(), seq = seq.0, "memtable add");
        self.table.insert(&record);
    }

    /// Looks up `lookup_key`. Returns `Some(Some(value))` for a live value,
    /// `Some(None)` if the resolving record is a tombstone (the caller should
    /// treat this as `NotFound`), or `None` if no record for the user key
    /// exists in this memtable at or below the lookup's snapshot sequence.
    pub fn get(&self, lookup_key: &LookupKey) -> Option<Option<Vec<u8>>> {
        let mut it = self.table.iter();
        it.seek(lookup_key.memtable_key());
        if !it.valid() {
            return None;
        }
        let (entry_internal_key, _) =
            crate::coding::get_length_prefixed_slice(it.key()).expect("malformed memtable key");
        let (entry_user_key, tag) =
            split_internal_key(entry_internal_key).expect("malformed internal key");
        if entry_user_key != lookup_key.user_key() {
            return None;
        }
        let (_, value_type) = crate::key::parse_tag(tag);
        match value_type {
            ValueType::Value => {
                let (_, value) = decode_memtable_record(it.key()).expect("malformed memtable record");
                Some(Some(value.to_vec()))
            }
            ValueType::Deletion => Some(None),
        }
    }

    /// A forward/backward iterator over the raw memtable-key entries stored
    /// in the skip list.
    pub fn new_iterator(&self) -> crate::skiplist::Iter<'_, MemtableKeyComparator<C>> {
        self.table.iter()
    }

    pub fn user_comparator_name(&self) -> &'static str {
        self.user_comparator_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(user_key: &[u8], seq: u64) -> LookupKey {
        LookupKey::new(user_key, SequenceNumber::new(seq))
    }

    #[test]
    fn s1_empty_memtable_returns_none() {
        let table = MemTable::with_default_comparator();
        assert_eq!(table.get(&lookup(b"a", 10)), None);
    }

    #[test]
    fn s2_get_after_single_insert() {
        let table = MemTable::with_default_comparator();
        table.add(SequenceNumber::new(5), ValueType::Value, b"foo", b"bar");
        assert_eq!(table.get(&lookup(b"foo", 10)), Some(Some(b"bar".to_vec())));
    }

    #[test]
    fn s3_deletion_shadows_older_value_but_not_at_earlier_snapshot() {
        let table = MemTable::with_default_comparator();
        table.add(SequenceNumber::new(5), ValueType::Value, b"foo", b"bar");
        table.add(SequenceNumber::new(7), ValueType::Deletion, b"foo", b"");
        assert_eq!(table.get(&lookup(b"foo", 10)), Some(None));
        assert_eq!(table.get(&lookup(b"foo", 6)), Some(Some(b"bar".to_vec())));
    }

    #[test]
    fn get_ignores_unrelated_keys() {
        let table = MemTable::with_default_comparator();
        table.add(SequenceNumber::new(1), ValueType::Value, b"alpha", b"1");
        table.add(SequenceNumber::new(2), ValueType::Value, b"gamma", b"2");
        assert_eq!(table.get(&lookup(b"beta", 10)), None);
    }

    #[test]
    fn later_sequence_records_do_not_affect_earlier_snapshot_answers() {
        let table = MemTable::with_default_comparator();
        table.add(SequenceNumber::new(1), ValueType::Value, b"foo", b"v1");
        let answer_before = table.get(&lookup(b"foo", 1));
        table.add(SequenceNumber::new(2), ValueType::Value, b"foo", b"v2");
        table.add(SequenceNumber::new(3), ValueType::Value, b"foo", b"v3");
        let answer_after = table.get(&lookup(b"foo", 1));
        assert_eq!(answer_before, answer_after);
        assert_eq!(answer_after, Some(Some(b"v1".to_vec())));
    }

    #[test]
    fn forward_iteration_visits_every_inserted_record() {
        let table = MemTable::with_default_comparator();
        for i in 0..50u64 {
            table.add(
                SequenceNumber::new(i + 1),
                ValueType::Value,
                format!("key{:03}", i).as_bytes(),
                b"v",
            );
        }
        let mut it = table.new_iterator();
        it.seek_to_first();
        let mut count = 0;
        while it.valid() {
            count += 1;
            it.next();
        }
        assert_eq!(count, 50);
    }

    #[test]
    fn ref_and_unref_share_the_same_underlying_table() {
        let table = MemTable::with_default_comparator();
        table.add(SequenceNumber::new(1), ValueType::Value, b"k", b"v");
        let handle2 = table.ref_();
        assert_eq!(handle2.get(&lookup(b"k", 5)), Some(Some(b"v".to_vec())));
        handle2.unref();
        // The original handle still keeps the memtable alive.
        assert_eq!(table.get(&lookup(b"k", 5)), Some(Some(b"v".to_vec())));
    }

    #[test]
    fn approximate_memory_usage_grows_with_inserts() {
        let table = MemTable::with_default_comparator();
        let before = table.approximate_memory_usage();
        for i in 0..20u64 {
            table.add(SequenceNumber::new(i + 1), ValueType::Value, b"k", b"0123456789");
        }
        assert!(table.approximate_memory_usage() > before);
    }
}
