//! Pluggable total order over byte slices, plus the internal-key and
//! memtable-key comparators layered on top of it.

use crate::key::split_internal_key;
use std::cmp::Ordering;

/// A total order over byte slices, plus the two shortening helpers used by
/// index building.
pub trait Comparator: Send + Sync {
    fn name(&self) -> &'static str;
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// If `start < limit`, may shorten `start` in place to some value that
    /// remains `>= start` and `< limit`, favoring short separators for index
    /// blocks. Leaves `start` unchanged if no shortening applies.
    fn find_shortest_separator(&self, start: &mut Vec<u8>, limit: &[u8]);

    /// Shortens `key` in place to the shortest string `>= key`.
    fn find_short_successor(&self, key: &mut Vec<u8>);
}

/// The default, byte-wise comparator: unsigned lexicographic order.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytewiseComparator;

impl Comparator for BytewiseComparator {
    fn name(&self) -> &'static str {
        "leveldb.BytewiseComparator"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn find_shortest_separator(&self, start: &mut Vec<u8>, limit: &[u8]) {
        let min_len = start.len().min(limit.len());
        let diff_index = (0..min_len).find(|&i| start[i] != limit[i]);
        let Some(diff_index) = diff_index else {
            // One is a prefix of the other; no shortening possible.
            return;
        };
        let diff_byte = start[diff_index];
        if diff_byte < 0xff && diff_index < limit.len() && diff_byte + 1 < limit[diff_index] {
            start[diff_index] += 1;
            start.truncate(diff_index + 1);
            debug_assert_eq!(self.compare(start, limit), Ordering::Less);
        }
    }

    fn find_short_successor(&self, key: &mut Vec<u8>) {
        let n = key.len();
        for i in 0..n {
            if key[i] != 0xff {
                key[i] += 1;
                key.truncate(i + 1);
                return;
            }
        }
        // Every byte is 0xff: leave the key alone.
    }
}

/// Wraps a user comparator to compare internal keys: user-key portion first
/// (by the user comparator), then the trailing 8-byte tag, numerically larger
/// tag sorting earlier (newer sequence numbers first, and for equal
/// sequences, larger type byte first).
pub struct InternalKeyComparator<C: Comparator> {
    user_comparator: C,
}

impl<C: Comparator> InternalKeyComparator<C> {
    pub fn new(user_comparator: C) -> Self {
        InternalKeyComparator { user_comparator }
    }

    pub fn user_comparator(&self) -> &C {
        &self.user_comparator
    }
}

impl<C: Comparator> Comparator for InternalKeyComparator<C> {
    fn name(&self) -> &'static str {
        "leveldb.InternalKeyComparator"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        let (a_user, a_tag) = split_internal_key(a).expect("malformed internal key");
        let (b_user, b_tag) = split_internal_key(b).expect("malformed internal key");
        match self.user_comparator.compare(a_user, b_user) {
            Ordering::Equal => b_tag.cmp(&a_tag), // larger tag sorts earlier
            other => other,
        }
    }

    fn find_shortest_separator(&self, start: &mut Vec<u8>, limit: &[u8]) {
        let (start_user, _) = match split_internal_key(start) {
            Some(parts) => parts,
            None => return,
        };
        let (limit_user, _) = match split_internal_key(limit) {
            Some(parts) => parts,
            None => return,
        };
        let mut shortened_user = start_user.to_vec();
        self.user_comparator
            .find_shortest_separator(&mut shortened_user, limit_user);
        if shortened_user.len() < start_user.len()
            && self.user_comparator.compare(start_user, &shortened_user) == Ordering::Less
        {
            // Re-tag with (maximum sequence, seek type) so the shortened
            // separator still compares <= the original limit as an internal
            // key.
            let tag = crate::key::pack_sequence_and_type(
                crate::key::SequenceNumber::MAX,
                crate::key::ValueType::Value,
            );
            shortened_user.extend_from_slice(&tag.to_le_bytes());
            debug_assert_eq!(self.compare(&shortened_user, limit), Ordering::Less);
            *start = shortened_user;
        }
    }

    fn find_short_successor(&self, key: &mut Vec<u8>) {
        let (user_key, _) = match split_internal_key(key) {
            Some(parts) => parts,
            None => return,
        };
        let mut successor = user_key.to_vec();
        self.user_comparator.find_short_successor(&mut successor);
        if successor.len() < user_key.len() {
            let tag = crate::key::pack_sequence_and_type(
                crate::key::SequenceNumber::MAX,
                crate::key::ValueType::Value,
            );
            successor.extend_from_slice(&tag.to_le_bytes());
            *key = successor;
        }
    }
}

/// Compares memtable keys: length-prefixed internal keys as stored at the
/// head of each arena record. Decodes the length prefix off both operands
/// before delegating to the internal-key comparator.
///
/// This is the skip list's concrete [`crate::skiplist::KeyComparator`]: the
/// reference implementation wraps the internal comparator specifically to
/// compare *memtable keys*, not bare internal keys, and this crate keeps
/// that as a distinct, testable type rather than inlining it into
/// [`crate::memtable::MemTable`].
pub struct MemtableKeyComparator<C: Comparator> {
    internal_comparator: InternalKeyComparator<C>,
}

impl<C: Comparator> MemtableKeyComparator<C> {
    pub fn new(internal_comparator: InternalKeyComparator<C>) -> Self {
        MemtableKeyComparator { internal_comparator }
    }

    pub fn compare_memtable_keys(&self, a: &[u8], b: &[u8]) -> Ordering {
        let (a_key, _) = crate::coding::get_length_prefixed_slice(a).expect("malformed memtable key");
        let (b_key, _) = crate::coding::get_length_prefixed_slice(b).expect("malformed memtable key");
        self.internal_comparator.compare(a_key, b_key)
    }
}

impl<C: Comparator> crate::skiplist::KeyComparator for MemtableKeyComparator<C> {
    fn compare_keys(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.compare_memtable_keys(a, b)
    }
}
