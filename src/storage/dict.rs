//! Incrementally Rehashing Hash Table
//!
//! `Dict` is the primary key index. It keeps two bucket tables so that a
//! resize never pauses the server: when the table grows, a second table is
//! allocated and entries migrate to it a few buckets at a time, piggybacking
//! on regular lookups and on the server cron.
//!
//! ## Layout
//!
//! ```text
//!              tables[0] (active)             tables[1] (incoming)
//!            ┌───┬───┬───┬───┬───┐          ┌───┬───┬───┬───┬───┬───┬─ ─┐
//!  buckets   │ ∅ │ ∅ │ 4 │ ∅ │ 1 │   ...    │ 0 │ ∅ │ 2 │ ∅ │ ∅ │ 5 │   │
//!            └───┴───┴─┬─┴───┴─┬─┘          └─┬─┴───┴─┬─┴───┴───┴─┬─┴─ ─┘
//!                ▲     │       │              │       │           │
//!   rehash_idx ──┘     ▼       ▼              ▼       ▼           ▼
//!                 entries[4] entries[1]   entries[0] ...
//!                      │
//!                      ▼ next
//!                 entries[3]
//! ```
//!
//! Entries live in one arena shared by both tables and are addressed by
//! index. Buckets hold the index of the head of their chain, and each entry
//! links to the next one in its chain. Relocating an entry during a rehash
//! relinks it; the entry itself never moves in the arena.
//!
//! ## Safe Iteration
//!
//! A [`SafeIter`] is a detached cursor. It does not borrow the dict, so the
//! caller may mutate the dict between steps. While any safe iterator is
//! live, rehash steps are suspended and freed arena slots are not reused,
//! so every entry present when the iterator was created is visited exactly
//! once. Each iterator must be handed back with [`Dict::release`]; an
//! iterator that is never released blocks rehashing for good.

use bytes::Bytes;
use rand::Rng;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Number of buckets of a fresh table. Table sizes are always powers of two
/// and never smaller than this.
pub const INITIAL_SIZE: usize = 8;

/// Errors reported by dict operations. These are ordinary control flow for
/// callers, not failures of the index.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DictError {
    #[error("key already exists")]
    KeyExists,

    #[error("key not found")]
    KeyNotFound,

    /// The table is already rehashing, or the requested size is not usable
    #[error("cannot expand table")]
    ExpandError,
}

#[derive(Debug, Clone)]
struct Entry<V> {
    key: Bytes,
    value: V,
    next: Option<usize>,
}

#[derive(Debug, Clone, Default)]
struct Table {
    buckets: Vec<Option<usize>>,
    size_mask: usize,
    used: usize,
}

impl Table {
    fn with_size(size: usize) -> Self {
        Self {
            buckets: vec![None; size],
            size_mask: size - 1,
            used: 0,
        }
    }

    #[inline]
    fn size(&self) -> usize {
        self.buckets.len()
    }
}

/// A detached cursor over a [`Dict`], created by [`Dict::safe_iter`].
#[derive(Debug)]
#[must_use = "a safe iterator must be passed to Dict::release or rehashing stays blocked"]
pub struct SafeIter {
    table: usize,
    bucket: usize,
    /// Remaining entry ids of the current bucket, in reverse chain order
    chain: Vec<usize>,
}

/// An incrementally rehashing map from byte-string keys to `V`.
#[derive(Debug, Clone)]
pub struct Dict<V> {
    entries: Vec<Option<Entry<V>>>,
    free: Vec<usize>,
    tables: [Table; 2],
    /// Next bucket of `tables[0]` to migrate; `None` when not rehashing
    rehash_idx: Option<usize>,
    safe_iterators: usize,
}

impl<V> Default for Dict<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Dict<V> {
    /// Creates an empty dict with [`INITIAL_SIZE`] buckets.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            tables: [Table::with_size(INITIAL_SIZE), Table::default()],
            rehash_idx: None,
            safe_iterators: 0,
        }
    }

    /// Number of keys across both tables.
    #[inline]
    pub fn len(&self) -> usize {
        self.tables[0].used + self.tables[1].used
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_rehashing(&self) -> bool {
        self.rehash_idx.is_some()
    }

    /// Position of the rehash cursor, or `None` when not rehashing.
    pub fn rehash_index(&self) -> Option<usize> {
        self.rehash_idx
    }

    /// Bucket counts of the active and incoming tables.
    pub fn table_sizes(&self) -> (usize, usize) {
        (self.tables[0].size(), self.tables[1].size())
    }

    /// Entry counts of the active and incoming tables.
    pub fn table_used(&self) -> (usize, usize) {
        (self.tables[0].used, self.tables[1].used)
    }

    /// Number of safe iterators not yet released.
    pub fn safe_iterator_count(&self) -> usize {
        self.safe_iterators
    }

    /// Inserts a new key.
    ///
    /// # Returns
    ///
    /// `Err(DictError::KeyExists)` if the key is already present; the value is
    /// dropped and the dict is unchanged.
    pub fn add(&mut self, key: Bytes, value: V) -> Result<(), DictError> {
        self.rehash_step();
        let hash = hash_key(&key);
        if self.locate(&key, hash).is_some() {
            return Err(DictError::KeyExists);
        }
        self.insert_new(key, value, hash);
        Ok(())
    }

    /// Inserts or overwrites a key.
    ///
    /// Returns `true` if the key was newly added, `false` if an existing
    /// value was replaced in place.
    pub fn set(&mut self, key: Bytes, value: V) -> bool {
        self.rehash_step();
        let hash = hash_key(&key);
        if let Some(id) = self.locate(&key, hash) {
            if let Some(entry) = self.entries[id].as_mut() {
                entry.value = value;
            }
            return false;
        }
        self.insert_new(key, value, hash);
        true
    }

    /// Looks up a key, running one rehash step first.
    pub fn get(&mut self, key: &[u8]) -> Option<&V> {
        self.rehash_step();
        let id = self.locate(key, hash_key(key))?;
        self.entries[id].as_ref().map(|e| &e.value)
    }

    /// Looks up a key for mutation, running one rehash step first.
    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut V> {
        self.rehash_step();
        let id = self.locate(key, hash_key(key))?;
        self.entries[id].as_mut().map(|e| &mut e.value)
    }

    /// Looks up a key without doing any rehash work.
    pub fn peek(&self, key: &[u8]) -> Option<&V> {
        let id = self.locate(key, hash_key(key))?;
        self.entries[id].as_ref().map(|e| &e.value)
    }

    pub fn contains_key(&mut self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// Removes a key and returns its value.
    pub fn delete(&mut self, key: &[u8]) -> Result<V, DictError> {
        self.rehash_step();
        let hash = hash_key(key);

        for t in 0..=1 {
            if t == 1 && !self.is_rehashing() {
                break;
            }
            let table = &self.tables[t];
            if table.size() == 0 {
                continue;
            }
            let bucket = (hash as usize) & table.size_mask;
            let mut prev: Option<usize> = None;
            let mut cursor = table.buckets[bucket];

            while let Some(id) = cursor {
                let (matches, next) = match self.entries[id].as_ref() {
                    Some(e) => (e.key.as_ref() == key, e.next),
                    None => (false, None),
                };
                if matches {
                    match prev {
                        Some(p) => {
                            if let Some(pe) = self.entries[p].as_mut() {
                                pe.next = next;
                            }
                        }
                        None => self.tables[t].buckets[bucket] = next,
                    }
                    self.tables[t].used -= 1;
                    return self.free_slot(id).ok_or(DictError::KeyNotFound);
                }
                prev = Some(id);
                cursor = next;
            }
        }
        Err(DictError::KeyNotFound)
    }

    /// Removes every entry and resets to a single fresh table.
    ///
    /// Outstanding safe iterators stay counted and simply run dry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.free.clear();
        self.tables = [Table::with_size(INITIAL_SIZE), Table::default()];
        self.rehash_idx = None;
    }

    /// Allocates an incoming table of at least `size` buckets and starts
    /// rehashing into it.
    ///
    /// Fails with `ExpandError` when already rehashing, when `size` is smaller
    /// than the number of stored keys, or when the rounded size equals the
    /// current one.
    pub fn expand(&mut self, size: usize) -> Result<(), DictError> {
        if self.is_rehashing() || self.tables[0].used > size {
            return Err(DictError::ExpandError);
        }
        let real_size = next_power(size);
        if real_size == self.tables[0].size() {
            return Err(DictError::ExpandError);
        }
        self.tables[1] = Table::with_size(real_size);
        self.rehash_idx = Some(0);
        Ok(())
    }

    /// Returns true if the table is mostly empty and worth shrinking.
    pub fn needs_resize(&self) -> bool {
        let size = self.tables[0].size();
        size > INITIAL_SIZE && self.tables[0].used * 100 / size < 10
    }

    /// Shrinks the table to the smallest size that holds all keys.
    pub fn resize_to_fit(&mut self) -> Result<(), DictError> {
        let minimal = self.tables[0].used.max(INITIAL_SIZE);
        self.expand(minimal)
    }

    /// Migrates up to `n` non-empty buckets from the active table.
    ///
    /// Gives up after visiting `n * 10` empty buckets so one call stays
    /// bounded. Does nothing while a safe iterator is live.
    ///
    /// # Returns
    ///
    /// `true` if there is still work left.
    pub fn rehash(&mut self, n: usize) -> bool {
        let Some(mut idx) = self.rehash_idx else {
            return false;
        };
        if self.safe_iterators > 0 {
            return true;
        }
        let mut empty_visits = n * 10;

        for _ in 0..n {
            if self.tables[0].used == 0 {
                break;
            }
            while self.tables[0].buckets[idx].is_none() {
                idx += 1;
                empty_visits -= 1;
                if empty_visits == 0 {
                    self.rehash_idx = Some(idx);
                    return true;
                }
            }

            let mut cursor = self.tables[0].buckets[idx].take();
            while let Some(id) = cursor {
                let Some(entry) = self.entries[id].as_mut() else {
                    break;
                };
                cursor = entry.next;
                let bucket = (hash_key(&entry.key) as usize) & self.tables[1].size_mask;
                entry.next = self.tables[1].buckets[bucket];
                self.tables[1].buckets[bucket] = Some(id);
                self.tables[0].used -= 1;
                self.tables[1].used += 1;
            }
            idx += 1;
        }

        if self.tables[0].used == 0 {
            self.tables[0] = std::mem::take(&mut self.tables[1]);
            self.rehash_idx = None;
            // Keys added while an iterator held the migration back may have
            // overfilled the new table; start the next growth right away.
            self.expand_if_needed();
            return self.is_rehashing();
        }
        self.rehash_idx = Some(idx);
        true
    }

    /// Runs rehash batches of 100 buckets for about `ms` milliseconds.
    ///
    /// Returns the number of buckets migrated (rounded to batches).
    pub fn rehash_milliseconds(&mut self, ms: u64) -> usize {
        if self.safe_iterators > 0 {
            return 0;
        }
        let start = Instant::now();
        let budget = Duration::from_millis(ms);
        let mut rehashes = 0;
        while self.rehash(100) {
            rehashes += 100;
            if start.elapsed() >= budget {
                break;
            }
        }
        rehashes
    }

    /// Returns a uniformly chosen bucket's uniformly chosen entry.
    ///
    /// While rehashing, the bucket is drawn from the not yet migrated part of
    /// the active table and the whole incoming table together.
    pub fn random_entry(&mut self) -> Option<(&Bytes, &V)> {
        if self.is_empty() {
            return None;
        }
        self.rehash_step();
        let mut rng = rand::rng();

        let head = loop {
            let candidate = match self.rehash_idx {
                Some(idx) => {
                    let s0 = self.tables[0].size();
                    let h = rng.random_range(idx..s0 + self.tables[1].size());
                    if h >= s0 {
                        self.tables[1].buckets[h - s0]
                    } else {
                        self.tables[0].buckets[h]
                    }
                }
                None => {
                    let h = rng.random_range(0..self.tables[0].size());
                    self.tables[0].buckets[h]
                }
            };
            if let Some(id) = candidate {
                break id;
            }
        };

        let mut chain_len = 0;
        let mut cursor = Some(head);
        while let Some(id) = cursor {
            chain_len += 1;
            cursor = self.entries[id].as_ref().and_then(|e| e.next);
        }

        let mut pick = rng.random_range(0..chain_len);
        let mut cursor = Some(head);
        while let Some(id) = cursor {
            let entry = self.entries[id].as_ref()?;
            if pick == 0 {
                return Some((&entry.key, &entry.value));
            }
            pick -= 1;
            cursor = entry.next;
        }
        None
    }

    /// Creates a safe iterator and suspends rehashing until it is released.
    pub fn safe_iter(&mut self) -> SafeIter {
        self.safe_iterators += 1;
        SafeIter {
            table: 0,
            bucket: 0,
            chain: Vec::new(),
        }
    }

    /// Advances a safe iterator.
    ///
    /// Walks the active table bucket by bucket, then the incoming table if
    /// the dict is rehashing. Entries deleted after the iterator reached
    /// their bucket are skipped.
    pub fn next(&self, iter: &mut SafeIter) -> Option<(&Bytes, &V)> {
        loop {
            if let Some(id) = iter.chain.pop() {
                if let Some(Some(entry)) = self.entries.get(id) {
                    return Some((&entry.key, &entry.value));
                }
                continue;
            }

            let table = &self.tables[iter.table];
            if iter.bucket < table.size() {
                let mut cursor = table.buckets[iter.bucket];
                iter.bucket += 1;
                while let Some(id) = cursor {
                    iter.chain.push(id);
                    cursor = self.entries.get(id).and_then(|e| e.as_ref()).and_then(|e| e.next);
                }
                iter.chain.reverse();
            } else if iter.table == 0 && self.is_rehashing() {
                iter.table = 1;
                iter.bucket = 0;
            } else {
                return None;
            }
        }
    }

    /// Hands a safe iterator back, re-enabling rehashing once none remain.
    pub fn release(&mut self, _iter: SafeIter) {
        self.safe_iterators = self.safe_iterators.saturating_sub(1);
    }

    /// Borrowing iterator over all entries, in arena order.
    pub fn iter(&self) -> impl Iterator<Item = (&Bytes, &V)> {
        self.entries
            .iter()
            .filter_map(|slot| slot.as_ref().map(|e| (&e.key, &e.value)))
    }

    // ========================================================================
    // Internals
    // ========================================================================

    #[inline]
    fn rehash_step(&mut self) {
        if self.safe_iterators == 0 && self.is_rehashing() {
            self.rehash(1);
        }
    }

    fn expand_if_needed(&mut self) {
        if self.is_rehashing() {
            return;
        }
        let used = self.tables[0].used;
        if used >= self.tables[0].size() {
            // Only fails if the doubled size rounds to the current one,
            // which cannot happen for a full table.
            let _ = self.expand(used * 2);
        }
    }

    fn locate(&self, key: &[u8], hash: u64) -> Option<usize> {
        for t in 0..=1 {
            if t == 1 && !self.is_rehashing() {
                break;
            }
            let table = &self.tables[t];
            if table.size() == 0 {
                continue;
            }
            let mut cursor = table.buckets[(hash as usize) & table.size_mask];
            while let Some(id) = cursor {
                let entry = self.entries[id].as_ref()?;
                if entry.key.as_ref() == key {
                    return Some(id);
                }
                cursor = entry.next;
            }
        }
        None
    }

    fn insert_new(&mut self, key: Bytes, value: V, hash: u64) {
        self.expand_if_needed();
        let t = if self.is_rehashing() { 1 } else { 0 };
        let bucket = (hash as usize) & self.tables[t].size_mask;
        let entry = Entry {
            key,
            value,
            next: self.tables[t].buckets[bucket],
        };

        // Slots freed under a live iterator stay retired until it is released.
        let id = match self.free.pop() {
            Some(id) if self.safe_iterators == 0 => {
                self.entries[id] = Some(entry);
                id
            }
            reserved => {
                if let Some(id) = reserved {
                    self.free.push(id);
                }
                self.entries.push(Some(entry));
                self.entries.len() - 1
            }
        };

        self.tables[t].buckets[bucket] = Some(id);
        self.tables[t].used += 1;
    }

    fn free_slot(&mut self, id: usize) -> Option<V> {
        let entry = self.entries[id].take()?;
        self.free.push(id);
        Some(entry.value)
    }
}

/// Hashes a key with the standard library's SipHash.
#[inline]
fn hash_key(key: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

/// Smallest power of two that is at least `size`, and at least
/// [`INITIAL_SIZE`].
fn next_power(size: usize) -> usize {
    size.max(INITIAL_SIZE).next_power_of_two()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn key(i: usize) -> Bytes {
        Bytes::from(format!("key:{}", i))
    }

    fn filled(n: usize) -> Dict<usize> {
        let mut dict = Dict::new();
        for i in 0..n {
            dict.add(key(i), i).unwrap();
        }
        dict
    }

    fn finish_rehash<V>(dict: &mut Dict<V>) {
        while dict.rehash(100) {}
    }

    #[test]
    fn test_add_and_get() {
        let mut dict = Dict::new();
        dict.add(Bytes::from("name"), "Ariz").unwrap();
        assert_eq!(dict.get(b"name"), Some(&"Ariz"));
        assert_eq!(dict.get(b"missing"), None);
        assert_eq!(dict.len(), 1);
    }

    #[test]
    fn test_add_existing_fails() {
        let mut dict = Dict::new();
        dict.add(Bytes::from("k"), 1).unwrap();
        assert_eq!(dict.add(Bytes::from("k"), 2), Err(DictError::KeyExists));
        assert_eq!(dict.get(b"k"), Some(&1));
        assert_eq!(dict.len(), 1);
    }

    #[test]
    fn test_set_overwrites() {
        let mut dict = Dict::new();
        assert!(dict.set(Bytes::from("k"), 1));
        assert!(!dict.set(Bytes::from("k"), 2));
        assert_eq!(dict.get(b"k"), Some(&2));
        assert_eq!(dict.len(), 1);
    }

    #[test]
    fn test_delete() {
        let mut dict = filled(3);
        assert_eq!(dict.delete(b"key:1"), Ok(1));
        assert_eq!(dict.delete(b"key:1"), Err(DictError::KeyNotFound));
        assert_eq!(dict.len(), 2);
        assert!(dict.get(b"key:1").is_none());
        assert_eq!(dict.get(b"key:2"), Some(&2));
    }

    #[test]
    fn test_grows_through_rehash() {
        let mut dict = filled(8);
        assert_eq!(dict.table_sizes(), (8, 0));
        assert!(!dict.is_rehashing());

        // The ninth add finds a full table and starts rehashing into 16 buckets.
        dict.add(key(8), 8).unwrap();
        assert!(dict.is_rehashing());
        assert_eq!(dict.table_sizes().1, 16);

        for _ in 0..100 {
            dict.get(b"key:0");
        }
        assert!(!dict.is_rehashing());
        assert_eq!(dict.table_sizes(), (16, 0));
        for i in 0..9 {
            assert_eq!(dict.get(&key(i)), Some(&i));
        }
    }

    #[test]
    fn test_expand_rejected() {
        let mut dict = filled(20);
        finish_rehash(&mut dict);
        let (size, _) = dict.table_sizes();
        assert_eq!(dict.expand(10), Err(DictError::ExpandError));
        assert_eq!(dict.expand(size), Err(DictError::ExpandError));

        dict.expand(size * 2).unwrap();
        assert_eq!(dict.expand(size * 4), Err(DictError::ExpandError));
    }

    #[test]
    fn test_shrink() {
        let mut dict = filled(100);
        finish_rehash(&mut dict);
        for i in 5..100 {
            dict.delete(&key(i)).unwrap();
        }
        assert!(dict.needs_resize());
        dict.resize_to_fit().unwrap();
        finish_rehash(&mut dict);
        assert_eq!(dict.table_sizes(), (8, 0));
        assert_eq!(dict.len(), 5);
        for i in 0..5 {
            assert_eq!(dict.get(&key(i)), Some(&i));
        }
    }

    #[test]
    fn test_used_counts_during_rehash() {
        let mut dict = filled(8);
        dict.add(key(8), 8).unwrap();
        while dict.is_rehashing() {
            let (u0, u1) = dict.table_used();
            assert_eq!(u0 + u1, 9);
            dict.rehash(1);
        }
        assert_eq!(dict.table_used(), (9, 0));
    }

    #[test]
    fn test_safe_iterator_blocks_rehash() {
        let mut dict = filled(8);
        dict.expand(64).unwrap();
        let cursor = dict.rehash_index();

        let mut iter = dict.safe_iter();
        for _ in 0..1000 {
            dict.get(b"key:3");
        }
        assert_eq!(dict.rehash_index(), cursor);
        assert!(dict.rehash(100));
        assert_eq!(dict.rehash_index(), cursor);
        assert_eq!(dict.rehash_milliseconds(1), 0);

        let mut seen = Vec::new();
        while let Some((k, _)) = dict.next(&mut iter) {
            seen.push(k.clone());
        }
        dict.release(iter);

        let unique: HashSet<_> = seen.iter().cloned().collect();
        assert_eq!(seen.len(), 8);
        assert_eq!(unique, (0..8).map(key).collect::<HashSet<_>>());

        for _ in 0..100 {
            dict.get(b"key:3");
        }
        assert!(!dict.is_rehashing());
        assert_eq!(dict.safe_iterator_count(), 0);
    }

    #[test]
    fn test_safe_iterator_mid_rehash_visits_once() {
        let mut dict = filled(40);
        // Leave the dict part-way through a migration.
        dict.rehash(2);
        let mut iter = dict.safe_iter();
        let mut seen = Vec::new();
        while let Some((k, _)) = dict.next(&mut iter) {
            seen.push(k.clone());
        }
        dict.release(iter);
        let unique: HashSet<_> = seen.iter().cloned().collect();
        assert_eq!(seen.len(), unique.len());
        assert_eq!(unique.len(), dict.len());
    }

    #[test]
    fn test_safe_iterator_allows_delete() {
        let mut dict = filled(30);
        let mut iter = dict.safe_iter();
        let mut seen = 0;
        while let Some((k, _)) = dict.next(&mut iter) {
            let k = k.clone();
            seen += 1;
            dict.delete(&k).unwrap();
            // Slots freed under the iterator are not handed to new keys.
            dict.add(Bytes::from(format!("new:{}", seen)), 0).unwrap();
        }
        dict.release(iter);
        assert!(seen >= 30);
        assert_eq!(dict.len(), 30);
        assert!((0..30).all(|i| dict.peek(&key(i)).is_none()));
    }

    #[test]
    fn test_forgotten_iterator_blocks_rehash() {
        let mut dict = filled(8);
        dict.add(key(8), 8).unwrap();
        let iter = dict.safe_iter();
        for _ in 0..1000 {
            dict.get(b"key:1");
        }
        assert!(dict.is_rehashing());
        assert_eq!(dict.rehash_index(), Some(0));
        dict.release(iter);
        finish_rehash(&mut dict);
        assert!(!dict.is_rehashing());
    }

    #[test]
    fn test_overfilled_table_grows_after_release() {
        let mut dict = filled(8);
        let iter = dict.safe_iter();
        // The ninth key starts a migration into 16 buckets, which the live
        // iterator then holds back while the table fills far past that.
        for i in 8..200 {
            dict.add(key(i), i).unwrap();
        }
        assert_eq!(dict.table_sizes(), (8, 16));
        assert_eq!(dict.len(), 200);
        for i in 0..200 {
            assert_eq!(dict.peek(&key(i)), Some(&i));
        }
        dict.release(iter);

        finish_rehash(&mut dict);
        let (size, incoming) = dict.table_sizes();
        assert_eq!(incoming, 0);
        assert!(size >= dict.len(), "size {} for {} keys", size, dict.len());
        for i in 0..200 {
            assert_eq!(dict.get(&key(i)), Some(&i));
        }
    }

    #[test]
    fn test_random_entry() {
        let mut empty: Dict<usize> = Dict::new();
        assert!(empty.random_entry().is_none());

        let mut dict = filled(50);
        let mut seen = HashSet::new();
        for _ in 0..2000 {
            let (k, v) = dict.random_entry().unwrap();
            assert_eq!(k, &key(*v));
            seen.insert(*v);
        }
        // With 2000 draws over 50 keys every key shows up.
        assert_eq!(seen.len(), 50);
    }

    #[test]
    fn test_clear() {
        let mut dict = filled(100);
        dict.clear();
        assert!(dict.is_empty());
        assert_eq!(dict.table_sizes(), (8, 0));
        assert!(dict.get(b"key:1").is_none());
        dict.add(key(1), 1).unwrap();
        assert_eq!(dict.len(), 1);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(u16),
        Delete(u16),
        Find(u16),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => (0u16..300).prop_map(Op::Add),
            1 => (0u16..300).prop_map(Op::Delete),
            2 => (0u16..300).prop_map(Op::Find),
        ]
    }

    proptest! {
        #[test]
        fn prop_rehash_keeps_every_key(ops in prop::collection::vec(op_strategy(), 1..600)) {
            let mut dict: Dict<u16> = Dict::new();
            let mut model = HashSet::new();

            for op in ops {
                match op {
                    Op::Add(k) => {
                        let res = dict.add(Bytes::from(k.to_string()), k);
                        prop_assert_eq!(res.is_ok(), model.insert(k));
                    }
                    Op::Delete(k) => {
                        let res = dict.delete(k.to_string().as_bytes());
                        prop_assert_eq!(res.is_ok(), model.remove(&k));
                    }
                    Op::Find(k) => {
                        let found = dict.get(k.to_string().as_bytes()).copied();
                        prop_assert_eq!(found, model.get(&k).copied());
                    }
                }
                let (u0, u1) = dict.table_used();
                prop_assert_eq!(u0 + u1, model.len());
            }

            for k in &model {
                prop_assert_eq!(dict.peek(k.to_string().as_bytes()), Some(k));
            }
        }
    }
}
