//! Keyspace
//!
//! A `Database` is two dicts: `data` maps keys to values and `expires` maps
//! keys that have a TTL to their absolute deadline in unix milliseconds.
//!
//! Expired keys are removed in two ways:
//! 1. **Lazy**: every lookup first checks the key's deadline
//! 2. **Active**: the server cron samples `expires` (see [`super::expiry`])

use super::dict::Dict;
use super::object::Value;
use bytes::Bytes;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix time in milliseconds.
pub fn unix_time_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// One key captured by [`Database::snapshot`].
#[derive(Debug, Clone)]
pub struct SnapshotEntry {
    pub key: Bytes,
    pub value: Arc<Value>,
    /// Absolute deadline in unix milliseconds
    pub expire_at: Option<i64>,
}

/// Keyspace counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyspaceStats {
    /// Keys removed because their deadline passed
    pub expired_keys: u64,
}

#[derive(Debug, Default)]
pub struct Database {
    data: Dict<Arc<Value>>,
    expires: Dict<i64>,
    stats: KeyspaceStats,
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys, including expired keys not yet removed.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of keys with a TTL.
    pub fn expires_len(&self) -> usize {
        self.expires.len()
    }

    pub fn stats(&self) -> KeyspaceStats {
        self.stats
    }

    /// Looks up a live key.
    pub fn lookup(&mut self, key: &[u8]) -> Option<&Arc<Value>> {
        self.expire_if_needed(key);
        self.data.get(key)
    }

    /// Looks up a live key for writing.
    ///
    /// If a snapshot still shares the value, it is copied first.
    pub fn lookup_mut(&mut self, key: &[u8]) -> Option<&mut Value> {
        self.expire_if_needed(key);
        self.data.get_mut(key).map(Arc::make_mut)
    }

    /// Returns true if the key exists and has not expired.
    pub fn exists(&mut self, key: &[u8]) -> bool {
        self.lookup(key).is_some()
    }

    /// Stores a value, replacing any previous value and clearing its TTL.
    pub fn insert(&mut self, key: Bytes, value: Value) {
        let _ = self.expires.delete(&key);
        self.data.set(key, Arc::new(value));
    }

    /// Removes a key and its TTL. Returns false if it did not exist.
    pub fn remove(&mut self, key: &[u8]) -> bool {
        let _ = self.expires.delete(key);
        self.data.delete(key).is_ok()
    }

    /// Sets an absolute deadline on an existing key.
    ///
    /// A deadline that already passed deletes the key. Returns false if the
    /// key does not exist.
    pub fn set_expire(&mut self, key: &[u8], when_ms: i64) -> bool {
        if !self.exists(key) {
            return false;
        }
        if when_ms <= unix_time_ms() {
            self.remove(key);
            return true;
        }
        self.expires.set(Bytes::copy_from_slice(key), when_ms);
        true
    }

    /// Returns the deadline of a live key, if it has one.
    pub fn get_expire(&mut self, key: &[u8]) -> Option<i64> {
        self.expire_if_needed(key);
        self.expires.get(key).copied()
    }

    /// Removes the TTL of a key. Returns false if there was none.
    pub fn persist(&mut self, key: &[u8]) -> bool {
        self.expire_if_needed(key);
        self.expires.delete(key).is_ok()
    }

    /// Deletes the key if its deadline has passed.
    ///
    /// Returns true if the key was removed.
    pub fn expire_if_needed(&mut self, key: &[u8]) -> bool {
        let deadline = self.expires.get(key).copied();
        match deadline {
            Some(when) if when <= unix_time_ms() => {
                self.remove(key);
                self.stats.expired_keys += 1;
                true
            }
            _ => false,
        }
    }

    /// Picks a random key that has a TTL, with its deadline.
    pub fn random_expiring(&mut self) -> Option<(Bytes, i64)> {
        self.expires
            .random_entry()
            .map(|(key, &when)| (key.clone(), when))
    }

    /// Removes a key found expired by the active cycle.
    pub fn evict_expired(&mut self, key: &[u8]) {
        if self.remove(key) {
            self.stats.expired_keys += 1;
        }
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.expires.clear();
    }

    /// Runs incremental rehashing on both dicts for up to `ms` milliseconds
    /// each.
    pub fn rehash_milliseconds(&mut self, ms: u64) -> usize {
        self.data.rehash_milliseconds(ms) + self.expires.rehash_milliseconds(ms)
    }

    /// Shrinks dicts that have become mostly empty.
    pub fn resize_if_needed(&mut self) {
        if self.data.needs_resize() {
            let _ = self.data.resize_to_fit();
        }
        if self.expires.needs_resize() {
            let _ = self.expires.resize_to_fit();
        }
    }

    /// Read access to the key dict, for inspection.
    pub fn dict(&self) -> &Dict<Arc<Value>> {
        &self.data
    }

    /// Captures every live key through a safe iterator.
    ///
    /// Values are shared, not copied; later writes copy on demand.
    pub fn snapshot(&mut self) -> Vec<SnapshotEntry> {
        let now = unix_time_ms();
        let mut entries = Vec::with_capacity(self.data.len());

        let mut iter = self.data.safe_iter();
        while let Some((key, value)) = self.data.next(&mut iter) {
            let expire_at = self.expires.peek(key).copied();
            if expire_at.is_some_and(|when| when <= now) {
                continue;
            }
            entries.push(SnapshotEntry {
                key: key.clone(),
                value: Arc::clone(value),
                expire_at,
            });
        }
        self.data.release(iter);
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    fn s(v: &str) -> Value {
        Value::Str(Bytes::from(v.to_string()))
    }

    fn as_str(value: &Value) -> &[u8] {
        match value {
            Value::Str(b) => b,
            other => panic!("expected string, got {}", other.type_name()),
        }
    }

    #[test]
    fn test_insert_lookup_remove() {
        let mut db = Database::new();
        db.insert(Bytes::from("name"), s("Ariz"));
        assert_eq!(as_str(db.lookup(b"name").unwrap()), b"Ariz");
        assert!(db.remove(b"name"));
        assert!(!db.remove(b"name"));
        assert!(db.lookup(b"name").is_none());
    }

    #[test]
    fn test_lazy_expiry() {
        let mut db = Database::new();
        db.insert(Bytes::from("k"), s("v"));
        assert!(db.set_expire(b"k", unix_time_ms() + 60_000));
        assert!(db.get_expire(b"k").is_some());

        // Force the deadline into the past without going through set_expire.
        db.expires.set(Bytes::from("k"), unix_time_ms() - 1);
        assert!(db.lookup(b"k").is_none());
        assert_eq!(db.len(), 0);
        assert_eq!(db.expires_len(), 0);
        assert_eq!(db.stats().expired_keys, 1);
    }

    #[test]
    fn test_past_deadline_deletes() {
        let mut db = Database::new();
        db.insert(Bytes::from("k"), s("v"));
        assert!(db.set_expire(b"k", 1));
        assert!(!db.exists(b"k"));
        assert!(!db.set_expire(b"missing", unix_time_ms() + 1000));
    }

    #[test]
    fn test_insert_clears_ttl() {
        let mut db = Database::new();
        db.insert(Bytes::from("k"), s("v"));
        db.set_expire(b"k", unix_time_ms() + 60_000);
        db.insert(Bytes::from("k"), s("w"));
        assert!(db.get_expire(b"k").is_none());
    }

    #[test]
    fn test_persist() {
        let mut db = Database::new();
        db.insert(Bytes::from("k"), s("v"));
        assert!(!db.persist(b"k"));
        db.set_expire(b"k", unix_time_ms() + 60_000);
        assert!(db.persist(b"k"));
        assert!(db.get_expire(b"k").is_none());
    }

    #[test]
    fn test_snapshot_is_copy_on_write() {
        let mut db = Database::new();
        db.insert(Bytes::from("list"), Value::List(VecDeque::from(vec![Bytes::from("a")])));
        db.insert(Bytes::from("gone"), s("x"));
        db.expires.set(Bytes::from("gone"), unix_time_ms() - 1);

        let snapshot = db.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(db.dict().safe_iterator_count(), 0);

        if let Some(Value::List(list)) = db.lookup_mut(b"list") {
            list.push_back(Bytes::from("b"));
        }
        match snapshot[0].value.as_ref() {
            Value::List(list) => assert_eq!(list.len(), 1),
            other => panic!("unexpected {}", other.type_name()),
        }
        match db.lookup(b"list").map(|v| v.as_ref()) {
            Some(Value::List(list)) => assert_eq!(list.len(), 2),
            _ => panic!("list missing"),
        }
    }
}
