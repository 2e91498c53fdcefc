//! Thread-Safe Storage Engine
//!
//! This module owns the key space: a map from key to an [`Entry`] holding the
//! value and an optional absolute expiry timestamp (unix seconds).
//!
//! ## Design Decisions
//!
//! 1. **One lock**: the whole map sits behind a single `RwLock`. Every public
//!    method takes the lock exactly once, so each operation is atomic and a
//!    reader never sees a new value paired with an old expiry.
//! 2. **No clock**: the engine stores expiry timestamps but never decides on
//!    its own that one has passed. Callers pass `now` where it matters; the
//!    expiry manager owns the notion of time.
//! 3. **Snapshots for scans**: `all_keys()` copies the key set out so the
//!    active expiry loop can iterate while connections keep mutating.
//!
//! A poisoned lock is recovered rather than propagated: every write leaves
//! the map in a consistent state, so a panic elsewhere never invalidates it.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

/// Represents a stored value with optional expiry time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The actual value stored
    pub value: Bytes,
    /// Unix timestamp (seconds) at which this entry expires (None = never)
    pub expires_at: Option<u64>,
}

impl Entry {
    /// Creates a new entry without expiry.
    pub fn new(value: Bytes) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    /// Checks whether this entry has expired at `now`.
    #[inline]
    pub fn is_expired_at(&self, now: u64) -> bool {
        self.expires_at.map(|exp| now >= exp).unwrap_or(false)
    }
}

/// Errors from [`StorageEngine::incr_by`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum IncrError {
    #[error("value is not an integer or out of range")]
    NotAnInteger,

    #[error("increment or decrement would overflow")]
    Overflow,
}

/// The key-value store.
///
/// Wrap it in an `Arc` and share it between connection tasks and the
/// expiry manager.
///
/// # Example
///
/// ```
/// use tinykv::storage::StorageEngine;
/// use bytes::Bytes;
///
/// let engine = StorageEngine::new();
///
/// engine.set(Bytes::from("name"), Bytes::from("Ariz"));
/// assert_eq!(engine.get(b"name"), Some(Bytes::from("Ariz")));
///
/// engine.set_expiry(b"name", 1_900_000_000);
/// assert_eq!(engine.get_expiry(b"name"), Some(1_900_000_000));
/// ```
pub struct StorageEngine {
    data: RwLock<HashMap<Bytes, Entry>>,

    /// Statistics: total GET operations
    get_count: AtomicU64,

    /// Statistics: total SET operations
    set_count: AtomicU64,

    /// Statistics: total DEL operations
    del_count: AtomicU64,

    /// Statistics: number of expired keys removed
    expired_count: AtomicU64,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("keys", &self.len())
            .field("get_count", &self.get_count.load(Ordering::Relaxed))
            .field("set_count", &self.set_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            get_count: AtomicU64::new(0),
            set_count: AtomicU64::new(0),
            del_count: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
        }
    }

    #[inline]
    fn read(&self) -> RwLockReadGuard<'_, HashMap<Bytes, Entry>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Bytes, Entry>> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Gets the value for a key.
    ///
    /// This does not look at the expiry; callers run the passive expiry
    /// check first.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.get_count.fetch_add(1, Ordering::Relaxed);
        self.read().get(key).map(|entry| entry.value.clone())
    }

    /// Gets the value for a key unless its deadline is at or before `now`.
    ///
    /// The expiry check and the read share one lock, so a value is never
    /// returned after its deadline even if a passive check ran earlier.
    pub fn get_live(&self, key: &[u8], now: u64) -> Option<Bytes> {
        self.get_count.fetch_add(1, Ordering::Relaxed);
        self.read()
            .get(key)
            .filter(|entry| !entry.is_expired_at(now))
            .map(|entry| entry.value.clone())
    }

    /// Gets a copy of the full entry (value and expiry) in one atomic read.
    pub fn get_entry(&self, key: &[u8]) -> Option<Entry> {
        self.read().get(key).cloned()
    }

    /// Sets a key-value pair, replacing any prior entry and clearing its
    /// expiry.
    ///
    /// Returns `true` if a new key was created.
    pub fn set(&self, key: Bytes, value: Bytes) -> bool {
        self.set_count.fetch_add(1, Ordering::Relaxed);
        self.write().insert(key, Entry::new(value)).is_none()
    }

    /// Deletes a key. Returns `true` if the key existed.
    pub fn delete(&self, key: &[u8]) -> bool {
        self.del_count.fetch_add(1, Ordering::Relaxed);
        self.write().remove(key).is_some()
    }

    pub fn exists(&self, key: &[u8]) -> bool {
        self.read().contains_key(key)
    }

    /// Returns the absolute expiry timestamp of a key, if it has one.
    pub fn get_expiry(&self, key: &[u8]) -> Option<u64> {
        self.read().get(key).and_then(|entry| entry.expires_at)
    }

    /// Sets the absolute expiry timestamp of an existing key.
    ///
    /// Returns `false` (and does nothing) if the key is absent.
    pub fn set_expiry(&self, key: &[u8], expires_at: u64) -> bool {
        match self.write().get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(expires_at);
                true
            }
            None => false,
        }
    }

    /// Removes `key` if its expiry is at or before `now`.
    ///
    /// The check and the removal happen under one write lock, so a `set`
    /// racing with the check is never deleted by mistake.
    pub fn remove_if_expired(&self, key: &[u8], now: u64) -> bool {
        let mut data = self.write();
        let expired = data
            .get(key)
            .map(|entry| entry.is_expired_at(now))
            .unwrap_or(false);

        if expired {
            data.remove(key);
            self.expired_count.fetch_add(1, Ordering::Relaxed);
        }
        expired
    }

    /// Increments the integer stored at `key` by `delta`.
    ///
    /// An absent key counts as 0. The existing expiry is kept. On error the
    /// stored value is left untouched.
    pub fn incr_by(&self, key: &[u8], delta: i64) -> Result<i64, IncrError> {
        let mut data = self.write();

        let current = match data.get(key) {
            Some(entry) => parse_integer(&entry.value)?,
            None => 0,
        };

        let new_value = current.checked_add(delta).ok_or(IncrError::Overflow)?;
        let value = Bytes::from(new_value.to_string());

        match data.get_mut(key) {
            Some(entry) => entry.value = value,
            None => {
                data.insert(Bytes::copy_from_slice(key), Entry::new(value));
            }
        }

        Ok(new_value)
    }

    /// Returns a point-in-time copy of every key in the store.
    pub fn all_keys(&self) -> Vec<Bytes> {
        self.read().keys().cloned().collect()
    }

    /// Returns a copy of every key that carries an expiry.
    pub fn keys_with_expiry(&self) -> Vec<Bytes> {
        self.read()
            .iter()
            .filter(|(_, entry)| entry.expires_at.is_some())
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Returns the number of keys, including expired ones not yet removed.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns database statistics.
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.len() as u64,
            get_ops: self.get_count.load(Ordering::Relaxed),
            set_ops: self.set_count.load(Ordering::Relaxed),
            del_ops: self.del_count.load(Ordering::Relaxed),
            expired: self.expired_count.load(Ordering::Relaxed),
        }
    }
}

fn parse_integer(value: &[u8]) -> Result<i64, IncrError> {
    std::str::from_utf8(value)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(IncrError::NotAnInteger)
}

/// Database statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    /// Number of keys currently stored
    pub keys: u64,
    /// Total GET operations
    pub get_ops: u64,
    /// Total SET operations
    pub set_ops: u64,
    /// Total DEL operations
    pub del_ops: u64,
    /// Total expired keys removed (passive and active)
    pub expired: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let engine = StorageEngine::new();
        assert!(engine.is_empty());

        assert!(engine.set(Bytes::from("key"), Bytes::from("value")));
        assert_eq!(engine.get(b"key"), Some(Bytes::from("value")));
        assert!(!engine.set(Bytes::from("key"), Bytes::from("other")));
        assert_eq!(engine.get(b"key"), Some(Bytes::from("other")));
    }

    #[test]
    fn test_get_live_hides_value_past_deadline() {
        let engine = StorageEngine::new();
        engine.set(Bytes::from("key"), Bytes::from("value"));
        engine.set_expiry(b"key", 1_000);

        assert_eq!(engine.get_live(b"key", 999), Some(Bytes::from("value")));
        assert_eq!(engine.get_live(b"key", 1_000), None);

        // Reading does not remove; that is left to the expiry checks
        assert!(engine.exists(b"key"));
        assert_eq!(engine.get_live(b"missing", 0), None);
    }

    #[test]
    fn test_get_nonexistent() {
        let engine = StorageEngine::new();
        assert_eq!(engine.get(b"nonexistent"), None);
    }

    #[test]
    fn test_keys_are_case_sensitive() {
        let engine = StorageEngine::new();
        engine.set(Bytes::from("Key"), Bytes::from("upper"));
        assert_eq!(engine.get(b"key"), None);
    }

    #[test]
    fn test_delete() {
        let engine = StorageEngine::new();
        engine.set(Bytes::from("key"), Bytes::from("value"));

        assert!(engine.delete(b"key"));
        assert!(!engine.exists(b"key"));
        assert!(!engine.delete(b"key"));
    }

    #[test]
    fn test_set_clears_expiry() {
        let engine = StorageEngine::new();
        engine.set(Bytes::from("key"), Bytes::from("v1"));
        assert!(engine.set_expiry(b"key", 100));
        assert_eq!(engine.get_expiry(b"key"), Some(100));

        engine.set(Bytes::from("key"), Bytes::from("v2"));
        assert_eq!(engine.get_expiry(b"key"), None);
    }

    #[test]
    fn test_set_expiry_on_missing_key_is_noop() {
        let engine = StorageEngine::new();
        assert!(!engine.set_expiry(b"missing", 100));
        assert!(!engine.exists(b"missing"));
    }

    #[test]
    fn test_remove_if_expired() {
        let engine = StorageEngine::new();
        engine.set(Bytes::from("old"), Bytes::from("v"));
        engine.set(Bytes::from("fresh"), Bytes::from("v"));
        engine.set(Bytes::from("forever"), Bytes::from("v"));
        engine.set_expiry(b"old", 100);
        engine.set_expiry(b"fresh", 300);

        assert!(engine.remove_if_expired(b"old", 100));
        assert!(!engine.remove_if_expired(b"old", 100));
        assert!(!engine.remove_if_expired(b"fresh", 200));
        assert!(!engine.remove_if_expired(b"forever", 200));
        assert!(!engine.remove_if_expired(b"missing", 200));

        assert_eq!(engine.len(), 2);
        assert_eq!(engine.stats().expired, 1);
    }

    #[test]
    fn test_incr_by() {
        let engine = StorageEngine::new();

        assert_eq!(engine.incr_by(b"counter", 1), Ok(1));
        assert_eq!(engine.incr_by(b"counter", 1), Ok(2));
        assert_eq!(engine.incr_by(b"counter", -5), Ok(-3));
        assert_eq!(engine.get(b"counter"), Some(Bytes::from("-3")));
    }

    #[test]
    fn test_incr_keeps_expiry() {
        let engine = StorageEngine::new();
        engine.set(Bytes::from("counter"), Bytes::from("10"));
        engine.set_expiry(b"counter", 500);

        assert_eq!(engine.incr_by(b"counter", 1), Ok(11));
        assert_eq!(engine.get_expiry(b"counter"), Some(500));
    }

    #[test]
    fn test_incr_failure_leaves_value() {
        let engine = StorageEngine::new();
        engine.set(Bytes::from("x"), Bytes::from("y"));
        assert_eq!(engine.incr_by(b"x", 1), Err(IncrError::NotAnInteger));
        assert_eq!(engine.get(b"x"), Some(Bytes::from("y")));

        engine.set(Bytes::from("max"), Bytes::from(i64::MAX.to_string()));
        assert_eq!(engine.incr_by(b"max", 1), Err(IncrError::Overflow));
        assert_eq!(engine.get(b"max"), Some(Bytes::from(i64::MAX.to_string())));
    }

    #[test]
    fn test_key_snapshots() {
        let engine = StorageEngine::new();
        engine.set(Bytes::from("a"), Bytes::from("1"));
        engine.set(Bytes::from("b"), Bytes::from("2"));
        engine.set_expiry(b"b", 100);

        let mut keys = engine.all_keys();
        keys.sort();
        assert_eq!(keys, vec![Bytes::from("a"), Bytes::from("b")]);
        assert_eq!(engine.keys_with_expiry(), vec![Bytes::from("b")]);

        // The snapshot is detached from the live map
        engine.delete(b"a");
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn test_stats() {
        let engine = StorageEngine::new();
        engine.set(Bytes::from("a"), Bytes::from("1"));
        engine.get(b"a");
        engine.get(b"b");
        engine.delete(b"a");

        let stats = engine.stats();
        assert_eq!(stats.keys, 0);
        assert_eq!(stats.set_ops, 1);
        assert_eq!(stats.get_ops, 2);
        assert_eq!(stats.del_ops, 1);
    }

    #[test]
    fn test_concurrent_access() {
        use std::sync::Arc;
        use std::thread;

        let engine = Arc::new(StorageEngine::new());
        let mut handles = vec![];

        for i in 0..10 {
            let engine = Arc::clone(&engine);
            handles.push(thread::spawn(move || {
                for j in 0..100 {
                    let key = format!("key-{}-{}", i, j);
                    engine.set(Bytes::from(key.clone()), Bytes::from("value"));
                    engine.get(key.as_bytes());
                    engine.incr_by(b"shared", 1).unwrap();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(engine.len(), 1001);
        assert_eq!(engine.get(b"shared"), Some(Bytes::from("1000")));
    }
}
