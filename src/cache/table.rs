//! Capacity-bounded table whose entries each carry their own expiry.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::time::Duration;

/// Entry in a [`TtlTable`].
struct Slot<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

/// Thread-safe keyed table with per-entry expiry.
///
/// Reads never return an entry at or past its expiry; such entries are
/// removed on the read that observes them. When full, an insert of a new key
/// first drops expired entries and then evicts the entry closest to expiry.
pub struct TtlTable<V> {
    name: &'static str,
    entries: DashMap<String, Slot<V>>,
    capacity: usize,
}

impl<V: Clone> TtlTable<V> {
    /// Create a new table holding at most `capacity` entries.
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            entries: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Get a live entry.
    pub fn get(&self, key: &str) -> Option<V> {
        self.get_at(key, Utc::now())
    }

    /// Get an entry that is still live at `now`.
    pub fn get_at(&self, key: &str, now: DateTime<Utc>) -> Option<V> {
        {
            let slot = self.entries.get(key)?;
            if now < slot.expires_at {
                return Some(slot.value.clone());
            }
        }

        // Expired: only drop it if a concurrent writer has not replaced it.
        if self
            .entries
            .remove_if(key, |_, slot| now >= slot.expires_at)
            .is_some()
        {
            tracing::trace!(table = self.name, key = %key, "Evicted expired entry on read");
        }
        None
    }

    /// Insert an entry that lives for `ttl`.
    pub fn insert(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.insert_until(key, value, expires_at);
    }

    /// Insert an entry that lives until `expires_at`.
    ///
    /// An entry that is already expired is not stored, and any previous
    /// entry for the key is dropped.
    pub fn insert_until(&self, key: impl Into<String>, value: V, expires_at: DateTime<Utc>) {
        let key = key.into();
        let now = Utc::now();

        if expires_at <= now {
            self.entries.remove(&key);
            tracing::debug!(table = self.name, key = %key, "Refused to cache already-expired entry");
            return;
        }

        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.sweep_at(now);
            while self.entries.len() >= self.capacity {
                if !self.evict_earliest() {
                    break;
                }
            }
        }

        self.entries.insert(key, Slot { value, expires_at });
    }

    /// Remove an entry, returning it if it was still live.
    pub fn remove(&self, key: &str) -> Option<V> {
        let now = Utc::now();
        self.entries
            .remove(key)
            .filter(|(_, slot)| now < slot.expires_at)
            .map(|(_, slot)| slot.value)
    }

    /// Remove expired entries, returning how many were dropped.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, slot| now < slot.expires_at);
        before.saturating_sub(self.entries.len())
    }

    fn evict_earliest(&self) -> bool {
        let earliest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.expires_at)
            .map(|entry| entry.key().clone());

        match earliest {
            Some(key) => {
                self.entries.remove(&key);
                tracing::debug!(table = self.name, key = %key, "Evicted entry at capacity");
                true
            }
            None => false,
        }
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let table = TtlTable::new("test", 10);
        table.insert("a", 1u32, Duration::from_secs(60));
        assert_eq!(table.get("a"), Some(1));
        assert_eq!(table.get("b"), None);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_never_returned_past_expiry() {
        let table = TtlTable::new("test", 10);
        let expires_at = Utc::now() + chrono::Duration::seconds(60);
        table.insert_until("a", "url", expires_at);

        assert_eq!(table.get_at("a", expires_at - chrono::Duration::seconds(1)), Some("url"));
        assert_eq!(table.get_at("a", expires_at), None);
        // Lazy eviction removed it.
        assert!(table.is_empty());
    }

    #[test]
    fn test_expired_insert_is_not_stored() {
        let table = TtlTable::new("test", 10);
        table.insert("a", 1u32, Duration::from_secs(60));
        table.insert_until("a", 2u32, Utc::now() - chrono::Duration::seconds(1));
        assert_eq!(table.get("a"), None);
        assert!(table.is_empty());
    }

    #[test]
    fn test_evicts_earliest_expiry_at_capacity() {
        let table = TtlTable::new("test", 2);
        table.insert("short", 1u32, Duration::from_secs(10));
        table.insert("long", 2u32, Duration::from_secs(1000));
        table.insert("new", 3u32, Duration::from_secs(500));

        assert_eq!(table.len(), 2);
        assert_eq!(table.get("short"), None);
        assert_eq!(table.get("long"), Some(2));
        assert_eq!(table.get("new"), Some(3));
    }

    #[test]
    fn test_overwrite_at_capacity_does_not_evict() {
        let table = TtlTable::new("test", 2);
        table.insert("a", 1u32, Duration::from_secs(10));
        table.insert("b", 2u32, Duration::from_secs(20));
        table.insert("a", 3u32, Duration::from_secs(30));

        assert_eq!(table.get("a"), Some(3));
        assert_eq!(table.get("b"), Some(2));
    }

    #[test]
    fn test_sweep_removes_expired() {
        let table = TtlTable::new("test", 10);
        table.insert("live", 1u32, Duration::from_secs(60));
        table.insert("dying", 2u32, Duration::from_millis(20));
        std::thread::sleep(Duration::from_millis(40));

        assert_eq!(table.sweep(), 1);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("live"), Some(1));
    }

    #[test]
    fn test_remove() {
        let table = TtlTable::new("test", 10);
        table.insert("a", 1u32, Duration::from_secs(60));
        assert_eq!(table.remove("a"), Some(1));
        assert_eq!(table.remove("a"), None);
    }
}
