//! Counter records and the shared keyed store that holds them.

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::key::RateLimitKey;

/// Consumed quota for one key within its current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterRecord {
    /// Requests admitted in the current window
    pub count: u64,
    /// When the current window ends
    pub window_reset_at: DateTime<Utc>,
}

impl CounterRecord {
    /// Start a new window at `now` with `count` requests already consumed.
    pub fn start(count: u64, now: DateTime<Utc>, window: Duration) -> Self {
        Self {
            count,
            window_reset_at: now + window,
        }
    }

    /// Whether the window has ended at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.window_reset_at
    }

    /// Whether the window ended more than one full window ago.
    pub fn is_reclaimable(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now - self.window_reset_at > window
    }
}

/// Thread-safe map from rate limit key to counter record.
///
/// Each key lives in exactly one shard; `update` holds that shard's write
/// lock for the whole read-modify-write, so updates to one key are
/// serialized while other shards stay available.
#[derive(Debug, Default)]
pub struct CounterStore {
    counters: DashMap<RateLimitKey, CounterRecord>,
}

impl CounterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically read and rewrite the record for `key`.
    ///
    /// `f` sees the current record (`None` if absent) and may replace or
    /// clear it. Concurrent callers for the same key run one at a time.
    pub fn update<T, F>(&self, key: &RateLimitKey, f: F) -> T
    where
        F: FnOnce(&mut Option<CounterRecord>) -> T,
    {
        match self.counters.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                let mut slot = Some(*entry.get());
                let out = f(&mut slot);
                match slot {
                    Some(record) => *entry.get_mut() = record,
                    None => {
                        entry.remove();
                    }
                }
                out
            }
            Entry::Vacant(entry) => {
                let mut slot = None;
                let out = f(&mut slot);
                if let Some(record) = slot {
                    entry.insert(record);
                }
                out
            }
        }
    }

    /// Get a snapshot of the record for `key`.
    pub fn get(&self, key: &RateLimitKey) -> Option<CounterRecord> {
        self.counters.get(key).map(|r| *r)
    }

    /// Remove every record whose window ended more than `window` ago.
    ///
    /// Returns the number of records removed.
    pub fn sweep(&self, now: DateTime<Utc>, window: Duration) -> usize {
        let mut removed = 0;
        self.counters.retain(|_, record| {
            let keep = !record.is_reclaimable(now, window);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    /// Get the number of live records.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Clear all records.
    pub fn clear(&self) {
        self.counters.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_record_expiry_boundary() {
        let record = CounterRecord::start(1, t(0), Duration::seconds(60));

        assert_eq!(record.window_reset_at, t(60));
        assert!(!record.is_expired(t(59)));
        assert!(record.is_expired(t(60)));
    }

    #[test]
    fn test_record_reclaimable_after_one_full_window() {
        let window = Duration::seconds(60);
        let record = CounterRecord::start(1, t(0), window);

        assert!(!record.is_reclaimable(t(120), window));
        assert!(record.is_reclaimable(t(121), window));
    }

    #[test]
    fn test_update_inserts_and_mutates() {
        let store = CounterStore::new();
        let key = RateLimitKey::new("TestBot", "1.2.3.4");

        let existed = store.update(&key, |slot| {
            let existed = slot.is_some();
            *slot = Some(CounterRecord::start(1, t(0), Duration::seconds(60)));
            existed
        });
        assert!(!existed);

        store.update(&key, |slot| {
            if let Some(record) = slot {
                record.count += 1;
            }
        });
        assert_eq!(store.get(&key).map(|r| r.count), Some(2));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_update_can_clear() {
        let store = CounterStore::new();
        let key = RateLimitKey::new("TestBot", "1.2.3.4");

        store.update(&key, |slot| {
            *slot = Some(CounterRecord::start(1, t(0), Duration::seconds(1)));
        });
        store.update(&key, |slot| *slot = None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_update_without_write_leaves_store_empty() {
        let store = CounterStore::new();
        let key = RateLimitKey::new("TestBot", "1.2.3.4");

        store.update(&key, |_| ());
        assert!(store.is_empty());
    }

    #[test]
    fn test_sweep_removes_only_stale_records() {
        let store = CounterStore::new();
        let window = Duration::seconds(60);
        let stale = RateLimitKey::new("TestBot", "1.1.1.1");
        let fresh = RateLimitKey::new("TestBot", "2.2.2.2");

        store.update(&stale, |slot| *slot = Some(CounterRecord::start(3, t(0), window)));
        store.update(&fresh, |slot| *slot = Some(CounterRecord::start(1, t(100), window)));

        let removed = store.sweep(t(121), window);

        assert_eq!(removed, 1);
        assert!(store.get(&stale).is_none());
        assert!(store.get(&fresh).is_some());
    }

    #[test]
    fn test_clear() {
        let store = CounterStore::new();
        let key = RateLimitKey::new("TestBot", "1.2.3.4");
        store.update(&key, |slot| {
            *slot = Some(CounterRecord::start(1, t(0), Duration::seconds(1)));
        });

        store.clear();
        assert_eq!(store.len(), 0);
    }
}
