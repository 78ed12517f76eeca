//! Bounded TTL/LRU cache driven by an injected [`Clock`].

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};
use lru::LruCache;
use tracing::{debug, instrument, trace};

use crate::time::Clock;

/// Process-local cache with per-entry expiry and least-recently-used eviction.
///
/// Entries are cloned out on read. Losing an entry only costs a refetch.
#[derive(Debug)]
pub struct TtlLruCache<K: Hash + Eq, V> {
    name: &'static str,
    ttl: TimeDelta,
    clock: Arc<dyn Clock>,
    entries: Mutex<LruCache<K, (V, DateTime<Utc>)>>,
}

impl<K, V> TtlLruCache<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    /// Creates an empty cache holding at most `capacity` entries.
    pub fn new(name: &'static str, ttl: TimeDelta, capacity: usize, clock: Arc<dyn Clock>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            name,
            ttl,
            clock,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Default time to live.
    pub fn ttl(&self) -> TimeDelta {
        self.ttl
    }

    /// Returns a live entry, dropping it if expired.
    #[instrument(level = "trace", skip(self), fields(cache = self.name))]
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > now => {
                trace!("Cache hit");
                return Some(value.clone());
            }
            Some(_) => {}
            None => return None,
        }
        entries.pop(key);
        trace!("Cache entry expired");
        None
    }

    /// Stores `value` under the default TTL.
    pub fn insert(&self, key: K, value: V) {
        self.insert_with_ttl(key, value, self.ttl);
    }

    /// Stores `value` for at most `ttl` (never longer than the default).
    #[instrument(level = "trace", skip(self, value), fields(cache = self.name))]
    pub fn insert_with_ttl(&self, key: K, value: V, ttl: TimeDelta) {
        let ttl = ttl.min(self.ttl);
        if ttl <= TimeDelta::zero() {
            return;
        }
        let expires_at = self.clock.now() + ttl;
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((evicted, _)) = entries.push(key.clone(), (value, expires_at))
            && evicted != key
        {
            debug!(cache = self.name, key = ?evicted, "Evicted least recently used entry");
        }
    }

    /// Drops the entry for `key`.
    #[instrument(level = "debug", skip(self), fields(cache = self.name))]
    pub fn invalidate(&self, key: &K) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.pop(key).is_some() {
            debug!("Cache entry invalidated");
        }
    }

    /// Number of stored entries, including any not yet swept.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// True if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
