use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::normalize::CacheKey;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub inserted_at: Instant,
    pub value: String,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) > ttl
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
    pub evicted: u64,
    pub entries: usize,
}

struct Inner {
    entries: LruCache<CacheKey, CacheEntry>,
    stats: CacheStats,
}

/// Bounded, TTL-expiring memo of completed translations.
///
/// Every operation runs under one exclusive lock, so readers never see a
/// half-written entry and recency updates never interleave.
pub struct ResponseCache {
    inner: Mutex<Inner>,
    ttl: Duration,
    max_entries: NonZeroUsize,
}

impl ResponseCache {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        let max_entries = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                // Capacity is enforced by `set` so evictions can be counted.
                entries: LruCache::unbounded(),
                stats: CacheStats::default(),
            }),
            ttl,
            max_entries,
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<String> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let now = Instant::now();

        // `get` promotes the entry, which is what a live hit wants anyway.
        let expired = match inner.entries.get(key) {
            Some(entry) if !entry.is_expired(self.ttl, now) => {
                let value = entry.value.clone();
                inner.stats.hits += 1;
                return Some(value);
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            inner.entries.pop(key);
            inner.stats.expired += 1;
            debug!("Cache entry expired for {}->{}", key.source_language, key.target_language);
        }
        inner.stats.misses += 1;
        None
    }

    pub fn set(&self, key: CacheKey, value: String) {
        let mut guard = self.lock();
        let inner = &mut *guard;
        inner.entries.put(
            key,
            CacheEntry {
                inserted_at: Instant::now(),
                value,
            },
        );

        while inner.entries.len() > self.max_entries.get() {
            if inner.entries.pop_lru().is_none() {
                break;
            }
            inner.stats.evicted += 1;
        }
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        let inner = self.lock();
        inner
            .entries
            .peek(key)
            .is_some_and(|entry| !entry.is_expired(self.ttl, Instant::now()))
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            entries: inner.entries.len(),
            ..inner.stats
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave an entry half-written,
        // so a poisoned table is still consistent.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
