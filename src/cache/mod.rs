//! TTL cache keyed by request fingerprint
//!
//! Entries expire lazily: a read past the TTL evicts the entry and reports a
//! miss. There is no capacity bound; the cache only absorbs short bursts of
//! duplicate reads.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use dashmap::DashMap;
use log::{debug, trace};
use regex::Regex;
use tokio::time::Instant;

/// A cached value together with when it was stored and how long it lives.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub stored_at: Instant,
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) > self.ttl
    }
}

pub struct FingerprintCache<V> {
    entries: DashMap<String, CacheEntry<V>>,
    // Bumped by every invalidation; versioned writes compare against it.
    generation: AtomicU64,
}

impl<V> Default for FingerprintCache<V>
where
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> FingerprintCache<V>
where
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            generation: AtomicU64::new(0),
        }
    }

    /// Fresh value for `key`, evicting it if expired.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };

        if expired {
            trace!("Cache entry {key} expired, evicting");
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        }
        None
    }

    /// Store `value` under `key`, replacing any existing entry.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        self.entries.insert(
            key.into(),
            CacheEntry {
                value,
                stored_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Store `value` only if no invalidation happened since `generation` was read.
    pub fn set_if_generation(
        &self,
        key: impl Into<String>,
        value: V,
        ttl: Duration,
        generation: u64,
    ) -> bool {
        let key = key.into();
        // Holding the shard lock orders this check against `invalidate`'s
        // retain pass, which runs after the generation bump.
        let entry = self.entries.entry(key);
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!("Dropping cache write for {} raced by invalidation", entry.key());
            return false;
        }
        entry.insert(CacheEntry {
            value,
            stored_at: Instant::now(),
            ttl,
        });
        true
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Remove every entry, or only those whose key matches `pattern`.
    ///
    /// The pattern is a regular expression searched anywhere in the key; if it
    /// does not compile it is treated as a plain substring.
    pub fn invalidate(&self, pattern: Option<&str>) -> usize {
        self.generation.fetch_add(1, Ordering::SeqCst);

        let before = self.entries.len();
        match pattern {
            None => self.entries.clear(),
            Some(pattern) => match Regex::new(pattern) {
                Ok(re) => self.entries.retain(|key, _| !re.is_match(key)),
                Err(_) => self.entries.retain(|key, _| !key.contains(pattern)),
            },
        }
        let removed = before.saturating_sub(self.entries.len());
        debug!("Invalidated {removed} cache entries (pattern: {pattern:?})");
        removed
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fresh_then_expired() {
        let cache = FingerprintCache::new();
        cache.set("users:list", vec!["1"], Duration::from_secs(30));

        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(cache.get("users:list"), Some(vec!["1"]));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get("users:list"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_at_exact_ttl_is_fresh() {
        let cache = FingerprintCache::new();
        cache.set("k", 1, Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(cache.get("k"), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_overwrites_and_resets_age() {
        let cache = FingerprintCache::new();
        cache.set("k", 1, Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.set("k", 2, Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(cache.get("k"), Some(2));
    }

    #[tokio::test]
    async fn test_invalidate_by_pattern() {
        let cache = FingerprintCache::new();
        cache.set("users:list", 1, Duration::from_secs(30));
        cache.set("users:1", 2, Duration::from_secs(30));
        cache.set("events:list", 3, Duration::from_secs(30));

        assert_eq!(cache.invalidate(Some("users:.*")), 2);
        assert_eq!(cache.get("users:list"), None);
        assert_eq!(cache.get("events:list"), Some(3));
    }

    #[tokio::test]
    async fn test_invalidate_invalid_regex_falls_back_to_substring() {
        let cache = FingerprintCache::new();
        cache.set("reports(pending", 1, Duration::from_secs(30));
        cache.set("reports:approved", 2, Duration::from_secs(30));

        assert_eq!(cache.invalidate(Some("reports(")), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_all() {
        let cache = FingerprintCache::new();
        cache.set("a", 1, Duration::from_secs(30));
        cache.set("b", 2, Duration::from_secs(30));
        let generation = cache.generation();

        assert_eq!(cache.invalidate(None), 2);
        assert!(cache.is_empty());
        assert_eq!(cache.generation(), generation + 1);
    }

    #[tokio::test]
    async fn test_versioned_write_rejected_after_invalidation() {
        let cache = FingerprintCache::new();
        let generation = cache.generation();
        cache.invalidate(Some("users"));

        assert!(!cache.set_if_generation("users:list", 1, Duration::from_secs(30), generation));
        assert_eq!(cache.get("users:list"), None);

        let generation = cache.generation();
        assert!(cache.set_if_generation("users:list", 1, Duration::from_secs(30), generation));
        assert_eq!(cache.get("users:list"), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = FingerprintCache::new();
        cache.set("short", 1, Duration::from_secs(1));
        cache.set("long", 2, Duration::from_secs(60));
        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }
}
