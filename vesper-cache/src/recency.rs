//! Short-lived hash cache.
//!
//! Remembers recently seen entity hashes for a bounded duration so the
//! hash-check consumers can drop replays cheaply. Expired entries are pruned
//! on every insert.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use vesper_core::Hash;

/// `(hash -> timestamp)` cache with a fixed time-to-live.
#[derive(Debug)]
pub struct RecencyCache {
    ttl: Duration,
    entries: HashMap<Hash, DateTime<Utc>>,
}

impl RecencyCache {
    /// Create a cache with the given time-to-live.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    /// Number of live entries (including any not yet pruned).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check whether a hash is cached and still fresh at `now`.
    pub fn contains(&self, hash: &Hash, now: DateTime<Utc>) -> bool {
        self.entries
            .get(hash)
            .is_some_and(|seen| now - *seen <= self.ttl)
    }

    /// Record a hash at `now`, pruning expired entries first.
    ///
    /// Returns `false` when the hash was already cached and fresh.
    pub fn add(&mut self, hash: Hash, now: DateTime<Utc>) -> bool {
        self.prune(now);

        if self.entries.contains_key(&hash) {
            return false;
        }

        self.entries.insert(hash, now);
        true
    }

    /// Drop entries older than the time-to-live.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let ttl = self.ttl;
        self.entries.retain(|_, seen| now - *seen <= ttl);
    }
}
