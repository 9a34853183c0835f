//! Unconfirmed-transaction cache (the mempool).
//!
//! Holds transactions waiting to be included in blocks:
//! - Insertion order (for block packing and revalidation sweeps)
//! - O(1) duplicate detection by entity hash
//! - Bounded capacity
//!
//! Writer is the unconfirmed-transaction updater; readers are the hash-check
//! consumers and the mempool query API.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;

use vesper_core::{Address, Hash, TransactionInfo};

/// Configuration for the unconfirmed-transaction cache.
#[derive(Debug, Clone)]
pub struct UtCacheConfig {
    /// Maximum number of cached transactions.
    pub max_size: usize,
}

impl Default for UtCacheConfig {
    fn default() -> Self {
        Self { max_size: 100_000 }
    }
}

/// Bounded cache of unconfirmed transactions.
#[derive(Debug)]
pub struct UtCache {
    config: UtCacheConfig,
    /// Hash index for O(1) duplicate detection with concurrent readers.
    index: DashMap<Hash, TransactionInfo>,
    /// Insertion order.
    order: Mutex<VecDeque<Hash>>,
    /// Total transactions ever added (for stats).
    total_added: AtomicU64,
    /// Total transactions ever removed (for stats).
    total_removed: AtomicU64,
}

impl UtCache {
    /// Create a new cache with the given configuration.
    pub fn new(config: UtCacheConfig) -> Self {
        Self {
            config,
            index: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            total_added: AtomicU64::new(0),
            total_removed: AtomicU64::new(0),
        }
    }

    /// Create a cache with default configuration.
    pub fn default_config() -> Self {
        Self::new(UtCacheConfig::default())
    }

    /// Number of cached transactions.
    pub fn len(&self) -> usize {
        self.order.lock().len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if the cache is at capacity.
    pub fn is_full(&self) -> bool {
        self.len() >= self.config.max_size
    }

    /// Check if a transaction is cached.
    pub fn contains(&self, hash: &Hash) -> bool {
        self.index.contains_key(hash)
    }

    /// Add a transaction.
    ///
    /// Returns `false` when the hash is already cached or the cache is full.
    pub fn add(&self, info: TransactionInfo) -> bool {
        let mut order = self.order.lock();
        if order.len() >= self.config.max_size {
            return false;
        }

        let hash = info.entity_hash;
        if self.index.contains_key(&hash) {
            return false;
        }

        self.index.insert(hash, info);
        order.push_back(hash);
        self.total_added.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Remove a transaction by hash.
    pub fn remove(&self, hash: &Hash) -> Option<TransactionInfo> {
        let removed = self.index.remove(hash).map(|(_, info)| info)?;
        self.order.lock().retain(|h| h != hash);
        self.total_removed.fetch_add(1, Ordering::Relaxed);
        Some(removed)
    }

    /// Remove every transaction whose hash is in `hashes`.
    ///
    /// Returns the removed infos.
    pub fn remove_all(&self, hashes: &[Hash]) -> Vec<TransactionInfo> {
        let mut removed = Vec::new();
        for hash in hashes {
            if let Some((_, info)) = self.index.remove(hash) {
                removed.push(info);
            }
        }

        if !removed.is_empty() {
            let mut order = self.order.lock();
            order.retain(|h| self.index.contains_key(h));
            self.total_removed
                .fetch_add(removed.len() as u64, Ordering::Relaxed);
        }
        removed
    }

    /// Snapshot all cached transactions in insertion order.
    pub fn snapshot(&self) -> Vec<TransactionInfo> {
        let order = self.order.lock();
        order
            .iter()
            .filter_map(|hash| self.index.get(hash).map(|entry| entry.value().clone()))
            .collect()
    }

    /// Number of cached transactions signed by the given account.
    pub fn count_for(&self, signer: &Address) -> usize {
        self.index
            .iter()
            .filter(|entry| entry.value().transaction.signer.address() == *signer)
            .count()
    }

    /// Cache statistics.
    pub fn stats(&self) -> UtCacheStats {
        UtCacheStats {
            size: self.len(),
            capacity: self.config.max_size,
            total_added: self.total_added.load(Ordering::Relaxed),
            total_removed: self.total_removed.load(Ordering::Relaxed),
        }
    }
}

/// Statistics for the unconfirmed-transaction cache.
#[derive(Debug, Clone)]
pub struct UtCacheStats {
    /// Current number of transactions.
    pub size: usize,
    /// Maximum capacity.
    pub capacity: usize,
    /// Total transactions ever added.
    pub total_added: u64,
    /// Total transactions ever removed.
    pub total_removed: u64,
}
