//! Composed chain state cache.
//!
//! The `StateCache` tracks the committed chain state as typed sub-caches:
//! - Account states (balances, importances)
//! - Recent block difficulties
//!
//! Mutation happens exclusively through a `CacheDelta` overlay. At most one
//! mutating delta exists at a time; it is either committed at a height
//! (atomically advancing the cache) or dropped, discarding every change.
//! Speculative execution (the unconfirmed-transaction updater) uses detached
//! deltas that can never be committed.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use vesper_core::{Address, Difficulty, Error, Height, PublicKey, Result};

/// State tracked per account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountState {
    /// The account's public key.
    pub public_key: PublicKey,
    /// Spendable balance.
    pub balance: u64,
    /// Harvesting importance at the current height.
    pub importance: u64,
}

/// Sub-cache of account states keyed by address.
#[derive(Debug, Clone, Default)]
pub struct AccountStateCache {
    accounts: HashMap<Address, AccountState>,
}

impl AccountStateCache {
    /// Look up an account.
    pub fn get(&self, address: &Address) -> Option<&AccountState> {
        self.accounts.get(address)
    }

    /// Insert or replace an account.
    pub fn put(&mut self, state: AccountState) {
        self.accounts.insert(state.public_key.address(), state);
    }

    /// Remove an account.
    pub fn remove(&mut self, address: &Address) -> Option<AccountState> {
        self.accounts.remove(address)
    }

    /// Adjust an account balance by a signed delta.
    pub fn adjust_balance(&mut self, address: &Address, delta: i64) -> Result<()> {
        let account = self.accounts.get_mut(address).ok_or_else(|| {
            Error::NotFound {
                code: vesper_core::ErrorCode::AccountNotFound,
                message: format!("no account for {}", address),
            }
        })?;

        if delta < 0 {
            let debit = delta.unsigned_abs();
            if account.balance < debit {
                return Err(Error::Validation {
                    code: vesper_core::ErrorCode::InsufficientBalance,
                    message: format!("balance {} cannot cover {}", account.balance, debit),
                });
            }
            account.balance -= debit;
        } else {
            account.balance = account.balance.saturating_add(delta as u64);
        }
        Ok(())
    }

    /// Number of tracked accounts.
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    /// Check if no accounts are tracked.
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

/// Sub-cache of recent per-height difficulty samples.
#[derive(Debug, Clone, Default)]
pub struct DifficultyCache {
    samples: BTreeMap<Height, Difficulty>,
}

impl DifficultyCache {
    /// Record the difficulty of a block.
    pub fn insert(&mut self, height: Height, difficulty: Difficulty) {
        self.samples.insert(height, difficulty);
    }

    /// Remove the sample at a height (rollback).
    pub fn remove(&mut self, height: Height) -> Option<Difficulty> {
        self.samples.remove(&height)
    }

    /// The difficulty recorded at a height.
    pub fn get(&self, height: Height) -> Option<Difficulty> {
        self.samples.get(&height).copied()
    }

    /// The most recent sample.
    pub fn last(&self) -> Option<(Height, Difficulty)> {
        self.samples.iter().next_back().map(|(h, d)| (*h, *d))
    }

    /// Drop samples at heights below `height` (pruning).
    pub fn prune_below(&mut self, height: Height) {
        self.samples = self.samples.split_off(&height);
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if no samples are recorded.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
struct Committed {
    height: Height,
    accounts: AccountStateCache,
    difficulties: DifficultyCache,
}

/// An immutable snapshot of the committed state.
#[derive(Debug, Clone)]
pub struct ReadOnlyView {
    height: Height,
    accounts: AccountStateCache,
    difficulties: DifficultyCache,
}

impl ReadOnlyView {
    /// Height of the snapshot.
    pub fn height(&self) -> Height {
        self.height
    }

    /// Account sub-cache.
    pub fn accounts(&self) -> &AccountStateCache {
        &self.accounts
    }

    /// Difficulty sub-cache.
    pub fn difficulties(&self) -> &DifficultyCache {
        &self.difficulties
    }
}

/// The composed, versioned chain state cache.
///
/// Single writer (the chain sync consumer, through [`StateCache::delta`]),
/// many readers (through [`StateCache::read_only`]).
#[derive(Debug, Clone)]
pub struct StateCache {
    committed: Arc<RwLock<Committed>>,
    delta_outstanding: Arc<AtomicBool>,
}

impl StateCache {
    /// Create an empty cache at height 0.
    pub fn new() -> Self {
        Self {
            committed: Arc::new(RwLock::new(Committed::default())),
            delta_outstanding: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Height of the last committed block.
    pub fn height(&self) -> Height {
        self.committed.read().height
    }

    /// Produce an immutable snapshot of the committed state.
    pub fn read_only(&self) -> ReadOnlyView {
        let committed = self.committed.read();
        ReadOnlyView {
            height: committed.height,
            accounts: committed.accounts.clone(),
            difficulties: committed.difficulties.clone(),
        }
    }

    /// Acquire the single mutating delta.
    ///
    /// Fails with `DeltaInUse` if another mutating delta is outstanding.
    pub fn delta(&self) -> Result<CacheDelta> {
        if self
            .delta_outstanding
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::delta_in_use());
        }

        let committed = self.committed.read();
        Ok(CacheDelta {
            committed: Arc::clone(&self.committed),
            outstanding: Some(Arc::clone(&self.delta_outstanding)),
            accounts: committed.accounts.clone(),
            difficulties: committed.difficulties.clone(),
        })
    }

    /// Acquire a speculative overlay that can never be committed.
    ///
    /// Used for unconfirmed-transaction execution; does not conflict with
    /// the mutating delta.
    pub fn detached_delta(&self) -> CacheDelta {
        let committed = self.committed.read();
        CacheDelta {
            committed: Arc::clone(&self.committed),
            outstanding: None,
            accounts: committed.accounts.clone(),
            difficulties: committed.difficulties.clone(),
        }
    }
}

impl Default for StateCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Mutable overlay over the committed state.
///
/// Commit publishes every change atomically and advances the cache height;
/// dropping the delta discards all changes.
#[derive(Debug)]
pub struct CacheDelta {
    committed: Arc<RwLock<Committed>>,
    outstanding: Option<Arc<AtomicBool>>,
    /// Account overlay.
    pub accounts: AccountStateCache,
    /// Difficulty overlay.
    pub difficulties: DifficultyCache,
}

impl CacheDelta {
    /// Check whether this delta can be committed.
    pub fn is_attached(&self) -> bool {
        self.outstanding.is_some()
    }

    /// Atomically publish the overlay and advance the cache height.
    pub fn commit(mut self, height: Height) -> Result<()> {
        if self.outstanding.is_none() {
            return Err(Error::invalid_argument(
                "a detached delta cannot be committed",
            ));
        }

        {
            let mut committed = self.committed.write();
            committed.height = height;
            committed.accounts = std::mem::take(&mut self.accounts);
            committed.difficulties = std::mem::take(&mut self.difficulties);
        }
        // Drop releases the outstanding flag.
        Ok(())
    }
}

impl Drop for CacheDelta {
    fn drop(&mut self) {
        if let Some(flag) = self.outstanding.take() {
            flag.store(false, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_core::SecretKey;

    fn test_account(balance: u64) -> AccountState {
        AccountState {
            public_key: SecretKey::generate().public_key(),
            balance,
            importance: 1,
        }
    }

    #[test]
    fn test_new_cache_is_empty_at_height_zero() {
        let cache = StateCache::new();
        assert_eq!(cache.height(), Height(0));
        assert!(cache.read_only().accounts().is_empty());
    }

    #[test]
    fn test_delta_commit_advances_height() {
        let cache = StateCache::new();
        let account = test_account(100);
        let address = account.public_key.address();

        let mut delta = cache.delta().unwrap();
        delta.accounts.put(account);
        delta.difficulties.insert(Height(1), Difficulty(1000));
        delta.commit(Height(1)).unwrap();

        assert_eq!(cache.height(), Height(1));
        let view = cache.read_only();
        assert_eq!(view.accounts().get(&address).unwrap().balance, 100);
        assert_eq!(view.difficulties().get(Height(1)), Some(Difficulty(1000)));
    }

    #[test]
    fn test_dropped_delta_discards_changes() {
        let cache = StateCache::new();

        {
            let mut delta = cache.delta().unwrap();
            delta.accounts.put(test_account(100));
            // dropped without commit
        }

        assert_eq!(cache.height(), Height(0));
        assert!(cache.read_only().accounts().is_empty());
    }

    #[test]
    fn test_second_delta_is_rejected() {
        let cache = StateCache::new();
        let _delta = cache.delta().unwrap();

        assert!(cache.delta().is_err());
    }

    #[test]
    fn test_delta_reacquirable_after_drop() {
        let cache = StateCache::new();
        drop(cache.delta().unwrap());
        assert!(cache.delta().is_ok());
    }

    #[test]
    fn test_detached_delta_cannot_commit() {
        let cache = StateCache::new();
        let mut detached = cache.detached_delta();
        detached.accounts.put(test_account(1));

        assert!(!detached.is_attached());
        assert!(detached.commit(Height(1)).is_err());
        assert_eq!(cache.height(), Height(0));
    }

    #[test]
    fn test_detached_delta_does_not_block_mutating_delta() {
        let cache = StateCache::new();
        let _speculative = cache.detached_delta();
        assert!(cache.delta().is_ok());
    }

    #[test]
    fn test_read_only_view_is_stable_across_commit() {
        let cache = StateCache::new();
        let view = cache.read_only();

        let mut delta = cache.delta().unwrap();
        delta.accounts.put(test_account(7));
        delta.commit(Height(1)).unwrap();

        // snapshot taken before the commit is unchanged
        assert_eq!(view.height(), Height(0));
        assert!(view.accounts().is_empty());
    }

    #[test]
    fn test_adjust_balance() {
        let mut accounts = AccountStateCache::default();
        let account = test_account(50);
        let address = account.public_key.address();
        accounts.put(account);

        accounts.adjust_balance(&address, 25).unwrap();
        assert_eq!(accounts.get(&address).unwrap().balance, 75);

        accounts.adjust_balance(&address, -75).unwrap();
        assert_eq!(accounts.get(&address).unwrap().balance, 0);

        assert!(accounts.adjust_balance(&address, -1).is_err());
    }

    #[test]
    fn test_difficulty_prune() {
        let mut difficulties = DifficultyCache::default();
        for height in 1..=10u64 {
            difficulties.insert(Height(height), Difficulty(height * 100));
        }

        difficulties.prune_below(Height(6));
        assert_eq!(difficulties.len(), 5);
        assert_eq!(difficulties.get(Height(5)), None);
        assert_eq!(difficulties.get(Height(6)), Some(Difficulty(600)));
        assert_eq!(difficulties.last(), Some((Height(10), Difficulty(1000))));
    }
}
