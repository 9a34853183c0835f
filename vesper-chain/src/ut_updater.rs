//! Unconfirmed-transaction updater.
//!
//! Keeps the mempool consistent with the committed chain state:
//! - New transactions are throttle-checked and speculatively executed
//!   against a detached delta of the latest committed cache before they are
//!   admitted.
//! - After a chain commit, confirmed transactions are evicted and everything
//!   else (reverted and still-cached) is revalidated against the new state.
//!
//! Both entry points are serialized by one internal mutex; the updater must
//! be safe against interleaving with the transaction dispatcher.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use vesper_cache::{StateCache, UtCache};
use vesper_core::{ErrorCode, Hash, TimeSupplier, TransactionInfo};

use crate::execution::ExecutionConfig;
use crate::subscribers::TransactionStatusSink;

/// Admission thresholds for new unconfirmed transactions.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ThrottleConfig {
    /// Once this many transactions are pending, only fee-boosted
    /// transactions are admitted.
    pub max_transactions_per_block: usize,
    /// Hard cap on pending transactions.
    pub max_cache_size: usize,
    /// Fee at which a transaction bypasses the per-block headroom rule.
    pub max_boost_fee: u64,
    /// Maximum pending transactions per signing account.
    pub per_account_limit: usize,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_transactions_per_block: 1_000,
            max_cache_size: 50_000,
            max_boost_fee: 10_000,
            per_account_limit: 32,
        }
    }
}

/// Speculatively revalidates the mempool against committed state.
pub struct UtUpdater {
    ut_cache: Arc<UtCache>,
    cache: StateCache,
    execution: ExecutionConfig,
    throttle: ThrottleConfig,
    time_supplier: TimeSupplier,
    status_sink: TransactionStatusSink,
    mutex: Mutex<()>,
}

impl UtUpdater {
    /// Create an updater over the given caches and execution bundle.
    pub fn new(
        ut_cache: Arc<UtCache>,
        cache: StateCache,
        execution: ExecutionConfig,
        throttle: ThrottleConfig,
        time_supplier: TimeSupplier,
        status_sink: TransactionStatusSink,
    ) -> Self {
        Self {
            ut_cache,
            cache,
            execution,
            throttle,
            time_supplier,
            status_sink,
            mutex: Mutex::new(()),
        }
    }

    /// The underlying unconfirmed-transaction cache.
    pub fn ut_cache(&self) -> &Arc<UtCache> {
        &self.ut_cache
    }

    /// Process newly arrived transactions.
    pub fn update(&self, infos: Vec<TransactionInfo>) {
        let _guard = self.mutex.lock();
        let now = (self.time_supplier)();
        let mut delta = self.cache.detached_delta();

        for info in infos {
            if self.ut_cache.contains(&info.entity_hash) {
                debug!(hash = %info.entity_hash, "transaction already pending");
                continue;
            }

            if let Err(code) = self.check_throttle(&info) {
                debug!(hash = %info.entity_hash, code = %code, "transaction throttled");
                (self.status_sink)(&info, code);
                continue;
            }

            let result = self
                .execution
                .validate_stateful(&info.transaction, &delta, now);
            if let Some(code) = result.failure_code() {
                (self.status_sink)(&info, code);
                continue;
            }

            if self
                .execution
                .observer
                .apply_transaction(&info.transaction, &mut delta)
                .is_err()
            {
                (self.status_sink)(&info, ErrorCode::ProcessorFailure);
                continue;
            }

            if !self.ut_cache.add(info) {
                debug!("unconfirmed transaction cache refused insertion");
            }
        }
    }

    /// Rebuild the mempool after a chain commit.
    ///
    /// Confirmed transactions are evicted; reverted transactions and every
    /// remaining cached transaction are revalidated against the new
    /// committed state, purging the ones now invalid.
    pub fn update_after_chain_change(
        &self,
        added_hashes: &[Hash],
        reverted_infos: Vec<TransactionInfo>,
    ) {
        let _guard = self.mutex.lock();

        let evicted = self.ut_cache.remove_all(added_hashes);
        debug!(
            confirmed = evicted.len(),
            reverted = reverted_infos.len(),
            "rebuilding unconfirmed transactions after chain change"
        );

        let added: HashSet<Hash> = added_hashes.iter().copied().collect();
        let now = (self.time_supplier)();
        let mut delta = self.cache.detached_delta();

        let mut candidates = reverted_infos;
        candidates.extend(self.ut_cache.snapshot());

        for info in candidates {
            if added.contains(&info.entity_hash) {
                continue;
            }

            let cached = self.ut_cache.contains(&info.entity_hash);
            let result = self
                .execution
                .validate_stateful(&info.transaction, &delta, now);

            if let Some(code) = result.failure_code() {
                if cached {
                    self.ut_cache.remove(&info.entity_hash);
                }
                (self.status_sink)(&info, code);
                continue;
            }

            if let Err(e) = self
                .execution
                .observer
                .apply_transaction(&info.transaction, &mut delta)
            {
                warn!(hash = %info.entity_hash, error = %e, "speculative apply failed");
            }

            if !cached && !self.ut_cache.add(info) {
                debug!("unconfirmed transaction cache refused reverted insertion");
            }
        }
    }

    fn check_throttle(&self, info: &TransactionInfo) -> std::result::Result<(), ErrorCode> {
        if self.ut_cache.len() >= self.throttle.max_cache_size {
            return Err(ErrorCode::ThrottleCacheFull);
        }

        let signer = info.transaction.signer.address();
        if self.ut_cache.count_for(&signer) >= self.throttle.per_account_limit {
            return Err(ErrorCode::ThrottleAccountLimit);
        }

        if self.ut_cache.len() >= self.throttle.max_transactions_per_block
            && info.transaction.max_fee < self.throttle.max_boost_fee
        {
            return Err(ErrorCode::ThrottleBlockLimit);
        }

        Ok(())
    }
}
