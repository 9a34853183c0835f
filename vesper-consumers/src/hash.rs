//! Hash calculation and replay suppression.
//!
//! The hash calculators run first in both pipelines and fill in the element
//! hashes everything downstream relies on. The hash checks drop inputs whose
//! hashes were seen recently (short-lived cache) or are already known to the
//! node (unconfirmed-transaction cache, confirmed transactions).

use std::sync::Arc;

use chrono::Duration;
use tracing::debug;

use vesper_cache::RecencyCache;
use vesper_chain::{compute_generation_hash, TransactionStatusSink};
use vesper_core::{
    hash, BlockElement, ConsumerInput, ErrorCode, Hash, TimeSupplier, TransactionElement,
    TransactionInfo,
};
use vesper_disruptor::{ConsumerResult, DisruptorConsumer};

/// Predicate deciding whether a transaction hash is already known.
pub type KnownHashPredicate = Arc<dyn Fn(&Hash) -> bool + Send + Sync>;

/// Fill in a transaction element's hashes.
pub fn compute_transaction_element_hashes(element: &mut TransactionElement) {
    element.entity_hash = element.transaction.entity_hash();
    element.merkle_component_hash = element.entity_hash;
}

/// Fill in a block element's entity hash and its transactions' hashes.
pub fn compute_block_element_hashes(element: &mut BlockElement) {
    element.entity_hash = element.block.entity_hash();
    for transaction in &mut element.transactions {
        compute_transaction_element_hashes(transaction);
    }
}

/// Computes entity, generation, and per-transaction hashes for each block.
pub struct BlockHashCalculator;

impl DisruptorConsumer for BlockHashCalculator {
    fn name(&self) -> &str {
        "block hash calculator"
    }

    fn consume(&mut self, input: &mut ConsumerInput) -> ConsumerResult {
        let mut prev_generation_hash = None;
        for element in input.blocks_mut() {
            compute_block_element_hashes(element);

            // seed the range chain from the signer; the processor re-chains
            // from the actual parent during stateful execution
            let signer = &element.block.header.signer;
            element.generation_hash = match prev_generation_hash {
                None => hash(&signer.as_bytes()),
                Some(prev) => compute_generation_hash(prev, signer),
            };
            prev_generation_hash = Some(element.generation_hash);
        }
        ConsumerResult::Continue
    }
}

/// Computes entity and merkle component hashes for each transaction.
pub struct TransactionHashCalculator;

impl DisruptorConsumer for TransactionHashCalculator {
    fn name(&self) -> &str {
        "transaction hash calculator"
    }

    fn consume(&mut self, input: &mut ConsumerInput) -> ConsumerResult {
        for element in input.transactions_mut() {
            compute_transaction_element_hashes(element);
        }
        ConsumerResult::Continue
    }
}

/// Rejects replayed and stale block pushes.
pub struct BlockHashCheck {
    time_supplier: TimeSupplier,
    recency: RecencyCache,
    max_element_age: Duration,
}

impl BlockHashCheck {
    /// Create a check with the given cache time-to-live and staleness bound.
    pub fn new(time_supplier: TimeSupplier, ttl: Duration, max_element_age: Duration) -> Self {
        Self {
            time_supplier,
            recency: RecencyCache::new(ttl),
            max_element_age,
        }
    }
}

impl DisruptorConsumer for BlockHashCheck {
    fn name(&self) -> &str {
        "block hash check"
    }

    fn consume(&mut self, input: &mut ConsumerInput) -> ConsumerResult {
        let now = (self.time_supplier)();

        for element in input.blocks() {
            if now - element.block.header.timestamp > self.max_element_age {
                debug!(height = %element.block.header.height, "dropping stale block");
                return ConsumerResult::abort_neutral(ErrorCode::StaleTimestamp);
            }
        }

        let single = 1 == input.blocks().len();
        let mut any_fresh = false;
        for element in input.blocks() {
            if self.recency.add(element.entity_hash, now) {
                any_fresh = true;
            }
        }

        if single && !any_fresh {
            debug!("dropping recently seen block");
            return ConsumerResult::abort_neutral(ErrorCode::DuplicateHash);
        }

        ConsumerResult::Continue
    }
}

/// Marks known transactions as skipped and drops all-known inputs.
///
/// Rejected duplicates are reported to the status sink so a client pushing
/// an already-known transaction learns why nothing happened.
pub struct TransactionHashCheck {
    time_supplier: TimeSupplier,
    recency: RecencyCache,
    known_hash_predicate: KnownHashPredicate,
    status_sink: TransactionStatusSink,
}

impl TransactionHashCheck {
    /// Create a check with the given cache time-to-live and known-hash
    /// predicate (unconfirmed cache plus confirmed transactions).
    pub fn new(
        time_supplier: TimeSupplier,
        ttl: Duration,
        known_hash_predicate: KnownHashPredicate,
        status_sink: TransactionStatusSink,
    ) -> Self {
        Self {
            time_supplier,
            recency: RecencyCache::new(ttl),
            known_hash_predicate,
            status_sink,
        }
    }
}

impl DisruptorConsumer for TransactionHashCheck {
    fn name(&self) -> &str {
        "transaction hash check"
    }

    fn consume(&mut self, input: &mut ConsumerInput) -> ConsumerResult {
        let now = (self.time_supplier)();
        let predicate = Arc::clone(&self.known_hash_predicate);

        let mut remaining = 0usize;
        for element in input.transactions_mut() {
            let known =
                !self.recency.add(element.entity_hash, now) || predicate(&element.entity_hash);
            if known {
                element.skip = true;
                (self.status_sink)(
                    &TransactionInfo::from_element(element),
                    ErrorCode::DuplicateHash,
                );
            } else {
                remaining += 1;
            }
        }

        if 0 == remaining {
            debug!("all transactions in input are already known");
            return ConsumerResult::abort_neutral(ErrorCode::DuplicateHash);
        }

        ConsumerResult::Continue
    }
}
