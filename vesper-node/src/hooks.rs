//! Node hooks.
//!
//! Hooks decouple the services that produce pipeline inputs and consume
//! pipeline outputs from the dispatcher service itself. Each slot is
//! single-writer/multi-reader with set-once semantics: a second assignment
//! fails with `InvalidArgument`.

use std::sync::Arc;

use parking_lot::Mutex;

use vesper_cache::UtCache;
use vesper_chain::TransactionsChangeInfo;
use vesper_consumers::{KnownHashPredicate, NewBlockSink, NewTransactionsHandler};
use vesper_core::{Block, ElementId, Error, Hash, InputSource, Result, Transaction};
use vesper_disruptor::CompletionCallback;

/// Consumes a range of blocks.
pub type BlockRangeConsumer = Arc<dyn Fn(Vec<Block>) + Send + Sync>;

/// Consumes a range of blocks and reports the element's final disposition.
pub type CompletionAwareBlockRangeConsumer =
    Arc<dyn Fn(Vec<Block>, CompletionCallback) -> Result<ElementId> + Send + Sync>;

/// Consumes a range of transactions.
pub type TransactionRangeConsumer = Arc<dyn Fn(Vec<Transaction>) + Send + Sync>;

/// Produces a range consumer bound to an input source.
pub type BlockRangeConsumerFactory =
    Arc<dyn Fn(InputSource) -> BlockRangeConsumer + Send + Sync>;

/// Produces a completion-aware range consumer bound to an input source.
pub type CompletionAwareBlockRangeConsumerFactory =
    Arc<dyn Fn(InputSource) -> CompletionAwareBlockRangeConsumer + Send + Sync>;

/// Produces a transaction range consumer bound to an input source.
pub type TransactionRangeConsumerFactory =
    Arc<dyn Fn(InputSource) -> TransactionRangeConsumer + Send + Sync>;

/// Receives confirmed/reverted transaction sets after a chain commit.
pub type TransactionsChangeHandler = Arc<dyn Fn(&TransactionsChangeInfo) + Send + Sync>;

struct SetOnce<T> {
    name: &'static str,
    slot: Mutex<Option<T>>,
}

impl<T: Clone> SetOnce<T> {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            slot: Mutex::new(None),
        }
    }

    fn set(&self, value: T) -> Result<()> {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return Err(Error::invalid_argument(format!(
                "hook '{}' is already set",
                self.name
            )));
        }
        *slot = Some(value);
        Ok(())
    }

    fn get(&self) -> Option<T> {
        self.slot.lock().clone()
    }

    fn require(&self) -> Result<T> {
        self.get().ok_or_else(|| {
            Error::invalid_argument(format!("hook '{}' is not set", self.name))
        })
    }
}

/// The set of hooks connecting services around the dispatchers.
pub struct NodeHooks {
    block_range_consumer_factory: SetOnce<BlockRangeConsumerFactory>,
    completion_aware_block_range_consumer_factory:
        SetOnce<CompletionAwareBlockRangeConsumerFactory>,
    transaction_range_consumer_factory: SetOnce<TransactionRangeConsumerFactory>,
    new_block_sink: SetOnce<NewBlockSink>,
    new_transactions_sink: SetOnce<NewTransactionsHandler>,
    transactions_change_handlers: Mutex<Vec<TransactionsChangeHandler>>,
    known_hash_predicates: Mutex<Vec<KnownHashPredicate>>,
}

impl NodeHooks {
    /// Create an empty hook set.
    pub fn new() -> Self {
        Self {
            block_range_consumer_factory: SetOnce::new("blockRangeConsumerFactory"),
            completion_aware_block_range_consumer_factory: SetOnce::new(
                "completionAwareBlockRangeConsumerFactory",
            ),
            transaction_range_consumer_factory: SetOnce::new("transactionRangeConsumerFactory"),
            new_block_sink: SetOnce::new("newBlockSink"),
            new_transactions_sink: SetOnce::new("newTransactionsSink"),
            transactions_change_handlers: Mutex::new(Vec::new()),
            known_hash_predicates: Mutex::new(Vec::new()),
        }
    }

    /// Set the block range consumer factory.
    pub fn set_block_range_consumer_factory(
        &self,
        factory: BlockRangeConsumerFactory,
    ) -> Result<()> {
        self.block_range_consumer_factory.set(factory)
    }

    /// Get the block range consumer factory.
    pub fn block_range_consumer_factory(&self) -> Result<BlockRangeConsumerFactory> {
        self.block_range_consumer_factory.require()
    }

    /// Set the completion-aware block range consumer factory.
    pub fn set_completion_aware_block_range_consumer_factory(
        &self,
        factory: CompletionAwareBlockRangeConsumerFactory,
    ) -> Result<()> {
        self.completion_aware_block_range_consumer_factory.set(factory)
    }

    /// Get the completion-aware block range consumer factory.
    pub fn completion_aware_block_range_consumer_factory(
        &self,
    ) -> Result<CompletionAwareBlockRangeConsumerFactory> {
        self.completion_aware_block_range_consumer_factory.require()
    }

    /// Set the transaction range consumer factory.
    pub fn set_transaction_range_consumer_factory(
        &self,
        factory: TransactionRangeConsumerFactory,
    ) -> Result<()> {
        self.transaction_range_consumer_factory.set(factory)
    }

    /// Get the transaction range consumer factory.
    pub fn transaction_range_consumer_factory(&self) -> Result<TransactionRangeConsumerFactory> {
        self.transaction_range_consumer_factory.require()
    }

    /// Set the sink receiving locally harvested blocks.
    pub fn set_new_block_sink(&self, sink: NewBlockSink) -> Result<()> {
        self.new_block_sink.set(sink)
    }

    /// Get the new-block sink, if set.
    pub fn new_block_sink(&self) -> Option<NewBlockSink> {
        self.new_block_sink.get()
    }

    /// Set the sink broadcasting new transactions to peers.
    pub fn set_new_transactions_sink(&self, sink: NewTransactionsHandler) -> Result<()> {
        self.new_transactions_sink.set(sink)
    }

    /// Get the new-transactions sink, if set.
    pub fn new_transactions_sink(&self) -> Option<NewTransactionsHandler> {
        self.new_transactions_sink.get()
    }

    /// Register an additional transactions-change handler.
    pub fn add_transactions_change_handler(&self, handler: TransactionsChangeHandler) {
        self.transactions_change_handlers.lock().push(handler);
    }

    /// Aggregate every registered transactions-change handler into one.
    pub fn transactions_change_handler(self: &Arc<Self>) -> TransactionsChangeHandler {
        let hooks = Arc::clone(self);
        Arc::new(move |info| {
            for handler in hooks.transactions_change_handlers.lock().iter() {
                handler(info);
            }
        })
    }

    /// Register an additional known-hash predicate (e.g. confirmed
    /// transaction lookup).
    pub fn add_known_hash_predicate(&self, predicate: KnownHashPredicate) {
        self.known_hash_predicates.lock().push(predicate);
    }

    /// Build the known-hash predicate: the unconfirmed-transaction cache
    /// plus every registered predicate.
    pub fn known_hash_predicate(self: &Arc<Self>, ut_cache: Arc<UtCache>) -> KnownHashPredicate {
        let hooks = Arc::clone(self);
        Arc::new(move |hash: &Hash| {
            ut_cache.contains(hash)
                || hooks
                    .known_hash_predicates
                    .lock()
                    .iter()
                    .any(|predicate| predicate(hash))
        })
    }
}

impl Default for NodeHooks {
    fn default() -> Self {
        Self::new()
    }
}
