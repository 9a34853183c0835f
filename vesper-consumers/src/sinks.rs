//! Terminal consumers feeding downstream hooks.

use std::sync::Arc;

use tracing::debug;

use vesper_core::{BlockElement, ConsumerInput, InputSource, TransactionInfo};
use vesper_disruptor::{ConsumerResult, DisruptorConsumer};

/// Receives blocks that completed the block pipeline.
pub type NewBlockSink = Arc<dyn Fn(Vec<BlockElement>) + Send + Sync>;

/// Receives the transaction infos that completed the transaction pipeline.
pub type NewTransactionsHandler = Arc<dyn Fn(Vec<TransactionInfo>) + Send + Sync>;

/// Forwards fully processed blocks from a matching source to a sink.
///
/// Registered with [`InputSource::Local`] so locally harvested blocks reach
/// the broadcast hook after they were applied.
pub struct NewBlockConsumer {
    sink: NewBlockSink,
    source: InputSource,
}

impl NewBlockConsumer {
    /// Create the stage for the given source.
    pub fn new(sink: NewBlockSink, source: InputSource) -> Self {
        Self { sink, source }
    }
}

impl DisruptorConsumer for NewBlockConsumer {
    fn name(&self) -> &str {
        "new block"
    }

    fn consume(&mut self, input: &mut ConsumerInput) -> ConsumerResult {
        if input.source() == self.source && !input.blocks().is_empty() {
            let elements = input.detach_block_elements();
            debug!(blocks = elements.len(), "forwarding new blocks");
            (self.sink)(elements);
        }
        ConsumerResult::CompleteSuccess
    }
}

/// Hands the surviving transaction infos to the new-transactions handler.
///
/// The handler broadcasts every info (a transaction rejected here may be
/// valid on a better-synced peer) and feeds the unconfirmed-transaction
/// updater.
pub struct NewTransactionsConsumer {
    handler: NewTransactionsHandler,
}

impl NewTransactionsConsumer {
    /// Create the stage.
    pub fn new(handler: NewTransactionsHandler) -> Self {
        Self { handler }
    }
}

impl DisruptorConsumer for NewTransactionsConsumer {
    fn name(&self) -> &str {
        "new transactions"
    }

    fn consume(&mut self, input: &mut ConsumerInput) -> ConsumerResult {
        let infos = input.detach_transaction_infos();
        if !infos.is_empty() {
            debug!(transactions = infos.len(), "forwarding new transactions");
            (self.handler)(infos);
        }
        ConsumerResult::CompleteSuccess
    }
}
