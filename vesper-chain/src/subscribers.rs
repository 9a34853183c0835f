//! Downstream subscriber contracts.
//!
//! The pipeline publishes results through these seams; transports and
//! persistence for them live outside the core.

use std::sync::Arc;

use vesper_core::{ChainScore, ErrorCode, Hash, Height, TransactionInfo};

/// Receives per-transaction status codes (rejections, throttle drops).
pub trait TransactionStatusSubscriber: Send + Sync {
    /// Record a status for one transaction.
    fn notify_status(&self, info: &TransactionInfo, code: ErrorCode);

    /// Flush buffered statuses; called by the dispatcher inspector after
    /// every element.
    fn flush(&self);
}

/// Shorthand sink over a status subscriber.
pub type TransactionStatusSink = Arc<dyn Fn(&TransactionInfo, ErrorCode) + Send + Sync>;

/// Adapt a subscriber into a sink closure.
pub fn subscriber_to_sink(subscriber: Arc<dyn TransactionStatusSubscriber>) -> TransactionStatusSink {
    Arc::new(move |info, code| subscriber.notify_status(info, code))
}

/// Payload published on every chain commit.
#[derive(Debug, Clone)]
pub struct StateChangeInfo {
    /// By how much the local score grew.
    pub score_delta: ChainScore,
    /// The new chain height.
    pub height: Height,
}

/// Receives committed state changes.
pub trait StateChangeSubscriber: Send + Sync {
    /// The local score after the change.
    fn notify_score_change(&self, score: ChainScore);

    /// The committed change itself.
    fn notify_state_change(&self, info: &StateChangeInfo);
}

/// Payload describing how a chain commit affected transactions.
#[derive(Debug, Clone)]
pub struct TransactionsChangeInfo {
    /// Hashes of transactions confirmed by the applied blocks.
    pub added_transaction_hashes: Vec<Hash>,
    /// Transactions returned to the pool by the undone blocks.
    pub reverted_transaction_infos: Vec<TransactionInfo>,
}
