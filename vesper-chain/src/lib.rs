//! Chain operations for Vesper.
//!
//! This crate provides the stateful half of the ingestion pipeline:
//! - Execution seams (validators, observers, address extraction) that
//!   plugins publish their behavior through
//! - The block chain processor (stateful execution of candidate suffixes)
//! - The unconfirmed-transaction updater (speculative mempool maintenance)
//! - Rollback accounting (lifetime and sliding-window counters)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                 BlockChainProcessor                     │
//! │  (link checks, stateful validation, observer applies)   │
//! └─────────────────────────────────────────────────────────┘
//!                            │ delta
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                     StateCache                          │
//! │  (committed state; single mutating delta at a time)     │
//! └─────────────────────────────────────────────────────────┘
//!                            │ detached deltas
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                      UtUpdater                          │
//! │  (throttle, speculative revalidation of the mempool)    │
//! └─────────────────────────────────────────────────────────┘
//! ```

mod difficulty;
mod execution;
mod local_score;
mod processor;
mod rollback;
mod subscribers;
mod ut_updater;

pub use difficulty::check_difficulties;
pub use execution::{
    AddressExtractor, AggregateStatelessValidator, CoreAddressExtractor, CoreBlockObserver,
    DeadlineValidator, EntityRef, ExecutionConfig, Observer, SignatureValidator,
    StatefulValidator, StatelessValidator,
};
pub use local_score::LocalChainScore;
pub use processor::{
    compute_generation_hash, BlockChainProcessor, ParentInfo, ProcessResult,
};
pub use rollback::{RollbackCounterType, RollbackInfo, RollbackResult};
pub use subscribers::{
    subscriber_to_sink, StateChangeInfo, StateChangeSubscriber, TransactionStatusSink,
    TransactionStatusSubscriber, TransactionsChangeInfo,
};
pub use ut_updater::{ThrottleConfig, UtUpdater};
