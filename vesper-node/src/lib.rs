//! Node composition for Vesper.
//!
//! This crate owns the configuration surface, the hook set, the service
//! locator, and the dispatcher service registrar that assembles the
//! ingestion pipeline:
//!
//! ```text
//! range providers ──► hooks ──► block dispatcher ────► chain sync ─► state
//!                          └──► batch ─► transaction dispatcher ─► mempool
//! ```
//!
//! Registered services: `dispatcher.block`, `dispatcher.transaction`,
//! `dispatcher.transaction.batch`, `dispatcher.utUpdater`, `rollbacks`, and
//! (when address precomputation is enabled)
//! `dispatcher.notificationPublisher`.
//!
//! Registered counters: `BLK ELEM TOT`, `BLK ELEM ACT`, `TX ELEM TOT`,
//! `TX ELEM ACT`, `RB COMMIT ALL`, `RB COMMIT RCT`, `RB IGNORE ALL`,
//! `RB IGNORE RCT`.

mod config;
mod hooks;
mod locator;
mod service;

pub use config::{ChainConfig, NodeConfig};
pub use hooks::{
    BlockRangeConsumer, BlockRangeConsumerFactory, CompletionAwareBlockRangeConsumer,
    CompletionAwareBlockRangeConsumerFactory, NodeHooks, TransactionRangeConsumer,
    TransactionRangeConsumerFactory, TransactionsChangeHandler,
};
pub use locator::ServiceLocator;
pub use service::{
    register_dispatcher_service, DispatcherService, ServiceState, BLOCK_DISPATCHER_NAME,
    TRANSACTION_DISPATCHER_NAME,
};
