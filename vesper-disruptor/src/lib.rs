//! Staged dispatch for Vesper.
//!
//! The dispatcher is the entry point of the ingestion pipeline: it assigns a
//! monotonically increasing id to every accepted input and hands it through
//! an ordered list of consumers on a dedicated thread, with bounded
//! capacity, optional audit persistence, and an inspector that runs exactly
//! once per element.
//!
//! ```text
//! range providers ──► ConsumerDispatcher ──► consumer 1 ─► … ─► consumer N
//!                        (bounded ring)                              │
//!                                                                inspector
//! ```

mod audit;
mod batch;
mod dispatcher;
mod result;

pub use audit::{audit_directory, AuditConsumer};
pub use batch::{batch_transaction_task, BatchRangeDispatcher};
pub use dispatcher::{
    consumer_fn, CompletionCallback, ConsumerDispatcher, DispatcherOptions, DisruptorConsumer,
    Inspector,
};
pub use result::{CompletionResult, ConsumerResult, Severity};
