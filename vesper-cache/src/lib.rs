//! Caching layer for Vesper.
//!
//! Three caches back the ingestion pipeline:
//!
//! - [`StateCache`] - the committed chain state (accounts, difficulties) with
//!   copy-on-write delta/commit semantics; single writer, many readers
//! - [`UtCache`] - the unconfirmed-transaction cache (mempool)
//! - [`RecencyCache`] - short-lived hash cache used for replay suppression

mod recency;
mod state;
mod ut_cache;

pub use recency::RecencyCache;
pub use state::{
    AccountState, AccountStateCache, CacheDelta, DifficultyCache, ReadOnlyView, StateCache,
};
pub use ut_cache::{UtCache, UtCacheConfig, UtCacheStats};
