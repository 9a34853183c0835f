//! Node and chain configuration.
//!
//! Durations are stored as milliseconds so the structs round-trip through
//! plain configuration files; accessors convert to `chrono::Duration`.

use std::path::PathBuf;

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Configuration for the dispatchers and their supporting caches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Root directory for node data (audit blobs live beneath it).
    pub data_directory: PathBuf,

    /// Capacity of the block dispatcher ring.
    pub block_disruptor_size: usize,
    /// Capacity of the transaction dispatcher ring.
    pub transaction_disruptor_size: usize,

    /// Log every N-th block element at debug (0 disables tracing).
    pub block_element_trace_interval: u64,
    /// Log every N-th transaction element at debug (0 disables tracing).
    pub transaction_element_trace_interval: u64,

    /// When a ring is full: `true` fails the caller, `false` blocks it.
    pub should_abort_when_dispatcher_is_full: bool,
    /// Persist every accepted input to the audit directory.
    pub should_audit_dispatcher_inputs: bool,
    /// Populate transaction address sets during dispatch.
    pub should_precompute_transaction_addresses: bool,

    /// Time-to-live of the block hash recency cache, in milliseconds.
    pub short_lived_cache_block_duration_ms: u64,
    /// Time-to-live of the transaction hash recency cache, in milliseconds.
    pub short_lived_cache_transaction_duration_ms: u64,
    /// Oldest block timestamp a push may carry, in milliseconds.
    pub max_element_age_ms: u64,

    /// Workers in the isolated stateless-validation pool.
    pub validator_pool_size: usize,
    /// How often the batch range dispatcher is drained, in milliseconds.
    pub batch_dispatch_interval_ms: u64,
}

impl NodeConfig {
    /// Block hash recency cache time-to-live.
    pub fn short_lived_cache_block_duration(&self) -> Duration {
        Duration::milliseconds(self.short_lived_cache_block_duration_ms as i64)
    }

    /// Transaction hash recency cache time-to-live.
    pub fn short_lived_cache_transaction_duration(&self) -> Duration {
        Duration::milliseconds(self.short_lived_cache_transaction_duration_ms as i64)
    }

    /// Oldest acceptable block timestamp, as a duration before now.
    pub fn max_element_age(&self) -> Duration {
        Duration::milliseconds(self.max_element_age_ms as i64)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_directory: PathBuf::from("./data"),
            block_disruptor_size: 4096,
            transaction_disruptor_size: 16384,
            block_element_trace_interval: 1,
            transaction_element_trace_interval: 10,
            should_abort_when_dispatcher_is_full: false,
            should_audit_dispatcher_inputs: false,
            should_precompute_transaction_addresses: false,
            short_lived_cache_block_duration_ms: 300_000,
            short_lived_cache_transaction_duration_ms: 60_000,
            max_element_age_ms: 3_600_000,
            validator_pool_size: 4,
            batch_dispatch_interval_ms: 100,
        }
    }
}

/// Configuration of the chain rules the sync stages enforce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Maximum candidate blocks per sync attempt.
    pub max_blocks_per_sync_attempt: usize,
    /// How far in the future a block timestamp may lie, in milliseconds.
    pub max_block_future_time_ms: u64,
    /// Deepest rollback the node will perform.
    pub max_rollback_blocks: usize,
    /// Target time between blocks, in milliseconds.
    pub block_generation_target_time_ms: u64,
}

impl ChainConfig {
    /// How far in the future a block timestamp may lie.
    pub fn max_block_future_time(&self) -> Duration {
        Duration::milliseconds(self.max_block_future_time_ms as i64)
    }

    /// Wall-clock span covered by a full rollback window.
    pub fn full_rollback_duration(&self) -> Duration {
        Duration::milliseconds(
            (self.max_rollback_blocks as u64 * self.block_generation_target_time_ms) as i64,
        )
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            max_blocks_per_sync_attempt: 42,
            max_block_future_time_ms: 10_000,
            max_rollback_blocks: 40,
            block_generation_target_time_ms: 15_000,
        }
    }
}
