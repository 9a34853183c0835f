//! Structural checks on candidate block ranges.

use chrono::Duration;
use tracing::debug;

use vesper_core::{ConsumerInput, ErrorCode, TimeSupplier};
use vesper_disruptor::{ConsumerResult, DisruptorConsumer};

/// Enforces the structural limits on a candidate range before any stateful
/// work happens: size cap, contiguous and linked heights, and a bound on how
/// far in the future block timestamps may lie.
pub struct BlockChainCheck {
    max_blocks_per_sync_attempt: usize,
    max_block_future_time: Duration,
    time_supplier: TimeSupplier,
}

impl BlockChainCheck {
    /// Create a check with the given limits.
    pub fn new(
        max_blocks_per_sync_attempt: usize,
        max_block_future_time: Duration,
        time_supplier: TimeSupplier,
    ) -> Self {
        Self {
            max_blocks_per_sync_attempt,
            max_block_future_time,
            time_supplier,
        }
    }
}

impl DisruptorConsumer for BlockChainCheck {
    fn name(&self) -> &str {
        "block chain check"
    }

    fn consume(&mut self, input: &mut ConsumerInput) -> ConsumerResult {
        let elements = input.blocks();
        if elements.len() > self.max_blocks_per_sync_attempt {
            debug!(
                blocks = elements.len(),
                limit = self.max_blocks_per_sync_attempt,
                "rejecting oversized sync attempt"
            );
            return ConsumerResult::abort_failure(ErrorCode::RemoteChainTooManyBlocks);
        }

        let latest_allowed = (self.time_supplier)() + self.max_block_future_time;
        for element in elements {
            if element.block.header.timestamp > latest_allowed {
                return ConsumerResult::abort_failure(ErrorCode::TimestampTooFarInFuture);
            }
        }

        for pair in elements.windows(2) {
            let prev = &pair[0];
            let next = &pair[1];
            let linked = next.block.header.height == prev.block.header.height.next()
                && next.block.header.previous_block_hash == prev.entity_hash;
            if !linked {
                debug!(height = %next.block.header.height, "candidate range is not a chain");
                return ConsumerResult::abort_failure(ErrorCode::BrokenChainLink);
            }
        }

        ConsumerResult::Continue
    }
}
