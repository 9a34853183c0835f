//! Storage traits.

use vesper_core::{Block, Height, Result};

/// Store for chain blocks.
///
/// Persistence backends are external collaborators; they must satisfy this
/// contract. Heights are contiguous: saving at height `h` implicitly drops
/// any blocks at `h` and above.
pub trait BlockStore: Send + Sync {
    /// Height of the highest stored block (0 when empty).
    fn chain_height(&self) -> Result<Height>;

    /// Get the block at a height.
    fn block_at(&self, height: Height) -> Result<Option<Block>>;

    /// Get up to `max` blocks starting at `height`, in ascending order.
    fn blocks_from(&self, height: Height, max: usize) -> Result<Vec<Block>>;

    /// Save a contiguous run of blocks, replacing any stored blocks at the
    /// same or higher heights.
    fn save_blocks(&self, blocks: Vec<Block>) -> Result<()>;

    /// Drop all blocks above `height`.
    fn drop_blocks_after(&self, height: Height) -> Result<()>;
}
