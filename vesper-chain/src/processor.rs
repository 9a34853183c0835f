//! Stateful block chain processor.
//!
//! Executes a candidate suffix of blocks against a cache delta: verifies
//! chain links, fills generation hashes, runs stateful validators for every
//! transaction, applies the observer, and accumulates the suffix score.

use tracing::debug;

use vesper_cache::CacheDelta;
use vesper_core::{
    hash, hash_pair, Block, BlockElement, ChainScore, ErrorCode, Hash, Height, PublicKey,
};

use crate::execution::ExecutionConfig;

/// Chain the generation hash of a block from its parent's.
pub fn compute_generation_hash(parent_generation_hash: Hash, signer: &PublicKey) -> Hash {
    hash_pair(parent_generation_hash, hash(&signer.as_bytes()))
}

/// The anchoring information of the block a suffix builds on.
#[derive(Debug, Clone)]
pub struct ParentInfo {
    /// Height of the parent block.
    pub height: Height,
    /// Content hash of the parent block.
    pub entity_hash: Hash,
    /// Generation hash of the parent block.
    pub generation_hash: Hash,
}

impl ParentInfo {
    /// The anchor below the first real block (empty chain).
    pub fn nemesis() -> Self {
        Self {
            height: Height(0),
            entity_hash: Hash::ZERO,
            generation_hash: Hash::ZERO,
        }
    }

    /// Anchor on a stored block.
    pub fn from_block(block: &Block) -> Self {
        let entity_hash = block.entity_hash();
        Self {
            height: block.header.height,
            entity_hash,
            generation_hash: compute_generation_hash(entity_hash, &block.header.signer),
        }
    }
}

/// Outcome of processing a suffix: its cumulative score.
pub type ProcessResult = std::result::Result<ChainScore, ErrorCode>;

/// Stateful validator/executor for candidate block suffixes.
pub struct BlockChainProcessor {
    execution: ExecutionConfig,
}

impl BlockChainProcessor {
    /// Create a processor over an execution bundle.
    pub fn new(execution: ExecutionConfig) -> Self {
        Self { execution }
    }

    /// Execute `elements` on top of `parent`, writing into `delta`.
    ///
    /// On failure the delta contents are unspecified; the caller is expected
    /// to discard the delta.
    pub fn process(
        &self,
        parent: &ParentInfo,
        elements: &mut [BlockElement],
        delta: &mut CacheDelta,
    ) -> ProcessResult {
        let mut prev_height = parent.height;
        let mut prev_hash = parent.entity_hash;
        let mut prev_generation_hash = parent.generation_hash;
        let mut score = ChainScore::ZERO;

        for element in elements.iter_mut() {
            let header = &element.block.header;
            if header.height != prev_height.next() || header.previous_block_hash != prev_hash {
                debug!(height = %header.height, "candidate block does not link to its parent");
                return Err(ErrorCode::BrokenChainLink);
            }

            element.generation_hash =
                compute_generation_hash(prev_generation_hash, &header.signer);

            let now = header.timestamp;
            for transaction in &element.block.transactions {
                let result = self.execution.validate_stateful(transaction, delta, now);
                if let Some(code) = result.failure_code() {
                    debug!(height = %header.height, code = %code, "stateful validation failed");
                    return Err(code);
                }
            }

            if self.execution.observer.apply_block(element, delta).is_err() {
                return Err(ErrorCode::ProcessorFailure);
            }

            score += element.block.score();
            prev_height = header.height;
            prev_hash = element.entity_hash;
            prev_generation_hash = element.generation_hash;
        }

        Ok(score)
    }
}
