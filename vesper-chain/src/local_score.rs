//! The node's chain score.

use std::sync::Arc;

use parking_lot::RwLock;

use vesper_core::ChainScore;

/// Shared handle on the local chain score.
///
/// Many readers; the chain sync consumer is the only writer.
#[derive(Debug, Clone, Default)]
pub struct LocalChainScore {
    inner: Arc<RwLock<ChainScore>>,
}

impl LocalChainScore {
    /// Create a zero score.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a score with an initial value.
    pub fn with_score(score: ChainScore) -> Self {
        Self {
            inner: Arc::new(RwLock::new(score)),
        }
    }

    /// Read the current score.
    pub fn get(&self) -> ChainScore {
        *self.inner.read()
    }

    /// Grow the score by a delta and return the new value.
    pub fn add(&self, delta: ChainScore) -> ChainScore {
        let mut score = self.inner.write();
        *score += delta;
        *score
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_accumulates() {
        let score = LocalChainScore::new();
        assert_eq!(score.get(), ChainScore::ZERO);

        assert_eq!(score.add(ChainScore::from(10u64)), ChainScore::from(10u64));
        assert_eq!(score.add(ChainScore::from(5u64)), ChainScore::from(15u64));
        assert_eq!(score.get(), ChainScore::from(15u64));
    }

    #[test]
    fn test_clones_share_state() {
        let score = LocalChainScore::new();
        let clone = score.clone();
        score.add(ChainScore::from(7u64));
        assert_eq!(clone.get(), ChainScore::from(7u64));
    }
}
