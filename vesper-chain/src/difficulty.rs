//! Difficulty verification for candidate chains.

use vesper_cache::CacheDelta;
use vesper_core::BlockElement;

/// How far one block's difficulty may drift from its predecessor's.
const MAX_ADJUSTMENT_FACTOR: u64 = 2;

/// Verify the difficulties of a candidate suffix against the post-rollback
/// state.
///
/// Returns the number of leading blocks whose difficulty is acceptable: a
/// strictly positive value within a bounded adjustment band of the previous
/// sample (the last committed sample below the suffix, then each accepted
/// candidate block in turn).
pub fn check_difficulties(elements: &[BlockElement], delta: &CacheDelta) -> usize {
    let mut prev = delta.difficulties.last().map(|(_, difficulty)| difficulty);
    let mut accepted = 0;

    for element in elements {
        let difficulty = element.block.header.difficulty;
        if 0 == difficulty.0 {
            break;
        }

        if let Some(prev) = prev {
            let upper = prev.0.saturating_mul(MAX_ADJUSTMENT_FACTOR);
            let lower = prev.0 / MAX_ADJUSTMENT_FACTOR;
            if difficulty.0 > upper || difficulty.0 < lower {
                break;
            }
        }

        accepted += 1;
        prev = Some(difficulty);
    }

    accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_cache::StateCache;
    use vesper_core::{BlockBuilder, Difficulty, Height, SecretKey};

    fn elements_with_difficulties(difficulties: &[u64]) -> Vec<BlockElement> {
        let key = SecretKey::generate();
        let mut elements = Vec::new();
        let mut parent: Option<vesper_core::BlockHeader> = None;
        for &difficulty in difficulties {
            let mut builder = BlockBuilder::new().difficulty(Difficulty(difficulty));
            if let Some(p) = &parent {
                builder = builder.parent(p.clone());
            }
            let block = builder.sign(&key);
            parent = Some(block.header.clone());
            elements.push(BlockElement::new(block));
        }
        elements
    }

    #[test]
    fn test_all_accepted_without_prior_samples() {
        let cache = StateCache::new();
        let delta = cache.detached_delta();
        let elements = elements_with_difficulties(&[100, 150, 200]);

        assert_eq!(check_difficulties(&elements, &delta), 3);
    }

    #[test]
    fn test_zero_difficulty_rejected() {
        let cache = StateCache::new();
        let delta = cache.detached_delta();
        let elements = elements_with_difficulties(&[100, 0, 100]);

        assert_eq!(check_difficulties(&elements, &delta), 1);
    }

    #[test]
    fn test_jump_beyond_band_rejected() {
        let cache = StateCache::new();
        let delta = cache.detached_delta();
        let elements = elements_with_difficulties(&[100, 500]);

        assert_eq!(check_difficulties(&elements, &delta), 1);
    }

    #[test]
    fn test_checked_against_last_committed_sample() {
        let cache = StateCache::new();
        let mut delta = cache.detached_delta();
        delta.difficulties.insert(Height(5), Difficulty(1_000));

        // first candidate drifts too far from the committed sample
        let elements = elements_with_difficulties(&[100, 110]);
        assert_eq!(check_difficulties(&elements, &delta), 0);

        let elements = elements_with_difficulties(&[900, 800]);
        assert_eq!(check_difficulties(&elements, &delta), 2);
    }
}
