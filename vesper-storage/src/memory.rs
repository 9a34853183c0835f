//! In-memory block store.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use vesper_core::{Block, Error, Height, Result};

use crate::traits::BlockStore;

/// A `BlockStore` backed by a height-ordered map.
///
/// Reference implementation for wiring and tests; real deployments plug in a
/// persistent backend behind the same trait.
#[derive(Debug, Default)]
pub struct MemoryBlockStore {
    blocks: RwLock<BTreeMap<Height, Block>>,
}

impl MemoryBlockStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with a contiguous run of blocks.
    pub fn with_blocks(blocks: Vec<Block>) -> Result<Self> {
        let store = Self::new();
        if !blocks.is_empty() {
            store.save_blocks(blocks)?;
        }
        Ok(store)
    }
}

impl BlockStore for MemoryBlockStore {
    fn chain_height(&self) -> Result<Height> {
        Ok(self
            .blocks
            .read()
            .keys()
            .next_back()
            .copied()
            .unwrap_or(Height(0)))
    }

    fn block_at(&self, height: Height) -> Result<Option<Block>> {
        Ok(self.blocks.read().get(&height).cloned())
    }

    fn blocks_from(&self, height: Height, max: usize) -> Result<Vec<Block>> {
        let blocks = self.blocks.read();
        Ok(blocks
            .range(height..)
            .take(max)
            .map(|(_, block)| block.clone())
            .collect())
    }

    fn save_blocks(&self, new_blocks: Vec<Block>) -> Result<()> {
        let Some(first) = new_blocks.first() else {
            return Ok(());
        };

        let first_height = first.header.height;
        let mut blocks = self.blocks.write();

        let current_height = blocks.keys().next_back().copied().unwrap_or(Height(0));
        if first_height.0 > current_height.0 + 1 {
            return Err(Error::storage_write(format!(
                "cannot save at height {} onto chain of height {}",
                first_height, current_height
            )));
        }

        for (i, block) in new_blocks.iter().enumerate() {
            if block.header.height.0 != first_height.0 + i as u64 {
                return Err(Error::storage_write("saved blocks must be contiguous"));
            }
        }

        blocks.split_off(&first_height);
        for block in new_blocks {
            blocks.insert(block.header.height, block);
        }
        Ok(())
    }

    fn drop_blocks_after(&self, height: Height) -> Result<()> {
        self.blocks.write().split_off(&Height(height.0 + 1));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_core::{BlockBuilder, SecretKey};

    fn test_chain(length: usize) -> Vec<Block> {
        let key = SecretKey::generate();
        let mut blocks = Vec::with_capacity(length);
        let mut parent: Option<Block> = None;
        for _ in 0..length {
            let mut builder = BlockBuilder::new();
            if let Some(p) = &parent {
                builder = builder.parent(p.header.clone());
            }
            let block = builder.sign(&key);
            parent = Some(block.clone());
            blocks.push(block);
        }
        blocks
    }

    #[test]
    fn test_empty_store() {
        let store = MemoryBlockStore::new();
        assert_eq!(store.chain_height().unwrap(), Height(0));
        assert!(store.block_at(Height(1)).unwrap().is_none());
        assert!(store.blocks_from(Height(1), 10).unwrap().is_empty());
    }

    #[test]
    fn test_save_and_read() {
        let store = MemoryBlockStore::with_blocks(test_chain(3)).unwrap();

        assert_eq!(store.chain_height().unwrap(), Height(3));
        assert_eq!(
            store.block_at(Height(2)).unwrap().unwrap().header.height,
            Height(2)
        );

        let tail = store.blocks_from(Height(2), 10).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].header.height, Height(2));
        assert_eq!(tail[1].header.height, Height(3));
    }

    #[test]
    fn test_save_replaces_suffix() {
        let store = MemoryBlockStore::with_blocks(test_chain(4)).unwrap();

        // replace heights 3..4 with a different suffix of length 1
        let key = SecretKey::generate();
        let parent = store.block_at(Height(2)).unwrap().unwrap();
        let replacement = BlockBuilder::new().parent(parent.header).sign(&key);
        store.save_blocks(vec![replacement.clone()]).unwrap();

        assert_eq!(store.chain_height().unwrap(), Height(3));
        assert_eq!(
            store.block_at(Height(3)).unwrap().unwrap(),
            replacement
        );
    }

    #[test]
    fn test_save_rejects_gap() {
        let store = MemoryBlockStore::with_blocks(test_chain(2)).unwrap();

        let key = SecretKey::generate();
        let mut orphan = BlockBuilder::new().sign(&key);
        orphan.header.height = Height(10);

        assert!(store.save_blocks(vec![orphan]).is_err());
    }

    #[test]
    fn test_save_rejects_non_contiguous_batch() {
        let store = MemoryBlockStore::new();
        let mut chain = test_chain(3);
        chain.remove(1);

        assert!(store.save_blocks(chain).is_err());
    }

    #[test]
    fn test_drop_blocks_after() {
        let store = MemoryBlockStore::with_blocks(test_chain(5)).unwrap();

        store.drop_blocks_after(Height(2)).unwrap();
        assert_eq!(store.chain_height().unwrap(), Height(2));
        assert!(store.block_at(Height(3)).unwrap().is_none());
    }
}
