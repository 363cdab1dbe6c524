//! Height-indexed block and state persistence.
//!
//! Two independent byte stores share the same key space: the big-endian
//! 8-byte block height. The block store maps it to an encoded [`Block`], the
//! state store to the raw memory snapshot after executing that block.

use crate::core::block::Block;
use crate::info;
use crate::storage::kv_store::{KvStore, StorageError};
use crate::storage::memory_store::MemoryStore;
use crate::types::encoding::{Decode, Encode};

/// Bytes of zeroed state written with the genesis block.
pub const DEFAULT_GENESIS_STATE_SIZE: usize = 1024;

/// Store key for `height`.
pub fn height_key(height: u64) -> [u8; 8] {
    height.to_be_bytes()
}

/// Append-only chain of blocks and their post-execution states.
pub struct ChainStore {
    blocks: Box<dyn KvStore>,
    states: Box<dyn KvStore>,
}

impl ChainStore {
    pub fn new(blocks: Box<dyn KvStore>, states: Box<dyn KvStore>) -> Self {
        Self { blocks, states }
    }

    /// Chain backed by two fresh [`MemoryStore`]s.
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryStore::new()), Box::new(MemoryStore::new()))
    }

    /// Writes the genesis block and a zeroed state of `state_size` bytes.
    ///
    /// Does nothing if height 0 already exists. Returns whether genesis was
    /// written.
    pub fn init_genesis(&self, state_size: usize) -> Result<bool, StorageError> {
        if self.has_block(0)? {
            return Ok(false);
        }
        let genesis = Block::genesis();
        self.append(&genesis, &vec![0u8; state_size])?;
        info!(
            "Initialized genesis: hash={} state_size={state_size}",
            genesis.hash()
        );
        Ok(true)
    }

    pub fn has_block(&self, height: u64) -> Result<bool, StorageError> {
        self.blocks.contains(&height_key(height))
    }

    /// Loads and verifies the block at `height`.
    pub fn block(&self, height: u64) -> Result<Block, StorageError> {
        let bytes = self
            .blocks
            .get(&height_key(height))?
            .ok_or(StorageError::MissingBlock(height))?;
        let block =
            Block::from_bytes(&bytes).map_err(|source| StorageError::Decode { height, source })?;
        if block.height() != height || !block.verify_hash() {
            return Err(StorageError::CorruptBlock { height });
        }
        Ok(block)
    }

    /// Loads the memory snapshot taken after executing `height`.
    pub fn state(&self, height: u64) -> Result<Vec<u8>, StorageError> {
        self.states
            .get(&height_key(height))?
            .ok_or(StorageError::MissingState(height))
    }

    /// Persists `block` and the state it produced.
    ///
    /// The block must extend the block stored at `height - 1`. The state is
    /// written first so a readable block always has a readable state. Fails
    /// with [`StorageError::HeightExists`] if the height already has a block.
    pub fn append(&self, block: &Block, state: &[u8]) -> Result<(), StorageError> {
        let height = block.height();
        if self.has_block(height)? {
            return Err(StorageError::HeightExists(height));
        }
        if height > 0 {
            let parent = self.block(height - 1)?;
            if parent.hash() != block.header.prev_block_hash {
                return Err(StorageError::NotOnTip {
                    height: height - 1,
                    expected: parent.hash(),
                    actual: block.header.prev_block_hash,
                });
            }
        }
        let key = height_key(height);
        self.states.put(&key, state)?;
        self.blocks.put(&key, &block.to_bytes())
    }

    /// Highest height with a stored block, or `None` for an empty chain.
    ///
    /// Heights are contiguous from 0, so this gallops upward and then
    /// bisects.
    pub fn tip_height(&self) -> Result<Option<u64>, StorageError> {
        if !self.has_block(0)? {
            return Ok(None);
        }
        let mut low = 0u64;
        let mut high = 1u64;
        while self.has_block(high)? {
            low = high;
            high = match high.checked_mul(2) {
                Some(next) => next,
                None => return Ok(Some(low)),
            };
        }
        // `low` exists, `high` does not.
        while high - low > 1 {
            let mid = low + (high - low) / 2;
            if self.has_block(mid)? {
                low = mid;
            } else {
                high = mid;
            }
        }
        Ok(Some(low))
    }
}
