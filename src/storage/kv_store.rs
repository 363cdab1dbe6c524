//! Byte-store contract shared by the block store and the state store.

use crate::types::encoding::DecodeError;
use crate::types::hash::Hash;

/// Errors that can occur while interacting with storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The underlying engine failed to read or write.
    #[error("storage backend error: {0}")]
    Backend(String),
    /// A stored block could not be decoded.
    #[error("failed to decode block at height {height}: {source}")]
    Decode {
        height: u64,
        #[source]
        source: DecodeError,
    },
    /// A stored block decoded but its hash or height does not match.
    #[error("stored block at height {height} failed verification")]
    CorruptBlock { height: u64 },
    #[error("no block stored at height {0}")]
    MissingBlock(u64),
    #[error("no state stored at height {0}")]
    MissingState(u64),
    /// Heights are write-once.
    #[error("a block is already stored at height {0}")]
    HeightExists(u64),
    /// Block's previous hash does not match the block stored below it.
    #[error("block does not extend height {height}: expected previous hash {expected}, got {actual}")]
    NotOnTip {
        height: u64,
        expected: Hash,
        actual: Hash,
    },
}

/// Flat key-value byte store.
///
/// Implementations must be thread-safe (`Send + Sync`); the commit worker
/// and the node's readers share one instance.
pub trait KvStore: Send + Sync {
    /// Returns the value stored under `key`, if any.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    /// Stores `value` under `key`, replacing any previous value.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError>;

    fn contains(&self, key: &[u8]) -> Result<bool, StorageError> {
        Ok(self.get(key)?.is_some())
    }
}
