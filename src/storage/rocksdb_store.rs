//! RocksDB-backed byte store.
//!
//! The node opens one database per store (`blockdb`, `statedb`) under its
//! data directory.

use crate::storage::kv_store::{KvStore, StorageError};
use rocksdb::{DB, Options};
use std::path::Path;

pub struct RocksDbStore {
    db: DB,
}

impl RocksDbStore {
    /// Opens the database at `path`, creating it if missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path.as_ref()).map_err(backend)?;
        Ok(Self { db })
    }
}

fn backend(e: rocksdb::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

impl KvStore for RocksDbStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        self.db.get(key).map_err(backend)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.db.put(key, value).map_err(backend)
    }
}
