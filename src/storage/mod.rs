//! Block and state persistence.
//!
//! - [`kv_store`]: byte-store contract and [`kv_store::StorageError`]
//! - [`memory_store`]: `DashMap`-backed store for tests and benchmarks
//! - [`rocksdb_store`]: RocksDB-backed store used by the node
//! - [`chain_store`]: height-keyed block store plus state store

pub mod chain_store;
pub mod kv_store;
pub mod memory_store;
pub mod rocksdb_store;
