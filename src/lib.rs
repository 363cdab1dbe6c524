//! Replicated ledger library.
//!
//! An ordered log of slot-to-slot transfers is cut into fixed-size batches.
//! Each batch is resolved into non-conflicting winners, executed on an
//! embedded stack VM and persisted as a hash-linked block.

pub mod commit;
pub mod config;
pub mod consensus;
pub mod core;
pub mod network;
pub mod storage;
pub mod types;
pub mod utils;
pub mod virtual_machine;
