//! Core ledger data structures.
//!
//! - `TransactionDef`: transfer between two memory slots, compiled into a VM program
//! - `Block`: winners of one batch, hash-linked to the previous block

pub mod block;
pub mod transaction;
