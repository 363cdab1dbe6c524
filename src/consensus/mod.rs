//! Glue between the replicated log and the batch committer.
//!
//! - [`state_machine`]: apply / snapshot / restore callback contract
//! - [`worker`]: sequential commit worker running off the apply path
//! - [`fsm`]: the ledger's state machine, batching entries into blocks

pub mod fsm;
pub mod state_machine;
pub mod worker;
