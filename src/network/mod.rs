//! Ordering and client-facing surface of a node.
//!
//! - [`local_log`]: replicated-log contract and its single-node implementation
//! - [`service`]: submit transfers, query pending queue and applied index

pub mod local_log;
pub mod service;
