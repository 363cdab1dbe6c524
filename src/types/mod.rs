//! Core type definitions shared by the chain.
//!
//! - `Hash`: fixed-size 32-byte SHA-256 hashes
//! - `Encode`/`Decode`: deterministic binary serialization used for storage and hashing

pub mod encoding;
pub mod hash;
