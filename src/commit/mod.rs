//! Optimistic batch commit.
//!
//! [`priority`] decides which entries of a batch conflict; [`committer`]
//! executes the winners and persists the resulting block.

pub mod committer;
pub mod priority;
