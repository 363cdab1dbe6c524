//! Per-slot priority map deciding which entries of a batch may commit.
//!
//! Every entry's digest is [`TransactionDef::priority_digest`] of its batch
//! position. For each destination slot the map keeps the smallest digest
//! seen. An entry loses if a strictly smaller digest sits under its
//! destination or its source slot.

use crate::core::transaction::{SlotIndex, TransactionDef};
use crate::types::hash::Hash;
use dashmap::{DashMap, ReadOnlyView};
use rayon::prelude::*;

/// Frozen slot to smallest-digest map of one batch.
pub struct PriorityMap {
    digests: ReadOnlyView<SlotIndex, Hash>,
}

impl PriorityMap {
    /// Builds the map in parallel over the batch.
    ///
    /// Only the per-slot update runs under the shard lock; digests are
    /// computed outside it. The result does not depend on scheduling.
    pub fn build(batch: &[TransactionDef]) -> Self {
        let digests: DashMap<SlotIndex, Hash> = DashMap::with_capacity(batch.len());
        batch.par_iter().enumerate().for_each(|(index, def)| {
            let digest = def.priority_digest(index as u64);
            digests
                .entry(def.to)
                .and_modify(|current| {
                    if digest < *current {
                        *current = digest;
                    }
                })
                .or_insert(digest);
        });
        Self {
            digests: digests.into_read_only(),
        }
    }

    /// Smallest digest recorded for `slot`.
    pub fn get(&self, slot: SlotIndex) -> Option<&Hash> {
        self.digests.get(&slot)
    }

    /// Number of distinct destination slots in the batch.
    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }

    fn beats(&self, slot: SlotIndex, digest: &Hash) -> bool {
        self.get(slot).is_some_and(|best| best < digest)
    }

    /// Returns true if `def` at batch position `index` must abort.
    pub fn is_loser(&self, index: u64, def: &TransactionDef) -> bool {
        let digest = def.priority_digest(index);
        self.beats(def.to, &digest) || self.beats(def.from, &digest)
    }

    /// Win (`true`) or lose (`false`) for every entry, in batch order.
    pub fn verdicts(&self, batch: &[TransactionDef]) -> Vec<bool> {
        batch
            .par_iter()
            .enumerate()
            .map(|(index, def)| !self.is_loser(index as u64, def))
            .collect()
    }
}
