//! Batch committer: turns one ordered batch into the next block.
//!
//! 1. Load the block and state of `height - 1` and seed a fresh VM with it.
//! 2. Build the [`PriorityMap`] in parallel.
//! 3. Decide every entry's verdict in parallel against the frozen map, then
//!    run the winners one at a time in batch order on the shared memory.
//! 4. Persist the block of winners together with the final memory.

use crate::commit::priority::PriorityMap;
use crate::core::block::Block;
use crate::core::transaction::TransactionDef;
use crate::storage::chain_store::ChainStore;
use crate::storage::kv_store::StorageError;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::vm::{DEFAULT_SLEEP_BOUND, VM};
use crate::{info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One batch to commit at `height`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitRequest {
    pub batch: Vec<TransactionDef>,
    pub height: u64,
}

/// Result of committing one batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitOutcome {
    /// The persisted block; its transactions are the winners that executed.
    pub block: Block,
    /// Entries aborted by conflict resolution, in batch order. To be retried.
    pub losers: Vec<TransactionDef>,
    /// Winners whose program failed. Dropped, not retried.
    pub failed: Vec<(TransactionDef, VMError)>,
}

/// Errors that stop a commit. All of them are fatal to the node.
#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    #[error("height 0 is reserved for the genesis block")]
    GenesisHeight,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub struct Committer {
    chain: Arc<ChainStore>,
    sleep_bound: Duration,
}

impl Committer {
    pub fn new(chain: Arc<ChainStore>) -> Self {
        Self {
            chain,
            sleep_bound: DEFAULT_SLEEP_BOUND,
        }
    }

    /// Sets the SLEEP bound of the VMs this committer creates.
    pub fn with_sleep_bound(mut self, bound: Duration) -> Self {
        self.sleep_bound = bound;
        self
    }

    pub fn chain(&self) -> &Arc<ChainStore> {
        &self.chain
    }

    /// Commits `request.batch` as the block at `request.height`.
    ///
    /// Requires the block and state of `request.height - 1` to be stored.
    pub fn commit_block(&self, request: &CommitRequest) -> Result<CommitOutcome, CommitError> {
        if request.height == 0 {
            return Err(CommitError::GenesisHeight);
        }
        let started = Instant::now();
        let parent = request.height - 1;
        let previous = self.chain.block(parent)?;
        let state = self.chain.state(parent)?;
        let mut vm = VM::new(&state).with_sleep_bound(self.sleep_bound);

        let priorities = PriorityMap::build(&request.batch);
        let verdicts = priorities.verdicts(&request.batch);
        let resolved = started.elapsed();

        let mut winners = Vec::new();
        let mut losers = Vec::new();
        let mut failed = Vec::new();
        for (index, (def, wins)) in request.batch.iter().zip(verdicts).enumerate() {
            if !wins {
                losers.push(*def);
                continue;
            }
            match vm.execute(&def.compile()) {
                Ok(_) => winners.push(*def),
                Err(e) => {
                    warn!(
                        "Dropping transaction {index} ({} -> {}) at height {}: {e}",
                        def.from, def.to, request.height
                    );
                    failed.push((*def, e));
                }
            }
        }
        let executed = started.elapsed();

        let block = Block::new(request.height, previous.hash(), winners);
        self.chain.append(&block, vm.memory().as_slice())?;
        let persisted = started.elapsed();

        info!(
            "Committed block {}: hash={} winners={} losers={} failed={} resolve={:?} execute={:?} persist={:?}",
            request.height,
            block.hash(),
            block.transactions.len(),
            losers.len(),
            failed.len(),
            resolved,
            executed - resolved,
            persisted - executed,
        );

        Ok(CommitOutcome {
            block,
            losers,
            failed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::chain_store::DEFAULT_GENESIS_STATE_SIZE;
    use crate::utils::test_utils::utils::{genesis_chain, random_defs, test_committer};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashMap;

    fn committer() -> Arc<Committer> {
        test_committer(genesis_chain(DEFAULT_GENESIS_STATE_SIZE))
    }

    fn request(batch: Vec<TransactionDef>, height: u64) -> CommitRequest {
        CommitRequest { batch, height }
    }

    fn slot(state: &[u8], index: usize) -> u64 {
        let mut word = [0u8; 8];
        word.copy_from_slice(&state[index * 8..index * 8 + 8]);
        u64::from_be_bytes(word)
    }

    #[test]
    fn three_entry_scenario() {
        let committer = committer();
        let batch = vec![
            TransactionDef::new(0, 1),
            TransactionDef::new(2, 1),
            TransactionDef::new(0, 2),
        ];
        let outcome = committer.commit_block(&request(batch, 1)).unwrap();

        assert_eq!(
            outcome.block.transactions,
            vec![TransactionDef::new(0, 1), TransactionDef::new(0, 2)]
        );
        assert_eq!(outcome.losers, vec![TransactionDef::new(2, 1)]);
        assert!(outcome.failed.is_empty());
        assert_eq!(outcome.block.height(), 1);
        assert_eq!(
            outcome.block.header.prev_block_hash,
            Block::genesis().hash()
        );

        let chain = committer.chain();
        assert_eq!(chain.block(1).unwrap(), outcome.block);
        let state = chain.state(1).unwrap();
        assert_eq!(state.len(), 1024);
        assert_eq!(slot(&state, 1), 32);
        assert_eq!(slot(&state, 2), 32);
        assert_eq!(slot(&state, 0), 0);
    }

    #[test]
    fn genesis_height_is_rejected() {
        let committer = committer();
        assert!(matches!(
            committer.commit_block(&request(vec![], 0)),
            Err(CommitError::GenesisHeight)
        ));
    }

    #[test]
    fn missing_parent_is_fatal() {
        let committer = committer();
        assert!(matches!(
            committer.commit_block(&request(vec![TransactionDef::new(0, 1)], 2)),
            Err(CommitError::Storage(StorageError::MissingBlock(1)))
        ));
    }

    #[test]
    fn height_cannot_be_committed_twice() {
        let committer = committer();
        committer.commit_block(&request(vec![], 1)).unwrap();
        assert!(matches!(
            committer.commit_block(&request(vec![], 1)),
            Err(CommitError::Storage(StorageError::HeightExists(1)))
        ));
    }

    #[test]
    fn blocks_chain_onto_each_other() {
        let committer = committer();
        let first = committer
            .commit_block(&request(vec![TransactionDef::new(0, 1)], 1))
            .unwrap();
        let second = committer
            .commit_block(&request(vec![TransactionDef::new(1, 3)], 2))
            .unwrap();
        assert_eq!(second.block.header.prev_block_hash, first.block.hash());
        assert_eq!(committer.chain().tip_height().unwrap(), Some(2));

        // Slot 1 holds 32 after block 1, which is not above the threshold.
        assert_eq!(slot(&committer.chain().state(2).unwrap(), 3), 32);
    }

    #[test]
    fn failing_winner_is_dropped_not_requeued() {
        let committer = committer();
        let batch = vec![TransactionDef::new(0, 500), TransactionDef::new(3, 4)];
        let outcome = committer.commit_block(&request(batch, 1)).unwrap();
        assert_eq!(outcome.block.transactions, vec![TransactionDef::new(3, 4)]);
        assert!(outcome.losers.is_empty());
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].0, TransactionDef::new(0, 500));
        assert!(matches!(outcome.failed[0].1, VMError::OutOfBounds { .. }));
    }

    #[test]
    fn one_winner_per_contended_slot() {
        let mut rng = StdRng::seed_from_u64(42);
        for round in 0..20 {
            let committer = committer();
            // Distinct sources outside the destination range: only destinations contend.
            let batch: Vec<TransactionDef> = (0..32)
                .map(|i| TransactionDef::new(64 + i, rng.gen_range(0..8)))
                .collect();
            let outcome = committer.commit_block(&request(batch.clone(), 1)).unwrap();

            let mut contenders: HashMap<u64, usize> = HashMap::new();
            for def in &batch {
                *contenders.entry(def.to).or_default() += 1;
            }
            let mut winners: HashMap<u64, usize> = HashMap::new();
            for def in &outcome.block.transactions {
                *winners.entry(def.to).or_default() += 1;
            }
            for (slot, count) in &contenders {
                assert_eq!(winners.get(slot), Some(&1), "round {round} slot {slot}");
                let lost = outcome.losers.iter().filter(|d| d.to == *slot).count();
                assert_eq!(lost, count - 1, "round {round} slot {slot}");
            }
            assert_eq!(
                outcome.block.transactions.len() + outcome.losers.len(),
                batch.len()
            );
        }
    }

    #[test]
    fn commit_is_deterministic() {
        let mut rng = StdRng::seed_from_u64(9);
        let batch = random_defs(&mut rng, 64, 0..16, 0..16);

        let a = committer();
        let b = committer();
        let first = a.commit_block(&request(batch.clone(), 1)).unwrap();
        let second = b.commit_block(&request(batch, 1)).unwrap();
        assert_eq!(first, second);
        assert_eq!(a.chain().state(1).unwrap(), b.chain().state(1).unwrap());
    }

    #[test]
    fn losers_keep_batch_order() {
        let committer = committer();
        let batch: Vec<TransactionDef> = (0..10).map(|i| TransactionDef::new(100 + i, 7)).collect();
        let outcome = committer.commit_block(&request(batch.clone(), 1)).unwrap();
        assert_eq!(outcome.block.transactions.len(), 1);
        let expected: Vec<TransactionDef> = batch
            .into_iter()
            .filter(|d| *d != outcome.block.transactions[0])
            .collect();
        assert_eq!(outcome.losers, expected);
    }
}
