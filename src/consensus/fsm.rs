//! Replicated state machine adapter for the ledger.
//!
//! [`LedgerFsm`] owns the pending queue and the epoch counter. Entries are
//! appended in log order; once the queue holds a full batch, the oldest
//! `batch_size` entries are handed to the [`CommitWorker`] as the block at
//! height `epoch`, and the epoch advances.
//!
//! Losers of a commit go back to the head of the queue. Before a new batch
//! is cut, the adapter waits for the previous commit and merges its losers,
//! so the content of every batch depends only on the log.

use crate::commit::committer::{CommitError, CommitOutcome, CommitRequest, Committer};
use crate::consensus::state_machine::{
    LogEntry, Snapshot, SnapshotError, SnapshotSink, StateMachine,
};
use crate::consensus::worker::CommitWorker;
use crate::core::transaction::TransactionDef;
use crate::{info, warn};
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};
use std::sync::Arc;

/// Errors returned by [`LedgerFsm::apply`].
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    /// The entry is not a transaction definition. The queue is unchanged.
    #[error("malformed log entry: {0}")]
    Decode(#[source] serde_json::Error),
    /// A commit failed. Fatal.
    #[error("commit failed: {0}")]
    Commit(#[from] CommitError),
    /// The commit worker exited with commits outstanding. Fatal.
    #[error("commit worker stopped")]
    WorkerStopped,
}

impl ApplyError {
    /// Returns true if the node cannot continue past this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ApplyError::Decode(_))
    }
}

pub struct LedgerFsm {
    queue: VecDeque<TransactionDef>,
    epoch: u64,
    batch_size: usize,
    applied_index: u64,
    worker: CommitWorker,
}

impl LedgerFsm {
    /// Creates an adapter committing from height 1, spawning its worker on
    /// the current tokio runtime. A `batch_size` of 0 is treated as 1.
    pub fn new(committer: Arc<Committer>, batch_size: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            epoch: 1,
            batch_size: batch_size.max(1),
            applied_index: 0,
            worker: CommitWorker::spawn(committer),
        }
    }

    /// Starts committing at `epoch` instead of 1, for a chain that already
    /// has blocks up to `epoch - 1`.
    pub fn with_epoch(mut self, epoch: u64) -> Self {
        self.epoch = epoch.max(1);
        self
    }

    /// Copy of the pending queue, oldest first.
    pub fn pending(&self) -> Vec<TransactionDef> {
        self.queue.iter().copied().collect()
    }

    /// Index of the last entry handed to [`StateMachine::apply`].
    pub fn applied_index(&self) -> u64 {
        self.applied_index
    }

    /// Height the next batch will be committed at.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Returns true if no dispatched batch is awaiting its merge.
    ///
    /// Losers of an unmerged batch are neither in the queue nor in a
    /// snapshot taken now; call [`LedgerFsm::settle`] first.
    pub fn is_settled(&self) -> bool {
        self.worker.in_flight() == 0
    }

    /// Waits for every in-flight commit and merges its losers.
    pub async fn settle(&mut self) -> Result<(), ApplyError> {
        while self.worker.in_flight() > 0 {
            match self.worker.next().await {
                Some(result) => self.merge(result?),
                None => return Err(ApplyError::WorkerStopped),
            }
        }
        Ok(())
    }

    /// Merges results that are already available without waiting.
    fn merge_finished(&mut self) -> Result<(), ApplyError> {
        while let Some(result) = self.worker.try_next() {
            self.merge(result?);
        }
        Ok(())
    }

    fn merge(&mut self, outcome: CommitOutcome) {
        if outcome.losers.is_empty() {
            return;
        }
        info!(
            "Requeueing {} losers of block {}",
            outcome.losers.len(),
            outcome.block.height()
        );
        for def in outcome.losers.into_iter().rev() {
            self.queue.push_front(def);
        }
    }

    /// Cuts batches while the queue holds at least one full batch.
    async fn dispatch(&mut self) -> Result<(), ApplyError> {
        while self.queue.len() >= self.batch_size {
            self.settle().await?;
            if self.queue.len() < self.batch_size {
                break;
            }
            let batch: Vec<TransactionDef> = self.queue.drain(..self.batch_size).collect();
            let height = self.epoch;
            info!(
                "Dispatching batch of {} at height {height} ({} still pending)",
                batch.len(),
                self.queue.len()
            );
            if !self.worker.submit(CommitRequest { batch, height }).await {
                return Err(ApplyError::WorkerStopped);
            }
            self.epoch += 1;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl StateMachine for LedgerFsm {
    type Snapshot = QueueSnapshot;

    async fn apply(&mut self, entry: &LogEntry) -> Result<(), ApplyError> {
        self.merge_finished()?;
        self.applied_index = entry.index;
        let def = TransactionDef::from_wire(&entry.data).map_err(|e| {
            warn!("Rejecting log entry {}: {e}", entry.index);
            ApplyError::Decode(e)
        })?;
        self.queue.push_back(def);
        self.dispatch().await
    }

    /// Copies the live queue only; see [`LedgerFsm::is_settled`].
    fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            entries: self.pending(),
        }
    }

    /// Replaces the queue with one definition per non-blank line.
    ///
    /// On a malformed line the queue is left untouched.
    fn restore(&mut self, source: &mut dyn Read) -> Result<(), SnapshotError> {
        let mut queue = VecDeque::new();
        for (number, line) in BufReader::new(source).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let def = TransactionDef::from_wire(line.as_bytes()).map_err(|source| {
                SnapshotError::Decode {
                    line: number + 1,
                    source,
                }
            })?;
            queue.push_back(def);
        }
        info!("Restored {} pending transactions", queue.len());
        self.queue = queue;
        Ok(())
    }
}

/// Pending queue captured at one point in time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueSnapshot {
    entries: Vec<TransactionDef>,
}

impl QueueSnapshot {
    pub fn entries(&self) -> &[TransactionDef] {
        &self.entries
    }

    fn write_to(&self, sink: &mut dyn SnapshotSink) -> Result<(), SnapshotError> {
        let lines = self
            .entries
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()
            .map_err(SnapshotError::Encode)?;
        sink.write_all(lines.join("\n").as_bytes())?;
        Ok(())
    }
}

impl Snapshot for QueueSnapshot {
    fn persist(&self, sink: &mut dyn SnapshotSink) -> Result<(), SnapshotError> {
        if let Err(e) = self.write_to(sink) {
            if let Err(cancel) = sink.cancel() {
                warn!("Failed to cancel snapshot sink: {cancel}");
            }
            return Err(e);
        }
        sink.close()?;
        Ok(())
    }

    fn release(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::chain_store::{ChainStore, DEFAULT_GENESIS_STATE_SIZE};
    use crate::utils::test_utils::utils::{genesis_chain, test_committer};
    use std::io::{self, Write};

    fn committer() -> (Arc<Committer>, Arc<ChainStore>) {
        let chain = genesis_chain(DEFAULT_GENESIS_STATE_SIZE);
        (test_committer(chain.clone()), chain)
    }

    fn fsm(batch_size: usize) -> (LedgerFsm, Arc<ChainStore>) {
        let (committer, chain) = committer();
        (LedgerFsm::new(committer, batch_size), chain)
    }

    fn entry(index: u64, def: TransactionDef) -> LogEntry {
        LogEntry {
            index,
            data: def.to_wire().unwrap(),
        }
    }

    async fn apply_all(fsm: &mut LedgerFsm, defs: &[TransactionDef]) {
        for def in defs {
            let index = fsm.applied_index() + 1;
            fsm.apply(&entry(index, *def)).await.unwrap();
        }
    }

    #[derive(Default)]
    struct MemorySink {
        buf: Vec<u8>,
        closed: bool,
        cancelled: bool,
        fail_writes: bool,
    }

    impl Write for MemorySink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.fail_writes {
                return Err(io::Error::other("disk full"));
            }
            self.buf.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SnapshotSink for MemorySink {
        fn close(&mut self) -> io::Result<()> {
            self.closed = true;
            Ok(())
        }

        fn cancel(&mut self) -> io::Result<()> {
            self.cancelled = true;
            Ok(())
        }
    }

    #[tokio::test]
    async fn queues_below_threshold() {
        let (mut fsm, chain) = fsm(4);
        let defs = [
            TransactionDef::new(0, 1),
            TransactionDef::new(2, 3),
            TransactionDef::new(4, 5),
        ];
        apply_all(&mut fsm, &defs).await;
        fsm.settle().await.unwrap();
        assert_eq!(fsm.pending(), defs.to_vec());
        assert_eq!(fsm.applied_index(), 3);
        assert_eq!(fsm.epoch(), 1);
        assert_eq!(chain.tip_height().unwrap(), Some(0));
    }

    #[tokio::test]
    async fn full_batch_is_committed() {
        let (mut fsm, chain) = fsm(4);
        let defs: Vec<TransactionDef> = (0..4).map(|i| TransactionDef::new(10 + i, i)).collect();
        apply_all(&mut fsm, &defs).await;
        fsm.settle().await.unwrap();

        assert!(fsm.pending().is_empty());
        assert_eq!(fsm.epoch(), 2);
        assert_eq!(chain.tip_height().unwrap(), Some(1));
        assert_eq!(chain.block(1).unwrap().transactions, defs);
    }

    #[tokio::test]
    async fn losers_return_to_head_of_queue() {
        let (mut fsm, chain) = fsm(3);
        apply_all(
            &mut fsm,
            &[
                TransactionDef::new(0, 1),
                TransactionDef::new(2, 1),
                TransactionDef::new(0, 2),
            ],
        )
        .await;
        fsm.settle().await.unwrap();
        assert_eq!(fsm.pending(), vec![TransactionDef::new(2, 1)]);

        apply_all(&mut fsm, &[TransactionDef::new(5, 6), TransactionDef::new(7, 8)]).await;
        fsm.settle().await.unwrap();
        assert!(fsm.pending().is_empty());
        assert_eq!(
            chain.block(2).unwrap().transactions,
            vec![
                TransactionDef::new(2, 1),
                TransactionDef::new(5, 6),
                TransactionDef::new(7, 8),
            ]
        );
    }

    #[tokio::test]
    async fn malformed_entry_leaves_queue_untouched() {
        let (mut fsm, _) = fsm(4);
        apply_all(&mut fsm, &[TransactionDef::new(1, 2)]).await;
        let bad = LogEntry {
            index: 2,
            data: b"{\"idxFrom\":\"x\"}".to_vec(),
        };
        let err = fsm.apply(&bad).await.unwrap_err();
        assert!(matches!(err, ApplyError::Decode(_)));
        assert!(!err.is_fatal());
        assert_eq!(fsm.pending(), vec![TransactionDef::new(1, 2)]);
        assert_eq!(fsm.applied_index(), 2);
    }

    #[tokio::test]
    async fn failed_commit_is_fatal() {
        let (committer, _) = committer();
        let mut fsm = LedgerFsm::new(committer, 1).with_epoch(5);
        apply_all(&mut fsm, &[TransactionDef::new(0, 1)]).await;
        let err = fsm.settle().await.unwrap_err();
        assert!(matches!(err, ApplyError::Commit(CommitError::Storage(_))));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn resumes_at_given_epoch() {
        let (committer, chain) = committer();
        committer
            .commit_block(&CommitRequest {
                batch: vec![TransactionDef::new(0, 1)],
                height: 1,
            })
            .unwrap();
        let mut fsm = LedgerFsm::new(committer, 2).with_epoch(2);
        apply_all(&mut fsm, &[TransactionDef::new(1, 2), TransactionDef::new(3, 4)]).await;
        fsm.settle().await.unwrap();
        assert_eq!(chain.tip_height().unwrap(), Some(2));
        assert_eq!(fsm.epoch(), 3);
    }

    #[tokio::test]
    async fn snapshot_is_point_in_time() {
        let (mut fsm, _) = fsm(8);
        apply_all(&mut fsm, &[TransactionDef::new(1, 2)]).await;
        let snapshot = fsm.snapshot();
        apply_all(&mut fsm, &[TransactionDef::new(3, 4)]).await;
        assert_eq!(snapshot.entries(), &[TransactionDef::new(1, 2)]);
        assert_eq!(fsm.pending().len(), 2);
    }

    #[tokio::test]
    async fn snapshot_of_unsettled_fsm_misses_pending_losers() {
        let (mut fsm, _) = fsm(3);
        apply_all(
            &mut fsm,
            &[
                TransactionDef::new(0, 1),
                TransactionDef::new(2, 1),
                TransactionDef::new(0, 2),
            ],
        )
        .await;
        assert!(!fsm.is_settled());
        assert!(fsm.snapshot().entries().is_empty());

        fsm.settle().await.unwrap();
        assert!(fsm.is_settled());
        assert_eq!(fsm.snapshot().entries(), &[TransactionDef::new(2, 1)]);
    }

    #[tokio::test]
    async fn persist_writes_json_lines() {
        let (mut fsm, _) = fsm(8);
        apply_all(&mut fsm, &[TransactionDef::new(1, 2), TransactionDef::new(3, 4)]).await;
        let mut sink = MemorySink::default();
        fsm.snapshot().persist(&mut sink).unwrap();
        assert!(sink.closed);
        assert!(!sink.cancelled);
        assert_eq!(
            String::from_utf8(sink.buf).unwrap(),
            "{\"idxFrom\":1,\"idxTo\":2}\n{\"idxFrom\":3,\"idxTo\":4}"
        );
    }

    #[tokio::test]
    async fn persist_cancels_on_write_failure() {
        let (mut fsm, _) = fsm(8);
        apply_all(&mut fsm, &[TransactionDef::new(1, 2)]).await;
        let mut sink = MemorySink {
            fail_writes: true,
            ..MemorySink::default()
        };
        let mut snapshot = fsm.snapshot();
        assert!(matches!(
            snapshot.persist(&mut sink),
            Err(SnapshotError::Io(_))
        ));
        assert!(sink.cancelled);
        assert!(!sink.closed);
        snapshot.release();
    }

    #[tokio::test]
    async fn restore_replaces_queue() {
        let (mut source, _) = fsm(8);
        let defs = [TransactionDef::new(1, 2), TransactionDef::new(3, 4)];
        apply_all(&mut source, &defs).await;
        let mut sink = MemorySink::default();
        source.snapshot().persist(&mut sink).unwrap();

        let (mut target, _) = fsm(8);
        apply_all(&mut target, &[TransactionDef::new(9, 9)]).await;
        let mut bytes: &[u8] = &sink.buf;
        target.restore(&mut bytes).unwrap();
        assert_eq!(target.pending(), defs.to_vec());
    }

    #[tokio::test]
    async fn restore_skips_blank_lines() {
        let (mut fsm, _) = fsm(8);
        let mut bytes: &[u8] = b"\n{\"idxFrom\":1,\"idxTo\":2}\n\n   \n{\"idxFrom\":5,\"idxTo\":6}\n";
        fsm.restore(&mut bytes).unwrap();
        assert_eq!(
            fsm.pending(),
            vec![TransactionDef::new(1, 2), TransactionDef::new(5, 6)]
        );
    }

    #[tokio::test]
    async fn restore_rejects_malformed_line() {
        let (mut fsm, _) = fsm(8);
        apply_all(&mut fsm, &[TransactionDef::new(7, 8)]).await;
        let mut bytes: &[u8] = b"{\"idxFrom\":1,\"idxTo\":2}\nnope\n";
        assert!(matches!(
            fsm.restore(&mut bytes),
            Err(SnapshotError::Decode { line: 2, .. })
        ));
        assert_eq!(fsm.pending(), vec![TransactionDef::new(7, 8)]);
    }
}
