//! Single-node replicated log.
//!
//! Every appended entry is committed immediately and applied to the state
//! machine before `append` returns. Entries are applied strictly in index
//! order since the state machine lock is held while the index is assigned.

use crate::consensus::fsm::ApplyError;
use crate::consensus::state_machine::{LogEntry, StateMachine};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

/// Errors returned by [`ReplicatedLog::append`].
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// The entry was committed but the state machine rejected it.
    #[error("failed to apply entry {index}: {source}")]
    Apply {
        index: u64,
        #[source]
        source: ApplyError,
    },
}

/// Ordering service the ledger submits entries to.
#[async_trait::async_trait]
pub trait ReplicatedLog: Send + Sync {
    /// Appends `data`, returning its log index once it has been applied.
    async fn append(&self, data: Vec<u8>) -> Result<u64, LogError>;

    /// Index of the last appended entry, 0 if none.
    fn last_index(&self) -> u64;
}

pub struct LocalLog<F> {
    fsm: Arc<Mutex<F>>,
    last_index: AtomicU64,
}

impl<F: StateMachine> LocalLog<F> {
    pub fn new(fsm: Arc<Mutex<F>>) -> Self {
        Self {
            fsm,
            last_index: AtomicU64::new(0),
        }
    }

    /// Shared handle to the driven state machine.
    pub fn state_machine(&self) -> Arc<Mutex<F>> {
        self.fsm.clone()
    }
}

#[async_trait::async_trait]
impl<F: StateMachine + 'static> ReplicatedLog for LocalLog<F> {
    async fn append(&self, data: Vec<u8>) -> Result<u64, LogError> {
        let mut fsm = self.fsm.lock().await;
        let index = self.last_index.fetch_add(1, Ordering::SeqCst) + 1;
        let entry = LogEntry { index, data };
        fsm.apply(&entry)
            .await
            .map_err(|source| LogError::Apply { index, source })?;
        Ok(index)
    }

    fn last_index(&self) -> u64 {
        self.last_index.load(Ordering::SeqCst)
    }
}
