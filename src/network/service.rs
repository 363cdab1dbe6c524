//! Submission and query surface of a ledger node.

use crate::consensus::fsm::{ApplyError, LedgerFsm};
use crate::core::transaction::TransactionDef;
use crate::network::local_log::{LocalLog, LogError, ReplicatedLog};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Errors returned by [`LedgerService::submit`].
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("failed to encode transaction: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Log(#[from] LogError),
}

impl SubmitError {
    /// Returns true if the node cannot continue past this error.
    pub fn is_fatal(&self) -> bool {
        match self {
            SubmitError::Encode(_) => false,
            SubmitError::Log(LogError::Apply { source, .. }) => source.is_fatal(),
        }
    }
}

/// Thin front over a replicated log and the ledger state it drives.
pub struct LedgerService<L> {
    log: Arc<L>,
    fsm: Arc<Mutex<LedgerFsm>>,
}

impl LedgerService<LocalLog<LedgerFsm>> {
    /// Single-node service ordering entries through a [`LocalLog`].
    pub fn local(fsm: LedgerFsm) -> Self {
        let fsm = Arc::new(Mutex::new(fsm));
        let log = Arc::new(LocalLog::new(fsm.clone()));
        Self::new(log, fsm)
    }
}

impl<L: ReplicatedLog> LedgerService<L> {
    pub fn new(log: Arc<L>, fsm: Arc<Mutex<LedgerFsm>>) -> Self {
        Self { log, fsm }
    }

    /// Submits one transfer for ordering; returns its log index.
    pub async fn submit(&self, def: TransactionDef) -> Result<u64, SubmitError> {
        let data = def.to_wire()?;
        self.submit_raw(data).await
    }

    /// Submits an already serialized transfer as is.
    pub async fn submit_raw(&self, data: Vec<u8>) -> Result<u64, SubmitError> {
        Ok(self.log.append(data).await?)
    }

    /// Transfers waiting for a block, oldest first.
    pub async fn pending(&self) -> Vec<TransactionDef> {
        self.fsm.lock().await.pending()
    }

    /// Highest log index applied to the ledger.
    pub async fn applied_index(&self) -> u64 {
        self.fsm.lock().await.applied_index()
    }

    /// Waits until every dispatched batch is committed.
    pub async fn settle(&self) -> Result<(), ApplyError> {
        self.fsm.lock().await.settle().await
    }

    pub fn state_machine(&self) -> Arc<Mutex<LedgerFsm>> {
        self.fsm.clone()
    }
}
