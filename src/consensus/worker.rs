//! Detached commit worker.
//!
//! Commit requests are queued to one tokio task that runs them strictly in
//! submission order, each on the blocking pool. Outcomes come back over a
//! channel; the adapter owning the worker merges them into its own state.

use crate::commit::committer::{CommitError, CommitOutcome, CommitRequest, Committer};
use crate::error;
use std::sync::Arc;
use tokio::sync::mpsc::{self, Receiver, Sender, UnboundedReceiver};
use tokio::task::JoinHandle;

/// Capacity of the request channel.
const REQUEST_BUFFER: usize = 1024;

pub type CommitResult = Result<CommitOutcome, CommitError>;

pub struct CommitWorker {
    requests: Sender<CommitRequest>,
    results: UnboundedReceiver<CommitResult>,
    in_flight: usize,
    handle: JoinHandle<()>,
}

impl CommitWorker {
    /// Spawns the worker on the current tokio runtime.
    ///
    /// The worker stops after the first failed commit; later requests are
    /// dropped since their parent height will never exist.
    pub fn spawn(committer: Arc<Committer>) -> Self {
        let (requests, rx) = mpsc::channel(REQUEST_BUFFER);
        let (tx, results) = mpsc::unbounded_channel();
        let handle = tokio::spawn(Self::run(committer, rx, tx));
        Self {
            requests,
            results,
            in_flight: 0,
            handle,
        }
    }

    async fn run(
        committer: Arc<Committer>,
        mut requests: Receiver<CommitRequest>,
        results: mpsc::UnboundedSender<CommitResult>,
    ) {
        while let Some(request) = requests.recv().await {
            let committer = committer.clone();
            let height = request.height;
            let result =
                match tokio::task::spawn_blocking(move || committer.commit_block(&request)).await {
                    Ok(result) => result,
                    Err(e) => {
                        error!("Commit of height {height} panicked: {e}");
                        return;
                    }
                };
            let failed = result.is_err();
            if let Err(e) = &result {
                error!("Commit of height {height} failed: {e}");
            }
            if results.send(result).is_err() || failed {
                return;
            }
        }
    }

    /// Queues `request`. Returns `false` if the worker has stopped.
    pub async fn submit(&mut self, request: CommitRequest) -> bool {
        if self.requests.send(request).await.is_err() {
            return false;
        }
        self.in_flight += 1;
        true
    }

    /// Number of submitted requests whose result has not been taken yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Waits for the next result. `None` means the worker stopped with
    /// requests still outstanding, or nothing is in flight.
    pub async fn next(&mut self) -> Option<CommitResult> {
        if self.in_flight == 0 {
            return None;
        }
        let result = self.results.recv().await?;
        self.in_flight -= 1;
        Some(result)
    }

    /// Returns a finished result without waiting.
    pub fn try_next(&mut self) -> Option<CommitResult> {
        let result = self.results.try_recv().ok()?;
        self.in_flight -= 1;
        Some(result)
    }
}

impl Drop for CommitWorker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
