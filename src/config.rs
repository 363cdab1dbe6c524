//! Node configuration.

use crate::storage::chain_store::DEFAULT_GENESIS_STATE_SIZE;
use crate::utils::log::Level;
use crate::virtual_machine::vm::DEFAULT_SLEEP_BOUND;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding [`LedgerConfig::data_dir`].
pub const DATA_DIR_ENV: &str = "LEDGER_DATA_DIR";
/// Environment variable holding the minimum log level.
pub const LOG_LEVEL_ENV: &str = "LEDGER_LOG";

/// Entries per batch; also the transaction count of a full block.
pub const DEFAULT_BATCH_SIZE: usize = 128;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Root of the block and state databases.
    pub data_dir: PathBuf,
    pub batch_size: usize,
    /// Size of the zeroed genesis state in bytes.
    pub genesis_state_size: usize,
    /// Upper bound of the SLEEP opcode's pause.
    pub sleep_bound: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./tmp/ledger"),
            batch_size: DEFAULT_BATCH_SIZE,
            genesis_state_size: DEFAULT_GENESIS_STATE_SIZE,
            sleep_bound: DEFAULT_SLEEP_BOUND,
        }
    }
}

impl LedgerConfig {
    /// Defaults overridden by the environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(dir) = env::var(DATA_DIR_ENV)
            && !dir.is_empty()
        {
            config.data_dir = PathBuf::from(dir);
        }
        config
    }

    pub fn with_data_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.data_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn block_db_path(&self) -> PathBuf {
        self.data_dir.join("blockdb")
    }

    pub fn state_db_path(&self) -> PathBuf {
        self.data_dir.join("statedb")
    }

    /// File the pending queue is persisted to on shutdown.
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("pending.snapshot")
    }
}

/// Log level from [`LOG_LEVEL_ENV`], if set and valid.
pub fn log_level_from_env() -> Option<Level> {
    env::var(LOG_LEVEL_ENV).ok()?.parse().ok()
}
