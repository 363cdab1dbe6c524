//! Single-node replicated ledger.
//!
//! Orders transfers through a local log, commits them in batches and
//! persists blocks and states under a data directory.
//!
//! # Usage
//! ```text
//! ledger [data_dir] [OPTIONS]
//! ```
//!
//! Without `--hammer`, one JSON transfer per line is read from stdin, e.g.
//! `{"idxFrom":0,"idxTo":1}`. On end of input the node waits for pending
//! commits, saves the pending queue and exits.

use ledger::commit::committer::Committer;
use ledger::config::{LedgerConfig, log_level_from_env};
use ledger::consensus::fsm::{ApplyError, LedgerFsm};
use ledger::consensus::state_machine::{FileSink, Snapshot, SnapshotError, StateMachine};
use ledger::core::transaction::TransactionDef;
use ledger::network::local_log::LocalLog;
use ledger::network::service::{LedgerService, SubmitError};
use ledger::storage::chain_store::ChainStore;
use ledger::storage::kv_store::StorageError;
use ledger::storage::rocksdb_store::RocksDbStore;
use ledger::utils::log::set_min_level;
use ledger::{error, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::env;
use std::fs::{self, File};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

type Service = LedgerService<LocalLog<LedgerFsm>>;

/// Default slot range of `--hammer` transfers.
const DEFAULT_HAMMER_SLOTS: u64 = 64;

#[derive(Debug, thiserror::Error)]
enum NodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Submit(#[from] SubmitError),
    #[error(transparent)]
    Apply(#[from] ApplyError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

struct Options {
    config: LedgerConfig,
    hammer: Option<u64>,
    slots: u64,
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.iter().skip(1).any(|a| a == "--help" || a == "-h") {
        print_usage(&args[0]);
        return;
    }
    if let Some(level) = log_level_from_env() {
        set_min_level(level);
    }

    let options = parse_args(&args);
    if let Err(e) = run(options).await {
        error!("{e}");
        process::exit(1);
    }
}

fn parse_args(args: &[String]) -> Options {
    let mut options = Options {
        config: LedgerConfig::from_env(),
        hammer: None,
        slots: DEFAULT_HAMMER_SLOTS,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--batch-size" => {
                options.config.batch_size = flag_value(args, i, "--batch-size") as usize;
                i += 2;
            }
            "--sleep-ms" => {
                options.config.sleep_bound =
                    Duration::from_millis(flag_value(args, i, "--sleep-ms"));
                i += 2;
            }
            "--hammer" => {
                options.hammer = Some(flag_value(args, i, "--hammer"));
                i += 2;
            }
            "--slots" => {
                options.slots = flag_value(args, i, "--slots");
                i += 2;
            }
            other if !other.starts_with("--") && i == 1 => {
                options.config = options.config.with_data_dir(other);
                i += 1;
            }
            other => {
                eprintln!("Unexpected argument: {}\n", other);
                print_usage(&args[0]);
                process::exit(1);
            }
        }
    }

    if options.config.batch_size == 0 || options.slots == 0 {
        eprintln!("--batch-size and --slots must be positive");
        process::exit(1);
    }
    options
}

/// Parses the numeric value following the flag at `args[i]`.
fn flag_value(args: &[String], i: usize, flag: &str) -> u64 {
    let Some(raw) = args.get(i + 1) else {
        eprintln!("{flag} requires an argument");
        process::exit(1);
    };
    match raw.parse() {
        Ok(value) => value,
        Err(_) => {
            eprintln!("Invalid value for {flag}: {raw}");
            process::exit(1);
        }
    }
}

async fn run(options: Options) -> Result<(), NodeError> {
    let config = options.config;
    fs::create_dir_all(&config.data_dir)?;

    let chain = Arc::new(ChainStore::new(
        Box::new(RocksDbStore::open(config.block_db_path())?),
        Box::new(RocksDbStore::open(config.state_db_path())?),
    ));
    chain.init_genesis(config.genesis_state_size)?;
    let tip = chain.tip_height()?.unwrap_or(0);
    info!(
        "Opened chain at {} with tip {tip}",
        config.data_dir.display()
    );

    let committer = Committer::new(chain.clone()).with_sleep_bound(config.sleep_bound);
    let mut fsm = LedgerFsm::new(Arc::new(committer), config.batch_size).with_epoch(tip + 1);
    let snapshot_path = config.snapshot_path();
    if snapshot_path.exists() {
        let mut file = File::open(&snapshot_path)?;
        if let Err(e) = fsm.restore(&mut file) {
            warn!("Ignoring pending snapshot {}: {e}", snapshot_path.display());
        }
    }
    let service = LedgerService::local(fsm);

    match options.hammer {
        Some(count) => hammer(&service, count, options.slots).await?,
        None => read_stdin(&service).await?,
    }

    service.settle().await?;
    let snapshot = service.state_machine().lock().await.snapshot();
    let mut sink = FileSink::create(&snapshot_path)?;
    snapshot.persist(&mut sink)?;

    info!(
        "Chain tip {}, {} transactions pending, applied index {}",
        chain.tip_height()?.unwrap_or(0),
        service.pending().await.len(),
        service.applied_index().await
    );
    Ok(())
}

/// Submits `raw`, logging rejected entries and failing on fatal errors.
async fn submit(service: &Service, raw: Vec<u8>) -> Result<(), NodeError> {
    match service.submit_raw(raw).await {
        Ok(_) => Ok(()),
        Err(e) if !e.is_fatal() => {
            warn!("{e}");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn read_stdin(service: &Service) -> Result<(), NodeError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        submit(service, line.as_bytes().to_vec()).await?;
    }
    Ok(())
}

/// Submits `count` random transfers between slots `0..slots`.
async fn hammer(service: &Service, count: u64, slots: u64) -> Result<(), NodeError> {
    info!("Submitting {count} random transfers over {slots} slots");
    let mut rng = StdRng::from_entropy();
    for _ in 0..count {
        let def = TransactionDef::new(rng.gen_range(0..slots), rng.gen_range(0..slots));
        submit(service, def.to_wire().map_err(SubmitError::from)?).await?;
    }
    Ok(())
}

const USAGE: &str = "\
Replicated Ledger Node

USAGE:
    {program} [data_dir] [OPTIONS]

ARGS:
    [data_dir]    Directory for the block and state databases (default: ./tmp/ledger)

OPTIONS:
    --batch-size <n>    Transactions per block (default: 128)
    --sleep-ms <n>      Upper bound of the SLEEP opcode in milliseconds (default: 5)
    --hammer <n>        Submit n random transfers instead of reading stdin
    --slots <n>         Slot range used by --hammer (default: 64)
    -h, --help          Print this help message

ENVIRONMENT:
    LEDGER_DATA_DIR    Data directory when no data_dir argument is given
    LEDGER_LOG         Minimum log level: info, warn or error

EXAMPLES:
    # Commit 10000 random transfers in blocks of 128
    {program} ./tmp/ledger --hammer 10000

    # Feed transfers from a file
    {program} ./tmp/ledger --batch-size 3 < transfers.jsonl
";

fn print_usage(program: &str) {
    print!("{}", USAGE.replace("{program}", program));
}
