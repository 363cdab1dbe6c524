//! Commit pipeline benchmark binary.
//!
//! Measures transfer execution, conflict resolution and full block commits
//! against an in-memory chain.
//! Run with: `cargo run --release --bin bench`

use std::time::{Duration, Instant};

use ledger::commit::committer::{CommitRequest, Committer};
use ledger::commit::priority::PriorityMap;
use ledger::core::transaction::TransactionDef;
use ledger::storage::chain_store::{ChainStore, DEFAULT_GENESIS_STATE_SIZE};
use ledger::virtual_machine::vm::VM;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Benchmark harness
// ---------------------------------------------------------------------------

struct BenchResult {
    name: String,
    iterations: u64,
    total: Duration,
    /// Transactions processed per iteration.
    items: u64,
}

impl BenchResult {
    fn avg(&self) -> Duration {
        self.total / self.iterations.max(1) as u32
    }

    fn print(&self) {
        let ns_per_op = self.avg().as_nanos();
        println!(
            "  {:<30} {:>7} iters {:>10.3} us/iter {:>10.1} ns/tx",
            self.name,
            self.iterations,
            ns_per_op as f64 / 1000.0,
            ns_per_op as f64 / self.items.max(1) as f64,
        );
    }
}

/// Runs `f` for at least `min_duration`, returning aggregated results.
fn bench<F>(name: impl Into<String>, min_duration: Duration, items: u64, mut f: F) -> BenchResult
where
    F: FnMut(),
{
    // Warmup
    for _ in 0..5 {
        f();
    }

    let mut iterations = 0u64;
    let start = Instant::now();
    while start.elapsed() < min_duration {
        f();
        iterations += 1;
    }

    BenchResult {
        name: name.into(),
        iterations,
        total: start.elapsed(),
        items,
    }
}

/// Transfers over `slots` slots; fewer slots means more conflicts.
fn random_batch(rng: &mut StdRng, len: usize, slots: u64) -> Vec<TransactionDef> {
    (0..len)
        .map(|_| TransactionDef::new(rng.gen_range(0..slots), rng.gen_range(0..slots)))
        .collect()
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() {
    let min = Duration::from_secs(2);
    let mut rng = StdRng::seed_from_u64(0x1ed9e7);

    println!("Commit Benchmarks (each runs for >= 2s, SLEEP disabled)\n");
    println!(
        "  {:<30} {:>7}       {:>14} {:>15}",
        "benchmark", "iters", "avg time", "per tx"
    );
    println!("  {}", "-".repeat(74));

    // 1. One transfer program on a fresh VM
    let program = TransactionDef::new(3, 7).compile();
    let state = vec![0u8; DEFAULT_GENESIS_STATE_SIZE];
    bench("transfer_program", min, 1, || {
        let mut vm = VM::new(&state).with_sleep_bound(Duration::ZERO);
        if let Err(e) = vm.execute(&program) {
            panic!("transfer failed: {e}");
        }
    })
    .print();

    // 2. Conflict resolution only
    for &(len, slots) in &[(128usize, 128u64), (1024, 128), (1024, 16)] {
        let batch = random_batch(&mut rng, len, slots);
        bench(format!("resolve({len}, {slots} slots)"), min, len as u64, || {
            let map = PriorityMap::build(&batch);
            let _ = map.verdicts(&batch);
        })
        .print();
    }

    // 3. Full commits, one new height per iteration
    for &(len, slots) in &[(128usize, 128u64), (128, 16)] {
        let chain = Arc::new(ChainStore::in_memory());
        if let Err(e) = chain.init_genesis(DEFAULT_GENESIS_STATE_SIZE) {
            panic!("genesis failed: {e}");
        }
        let committer = Committer::new(chain).with_sleep_bound(Duration::ZERO);
        let batches: Vec<Vec<TransactionDef>> =
            (0..64).map(|_| random_batch(&mut rng, len, slots)).collect();
        let mut height = 0u64;
        let mut committed = 0usize;
        let r = bench(format!("commit({len}, {slots} slots)"), min, len as u64, || {
            height += 1;
            let request = CommitRequest {
                batch: batches[height as usize % batches.len()].clone(),
                height,
            };
            match committer.commit_block(&request) {
                Ok(outcome) => committed += outcome.block.transactions.len(),
                Err(e) => panic!("commit failed: {e}"),
            }
        });
        r.print();
        println!(
            "  {:<30} {:.1}% of submitted transactions won",
            "",
            100.0 * committed as f64 / (height as f64 * len as f64)
        );
    }

    println!();
}
