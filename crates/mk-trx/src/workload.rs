//! The timed benchmark workload.
//!
//! Each transaction picks a random window of ten consecutive records and a
//! working table, performs `read_num` shared reads on the window's head,
//! then exclusive update pairs on the rest, each pair locking the row in
//! the working table first and its sibling second. That acquisition order
//! is what makes deadlocks reachable: transactions working A-first and
//! B-first close cycles against each other, and the detector aborts one.

use std::thread;
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;

use mk_core::RunStats;

use crate::lock_table::{SlotIndex, TableId};
use crate::transaction::Database;
use crate::{TrxError, RECORDS_PER_TRX};

/// How one transaction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrxOutcome {
    /// Committed; carries the sum of the values read.
    Committed { read_sum: i64 },
    /// Deadlock victim; locks released, abort counted.
    Aborted,
}

/// Run a single transaction on `slot`.
pub fn run_transaction(
    db: &Database,
    slot: SlotIndex,
    rng: &mut Xoshiro256StarStar,
) -> TrxOutcome {
    let mut trx = db.begin(slot);

    let window_max = db.config().table_size - (RECORDS_PER_TRX - 1);
    let k = rng.gen_range(1..=window_max);
    let table = if rng.gen_bool(0.5) { TableId::A } else { TableId::B };
    let read_count = u64::from(db.config().read_count);

    let mut read_sum = 0i64;
    for record_id in k..k + read_count {
        match trx.read(table, record_id) {
            Ok(value) => read_sum += value,
            Err(TrxError::Deadlock) | Err(TrxError::Config(_)) => {
                trx.abort();
                return TrxOutcome::Aborted;
            }
        }
    }

    for record_id in k + read_count..k + RECORDS_PER_TRX {
        match trx.update(record_id, table) {
            Ok(()) => {}
            Err(TrxError::Deadlock) | Err(TrxError::Config(_)) => {
                trx.abort();
                return TrxOutcome::Aborted;
            }
        }
    }

    trx.commit();
    TrxOutcome::Committed { read_sum }
}

/// Outcome of a timed run.
#[derive(Debug, Clone)]
pub struct TrxReport {
    /// Successful READ operations.
    pub reads: u64,
    /// Successful UPDATE operations.
    pub updates: u64,
    /// Transactions begun.
    pub transactions: u64,
    /// Transactions aborted by deadlock.
    pub aborts: u64,
    /// Committed transactions per worker, for fairness accounting.
    pub commits_per_worker: Vec<u64>,
    /// Configured run duration.
    pub duration: Duration,
}

impl TrxReport {
    /// Operations per second for a counter over the configured duration.
    #[must_use]
    pub fn rate(&self, count: u64) -> f64 {
        count as f64 / self.duration.as_secs_f64()
    }

    /// Per-worker commit statistics.
    #[must_use]
    pub fn stats(&self) -> RunStats {
        RunStats::new(self.commits_per_worker.clone(), self.duration)
    }
}

/// Spawn one worker per slot, run transactions until the deadline, and
/// join. Shutdown is cooperative: the flag flips, each worker finishes its
/// in-flight transaction (committing or aborting, thereby waking anyone
/// parked behind it) and exits.
pub fn run_workload(db: &Database) -> TrxReport {
    let config = db.config().clone();
    db.running().store(true, std::sync::atomic::Ordering::Relaxed);

    let mut seed_rng = Xoshiro256StarStar::seed_from_u64(config.seed ^ 0x7278);
    let worker_seeds: Vec<u64> = (0..config.threads_count).map(|_| seed_rng.gen()).collect();

    let mut commits_per_worker = vec![0u64; config.threads_count];
    thread::scope(|scope| {
        let mut workers = Vec::with_capacity(config.threads_count);
        for (slot, &seed) in worker_seeds.iter().enumerate() {
            workers.push(
                thread::Builder::new()
                    .name(format!("trx-worker-{slot}"))
                    .spawn_scoped(scope, move || {
                        let mut rng = Xoshiro256StarStar::seed_from_u64(seed);
                        let mut commits = 0u64;
                        while db.running().load(std::sync::atomic::Ordering::Relaxed) {
                            if let TrxOutcome::Committed { .. } =
                                run_transaction(db, slot, &mut rng)
                            {
                                commits += 1;
                            }
                        }
                        commits
                    })
                    .expect("spawn trx worker"),
            );
        }

        thread::sleep(config.duration);
        db.running().store(false, std::sync::atomic::Ordering::Relaxed);

        for (slot, worker) in workers.into_iter().enumerate() {
            commits_per_worker[slot] = worker.join().expect("trx worker panicked");
        }
    });

    TrxReport {
        reads: db.reads_count(),
        updates: db.updates_count(),
        transactions: db.transactions_count(),
        aborts: db.aborts_count(),
        commits_per_worker,
        duration: config.duration,
    }
}
