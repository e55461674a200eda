//! Transactional store demo: N workers run 10-record transactions against
//! two tables for a fixed duration, then the four throughput lines are
//! printed.

use std::process::exit;
use std::time::Duration;

use clap::Parser;

use mk_core::seed_from_env;
use mk_trx::{run_workload, Database, TrxConfig};

#[derive(Debug, Parser)]
#[command(name = "trx-bench", about = "Row-locking transactional store benchmark")]
struct Args {
    /// Records per table (at least 10).
    #[arg(short = 't', long = "table_size")]
    table_size: u64,

    /// Number of worker threads.
    #[arg(short = 'n', long = "num_thread")]
    num_thread: usize,

    /// Shared-mode reads per transaction, 0..=10.
    #[arg(short = 'r', long = "read_num")]
    read_num: u32,

    /// Run duration in seconds.
    #[arg(short = 'd', long = "duration")]
    duration: u64,
}

fn init_logging() {
    let result = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!("[{}] {}", record.level(), message))
        })
        .level(log::LevelFilter::Info)
        .chain(std::io::stderr())
        .apply();
    if result.is_err() {
        eprintln!("logger has already been set");
    }
}

fn main() {
    init_logging();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            exit(1);
        }
    };

    let config = TrxConfig {
        table_size: args.table_size,
        threads_count: args.num_thread,
        read_count: args.read_num,
        duration: Duration::from_secs(args.duration),
        seed: seed_from_env(),
    };

    let db = match Database::new(config) {
        Ok(db) => db,
        Err(err) => {
            eprintln!("Invalid argument: {err}");
            exit(1);
        }
    };

    let report = run_workload(&db);

    println!(
        "READ throughput: {} READS and {:.6} READS/sec",
        report.reads,
        report.rate(report.reads)
    );
    println!(
        "UPDATE throughput: {} UPDATES and {:.6} UPDATES/sec",
        report.updates,
        report.rate(report.updates)
    );
    println!(
        "Transaction throughput: {} trx and {:.6} trx/sec",
        report.transactions,
        report.rate(report.transactions)
    );
    println!(
        "Aborted transactions: {} aborts and {:.6} aborts/sec",
        report.aborts,
        report.rate(report.aborts)
    );
}
