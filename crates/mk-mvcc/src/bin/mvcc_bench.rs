//! MVCC demo: N participants hammer the two-variable store for a fixed
//! duration, then throughput and the Jain fairness index are printed.

use std::process::exit;
use std::time::Duration;

use clap::Parser;

use mk_core::seed_from_env;
use mk_mvcc::{MvccConfig, MvccEngine};

#[derive(Debug, Parser)]
#[command(name = "mvcc-bench", about = "Two-variable MVCC update benchmark")]
struct Args {
    /// Number of participant threads (at least 2).
    #[arg(short = 'n', long = "num_thread")]
    num_thread: usize,

    /// Run duration in seconds.
    #[arg(short = 'd', long = "duration")]
    duration: u64,

    /// Check the conserved total across all participants on every update.
    #[arg(short = 'v', long = "verify")]
    verify: bool,
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

    let config = MvccConfig {
        participants_count: args.num_thread,
        duration: Duration::from_secs(args.duration),
        verify: args.verify,
        seed: seed_from_env(),
    };

    let engine = match MvccEngine::new(config) {
        Ok(engine) => engine,
        Err(err) => {
            eprintln!("Invalid argument: {err}");
            exit(1);
        }
    };

    let report = engine.run();
    for err in &report.errors {
        log::error!("participant failure: {err}");
    }

    let stats = report.stats();
    println!("Throughput: {:.6}", stats.throughput());
    println!("Fairness: {:.6}", stats.fairness());

    if !report.errors.is_empty() {
        exit(1);
    }
}
