//! Supermarket Queue Runner
//!
//! Prints the average time in system and optionally appends a CSV row
//! `lambd,mu,shape,n,d,max_t,W`.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use bk_sim::bk_queues::{mm1_time_in_system, theoretical_fraction};
use bk_sim::{Discipline, QueueConfig, QueueSim};
use clap::Parser;
use log::LevelFilter;
use simple_logger::SimpleLogger;

#[derive(Parser)]
#[command(name = "queue-runner")]
#[command(about = "Simulate n queues where each job joins the shortest of d sampled ones")]
#[command(version)]
struct Cli {
    /// Arrival rate per queue
    #[arg(long, default_value = "0.7")]
    lambd: f64,

    /// Service rate
    #[arg(long, default_value = "1")]
    mu: f64,

    /// Maximum time to run the simulation
    #[arg(long, default_value = "100000")]
    max_t: f64,

    /// Number of servers
    #[arg(long, default_value = "10")]
    n: usize,

    /// Number of queues to sample
    #[arg(long, default_value = "1")]
    d: usize,

    /// Weibull shape parameter
    #[arg(long, default_value = "1")]
    shape: f64,

    /// Serve the newest job first, preempting the running one
    #[arg(long)]
    lifo: bool,

    /// Snapshot queue lengths every this many time units
    #[arg(long)]
    monitor: Option<f64>,

    /// Print time-averaged fractions of queues with length >= x up to this x
    #[arg(long, default_value = "15")]
    max_len: usize,

    /// CSV file in which to store results
    #[arg(long)]
    csv: Option<PathBuf>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::Info
    } else {
        LevelFilter::Warn
    };
    SimpleLogger::new().with_level(level).init().unwrap();

    let config = QueueConfig {
        lambd: cli.lambd,
        mu: cli.mu,
        n: cli.n,
        d: cli.d,
        shape: cli.shape,
        max_t: cli.max_t,
        discipline: if cli.lifo {
            Discipline::PreemptiveLifo
        } else {
            Discipline::Fifo
        },
        monitor_interval: cli.monitor,
        seed: cli.seed,
    };

    let mut sim = match QueueSim::new(config.clone()) {
        Ok(sim) => sim,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    let result = match sim.run() {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Error: simulation aborted: {}", e);
            std::process::exit(2);
        }
    };

    let Some(w) = result.average_time_in_system else {
        eprintln!("No job completed before t={}", config.max_t);
        std::process::exit(1);
    };
    println!("Average time spent in the system: {}", w);
    if config.mu == 1.0 {
        if let Some(expected) = mm1_time_in_system(config.lambd) {
            println!(
                "Theoretical expectation for random server choice (d=1): {}",
                expected
            );
        }
    }

    if !result.snapshots.is_empty() {
        println!("\nx  simulated  theoretical");
        for (x, fraction) in result.time_averaged_fractions(cli.max_len).iter().enumerate() {
            let theory = theoretical_fraction(config.lambd, config.d, x);
            println!("{:<2} {:.4}     {:.4}", x, fraction, theory);
        }
    }

    if let Some(path) = &cli.csv {
        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| writeln!(f, "{}", config.csv_row(w)));
        if let Err(e) = written {
            eprintln!("Error: cannot write {}: {}", path.display(), e);
            std::process::exit(1);
        }
    }
}
