//! Backup Scenario Runner
//!
//! Runs one YAML scenario, or every scenario in a directory, and prints a
//! summary per run.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use bk_sim::bk_log::{ConsoleEventSink, MultiEventSink, TransferLogSink};
use bk_sim::bk_units::parse_timespan;
use bk_sim::{BackupConfig, BackupSim};
use clap::Parser;
use log::{error, info, LevelFilter};
use simple_logger::SimpleLogger;

#[derive(Parser)]
#[command(name = "backup-runner")]
#[command(about = "Simulate erasure-coded peer-to-peer backup under churn")]
#[command(version)]
struct Cli {
    /// Scenario file or directory of .yaml scenarios
    path: PathBuf,

    /// Override the horizon (e.g. "10 years", "3600")
    #[arg(long, value_parser = parse_max_t)]
    max_t: Option<f64>,

    /// Override the random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Narrate every lifecycle event and transfer
    #[arg(short, long)]
    verbose: bool,

    /// Write the transfer log here; with a directory, one file per
    /// scenario named `<log-file>.<scenario>`
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn parse_max_t(s: &str) -> Result<f64, String> {
    parse_timespan(s).map_err(|e| e.to_string())
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::Info
    } else {
        LevelFilter::Warn
    };
    SimpleLogger::new().with_level(level).init().unwrap();

    if cli.path.is_file() {
        run_scenario_file(&cli.path, &cli, cli.log_file.clone());
    } else if cli.path.is_dir() {
        run_scenario_directory(&cli.path, &cli);
    } else {
        eprintln!("Error: Path does not exist: {}", cli.path.display());
        std::process::exit(1);
    }
}

fn run_scenario_directory(dir: &Path, cli: &Cli) {
    let mut scenarios: Vec<PathBuf> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| matches!(p.extension().and_then(|s| s.to_str()), Some("yaml" | "yml")))
            .collect(),
        Err(e) => {
            eprintln!("Error: cannot read {}: {}", dir.display(), e);
            std::process::exit(1);
        }
    };
    scenarios.sort();

    if scenarios.is_empty() {
        eprintln!("No .yaml files found in {}", dir.display());
        std::process::exit(1);
    }

    println!("Found {} scenario(s) to run", scenarios.len());
    for (i, path) in scenarios.iter().enumerate() {
        println!("\n{}/{} Running: {}", i + 1, scenarios.len(), path.display());
        let log_file = cli.log_file.as_deref().map(|log| scenario_log_path(log, path));
        run_scenario_file(path, cli, log_file);
    }
}

/// `transfers.log` and `p2p.yaml` give `transfers.log.p2p`
fn scenario_log_path(log_file: &Path, scenario: &Path) -> PathBuf {
    let mut name = log_file.as_os_str().to_owned();
    name.push(".");
    name.push(scenario.file_stem().unwrap_or_default());
    PathBuf::from(name)
}

fn run_scenario_file(path: &Path, cli: &Cli, log_file: Option<PathBuf>) {
    let mut config = match BackupConfig::from_file(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}: {}", path.display(), e);
            std::process::exit(1);
        }
    };
    if let Some(max_t) = cli.max_t {
        config.max_t = max_t;
    }
    if cli.seed.is_some() {
        config.seed = cli.seed;
    }

    let mut sinks = MultiEventSink::new();
    sinks.add_sink(Box::new(ConsoleEventSink::new(cli.verbose)));
    let transfer_log = match &log_file {
        Some(log_path) => match TransferLogSink::create(log_path) {
            Ok(sink) => {
                let sink = Rc::new(RefCell::new(sink));
                sinks.add_sink(Box::new(sink.clone()));
                Some(sink)
            }
            Err(e) => {
                eprintln!("Error: cannot create {}: {}", log_path.display(), e);
                std::process::exit(1);
            }
        },
        None => None,
    };

    let mut sim = match BackupSim::new(&config) {
        Ok(sim) => sim.with_sink(Box::new(sinks)),
        Err(e) => {
            eprintln!("Error: {}: {}", path.display(), e);
            std::process::exit(1);
        }
    };
    info!("seed: {}", sim.seed_used());

    match sim.run() {
        Ok(result) => {
            info!("Simulation over");
            result.print_summary();
        }
        Err(e) => {
            error!("simulation aborted: {}", e);
            std::process::exit(2);
        }
    }

    if let Some(sink) = transfer_log {
        if let Err(e) = sink.borrow_mut().flush() {
            eprintln!("Error: cannot write transfer log: {}", e);
        }
    }
}
