//! Churn Sweep
//!
//! Runs the same network under increasingly unreliable nodes and prints how
//! long full redundancy takes and how often data is lost.

use bk_sim::bk_units::{format_timespan, parse_timespan};
use bk_sim::{BackupConfig, BackupSim, ChurnModel, NodeClassConfig, PeerSelection};
use log::info;
use simple_logger::SimpleLogger;

const DAY: f64 = 86_400.0;

fn peer_class(lifetime: f64) -> NodeClassConfig {
    NodeClassConfig {
        name: "peer".into(),
        number: 30,
        n: 10,
        k: 5,
        data_size: 500 * 1024 * 1024,
        storage_size: 4 * 1024 * 1024 * 1024,
        upload_speed: 1024 * 1024,
        download_speed: 4 * 1024 * 1024,
        average_uptime: 0.5 * DAY,
        average_downtime: 0.5 * DAY,
        average_lifetime: lifetime,
        average_recover_time: 2.0 * DAY,
        arrival_time: 0.0,
        lifetime_shape: None,
        region: None,
        join_interval: None,
        leave_interval: None,
    }
}

fn main() {
    SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()
        .unwrap();

    let horizon = parse_timespan("5 years").unwrap();

    println!("\n╔════════════════════════════════════════════════════════╗");
    println!("║    CHURN SWEEP - 30 peers, n=10, k=5                   ║");
    println!("╚════════════════════════════════════════════════════════╝\n");
    println!(
        "{:<14} {:>10} {:>22} {:>22} {:>8}",
        "Lifetime", "Failures", "Full redundancy", "Recover after loss", "Losses"
    );
    println!("{}", "-".repeat(80));

    for lifetime_days in [60.0, 120.0, 365.0, 730.0] {
        let config = BackupConfig {
            max_t: horizon,
            seed: Some(2024),
            churn: ChurnModel::Fixed,
            selection: PeerSelection::Random,
            nodes: vec![peer_class(lifetime_days * DAY)],
            ..Default::default()
        };
        info!("running with lifetime {} days", lifetime_days);

        let mut sim = BackupSim::new(&config).unwrap();
        let result = sim.run().unwrap();
        let fmt = |v: Option<f64>| v.map(format_timespan).unwrap_or_else(|| "n/a".into());

        println!(
            "{:<14} {:>10} {:>22} {:>22} {:>8}",
            format!("{} days", lifetime_days),
            result.total_failures(),
            fmt(result.mean_time_to_full_redundancy()),
            fmt(result.mean_time_to_recover_after_loss()),
            result.total_data_losses()
        );
    }
}
