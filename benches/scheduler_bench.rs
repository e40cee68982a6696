use std::time::Instant;

use bk_sim::bk_scheduler::EventQueue;
use bk_sim::bk_variates::exp_rv;
use bk_sim::{BackupConfig, BackupSim};
use rand::rngs::StdRng;
use rand::SeedableRng;

const NETWORK: &str = r#"
max_t: 20 years
seed: 1
churn:
  model: exponential
selection: random
nodes:
  - name: peer
    number: 200
    n: 10
    k: 8
    data_size: 1 GiB
    storage_size: 20 GiB
    upload_speed: 2 MiB
    download_speed: 10 MiB
    average_uptime: 8 hours
    average_downtime: 16 hours
    average_lifetime: 1 year
    average_recover_time: 3 days
    arrival_time: 1 day
"#;

/// Raw queue throughput, then a full backup run
fn main() {
    std::env::set_var("RUST_LOG", "error");
    let _ = simple_logger::init();

    println!("\n=== Event Queue Throughput ===\n");
    println!("{:<20} {:>12} {:>15}", "Pending events", "Time (ms)", "Events/s");
    println!("{}", "-".repeat(50));

    for pending in [1_000usize, 10_000, 100_000] {
        let mut rng = StdRng::seed_from_u64(7);
        let mut queue = EventQueue::new();
        for i in 0..pending {
            let _ = queue.schedule(exp_rv(&mut rng, 1.0), i);
        }

        // every pop schedules a successor, so the queue size stays constant
        let rounds = 1_000_000;
        let start = Instant::now();
        for _ in 0..rounds {
            if let Some(e) = queue.pop_until(f64::MAX) {
                let _ = queue.schedule(exp_rv(&mut rng, 1.0), e);
            }
        }
        let elapsed = start.elapsed().as_secs_f64();
        println!(
            "{:<20} {:>12.1} {:>15.0}",
            pending,
            elapsed * 1000.0,
            rounds as f64 / elapsed
        );
    }

    println!("\n=== Backup Simulation (200 peers, 20 years) ===\n");
    let config = BackupConfig::from_yaml_str(NETWORK).unwrap();
    let start = Instant::now();
    let mut sim = BackupSim::new(&config).unwrap();
    let result = sim.run().unwrap();
    let elapsed = start.elapsed().as_secs_f64();

    println!("Events: {}", result.events_processed);
    println!("Wall time: {:.2}s", elapsed);
    println!("Events/s: {:.0}", result.events_processed as f64 / elapsed);
    println!(
        "Transfers: {} started, {} completed",
        result.transfers.started,
        result.transfers.completed_backups + result.transfers.completed_restores
    );
}
