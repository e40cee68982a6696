// Backup Simulation Statistics

use crate::bk_interface::SimTime;
use crate::bk_transfer::TransferCounts;
use crate::bk_units::format_timespan;

// ============================================================================
// Per-node tracking
// ============================================================================

/// Timing marks for one node, reset when it rejoins
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeMetrics {
    /// When the current incarnation joined (backup start)
    pub joined_at: Option<SimTime>,
    /// First time at least k blocks were stored elsewhere
    pub recoverable_at: Option<SimTime>,
    /// First time all n blocks were stored elsewhere
    pub fully_redundant_at: Option<SimTime>,
    /// Redundancy dropped below n after having been full
    pub degraded_since: Option<SimTime>,
    /// Failed and has not finished restoring its data yet
    pub failed_at: Option<SimTime>,
    /// Fewer than k blocks exist anywhere
    pub data_lost_at: Option<SimTime>,

    pub(crate) recoverable: bool,

    pub failures: usize,
    pub departures: usize,
    pub data_losses: usize,
}

impl NodeMetrics {
    /// Start a new incarnation; counters survive
    pub(crate) fn rejoin(&mut self, now: SimTime) {
        *self = NodeMetrics {
            joined_at: Some(now),
            failures: self.failures,
            departures: self.departures,
            data_losses: self.data_losses,
            ..Default::default()
        };
    }
}

/// Duration samples collected during the run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DurationSamples {
    /// Join -> k blocks stored elsewhere
    pub time_to_recoverable: Vec<SimTime>,
    /// Join -> n blocks stored elsewhere
    pub time_to_full_redundancy: Vec<SimTime>,
    /// Redundancy loss detected -> n blocks stored elsewhere again
    pub time_to_re_redundancy: Vec<SimTime>,
    /// Failure -> local data rebuilt from peers
    pub time_to_restore: Vec<SimTime>,
}

pub fn mean(samples: &[SimTime]) -> Option<SimTime> {
    if samples.is_empty() {
        None
    } else {
        Some(samples.iter().sum::<SimTime>() / samples.len() as SimTime)
    }
}

// ============================================================================
// Monitor probe
// ============================================================================

/// Network-wide snapshot taken by the monitor event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorSample {
    pub time: SimTime,
    pub joined: usize,
    pub online: usize,
    pub offline: usize,
    pub failed: usize,
    pub left: usize,
    pub transfers_in_flight: usize,
    pub recoverable: usize,
    pub fully_redundant: usize,
}

// ============================================================================
// Simulation Result
// ============================================================================

/// Final state of one node
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSummary {
    pub name: String,
    pub state: String,
    pub local_blocks: usize,
    pub backed_up_blocks: usize,
    pub remote_blocks_held: usize,
    pub metrics: NodeMetrics,
}

/// Complete simulation result
#[derive(Debug, Clone)]
pub struct BackupResult {
    /// Random seed used
    pub seed_used: u64,

    /// Horizon the run was given
    pub max_t: SimTime,

    /// Time of the last processed event
    pub end_time: SimTime,

    pub events_processed: usize,

    pub transfers: TransferCounts,

    pub samples: DurationSamples,

    pub nodes: Vec<NodeSummary>,

    /// Monitor snapshots, empty unless a monitor interval was configured
    pub history: Vec<MonitorSample>,
}

impl BackupResult {
    /// Metric 1: mean time from joining to full redundancy
    pub fn mean_time_to_full_redundancy(&self) -> Option<SimTime> {
        mean(&self.samples.time_to_full_redundancy)
    }

    /// Metric 2: mean time from redundancy loss to full redundancy again
    pub fn mean_time_to_recover_after_loss(&self) -> Option<SimTime> {
        mean(&self.samples.time_to_re_redundancy)
    }

    pub fn mean_time_to_recoverable(&self) -> Option<SimTime> {
        mean(&self.samples.time_to_recoverable)
    }

    pub fn mean_time_to_restore(&self) -> Option<SimTime> {
        mean(&self.samples.time_to_restore)
    }

    pub fn total_failures(&self) -> usize {
        self.nodes.iter().map(|n| n.metrics.failures).sum()
    }

    pub fn total_departures(&self) -> usize {
        self.nodes.iter().map(|n| n.metrics.departures).sum()
    }

    pub fn total_data_losses(&self) -> usize {
        self.nodes.iter().map(|n| n.metrics.data_losses).sum()
    }

    pub fn print_summary(&self) {
        let fmt = |v: Option<SimTime>| v.map(format_timespan).unwrap_or_else(|| "n/a".into());

        println!("\n╔════════════════════════════════════════════════════════╗");
        println!("║    BACKUP SIMULATION RESULTS                           ║");
        println!("╚════════════════════════════════════════════════════════╝\n");

        println!("Seed: {}", self.seed_used);
        println!(
            "Simulated: {} of {} ({} events)",
            format_timespan(self.end_time),
            format_timespan(self.max_t),
            self.events_processed
        );
        println!();

        println!("═══ Transfers ═══");
        println!("  Started: {}", self.transfers.started);
        println!("  Backups Completed: {}", self.transfers.completed_backups);
        println!("  Restores Completed: {}", self.transfers.completed_restores);
        println!("  Canceled: {}", self.transfers.canceled);
        println!();

        println!("═══ Churn ═══");
        println!("  Failures: {}", self.total_failures());
        println!("  Departures: {}", self.total_departures());
        println!("  Data Losses: {}", self.total_data_losses());
        println!();

        println!("═══ Durations ═══");
        println!(
            "  Time to Recoverable: {} ({} nodes)",
            fmt(self.mean_time_to_recoverable()),
            self.samples.time_to_recoverable.len()
        );
        println!(
            "  Time to Full Redundancy: {} ({} nodes)",
            fmt(self.mean_time_to_full_redundancy()),
            self.samples.time_to_full_redundancy.len()
        );
        println!(
            "  Time to Recover After Loss: {} ({} repairs)",
            fmt(self.mean_time_to_recover_after_loss()),
            self.samples.time_to_re_redundancy.len()
        );
        println!(
            "  Time to Restore After Failure: {} ({} restores)",
            fmt(self.mean_time_to_restore()),
            self.samples.time_to_restore.len()
        );
        println!();

        if let Some(last) = self.history.last() {
            println!("═══ Last Snapshot ({}) ═══", format_timespan(last.time));
            println!(
                "  Nodes: {} joined, {} online, {} offline, {} failed, {} left",
                last.joined, last.online, last.offline, last.failed, last.left
            );
            println!(
                "  Recoverable: {}, Fully Redundant: {}",
                last.recoverable, last.fully_redundant
            );
            println!();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[]), None);
        assert_eq!(mean(&[2.0, 4.0]), Some(3.0));
    }

    #[test]
    fn test_rejoin_keeps_counters() {
        let mut m = NodeMetrics {
            joined_at: Some(1.0),
            recoverable_at: Some(5.0),
            failures: 2,
            departures: 1,
            data_losses: 1,
            recoverable: true,
            ..Default::default()
        };
        m.rejoin(50.0);
        assert_eq!(m.joined_at, Some(50.0));
        assert_eq!(m.recoverable_at, None);
        assert!(!m.recoverable);
        assert_eq!((m.failures, m.departures, m.data_losses), (2, 1, 1));
    }
}
