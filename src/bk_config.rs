// Backup Simulation Configuration

use std::path::Path;

use serde::Deserialize;

use crate::bk_error::ConfigError;
use crate::bk_interface::{Bytes, SimTime};
use crate::bk_node::NodeSpec;
use crate::bk_units::{deserialize_opt_timespan, deserialize_size, deserialize_timespan};

// defaults taken from the regional churn experiments
const DEFAULT_JOIN_INTERVAL: SimTime = 52.0 * 7.0 * 24.0 * 3600.0;
const DEFAULT_LEAVE_INTERVAL: SimTime = 2.0 * DEFAULT_JOIN_INTERVAL;

// ============================================================================
// Main Configuration
// ============================================================================

/// Main configuration for a backup simulation
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackupConfig {
    /// Simulation horizon; later events never run
    #[serde(deserialize_with = "deserialize_timespan")]
    pub max_t: SimTime,

    /// Random seed for reproducibility
    pub seed: Option<u64>,

    /// How nodes enter and leave the network
    pub churn: ChurnModel,

    /// How transfer partners are picked
    pub selection: PeerSelection,

    /// Sample network-wide metrics every interval
    #[serde(deserialize_with = "deserialize_opt_timespan")]
    pub monitor_interval: Option<SimTime>,

    /// Re-upload lost blocks only below this many remote copies (default: n)
    pub repair_threshold: Option<usize>,

    /// Node classes, in the order nodes are created
    pub nodes: Vec<NodeClassConfig>,
}

/// One class of identical nodes
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeClassConfig {
    pub name: String,

    /// How many nodes of this class
    pub number: usize,

    pub n: usize,
    pub k: usize,

    #[serde(deserialize_with = "deserialize_size")]
    pub data_size: Bytes,
    #[serde(deserialize_with = "deserialize_size")]
    pub storage_size: Bytes,
    #[serde(deserialize_with = "deserialize_size")]
    pub upload_speed: Bytes,
    #[serde(deserialize_with = "deserialize_size")]
    pub download_speed: Bytes,

    #[serde(deserialize_with = "deserialize_timespan")]
    pub average_uptime: SimTime,
    #[serde(deserialize_with = "deserialize_timespan")]
    pub average_downtime: SimTime,
    #[serde(deserialize_with = "deserialize_timespan")]
    pub average_lifetime: SimTime,
    #[serde(deserialize_with = "deserialize_timespan")]
    pub average_recover_time: SimTime,

    #[serde(default, deserialize_with = "deserialize_timespan")]
    pub arrival_time: SimTime,

    /// Weibull shape for lifetimes (disk wear-out); exponential when unset
    #[serde(default)]
    pub lifetime_shape: Option<f64>,

    #[serde(default)]
    pub region: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_timespan")]
    pub join_interval: Option<SimTime>,
    #[serde(default, deserialize_with = "deserialize_opt_timespan")]
    pub leave_interval: Option<SimTime>,
}

// ============================================================================
// Churn and Selection
// ============================================================================

/// Churn models for joining and leaving
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum ChurnModel {
    /// Every node joins at its `arrival_time` and never leaves voluntarily
    Fixed,

    /// Join after an exponential delay with mean `arrival_time`
    Exponential,

    /// Join after Exp(`join_interval`), leave after Exp(`leave_interval`)
    Regional {
        /// Departed nodes come back as a new incarnation of the same identity
        #[serde(default)]
        rejoin: bool,
    },
}

/// Methods for picking a transfer partner among eligible peers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerSelection {
    /// First eligible peer in join order
    FirstFit,

    /// Uniformly random eligible peer
    Random,
}

// ============================================================================
// Default Implementations
// ============================================================================

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            max_t: 100.0 * 52.0 * 7.0 * 24.0 * 3600.0,
            seed: None,
            churn: ChurnModel::default(),
            selection: PeerSelection::default(),
            monitor_interval: None,
            repair_threshold: None,
            nodes: Vec::new(),
        }
    }
}

impl Default for ChurnModel {
    fn default() -> Self {
        Self::Fixed
    }
}

impl Default for PeerSelection {
    fn default() -> Self {
        Self::FirstFit
    }
}

// ============================================================================
// Loading and Validation
// ============================================================================

fn positive(context: &str, field: &'static str, value: f64) -> Result<(), ConfigError> {
    // NaN fails too
    if value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NonPositive {
            context: context.to_string(),
            field,
            value,
        })
    }
}

impl BackupConfig {
    /// Parse and validate a YAML scenario
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: BackupConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    /// Reject anything that would make the simulation meaningless
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("scenario", "max_t", self.max_t)?;
        if let Some(interval) = self.monitor_interval {
            positive("scenario", "monitor_interval", interval)?;
        }
        if let Some(threshold) = self.repair_threshold {
            positive("scenario", "repair_threshold", threshold as f64)?;
        }
        if self.nodes.is_empty() {
            return Err(ConfigError::NoNodes);
        }
        for class in &self.nodes {
            class.validate()?;
        }
        Ok(())
    }

    /// Non-fatal warnings about parameters that make backups unlikely
    pub fn advisories(&self) -> Vec<String> {
        let mut notes = Vec::new();
        for class in &self.nodes {
            let spec = class.to_spec(self.churn);
            let speed = spec.upload_speed.min(spec.download_speed) as f64;
            let transfer_time = spec.block_size() as f64 / speed;
            if transfer_time >= spec.average_uptime {
                notes.push(format!(
                    "{}: a block transfer takes {:.0}s but nodes stay online {:.0}s on average; \
                     backups will rarely complete",
                    class.name, transfer_time, spec.average_uptime
                ));
            }
        }
        notes
    }

    /// Expand classes into named node specs: `{class}-{i}`
    pub fn node_specs(&self) -> Vec<(String, NodeSpec)> {
        self.nodes
            .iter()
            .flat_map(|class| {
                let spec = class.to_spec(self.churn);
                (0..class.number).map(move |i| (format!("{}-{}", class.name, i), spec.clone()))
            })
            .collect()
    }
}

impl NodeClassConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ctx = self.name.as_str();
        positive(ctx, "number", self.number as f64)?;
        if self.k == 0 || self.k > self.n {
            return Err(ConfigError::Redundancy {
                context: ctx.to_string(),
                n: self.n,
                k: self.k,
            });
        }
        // block_size = data_size / k, rounded down, must not be zero
        positive(ctx, "data_size", (self.data_size / self.k as Bytes) as f64)?;
        positive(ctx, "upload_speed", self.upload_speed as f64)?;
        positive(ctx, "download_speed", self.download_speed as f64)?;
        positive(ctx, "average_uptime", self.average_uptime)?;
        positive(ctx, "average_downtime", self.average_downtime)?;
        positive(ctx, "average_lifetime", self.average_lifetime)?;
        positive(ctx, "average_recover_time", self.average_recover_time)?;
        if !(self.arrival_time >= 0.0) {
            return Err(ConfigError::NonPositive {
                context: ctx.to_string(),
                field: "arrival_time",
                value: self.arrival_time,
            });
        }
        if let Some(shape) = self.lifetime_shape {
            positive(ctx, "lifetime_shape", shape)?;
        }
        if let Some(interval) = self.join_interval {
            positive(ctx, "join_interval", interval)?;
        }
        if let Some(interval) = self.leave_interval {
            positive(ctx, "leave_interval", interval)?;
        }

        let block_size = self.data_size / self.k as Bytes;
        if (self.storage_size as u128) < (block_size as u128) * (self.n as u128) {
            return Err(ConfigError::InsufficientStorage {
                context: ctx.to_string(),
                storage_size: self.storage_size,
                n: self.n,
                block_size,
            });
        }
        Ok(())
    }

    pub fn to_spec(&self, churn: ChurnModel) -> NodeSpec {
        let (join_interval, leave_interval) = match churn {
            ChurnModel::Regional { .. } => (
                Some(self.join_interval.unwrap_or(DEFAULT_JOIN_INTERVAL)),
                Some(self.leave_interval.unwrap_or(DEFAULT_LEAVE_INTERVAL)),
            ),
            _ => (self.join_interval, self.leave_interval),
        };
        NodeSpec {
            n: self.n,
            k: self.k,
            data_size: self.data_size,
            storage_size: self.storage_size,
            upload_speed: self.upload_speed,
            download_speed: self.download_speed,
            average_uptime: self.average_uptime,
            average_downtime: self.average_downtime,
            average_lifetime: self.average_lifetime,
            average_recover_time: self.average_recover_time,
            arrival_time: self.arrival_time,
            lifetime_shape: self.lifetime_shape,
            region: self.region.clone(),
            join_interval,
            leave_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"
max_t: 10 years
seed: 42
churn:
  model: regional
  rejoin: true
selection: random
monitor_interval: 30 days
nodes:
  - name: server
    number: 2
    n: 10
    k: 8
    data_size: 1 GiB
    storage_size: 10 GiB
    upload_speed: 2 MiB
    download_speed: 10 MiB
    average_uptime: 8 hours
    average_downtime: 16 hours
    average_lifetime: 1 year
    average_recover_time: 3 days
    region: eu
    join_interval: 1 week
  - name: client
    number: 3
    n: 4
    k: 2
    data_size: 100 MB
    storage_size: 1 GB
    upload_speed: 500 kB
    download_speed: 2 MB
    average_uptime: 1 day
    average_downtime: 1 day
    average_lifetime: 2 years
    average_recover_time: 1 day
    arrival_time: 1 hour
    lifetime_shape: 1.5
"#;

    #[test]
    fn test_parse_full_scenario() {
        let config = BackupConfig::from_yaml_str(SCENARIO).unwrap();
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.churn, ChurnModel::Regional { rejoin: true });
        assert_eq!(config.selection, PeerSelection::Random);
        assert_eq!(config.monitor_interval, Some(30.0 * 86_400.0));
        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.nodes[0].data_size, 1024 * 1024 * 1024);
        assert_eq!(config.nodes[1].arrival_time, 3600.0);
        assert_eq!(config.nodes[1].lifetime_shape, Some(1.5));
    }

    #[test]
    fn test_node_specs_are_named_per_class() {
        let config = BackupConfig::from_yaml_str(SCENARIO).unwrap();
        let specs = config.node_specs();
        let names: Vec<&str> = specs.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            vec!["server-0", "server-1", "client-0", "client-1", "client-2"]
        );
        // regional churn fills in the missing interval with its default
        assert_eq!(specs[0].1.join_interval, Some(7.0 * 86_400.0));
        assert_eq!(specs[0].1.leave_interval, Some(DEFAULT_LEAVE_INTERVAL));
        assert_eq!(specs[2].1.block_size(), 50_000_000);
    }

    #[test]
    fn test_defaults_when_omitted() {
        let yaml = r#"
nodes:
  - name: p
    number: 1
    n: 2
    k: 1
    data_size: 10
    storage_size: 20
    upload_speed: 1
    download_speed: 1
    average_uptime: 10
    average_downtime: 10
    average_lifetime: 100
    average_recover_time: 10
"#;
        let config = BackupConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.churn, ChurnModel::Fixed);
        assert_eq!(config.selection, PeerSelection::FirstFit);
        assert_eq!(config.seed, None);
        assert_eq!(config.nodes[0].arrival_time, 0.0);
        assert!(config.max_t > 0.0);
    }

    fn class() -> NodeClassConfig {
        let config = BackupConfig::from_yaml_str(SCENARIO).unwrap();
        config.nodes[1].clone()
    }

    #[test]
    fn test_k_greater_than_n_is_rejected() {
        let mut c = class();
        c.k = c.n + 1;
        assert!(matches!(c.validate(), Err(ConfigError::Redundancy { .. })));
        c.k = 0;
        assert!(matches!(c.validate(), Err(ConfigError::Redundancy { .. })));
    }

    #[test]
    fn test_non_positive_parameters_are_rejected() {
        let mut c = class();
        c.upload_speed = 0;
        assert!(matches!(
            c.validate(),
            Err(ConfigError::NonPositive { field: "upload_speed", .. })
        ));

        let mut c = class();
        c.average_uptime = -1.0;
        assert!(matches!(
            c.validate(),
            Err(ConfigError::NonPositive { field: "average_uptime", .. })
        ));

        let mut c = class();
        c.average_lifetime = f64::NAN;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_blocks_round_down_but_not_to_zero() {
        let mut c = class();
        c.data_size = 2 * c.k as Bytes + 1;
        assert!(c.validate().is_ok());
        assert_eq!(c.to_spec(ChurnModel::Fixed).block_size(), 2);

        c.data_size = c.k as Bytes - 1;
        assert!(matches!(
            c.validate(),
            Err(ConfigError::NonPositive { field: "data_size", .. })
        ));
    }

    #[test]
    fn test_storage_must_hold_own_blocks() {
        let mut c = class();
        c.storage_size = c.data_size; // n=4 blocks of data/2 need twice that
        assert!(matches!(
            c.validate(),
            Err(ConfigError::InsufficientStorage { .. })
        ));
    }

    #[test]
    fn test_empty_and_malformed_scenarios() {
        assert!(matches!(
            BackupConfig::from_yaml_str("max_t: 10\n"),
            Err(ConfigError::NoNodes)
        ));
        assert!(matches!(
            BackupConfig::from_yaml_str("max_t: [1, 2]\nnodes: []\n"),
            Err(ConfigError::Yaml(_))
        ));
        assert!(matches!(
            BackupConfig::from_yaml_str("max_t: 10\nbogus: 1\nnodes: []\n"),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn test_advisory_for_short_uptime() {
        let mut config = BackupConfig::from_yaml_str(SCENARIO).unwrap();
        assert!(config.advisories().is_empty());
        config.nodes[0].average_uptime = 1.0;
        let notes = config.advisories();
        assert_eq!(notes.len(), 1);
        assert!(notes[0].starts_with("server"));
    }

    #[test]
    fn test_shipped_scenarios_load() {
        for yaml in [
            include_str!("../scenarios/p2p.yaml"),
            include_str!("../scenarios/client_server.yaml"),
            include_str!("../scenarios/regions.yaml"),
        ] {
            let config = BackupConfig::from_yaml_str(yaml).unwrap();
            assert!(config.advisories().is_empty());
        }
    }
}
