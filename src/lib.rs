//! # bk_sim - Peer-to-Peer Backup Under Churn
//!
//! A discrete-event simulator for erasure-coded backup among peers that
//! join, disconnect, crash and leave. Each node splits its data into `n`
//! coded blocks (any `k` rebuild it), pushes them to peers with spare
//! storage and pulls them back after losing its disk.
//!
//! ## Core Components
//!
//! - **EventQueue / Simulation**: time-ordered queue and the generic driver
//! - **BackupSim**: node arena, roster, transfers and redundancy metrics
//! - **BackupEvent**: lifecycle timers and transfer completions
//! - **EventSink**: narration, transfer log and in-memory collection
//! - **QueueSim**: supermarket queue model sharing the same driver
//!
//! ```no_run
//! use bk_sim::{BackupConfig, BackupSim};
//! use bk_sim::bk_log::ConsoleEventSink;
//!
//! let config = BackupConfig::from_file("scenarios/p2p.yaml").unwrap();
//! let mut sim = BackupSim::new(&config)
//!     .unwrap()
//!     .with_sink(Box::new(ConsoleEventSink::new(true)));
//! let result = sim.run().unwrap();
//! result.print_summary();
//! ```
//!
//! The `backup_runner` and `queue_runner` binaries in `simulator/` wrap
//! both models behind a command line.

// Simulation core
pub mod bk_interface;
pub mod bk_error;
pub mod bk_scheduler;
pub mod bk_variates;
pub mod bk_units;

// Backup model
pub mod bk_node;
pub mod bk_transfer;
pub mod bk_config;
pub mod bk_backup;
pub mod bk_events;
pub mod bk_stats;
pub mod bk_log;

// Queue model
pub mod bk_queues;

// Re-export commonly used types
pub use bk_backup::BackupSim;
pub use bk_config::{BackupConfig, ChurnModel, NodeClassConfig, PeerSelection};
pub use bk_error::{ConfigError, SchedulingError, SimError};
pub use bk_events::BackupEvent;
pub use bk_interface::{Event, EventSink, NoOpSink, NodeId, SimTime};
pub use bk_queues::{Discipline, QueueConfig, QueueSim};
pub use bk_stats::BackupResult;
