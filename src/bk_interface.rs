// simulated seconds since the start of the run
pub type SimTime = f64;

// dense index into the node arena of a simulation
pub type NodeId = usize;
// index of a coded block inside its owner's n blocks
pub type BlockId = usize;
pub type TransferId = u64;

/// Bytes (sizes) and bytes/second (speeds)
pub type Bytes = u64;

// ============================================================================
// Event Logging System
// ============================================================================

/// Events emitted by the backup simulation for narration and analysis
///
/// These are observations, not the scheduled events that drive the
/// simulation (see `bk_events::BackupEvent`).
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Node became a member of the network
    Joined,
    /// Node departed permanently
    Left,
    /// Node reconnected after downtime or recovery
    WentOnline,
    /// Node disconnected temporarily
    WentOffline,
    /// Node crashed and lost its disk
    Failed,
    /// Failed node is back with an empty disk
    Recovered,
    /// Transfer started between two nodes
    TransferScheduled {
        uploader: String,
        downloader: String,
        block_id: BlockId,
        restore: bool,
        duration: SimTime,
    },
    /// Transfer finished and its block was credited
    TransferCompleted {
        uploader: String,
        downloader: String,
        block_id: BlockId,
        restore: bool,
    },
    /// Transfer voided because one endpoint went away
    TransferCanceled {
        uploader: String,
        downloader: String,
        block_id: BlockId,
    },
    /// At least k blocks are stored on other nodes
    Recoverable,
    /// All n blocks are stored on other nodes
    FullyRedundant,
    /// Dropped below k blocks stored on other nodes
    AtRisk { backed_up: usize },
    /// Fewer than k blocks exist anywhere
    DataLost { available: usize },
    /// Node status after a completed transfer
    BlockCounts {
        local: usize,
        backed_up: usize,
        remote_held: usize,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Joined => "Joined",
            Event::Left => "Left",
            Event::WentOnline => "WentOnline",
            Event::WentOffline => "WentOffline",
            Event::Failed => "Failed",
            Event::Recovered => "Recovered",
            Event::TransferScheduled { .. } => "TransferScheduled",
            Event::TransferCompleted { .. } => "TransferCompleted",
            Event::TransferCanceled { .. } => "TransferCanceled",
            Event::Recoverable => "Recoverable",
            Event::FullyRedundant => "FullyRedundant",
            Event::AtRisk { .. } => "AtRisk",
            Event::DataLost { .. } => "DataLost",
            Event::BlockCounts { .. } => "BlockCounts",
        }
    }
}

/// Trait for consuming events from the simulation
pub trait EventSink {
    fn log(&mut self, time: SimTime, node: &str, event: Event);
}

/// No-op event sink (zero overhead)
pub struct NoOpSink;

impl EventSink for NoOpSink {
    #[inline(always)]
    fn log(&mut self, _time: SimTime, _node: &str, _event: Event) {}
}

// shared sinks let the caller inspect what was logged after the run
impl<T: EventSink> EventSink for std::rc::Rc<std::cell::RefCell<T>> {
    fn log(&mut self, time: SimTime, node: &str, event: Event) {
        self.borrow_mut().log(time, node, event);
    }
}
