// Backup Simulation

use indexmap::IndexSet;
use log::{debug, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::bk_config::{BackupConfig, ChurnModel, PeerSelection};
use crate::bk_error::{ConfigError, SchedulingError, SimError};
use crate::bk_events::BackupEvent;
use crate::bk_interface::{BlockId, Event, EventSink, NoOpSink, NodeId, SimTime, TransferId};
use crate::bk_node::{Node, NodeState};
use crate::bk_scheduler::{self, EventQueue, Simulation};
use crate::bk_stats::{BackupResult, DurationSamples, MonitorSample, NodeMetrics, NodeSummary};
use crate::bk_transfer::{Transfer, TransferKind, TransferTable};
use crate::bk_variates::exp_rv;

// ============================================================================
// Core Structures
// ============================================================================

/// Peer-to-peer backup network under churn
pub struct BackupSim {
    pub(crate) nodes: Vec<Node>,
    /// Nodes that joined at least once, in join order
    pub(crate) roster: IndexSet<NodeId>,

    pub(crate) queue: EventQueue<BackupEvent>,
    pub(crate) rng: StdRng,
    seed_used: u64,
    max_t: SimTime,

    pub(crate) transfers: TransferTable,
    pub(crate) sink: Box<dyn EventSink>,

    churn: ChurnModel,
    selection: PeerSelection,
    repair_threshold: Option<usize>,

    // Metrics tracking
    pub(crate) metrics: Vec<NodeMetrics>,
    pub(crate) samples: DurationSamples,
    pub(crate) history: Vec<MonitorSample>,
    pub(crate) events_processed: usize,
}

// ============================================================================
// Implementation
// ============================================================================

impl BackupSim {
    /// Build the network and schedule every node's arrival
    pub fn new(config: &BackupConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        for note in config.advisories() {
            warn!("{}", note);
        }

        let seed_used = config.seed.unwrap_or_else(|| rand::thread_rng().gen());
        let nodes: Vec<Node> = config
            .node_specs()
            .into_iter()
            .enumerate()
            .map(|(id, (name, spec))| Node::new(id, name, spec))
            .collect();
        let count = nodes.len();

        let mut sim = Self {
            nodes,
            roster: IndexSet::with_capacity(count),
            queue: EventQueue::new(),
            rng: StdRng::seed_from_u64(seed_used),
            seed_used,
            max_t: config.max_t,
            transfers: TransferTable::new(),
            sink: Box::new(NoOpSink),
            churn: config.churn,
            selection: config.selection,
            repair_threshold: config.repair_threshold,
            metrics: vec![NodeMetrics::default(); count],
            samples: DurationSamples::default(),
            history: Vec::new(),
            events_processed: 0,
        };
        sim.schedule_arrivals()?;
        if let Some(interval) = config.monitor_interval {
            // validated positive above
            let _ = sim.queue.schedule(0.0, BackupEvent::Monitor { interval });
        }
        Ok(sim)
    }

    pub fn with_sink(mut self, sink: Box<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    fn schedule_arrivals(&mut self) -> Result<(), ConfigError> {
        for id in 0..self.nodes.len() {
            let spec = &self.nodes[id].spec;
            let (field, value) = match self.churn {
                ChurnModel::Fixed => ("arrival_time", spec.arrival_time),
                ChurnModel::Exponential => {
                    let mean = spec.arrival_time;
                    ("arrival_time", exp_rv(&mut self.rng, mean))
                }
                ChurnModel::Regional { .. } => {
                    let mean = spec.join_interval.unwrap_or(spec.arrival_time);
                    ("join_interval", exp_rv(&mut self.rng, mean))
                }
            };
            if self
                .queue
                .schedule_at(value, BackupEvent::Join { node: id })
                .is_err()
            {
                return Err(ConfigError::NonPositive {
                    context: self.nodes[id].name.clone(),
                    field,
                    value,
                });
            }
        }
        Ok(())
    }

    // ========================================================================
    // Driving
    // ========================================================================

    /// Run to the configured horizon
    pub fn run(&mut self) -> Result<BackupResult, SimError> {
        let until = self.max_t;
        self.run_until(until)?;
        Ok(self.result())
    }

    /// Process every event due no later than `until`
    pub fn run_until(&mut self, until: SimTime) -> Result<usize, SimError> {
        bk_scheduler::run(self, until)
    }

    /// Process a single event due no later than `until`
    ///
    /// Returns `false` once nothing is left before the horizon.
    pub fn step(&mut self, until: SimTime) -> Result<bool, SimError> {
        match self.queue.pop_until(until) {
            Some(event) => {
                self.process(event)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Inject an event `delay` seconds from now
    pub fn schedule_event(&mut self, delay: SimTime, event: BackupEvent) -> Result<(), SimError> {
        let name = event.name();
        let node = event.node();
        if let Some(id) = node {
            if self.nodes[id].state == NodeState::Left && !self.rejoin_allowed() {
                return Err(SimError::Scheduling {
                    time: self.queue.now(),
                    node: self.nodes[id].name.clone(),
                    event: name,
                    source: SchedulingError::TerminalNode {
                        node: self.nodes[id].name.clone(),
                    },
                });
            }
        }
        self.queue
            .schedule(delay, event)
            .map_err(|source| SimError::Scheduling {
                time: self.queue.now(),
                node: node.map(|id| self.nodes[id].name.clone()).unwrap_or_default(),
                event: name,
                source,
            })
    }

    pub(crate) fn schedule_offline(&mut self, id: NodeId) -> Result<(), SimError> {
        let delay = exp_rv(&mut self.rng, self.nodes[id].spec.average_uptime);
        let session = Some(self.nodes[id].session);
        self.schedule_event(delay, BackupEvent::Offline { node: id, session })
    }

    pub(crate) fn schedule_fail(&mut self, id: NodeId) -> Result<(), SimError> {
        let delay = self.nodes[id].spec.lifetime().sample(&mut self.rng);
        let life = Some(self.nodes[id].life);
        self.schedule_event(delay, BackupEvent::Fail { node: id, life })
    }

    pub(crate) fn is_regional(&self) -> bool {
        matches!(self.churn, ChurnModel::Regional { .. })
    }

    pub(crate) fn rejoin_allowed(&self) -> bool {
        matches!(self.churn, ChurnModel::Regional { rejoin: true })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn now(&self) -> SimTime {
        self.queue.now()
    }

    pub fn seed_used(&self) -> u64 {
        self.seed_used
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn node_by_name(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Joined nodes in join order
    pub fn roster(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.roster.iter().copied()
    }

    pub fn transfers(&self) -> &TransferTable {
        &self.transfers
    }

    pub fn metrics(&self, id: NodeId) -> &NodeMetrics {
        &self.metrics[id]
    }

    pub fn samples(&self) -> &DurationSamples {
        &self.samples
    }

    // ========================================================================
    // Event emission
    // ========================================================================

    pub(crate) fn emit(&mut self, id: NodeId, event: Event) {
        let now = self.queue.now();
        self.sink.log(now, &self.nodes[id].name, event);
    }

    pub(crate) fn emit_block_counts(&mut self, id: NodeId) {
        let node = &self.nodes[id];
        let event = Event::BlockCounts {
            local: node.local_count(),
            backed_up: node.backed_up_count(),
            remote_held: node.remote_blocks_held.len(),
        };
        self.emit(id, event);
    }

    pub(crate) fn invariant(
        &self,
        id: NodeId,
        event: &'static str,
        detail: impl Into<String>,
    ) -> SimError {
        SimError::Invariant {
            time: self.queue.now(),
            node: self.nodes[id].name.clone(),
            event,
            detail: detail.into(),
        }
    }

    // ========================================================================
    // Transfers
    // ========================================================================

    /// Open a transfer and schedule its completion
    pub(crate) fn start_transfer(
        &mut self,
        up: NodeId,
        down: NodeId,
        block: BlockId,
        kind: TransferKind,
    ) -> Result<TransferId, SimError> {
        let (uploader, downloader) = (&self.nodes[up], &self.nodes[down]);
        let owner = if kind == TransferKind::Backup { uploader } else { downloader };
        let block_size = owner.block_size();

        let problem = if !uploader.is_online() || !downloader.is_online() {
            Some("both endpoints must be online")
        } else if uploader.current_upload.is_some() {
            Some("uploader is already uploading")
        } else if downloader.current_download.is_some() {
            Some("downloader is already downloading")
        } else {
            match kind {
                TransferKind::Backup if downloader.remote_blocks_held.contains_key(&up) => {
                    Some("holder already stores a block of this owner")
                }
                TransferKind::Backup if downloader.free_space < block_size => {
                    Some("holder lacks free space")
                }
                TransferKind::Restore if downloader.local_blocks[block] => {
                    Some("owner already has the block")
                }
                _ => None,
            }
        };
        if let Some(detail) = problem {
            return Err(self.invariant(up, "start_transfer", detail));
        }

        let speed = uploader.spec.upload_speed.min(downloader.spec.download_speed);
        let duration = block_size as SimTime / speed as SimTime;
        let now = self.queue.now();
        let id = self
            .transfers
            .open(up, down, block, kind, now, now + duration);
        self.nodes[up].current_upload = Some(id);
        self.nodes[down].current_download = Some(id);

        debug!(
            "{} -> {}: {:?} of block {} for {:.1}s",
            self.nodes[up], self.nodes[down], kind, block, duration
        );
        let event = Event::TransferScheduled {
            uploader: self.nodes[up].name.clone(),
            downloader: self.nodes[down].name.clone(),
            block_id: block,
            restore: kind == TransferKind::Restore,
            duration,
        };
        self.emit(up, event);

        self.schedule_event(duration, BackupEvent::TransferComplete { transfer: id })?;
        Ok(id)
    }

    fn emit_canceled(&mut self, transfer: &Transfer) {
        let event = Event::TransferCanceled {
            uploader: self.nodes[transfer.uploader].name.clone(),
            downloader: self.nodes[transfer.downloader].name.clone(),
            block_id: transfer.block_id,
        };
        self.emit(transfer.uploader, event);
    }

    /// Void both slots of `id` and free the counterparts' slots
    ///
    /// Returns the counterparts, which should look for new work once the
    /// node's new state is in place.
    pub(crate) fn cancel_transfers_of(&mut self, id: NodeId) -> Vec<NodeId> {
        let mut counterparts = Vec::new();
        if let Some(tid) = self.nodes[id].current_upload.take() {
            if let Some(transfer) = self.transfers.cancel(tid) {
                self.nodes[transfer.downloader].current_download = None;
                self.emit_canceled(&transfer);
                counterparts.push(transfer.downloader);
            }
        }
        if let Some(tid) = self.nodes[id].current_download.take() {
            if let Some(transfer) = self.transfers.cancel(tid) {
                self.nodes[transfer.uploader].current_upload = None;
                self.emit_canceled(&transfer);
                counterparts.push(transfer.uploader);
            }
        }
        counterparts
    }

    /// Lose every block `id` stores for others; returns the affected owners
    pub(crate) fn drop_held_blocks(&mut self, id: NodeId) -> Vec<NodeId> {
        let held = std::mem::take(&mut self.nodes[id].remote_blocks_held);
        let node = &mut self.nodes[id];
        node.free_space = node.spec.initial_free_space().max(0) as u64;

        let mut owners = Vec::with_capacity(held.len());
        for (owner, block) in held {
            let slot = &mut self.nodes[owner].backed_up_blocks[block];
            if *slot == Some(id) {
                *slot = None;
                owners.push(owner);
            }
        }
        owners
    }

    /// Owners whose blocks vanished check their data and start repairs
    pub(crate) fn after_blocks_lost(&mut self, owners: &[NodeId]) -> Result<(), SimError> {
        for &owner in owners {
            self.update_redundancy(owner);
            self.check_data_loss(owner);
        }
        for &owner in owners {
            self.plan_upload(owner)?;
        }
        Ok(())
    }

    pub(crate) fn replan(&mut self, nodes: &[NodeId]) -> Result<(), SimError> {
        for &id in nodes {
            self.plan_upload(id)?;
            self.plan_download(id)?;
        }
        Ok(())
    }

    fn pick<T: Copy>(&mut self, candidates: &[T]) -> Option<T> {
        match self.selection {
            PeerSelection::FirstFit => candidates.first().copied(),
            PeerSelection::Random => candidates.choose(&mut self.rng).copied(),
        }
    }

    /// Keep uploading until fully redundant once, then repair below the threshold
    fn wants_backup(&self, id: NodeId) -> bool {
        let node = &self.nodes[id];
        let threshold = self.repair_threshold.unwrap_or(node.spec.n).min(node.spec.n);
        !node.ever_fully_redundant || node.backed_up_count() < threshold
    }

    /// Fill the upload slot: restores first, then my own backups
    pub(crate) fn plan_upload(&mut self, id: NodeId) -> Result<(), SimError> {
        let node = &self.nodes[id];
        if !node.is_online() || node.current_upload.is_some() {
            return Ok(());
        }

        let restores: Vec<(NodeId, BlockId)> = node
            .remote_blocks_held
            .iter()
            .filter(|&(&owner, &block)| {
                let o = &self.nodes[owner];
                o.is_online()
                    && o.current_download.is_none()
                    && !o.local_blocks[block]
                    && o.available_count() >= o.spec.k
            })
            .map(|(&owner, &block)| (owner, block))
            .collect();
        if let Some((owner, block)) = self.pick(&restores) {
            self.start_transfer(id, owner, block, TransferKind::Restore)?;
            return Ok(());
        }

        if !self.wants_backup(id) {
            return Ok(());
        }
        let node = &self.nodes[id];
        let Some(block) = node.find_block_to_back_up() else {
            return Ok(());
        };
        let block_size = node.block_size();
        let peers: Vec<NodeId> = self
            .roster
            .iter()
            .copied()
            .filter(|&p| {
                let peer = &self.nodes[p];
                p != id
                    && peer.is_online()
                    && peer.current_download.is_none()
                    && !node.is_backed_up_on(p)
                    && peer.free_space >= block_size
            })
            .collect();
        if let Some(peer) = self.pick(&peers) {
            self.start_transfer(id, peer, block, TransferKind::Backup)?;
        }
        Ok(())
    }

    /// Fill the download slot: my missing blocks first, then others' backups
    pub(crate) fn plan_download(&mut self, id: NodeId) -> Result<(), SimError> {
        let node = &self.nodes[id];
        if !node.is_online() || node.current_download.is_some() {
            return Ok(());
        }

        if node.available_count() >= node.spec.k {
            let restores: Vec<(NodeId, BlockId)> = (0..node.spec.n)
                .filter(|&b| !node.local_blocks[b])
                .filter_map(|b| node.backed_up_blocks[b].map(|holder| (holder, b)))
                .filter(|&(holder, _)| {
                    let h = &self.nodes[holder];
                    h.is_online() && h.current_upload.is_none()
                })
                .collect();
            if let Some((holder, block)) = self.pick(&restores) {
                self.start_transfer(holder, id, block, TransferKind::Restore)?;
                return Ok(());
            }
        }

        let node = &self.nodes[id];
        let offers: Vec<(NodeId, BlockId)> = self
            .roster
            .iter()
            .copied()
            .filter(|&p| {
                let peer = &self.nodes[p];
                p != id
                    && peer.is_online()
                    && peer.current_upload.is_none()
                    && !node.remote_blocks_held.contains_key(&p)
                    && node.free_space >= peer.block_size()
                    && self.wants_backup(p)
            })
            .filter_map(|p| self.nodes[p].find_block_to_back_up().map(|b| (p, b)))
            .collect();
        if let Some((peer, block)) = self.pick(&offers) {
            self.start_transfer(peer, id, block, TransferKind::Backup)?;
        }
        Ok(())
    }

    // ========================================================================
    // Redundancy bookkeeping
    // ========================================================================

    /// Record threshold crossings after `owner`'s remote block set changed
    pub(crate) fn update_redundancy(&mut self, owner: NodeId) {
        let now = self.queue.now();
        let node = &self.nodes[owner];
        let backed_up = node.backed_up_count();
        let recoverable = node.is_recoverable();
        let fully_redundant = node.is_fully_redundant();
        let ever_full = node.ever_fully_redundant;

        let metrics = &mut self.metrics[owner];
        let joined_at = metrics.joined_at.unwrap_or(0.0);
        let mut events = Vec::new();

        if recoverable && !metrics.recoverable {
            metrics.recoverable = true;
            if metrics.recoverable_at.is_none() {
                metrics.recoverable_at = Some(now);
                self.samples.time_to_recoverable.push(now - joined_at);
            }
            events.push(Event::Recoverable);
        } else if !recoverable && metrics.recoverable {
            metrics.recoverable = false;
            events.push(Event::AtRisk { backed_up });
        }

        if fully_redundant {
            if !ever_full {
                metrics.fully_redundant_at = Some(now);
                self.samples.time_to_full_redundancy.push(now - joined_at);
                self.nodes[owner].ever_fully_redundant = true;
                events.push(Event::FullyRedundant);
            } else if let Some(since) = metrics.degraded_since.take() {
                self.samples.time_to_re_redundancy.push(now - since);
                events.push(Event::FullyRedundant);
            }
        } else if ever_full && metrics.degraded_since.is_none() {
            metrics.degraded_since = Some(now);
        }

        for event in events {
            self.emit(owner, event);
        }
    }

    /// Mark the data lost once fewer than k blocks survive
    pub(crate) fn check_data_loss(&mut self, id: NodeId) {
        let node = &self.nodes[id];
        if node.left || self.metrics[id].data_lost_at.is_some() {
            return;
        }
        let available = node.available_count();
        if available < node.spec.k {
            let metrics = &mut self.metrics[id];
            metrics.data_lost_at = Some(self.queue.now());
            metrics.data_losses += 1;
            self.emit(id, Event::DataLost { available });
        }
    }

    // ========================================================================
    // Checks and results
    // ========================================================================

    /// Slot symmetry and block bookkeeping agree across the network
    pub fn check_invariants(&self) -> Result<(), String> {
        for node in &self.nodes {
            if let Some(tid) = node.current_upload {
                let t = self
                    .transfers
                    .get(tid)
                    .ok_or_else(|| format!("{}: upload slot holds dead transfer {}", node, tid))?;
                if t.uploader != node.id || self.nodes[t.downloader].current_download != Some(tid) {
                    return Err(format!("{}: upload slot {} is one-sided", node, tid));
                }
            }
            if let Some(tid) = node.current_download {
                let t = self
                    .transfers
                    .get(tid)
                    .ok_or_else(|| format!("{}: download slot holds dead transfer {}", node, tid))?;
                if t.downloader != node.id || self.nodes[t.uploader].current_upload != Some(tid) {
                    return Err(format!("{}: download slot {} is one-sided", node, tid));
                }
            }
            let busy = node.current_upload.is_some() || node.current_download.is_some();
            if busy && !node.is_online() {
                return Err(format!("{} is {} but still transferring", node, node.state));
            }
            for (block, holder) in node.backed_up_blocks.iter().enumerate() {
                let Some(h) = holder.map(|h| &self.nodes[h]) else {
                    continue;
                };
                if h.remote_blocks_held.get(&node.id) != Some(&block) {
                    return Err(format!("{}: block {} not held by {}", node, block, h));
                }
            }
        }
        for t in self.transfers.iter() {
            if self.nodes[t.uploader].current_upload != Some(t.id)
                || self.nodes[t.downloader].current_download != Some(t.id)
            {
                return Err(format!("transfer {} is not linked to its endpoints", t.id));
            }
        }
        Ok(())
    }

    pub fn result(&self) -> BackupResult {
        BackupResult {
            seed_used: self.seed_used,
            max_t: self.max_t,
            end_time: self.queue.now(),
            events_processed: self.events_processed,
            transfers: self.transfers.counts().clone(),
            samples: self.samples.clone(),
            nodes: self
                .nodes
                .iter()
                .zip(&self.metrics)
                .map(|(node, metrics)| NodeSummary {
                    name: node.name.clone(),
                    state: node.state.to_string(),
                    local_blocks: node.local_count(),
                    backed_up_blocks: node.backed_up_count(),
                    remote_blocks_held: node.remote_blocks_held.len(),
                    metrics: metrics.clone(),
                })
                .collect(),
            history: self.history.clone(),
        }
    }
}
