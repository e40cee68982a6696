//! Scheduled events of the backup simulation and their handlers
//!
//! Lifecycle timers carry the epoch (session, life or incarnation) they were
//! drawn for. When the node has moved on, the timer no longer matches and
//! the handler does nothing. Events built by callers carry `None` and always
//! apply to the current epoch.

use log::debug;

use crate::bk_backup::BackupSim;
use crate::bk_error::SimError;
use crate::bk_interface::{Event, NodeId, SimTime, TransferId};
use crate::bk_node::NodeState;
use crate::bk_scheduler::{EventQueue, Simulation};
use crate::bk_stats::MonitorSample;
use crate::bk_transfer::TransferKind;
use crate::bk_variates::exp_rv;

#[derive(Debug, Clone, PartialEq)]
pub enum BackupEvent {
    Join { node: NodeId },
    Leave { node: NodeId, incarnation: Option<u32> },
    Online { node: NodeId, session: Option<u32> },
    Offline { node: NodeId, session: Option<u32> },
    Fail { node: NodeId, life: Option<u32> },
    Recover { node: NodeId, life: Option<u32> },
    TransferComplete { transfer: TransferId },
    Monitor { interval: SimTime },
}

impl BackupEvent {
    pub fn leave(node: NodeId) -> Self {
        BackupEvent::Leave {
            node,
            incarnation: None,
        }
    }

    pub fn offline(node: NodeId) -> Self {
        BackupEvent::Offline {
            node,
            session: None,
        }
    }

    pub fn fail(node: NodeId) -> Self {
        BackupEvent::Fail { node, life: None }
    }

    pub fn online(node: NodeId) -> Self {
        BackupEvent::Online {
            node,
            session: None,
        }
    }

    pub fn recover(node: NodeId) -> Self {
        BackupEvent::Recover { node, life: None }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BackupEvent::Join { .. } => "Join",
            BackupEvent::Leave { .. } => "Leave",
            BackupEvent::Online { .. } => "Online",
            BackupEvent::Offline { .. } => "Offline",
            BackupEvent::Fail { .. } => "Fail",
            BackupEvent::Recover { .. } => "Recover",
            BackupEvent::TransferComplete { .. } => "TransferComplete",
            BackupEvent::Monitor { .. } => "Monitor",
        }
    }

    /// The node a lifecycle event targets
    pub fn node(&self) -> Option<NodeId> {
        match self {
            BackupEvent::Join { node }
            | BackupEvent::Leave { node, .. }
            | BackupEvent::Online { node, .. }
            | BackupEvent::Offline { node, .. }
            | BackupEvent::Fail { node, .. }
            | BackupEvent::Recover { node, .. } => Some(*node),
            BackupEvent::TransferComplete { .. } | BackupEvent::Monitor { .. } => None,
        }
    }
}

fn matches_epoch(expected: Option<u32>, current: u32) -> bool {
    expected.map_or(true, |e| e == current)
}

impl Simulation for BackupSim {
    type Event = BackupEvent;

    fn queue_mut(&mut self) -> &mut EventQueue<BackupEvent> {
        &mut self.queue
    }

    fn process(&mut self, event: BackupEvent) -> Result<(), SimError> {
        self.events_processed += 1;
        match event {
            BackupEvent::Join { node } => self.on_join(node),
            BackupEvent::Leave { node, incarnation } => self.on_leave(node, incarnation),
            BackupEvent::Online { node, session } => self.on_online(node, session),
            BackupEvent::Offline { node, session } => self.on_offline(node, session),
            BackupEvent::Fail { node, life } => self.on_fail(node, life),
            BackupEvent::Recover { node, life } => self.on_recover(node, life),
            BackupEvent::TransferComplete { transfer } => self.on_transfer_complete(transfer),
            BackupEvent::Monitor { interval } => self.on_monitor(interval),
        }
    }
}

// ============================================================================
// Lifecycle handlers
// ============================================================================

impl BackupSim {
    fn on_join(&mut self, id: NodeId) -> Result<(), SimError> {
        let rejoining = match self.nodes[id].state {
            NodeState::NotJoined => false,
            NodeState::Left if self.rejoin_allowed() => true,
            state => {
                debug!("{}: join ignored, node is {}", self.nodes[id], state);
                return Ok(());
            }
        };

        let now = self.queue.now();
        let node = &mut self.nodes[id];
        if rejoining {
            // new incarnation: own data intact, nothing backed up anywhere
            node.left = false;
            node.local_blocks.iter_mut().for_each(|b| *b = true);
            node.backed_up_blocks.iter_mut().for_each(|b| *b = None);
        }
        node.state = NodeState::Online;
        node.ever_fully_redundant = false;
        node.session += 1;
        node.life += 1;
        node.incarnation += 1;
        self.roster.insert(id);
        self.metrics[id].rejoin(now);
        self.emit(id, Event::Joined);

        self.schedule_offline(id)?;
        self.schedule_fail(id)?;
        if let Some(leave_interval) = self.nodes[id].spec.leave_interval {
            if self.is_regional() {
                let delay = exp_rv(&mut self.rng, leave_interval);
                let incarnation = Some(self.nodes[id].incarnation);
                self.schedule_event(delay, BackupEvent::Leave { node: id, incarnation })?;
            }
        }

        self.plan_upload(id)?;
        self.plan_download(id)
    }

    fn on_leave(&mut self, id: NodeId, incarnation: Option<u32>) -> Result<(), SimError> {
        let node = &self.nodes[id];
        if !matches!(
            node.state,
            NodeState::Online | NodeState::Offline | NodeState::Failed
        ) || !matches_epoch(incarnation, node.incarnation)
        {
            debug!("{}: stale leave ignored", node);
            return Ok(());
        }

        let counterparts = self.cancel_transfers_of(id);
        let node = &mut self.nodes[id];
        node.state = NodeState::Left;
        node.left = true;
        self.metrics[id].departures += 1;
        self.emit(id, Event::Left);

        let owners = self.drop_held_blocks(id);

        // peers forget what they stored for me
        let block_size = self.nodes[id].block_size();
        let mut holders = Vec::new();
        for b in 0..self.nodes[id].backed_up_blocks.len() {
            if let Some(holder) = self.nodes[id].backed_up_blocks[b].take() {
                let peer = &mut self.nodes[holder];
                peer.remote_blocks_held.shift_remove(&id);
                peer.free_space += block_size;
                holders.push(holder);
            }
        }

        if self.rejoin_allowed() {
            if let Some(join_interval) = self.nodes[id].spec.join_interval {
                let delay = exp_rv(&mut self.rng, join_interval);
                self.schedule_event(delay, BackupEvent::Join { node: id })?;
            }
        }

        self.after_blocks_lost(&owners)?;
        self.replan(&counterparts)?;
        for holder in holders {
            self.plan_download(holder)?;
        }
        Ok(())
    }

    fn on_offline(&mut self, id: NodeId, session: Option<u32>) -> Result<(), SimError> {
        let node = &self.nodes[id];
        if !node.is_online() || !matches_epoch(session, node.session) {
            debug!("{}: stale offline ignored", node);
            return Ok(());
        }

        let counterparts = self.cancel_transfers_of(id);
        self.nodes[id].state = NodeState::Offline;
        self.emit(id, Event::WentOffline);

        let delay = exp_rv(&mut self.rng, self.nodes[id].spec.average_downtime);
        let session = Some(self.nodes[id].session);
        self.schedule_event(delay, BackupEvent::Online { node: id, session })?;
        self.replan(&counterparts)
    }

    fn on_online(&mut self, id: NodeId, session: Option<u32>) -> Result<(), SimError> {
        let node = &self.nodes[id];
        if node.state != NodeState::Offline || !matches_epoch(session, node.session) {
            debug!("{}: stale online ignored, node is {}", node, node.state);
            return Ok(());
        }
        let node = &mut self.nodes[id];
        node.state = NodeState::Online;
        node.session += 1;
        self.emit(id, Event::WentOnline);

        self.schedule_offline(id)?;
        self.plan_upload(id)?;
        self.plan_download(id)
    }

    fn on_fail(&mut self, id: NodeId, life: Option<u32>) -> Result<(), SimError> {
        let node = &self.nodes[id];
        if !node.is_alive() || !matches_epoch(life, node.life) {
            debug!("{}: stale fail ignored", node);
            return Ok(());
        }

        let counterparts = self.cancel_transfers_of(id);
        let now = self.queue.now();
        self.nodes[id].state = NodeState::Failed;
        let metrics = &mut self.metrics[id];
        metrics.failures += 1;
        metrics.failed_at = Some(now);
        self.emit(id, Event::Failed);

        let owners = self.drop_held_blocks(id);
        self.nodes[id].wipe_disk();

        let delay = exp_rv(&mut self.rng, self.nodes[id].spec.average_recover_time);
        let life = Some(self.nodes[id].life);
        self.schedule_event(delay, BackupEvent::Recover { node: id, life })?;

        self.check_data_loss(id);
        self.after_blocks_lost(&owners)?;
        self.replan(&counterparts)
    }

    fn on_recover(&mut self, id: NodeId, life: Option<u32>) -> Result<(), SimError> {
        let node = &self.nodes[id];
        if !matches!(node.state, NodeState::Failed | NodeState::Offline)
            || !matches_epoch(life, node.life)
        {
            debug!("{}: stale recover ignored, node is {}", node, node.state);
            return Ok(());
        }
        let node = &mut self.nodes[id];
        node.state = NodeState::Online;
        node.session += 1;
        node.life += 1;
        self.emit(id, Event::Recovered);

        self.schedule_offline(id)?;
        self.schedule_fail(id)?;
        self.plan_upload(id)?;
        self.plan_download(id)
    }

    // ========================================================================
    // Transfers and probes
    // ========================================================================

    fn on_transfer_complete(&mut self, id: TransferId) -> Result<(), SimError> {
        let Some(transfer) = self.transfers.finish(id) else {
            debug!("transfer {} already gone", id);
            return Ok(());
        };
        let (up, down) = (transfer.uploader, transfer.downloader);
        let owner = transfer.owner();
        let holder = transfer.holder();
        let block = transfer.block_id;

        if !self.nodes[up].is_online() || !self.nodes[down].is_online() {
            return Err(self.invariant(
                up,
                "TransferComplete",
                format!("endpoint offline at completion of transfer {}", id),
            ));
        }

        match transfer.kind {
            TransferKind::Backup => {
                let block_size = self.nodes[owner].block_size();
                let Some(free) = self.nodes[holder].free_space.checked_sub(block_size) else {
                    return Err(self.invariant(
                        holder,
                        "TransferComplete",
                        "holder ran out of space for an accepted block",
                    ));
                };
                self.nodes[holder].free_space = free;
                self.nodes[holder].remote_blocks_held.insert(owner, block);
                self.nodes[owner].backed_up_blocks[block] = Some(holder);
            }
            TransferKind::Restore => {
                let node = &mut self.nodes[owner];
                node.local_blocks[block] = true;
                node.decode_if_possible();
                if node.local_count() == node.spec.n {
                    if let Some(failed_at) = self.metrics[owner].failed_at.take() {
                        let now = self.queue.now();
                        self.samples.time_to_restore.push(now - failed_at);
                    }
                }
            }
        }

        self.nodes[up].current_upload = None;
        self.nodes[down].current_download = None;

        let restore = transfer.kind == TransferKind::Restore;
        let event = Event::TransferCompleted {
            uploader: self.nodes[up].name.clone(),
            downloader: self.nodes[down].name.clone(),
            block_id: block,
            restore,
        };
        self.emit(up, event);
        self.emit_block_counts(up);
        self.emit_block_counts(down);

        self.update_redundancy(owner);
        self.plan_upload(up)?;
        self.plan_download(down)
    }

    fn on_monitor(&mut self, interval: SimTime) -> Result<(), SimError> {
        let mut sample = MonitorSample {
            time: self.queue.now(),
            joined: self.roster.len(),
            transfers_in_flight: self.transfers.len(),
            ..Default::default()
        };
        for &id in &self.roster {
            let node = &self.nodes[id];
            match node.state {
                NodeState::Online => sample.online += 1,
                NodeState::Offline => sample.offline += 1,
                NodeState::Failed => sample.failed += 1,
                NodeState::Left => sample.left += 1,
                NodeState::NotJoined => {}
            }
            if node.state != NodeState::Left {
                sample.recoverable += node.is_recoverable() as usize;
                sample.fully_redundant += node.is_fully_redundant() as usize;
            }
        }
        self.history.push(sample);
        self.schedule_event(interval, BackupEvent::Monitor { interval })
    }
}
