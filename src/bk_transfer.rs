//! In-flight block transfers
//!
//! Transfers live in an arena keyed by `TransferId`; nodes only keep the id
//! in their upload/download slot, so a transfer and its two endpoints never
//! own each other.

use hashbrown::HashMap;

use crate::bk_interface::{BlockId, NodeId, SimTime, TransferId};

/// Direction of a transfer relative to the data owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// Owner sends one of its blocks to a holder
    Backup,
    /// Holder sends a block back to its owner
    Restore,
}

impl TransferKind {
    /// Name used in the transfer log
    pub fn completion_name(&self) -> &'static str {
        match self {
            TransferKind::Backup => "BlockBackupComplete",
            TransferKind::Restore => "BlockRestoreComplete",
        }
    }
}

/// One block moving from `uploader` to `downloader`
#[derive(Debug, Clone, PartialEq)]
pub struct Transfer {
    pub id: TransferId,
    pub uploader: NodeId,
    pub downloader: NodeId,
    /// Index among the owner's blocks
    pub block_id: BlockId,
    pub kind: TransferKind,
    pub started: SimTime,
    pub completes: SimTime,
    pub canceled: bool,
}

impl Transfer {
    /// The node whose data the block belongs to
    pub fn owner(&self) -> NodeId {
        match self.kind {
            TransferKind::Backup => self.uploader,
            TransferKind::Restore => self.downloader,
        }
    }

    /// The node storing the block on behalf of the owner
    pub fn holder(&self) -> NodeId {
        match self.kind {
            TransferKind::Backup => self.downloader,
            TransferKind::Restore => self.uploader,
        }
    }

    pub fn involves(&self, node: NodeId) -> bool {
        self.uploader == node || self.downloader == node
    }
}

/// Counters kept by the table over the whole run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransferCounts {
    pub started: usize,
    pub completed_backups: usize,
    pub completed_restores: usize,
    pub canceled: usize,
}

/// Arena of active transfers
#[derive(Debug, Default)]
pub struct TransferTable {
    active: HashMap<TransferId, Transfer>,
    next_id: TransferId,
    counts: TransferCounts,
}

impl TransferTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new transfer and hand out its id
    pub fn open(
        &mut self,
        uploader: NodeId,
        downloader: NodeId,
        block_id: BlockId,
        kind: TransferKind,
        started: SimTime,
        completes: SimTime,
    ) -> TransferId {
        let id = self.next_id;
        self.next_id += 1;
        self.active.insert(
            id,
            Transfer {
                id,
                uploader,
                downloader,
                block_id,
                kind,
                started,
                completes,
                canceled: false,
            },
        );
        self.counts.started += 1;
        id
    }

    pub fn get(&self, id: TransferId) -> Option<&Transfer> {
        self.active.get(&id)
    }

    /// Remove a transfer that reached its completion time
    ///
    /// Returns `None` for ids that were canceled (or never existed).
    pub fn finish(&mut self, id: TransferId) -> Option<Transfer> {
        let transfer = self.active.remove(&id)?;
        if transfer.canceled {
            return None;
        }
        match transfer.kind {
            TransferKind::Backup => self.counts.completed_backups += 1,
            TransferKind::Restore => self.counts.completed_restores += 1,
        }
        Some(transfer)
    }

    /// Void a transfer; its completion event will find nothing
    pub fn cancel(&mut self, id: TransferId) -> Option<Transfer> {
        let mut transfer = self.active.remove(&id)?;
        transfer.canceled = true;
        self.counts.canceled += 1;
        Some(transfer)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transfer> {
        self.active.values()
    }

    pub fn counts(&self) -> &TransferCounts {
        &self.counts
    }
}
