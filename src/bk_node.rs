use indexmap::IndexMap;

use crate::bk_interface::{BlockId, Bytes, NodeId, SimTime, TransferId};
use crate::bk_variates::Variate;

// ============================================================================
// Static parameters
// ============================================================================

/// Parameters shared by every node of a class
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSpec {
    /// Coded blocks the data is split into
    pub n: usize,
    /// Blocks needed to reconstruct the data
    pub k: usize,
    pub data_size: Bytes,
    /// Capacity offered to others plus room for the node's own n blocks
    pub storage_size: Bytes,
    pub upload_speed: Bytes,
    pub download_speed: Bytes,
    pub average_uptime: SimTime,
    pub average_downtime: SimTime,
    pub average_lifetime: SimTime,
    pub average_recover_time: SimTime,
    pub arrival_time: SimTime,
    /// Weibull shape for lifetimes; exponential when unset
    pub lifetime_shape: Option<f64>,
    pub region: Option<String>,
    pub join_interval: Option<SimTime>,
    pub leave_interval: Option<SimTime>,
}

impl NodeSpec {
    /// Each coded block carries 1/k of the data
    ///
    /// Rounded down to whole bytes, so `k` blocks may fall up to `k - 1`
    /// bytes short of `data_size`. Sizes, free space and transfer times all
    /// use this rounded value.
    pub fn block_size(&self) -> Bytes {
        self.data_size / self.k as Bytes
    }

    /// Space left for others once the node's own n blocks are stored
    pub fn initial_free_space(&self) -> i128 {
        self.storage_size as i128 - (self.block_size() as i128) * (self.n as i128)
    }

    pub fn lifetime(&self) -> Variate {
        Variate::with_shape(self.lifetime_shape, self.average_lifetime)
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Lifecycle states of a node
///
/// ```text
/// NotJoined -> Online <-> Offline
///              Online|Offline -> Failed -> Online (recover)
///              Online|Offline|Failed -> Left
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    NotJoined,
    Online,
    Offline,
    Failed,
    Left,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeState::NotJoined => "not-joined",
            NodeState::Online => "online",
            NodeState::Offline => "offline",
            NodeState::Failed => "failed",
            NodeState::Left => "left",
        };
        f.write_str(s)
    }
}

/// A peer of the backup network
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub spec: NodeSpec,

    pub state: NodeState,
    /// Set once the node departs for good; the record stays for metrics
    pub left: bool,

    /// Outbound transfer, at most one
    pub current_upload: Option<TransferId>,
    /// Inbound transfer, at most one
    pub current_download: Option<TransferId>,

    /// Which of my n blocks I hold myself
    pub local_blocks: Vec<bool>,
    /// Who stores my block i
    pub backed_up_blocks: Vec<Option<NodeId>>,
    /// Owner -> block I store for them, in the order I accepted them
    pub remote_blocks_held: IndexMap<NodeId, BlockId>,
    /// Spare capacity for other nodes' blocks
    pub free_space: Bytes,

    // epochs used to recognize stale timers
    pub(crate) session: u32,
    pub(crate) life: u32,
    pub(crate) incarnation: u32,

    /// Reached full redundancy at least once in this incarnation
    pub(crate) ever_fully_redundant: bool,
}

impl Node {
    /// Build a node that has not joined yet
    ///
    /// Callers validate the class first, free space is clamped at zero here.
    pub fn new(id: NodeId, name: String, spec: NodeSpec) -> Self {
        let free_space = spec.initial_free_space().max(0) as Bytes;
        Self {
            id,
            name,
            local_blocks: vec![true; spec.n],
            backed_up_blocks: vec![None; spec.n],
            remote_blocks_held: IndexMap::new(),
            free_space,
            spec,
            state: NodeState::NotJoined,
            left: false,
            current_upload: None,
            current_download: None,
            session: 0,
            life: 0,
            incarnation: 0,
            ever_fully_redundant: false,
        }
    }

    pub fn block_size(&self) -> Bytes {
        self.spec.block_size()
    }

    pub fn is_online(&self) -> bool {
        self.state == NodeState::Online
    }

    /// Stores blocks (its own or others'); offline nodes still do
    pub fn is_alive(&self) -> bool {
        matches!(self.state, NodeState::Online | NodeState::Offline)
    }

    pub fn local_count(&self) -> usize {
        self.local_blocks.iter().filter(|&&b| b).count()
    }

    /// My blocks currently stored on other nodes
    pub fn backed_up_count(&self) -> usize {
        self.backed_up_blocks.iter().filter(|b| b.is_some()).count()
    }

    /// Distinct blocks of mine that exist anywhere
    pub fn available_count(&self) -> usize {
        self.local_blocks
            .iter()
            .zip(&self.backed_up_blocks)
            .filter(|(local, remote)| **local || remote.is_some())
            .count()
    }

    /// Enough blocks live elsewhere to rebuild my data without me
    pub fn is_recoverable(&self) -> bool {
        self.backed_up_count() >= self.spec.k
    }

    pub fn is_fully_redundant(&self) -> bool {
        self.backed_up_count() == self.spec.n
    }

    /// First block held locally that nobody backs up yet
    pub fn find_block_to_back_up(&self) -> Option<BlockId> {
        self.local_blocks
            .iter()
            .zip(&self.backed_up_blocks)
            .position(|(local, remote)| *local && remote.is_none())
    }

    /// Does `peer` already store one of my blocks
    pub fn is_backed_up_on(&self, peer: NodeId) -> bool {
        self.backed_up_blocks.iter().any(|b| *b == Some(peer))
    }

    /// Forget everything stored on disk (own and others' blocks)
    pub(crate) fn wipe_disk(&mut self) {
        self.local_blocks.iter_mut().for_each(|b| *b = false);
        self.remote_blocks_held.clear();
        self.free_space = self.spec.initial_free_space().max(0) as Bytes;
    }

    /// Having k distinct blocks is enough to decode all n
    pub(crate) fn decode_if_possible(&mut self) -> bool {
        if self.local_count() >= self.spec.k && self.local_count() < self.spec.n {
            self.local_blocks.iter_mut().for_each(|b| *b = true);
            return true;
        }
        false
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn spec(n: usize, k: usize) -> NodeSpec {
        NodeSpec {
            n,
            k,
            data_size: 100 * k as Bytes,
            storage_size: 100 * n as Bytes + 1_000,
            upload_speed: 10,
            download_speed: 10,
            average_uptime: 1e12,
            average_downtime: 1.0,
            average_lifetime: 1e12,
            average_recover_time: 1.0,
            arrival_time: 0.0,
            lifetime_shape: None,
            region: None,
            join_interval: None,
            leave_interval: None,
        }
    }

    #[test]
    fn test_block_size_and_free_space() {
        let node = Node::new(0, "a-0".into(), spec(4, 2));
        assert_eq!(node.block_size(), 100);
        assert_eq!(node.free_space, 1_000);
        assert_eq!(node.local_count(), 4);
        assert_eq!(node.state, NodeState::NotJoined);
    }

    #[test]
    fn test_block_size_rounds_down() {
        let mut uneven = spec(3, 3);
        uneven.data_size = 20;
        uneven.storage_size = 30;
        assert_eq!(uneven.block_size(), 6);
        assert_eq!(uneven.initial_free_space(), 12);
    }

    #[test]
    fn test_find_block_to_back_up_skips_backed_up() {
        let mut node = Node::new(0, "a-0".into(), spec(3, 2));
        assert_eq!(node.find_block_to_back_up(), Some(0));
        node.backed_up_blocks[0] = Some(5);
        assert_eq!(node.find_block_to_back_up(), Some(1));
        node.local_blocks[1] = false;
        assert_eq!(node.find_block_to_back_up(), Some(2));
        node.backed_up_blocks[2] = Some(6);
        assert_eq!(node.find_block_to_back_up(), None);
        assert!(node.is_backed_up_on(5));
        assert!(!node.is_backed_up_on(7));
    }

    #[test]
    fn test_redundancy_predicates() {
        let mut node = Node::new(0, "a-0".into(), spec(3, 2));
        assert!(!node.is_recoverable());
        node.backed_up_blocks[0] = Some(1);
        node.backed_up_blocks[1] = Some(2);
        assert!(node.is_recoverable());
        assert!(!node.is_fully_redundant());
        node.backed_up_blocks[2] = Some(3);
        assert!(node.is_fully_redundant());
    }

    #[test]
    fn test_wipe_and_decode() {
        let mut node = Node::new(0, "a-0".into(), spec(4, 2));
        node.remote_blocks_held.insert(9, 1);
        node.free_space = 0;
        node.wipe_disk();
        assert_eq!(node.local_count(), 0);
        assert!(node.remote_blocks_held.is_empty());
        assert_eq!(node.free_space, 1_000);
        assert_eq!(node.available_count(), 0);

        node.local_blocks[3] = true;
        assert!(!node.decode_if_possible());
        node.local_blocks[1] = true;
        assert!(node.decode_if_possible());
        assert_eq!(node.local_count(), 4);
    }
}
