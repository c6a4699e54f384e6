//! Per-node device ledger for detecting binding collisions

use rankbind_core::{Rank, RankbindResult, TopologyMismatch};
use std::collections::HashMap;
use tracing::{debug, info};

/// Tracks which process holds each device on each node
pub struct DeviceLedger {
    /// Devices available on every node
    devices_per_node: u32,
    /// (node, local rank) -> holding global rank
    claimed: HashMap<(u32, Rank), Rank>,
    /// Number of nodes in the job
    node_count: u32,
}

impl DeviceLedger {
    /// Create a ledger for `node_count` nodes of `devices_per_node` devices
    pub fn new(node_count: u32, devices_per_node: u32) -> Self {
        Self {
            devices_per_node,
            claimed: HashMap::new(),
            node_count,
        }
    }

    /// Total number of devices in the job
    pub fn total_count(&self) -> u64 {
        u64::from(self.node_count) * u64::from(self.devices_per_node)
    }

    /// Number of devices nobody has claimed
    pub fn available_count(&self) -> u64 {
        self.total_count() - self.claimed.len() as u64
    }

    /// Bind `global_rank` to device `local_rank` on `node`
    pub fn claim(&mut self, node: u32, local_rank: Rank, global_rank: Rank) -> RankbindResult<()> {
        if local_rank >= self.devices_per_node || node >= self.node_count {
            return Err(TopologyMismatch::DeviceOutOfRange {
                node,
                local_rank,
                devices_per_node: self.devices_per_node,
            }
            .into());
        }

        if let Some(holder) = self.claimed.get(&(node, local_rank)) {
            return Err(TopologyMismatch::DeviceCollision {
                node,
                local_rank,
                holder: *holder,
                claimant: global_rank,
            }
            .into());
        }

        self.claimed.insert((node, local_rank), global_rank);
        debug!(node, device = local_rank, rank = global_rank, "Claimed device");
        Ok(())
    }

    /// Release a previously claimed device
    pub fn release(&mut self, node: u32, local_rank: Rank) {
        if let Some(rank) = self.claimed.remove(&(node, local_rank)) {
            debug!(node, device = local_rank, rank, "Released device");
        }
    }

    /// Rank holding a device, if any
    pub fn holder(&self, node: u32, local_rank: Rank) -> Option<Rank> {
        self.claimed.get(&(node, local_rank)).copied()
    }

    /// Devices on `node` that no process is bound to
    pub fn unclaimed(&self, node: u32) -> Vec<Rank> {
        (0..self.devices_per_node)
            .filter(|d| !self.claimed.contains_key(&(node, *d)))
            .collect()
    }

    /// True when every device on every node is held by exactly one process
    pub fn is_complete(&self) -> bool {
        let complete = self.available_count() == 0;
        if complete {
            info!(devices = self.total_count(), "Every device bound exactly once");
        }
        complete
    }
}
