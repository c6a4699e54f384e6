//! Rank placement arithmetic and topology validation
//!
//! Every process of a distributed run calls into this module once at start-up,
//! before it joins the process group. Nothing here is shared between
//! processes: each one derives its own binding from its global rank and the
//! per-node device count handed out by the launcher.
//!
//! # Caller obligation
//!
//! [`resolve_local_rank`] assumes the launcher hands out global ranks in
//! contiguous blocks of `devices_per_node` per physical node, in node order.
//! The arithmetic cannot detect a launcher that does otherwise (for example a
//! cyclic task distribution). When the launcher exposes a node identifier or
//! its own node-local id, prefer the explicit per-node counter in
//! `rankbind-placement`.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{RankbindError, RankbindResult, TopologyMismatch};

/// Global or node-local process index
pub type Rank = u32;

/// Derive the node-local accelerator index for `global_rank`.
///
/// The result is always in `[0, devices_per_node)`. A zero device count is a
/// precondition violation rather than a division result.
pub fn resolve_local_rank(global_rank: Rank, devices_per_node: u32) -> RankbindResult<Rank> {
    if devices_per_node == 0 {
        return Err(RankbindError::Precondition(
            "devices_per_node must be at least 1".to_string(),
        ));
    }
    Ok(global_rank - devices_per_node * (global_rank / devices_per_node))
}

/// Block node index of `global_rank`: `floor(global_rank / processes_per_node)`.
pub fn node_index(global_rank: Rank, processes_per_node: u32) -> RankbindResult<u32> {
    if processes_per_node == 0 {
        return Err(RankbindError::Precondition(
            "processes_per_node must be at least 1".to_string(),
        ));
    }
    Ok(global_rank / processes_per_node)
}

/// Check that the requested process topology maps one-to-one onto the
/// accelerator allocation.
///
/// The world-size equality is checked first and the first failure is
/// returned. Counts are never adjusted.
pub fn validate_topology(
    world_size: u32,
    node_count: u32,
    processes_per_node: u32,
    devices_per_node: u32,
) -> RankbindResult<()> {
    let expected = node_count.checked_mul(processes_per_node);
    if expected != Some(world_size) {
        return Err(TopologyMismatch::WorldSize {
            world_size,
            node_count,
            processes_per_node,
        }
        .into());
    }

    if processes_per_node != devices_per_node {
        return Err(TopologyMismatch::DevicesPerNode {
            processes_per_node,
            devices_per_node,
        }
        .into());
    }

    if devices_per_node == 0 {
        return Err(RankbindError::Precondition(
            "devices_per_node must be at least 1".to_string(),
        ));
    }

    debug!(
        world_size,
        node_count, processes_per_node, devices_per_node, "Topology validated"
    );

    Ok(())
}

/// Process topology of one rank, read once at start-up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawProcessTopology")]
pub struct ProcessTopology {
    global_rank: Rank,
    world_size: u32,
    node_count: u32,
    processes_per_node: u32,
    devices_per_node: u32,
}

/// Unvalidated wire form; deserialization goes through `ProcessTopology::new`
#[derive(Deserialize)]
struct RawProcessTopology {
    global_rank: Rank,
    world_size: u32,
    node_count: u32,
    processes_per_node: u32,
    devices_per_node: u32,
}

impl TryFrom<RawProcessTopology> for ProcessTopology {
    type Error = RankbindError;

    fn try_from(raw: RawProcessTopology) -> Result<Self, Self::Error> {
        ProcessTopology::new(
            raw.global_rank,
            raw.world_size,
            raw.node_count,
            raw.processes_per_node,
            raw.devices_per_node,
        )
    }
}

impl ProcessTopology {
    /// Build a validated topology for `global_rank`
    pub fn new(
        global_rank: Rank,
        world_size: u32,
        node_count: u32,
        processes_per_node: u32,
        devices_per_node: u32,
    ) -> RankbindResult<Self> {
        validate_topology(world_size, node_count, processes_per_node, devices_per_node)?;

        if global_rank >= world_size {
            return Err(RankbindError::Config(format!(
                "global rank {} is outside [0, {})",
                global_rank, world_size
            )));
        }

        Ok(Self {
            global_rank,
            world_size,
            node_count,
            processes_per_node,
            devices_per_node,
        })
    }

    pub fn global_rank(&self) -> Rank {
        self.global_rank
    }

    pub fn world_size(&self) -> u32 {
        self.world_size
    }

    pub fn node_count(&self) -> u32 {
        self.node_count
    }

    pub fn processes_per_node(&self) -> u32 {
        self.processes_per_node
    }

    pub fn devices_per_node(&self) -> u32 {
        self.devices_per_node
    }

    /// Node-local device index this process binds to
    pub fn local_rank(&self) -> Rank {
        // devices_per_node >= 1 is guaranteed by construction
        self.global_rank % self.devices_per_node
    }

    /// Block node index of this process
    pub fn node_index(&self) -> u32 {
        self.global_rank / self.processes_per_node
    }

    /// True for the first process on each node
    pub fn is_node_lead(&self) -> bool {
        self.local_rank() == 0
    }

    /// True for global rank 0
    pub fn is_world_lead(&self) -> bool {
        self.global_rank == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_resolve_two_nodes_four_devices() {
        assert_eq!(resolve_local_rank(0, 4).unwrap(), 0);
        assert_eq!(resolve_local_rank(3, 4).unwrap(), 3);
        assert_eq!(resolve_local_rank(4, 4).unwrap(), 0);
        assert_eq!(resolve_local_rank(7, 4).unwrap(), 3);
    }

    #[test]
    fn test_resolve_zero_devices_is_precondition() {
        let err = resolve_local_rank(5, 0).unwrap_err();
        assert!(matches!(err, RankbindError::Precondition(_)));
    }

    #[test]
    fn test_resolve_always_in_range() {
        for devices in 1..=16 {
            for rank in 0..256 {
                let local = resolve_local_rank(rank, devices).unwrap();
                assert!(local < devices, "rank {} devices {}", rank, devices);
            }
        }
    }

    #[test]
    fn test_resolve_large_rank() {
        assert_eq!(resolve_local_rank(u32::MAX, 8).unwrap(), u32::MAX % 8);
        assert_eq!(resolve_local_rank(u32::MAX, 1).unwrap(), 0);
    }

    #[test]
    fn test_node_block_is_bijection() {
        for devices in 1..=8u32 {
            for node in 0..6u32 {
                let start = node * devices;
                let locals: HashSet<Rank> = (start..start + devices)
                    .map(|r| resolve_local_rank(r, devices).unwrap())
                    .collect();
                let expected: HashSet<Rank> = (0..devices).collect();
                assert_eq!(locals, expected);
            }
        }
    }

    #[test]
    fn test_node_index() {
        assert_eq!(node_index(0, 4).unwrap(), 0);
        assert_eq!(node_index(7, 4).unwrap(), 1);
        assert!(node_index(7, 0).is_err());
    }

    #[test]
    fn test_validate_ok() {
        assert!(validate_topology(8, 2, 4, 4).is_ok());
    }

    #[test]
    fn test_validate_device_mismatch() {
        let err = validate_topology(8, 2, 4, 2).unwrap_err();
        assert!(matches!(
            err,
            RankbindError::Topology(TopologyMismatch::DevicesPerNode {
                processes_per_node: 4,
                devices_per_node: 2,
            })
        ));
        assert!(err.to_string().contains("(4 != 2)"));
    }

    #[test]
    fn test_validate_world_size_mismatch() {
        let err = validate_topology(9, 2, 4, 4).unwrap_err();
        assert!(matches!(
            err,
            RankbindError::Topology(TopologyMismatch::WorldSize {
                world_size: 9,
                node_count: 2,
                processes_per_node: 4,
            })
        ));
        assert!(err.to_string().contains("9 != 2 × 4 = 8"));
    }

    #[test]
    fn test_validate_reports_world_size_first() {
        let err = validate_topology(9, 2, 4, 2).unwrap_err();
        assert!(matches!(
            err,
            RankbindError::Topology(TopologyMismatch::WorldSize { .. })
        ));
    }

    #[test]
    fn test_validate_overflow_is_world_size_mismatch() {
        let err = validate_topology(8, u32::MAX, 2, 2).unwrap_err();
        assert!(matches!(
            err,
            RankbindError::Topology(TopologyMismatch::WorldSize { .. })
        ));
    }

    #[test]
    fn test_validate_all_zero_is_precondition() {
        let err = validate_topology(0, 0, 0, 0).unwrap_err();
        assert!(matches!(err, RankbindError::Precondition(_)));
    }

    #[test]
    fn test_process_topology() {
        let topo = ProcessTopology::new(6, 8, 2, 4, 4).unwrap();
        assert_eq!(topo.local_rank(), 2);
        assert_eq!(topo.node_index(), 1);
        assert!(!topo.is_node_lead());
        assert!(!topo.is_world_lead());

        let lead = ProcessTopology::new(4, 8, 2, 4, 4).unwrap();
        assert!(lead.is_node_lead());
    }

    #[test]
    fn test_process_topology_rank_out_of_range() {
        let err = ProcessTopology::new(8, 8, 2, 4, 4).unwrap_err();
        assert!(matches!(err, RankbindError::Config(_)));
    }

    #[test]
    fn test_process_topology_deserialize_validates() {
        let topo: ProcessTopology = serde_json::from_str(
            r#"{"global_rank":6,"world_size":8,"node_count":2,"processes_per_node":4,"devices_per_node":4}"#,
        )
        .unwrap();
        assert_eq!(topo.local_rank(), 2);

        let zero = serde_json::from_str::<ProcessTopology>(
            r#"{"global_rank":3,"world_size":1,"node_count":0,"processes_per_node":0,"devices_per_node":0}"#,
        );
        assert!(zero.is_err());

        let mismatch = serde_json::from_str::<ProcessTopology>(
            r#"{"global_rank":0,"world_size":8,"node_count":2,"processes_per_node":4,"devices_per_node":2}"#,
        )
        .unwrap_err();
        assert!(mismatch.to_string().contains("processes_per_node != devices_per_node"));
    }

    #[test]
    fn test_process_topology_serde_round_trip() {
        let topo = ProcessTopology::new(5, 8, 2, 4, 4).unwrap();
        let json = serde_json::to_string(&topo).unwrap();
        assert_eq!(serde_json::from_str::<ProcessTopology>(&json).unwrap(), topo);
    }

    #[test]
    fn test_process_topology_rejects_mismatch() {
        assert!(ProcessTopology::new(0, 8, 2, 4, 2).is_err());
    }
}
