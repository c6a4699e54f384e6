//! Whole-job placement planning

use rankbind_core::{
    resolve_local_rank, DeviceSet, Distribution, Rank, RankbindError, RankbindResult,
    TopologyConfig,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::ledger::DeviceLedger;
use crate::placement::{NodeCounterPlacement, PlacementStrategy};

/// Largest job `plan_job` will enumerate rank by rank
pub const MAX_PLAN_WORLD_SIZE: u32 = 1 << 20;

/// Binding of one global rank
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankAssignment {
    /// Global rank
    pub global_rank: Rank,
    /// Node index the launcher places the rank on
    pub node: u32,
    /// Node-local device index
    pub local_rank: Rank,
    /// Physical device id (`CUDA_VISIBLE_DEVICES` value)
    pub device: u32,
}

/// Device bindings for every rank of a job
#[derive(Debug, Clone, Serialize)]
pub struct JobPlan {
    pub world_size: u32,
    pub node_count: u32,
    pub devices_per_node: u32,
    pub distribution: Distribution,
    /// Whether `global_rank mod devices_per_node` gives the same bindings
    pub arithmetic_consistent: bool,
    pub assignments: Vec<RankAssignment>,
}

impl JobPlan {
    /// Assignments placed on `node`, in local rank order
    pub fn node_assignments(&self, node: u32) -> Vec<&RankAssignment> {
        let mut on_node: Vec<&RankAssignment> =
            self.assignments.iter().filter(|a| a.node == node).collect();
        on_node.sort_by_key(|a| a.local_rank);
        on_node
    }
}

/// Node index of `global_rank` under a Slurm task distribution
pub fn node_for_rank(
    global_rank: Rank,
    topology: &TopologyConfig,
) -> RankbindResult<u32> {
    if topology.nodes == 0 || topology.tasks_per_node == 0 {
        return Err(RankbindError::Precondition(
            "nodes and tasks_per_node must be at least 1".to_string(),
        ));
    }
    Ok(match topology.distribution {
        Distribution::Block => global_rank / topology.tasks_per_node,
        Distribution::Cyclic => global_rank % topology.nodes,
    })
}

/// Plan bindings with devices numbered `0..devices_per_node` on every node
pub fn plan_job(topology: &TopologyConfig) -> RankbindResult<JobPlan> {
    plan_job_with_devices(topology, &DeviceSet::from_count(topology.devices_per_node))
}

/// Plan bindings onto the given physical device ids
pub fn plan_job_with_devices(
    topology: &TopologyConfig,
    devices: &DeviceSet,
) -> RankbindResult<JobPlan> {
    topology.validate()?;
    if devices.len() != topology.devices_per_node {
        return Err(RankbindError::Config(format!(
            "{} visible devices listed for {} devices per node",
            devices.len(),
            topology.devices_per_node
        )));
    }

    let world_size = topology.world_size()?;
    if world_size > MAX_PLAN_WORLD_SIZE {
        return Err(RankbindError::Config(format!(
            "cannot plan {} ranks; at most {} ranks are listed per plan",
            world_size, MAX_PLAN_WORLD_SIZE
        )));
    }

    let nodes = (0..world_size)
        .map(|rank| node_for_rank(rank, topology))
        .collect::<RankbindResult<Vec<u32>>>()?;
    let counter = NodeCounterPlacement::new(nodes.clone());

    let mut ledger = DeviceLedger::new(topology.nodes, topology.devices_per_node);
    let mut arithmetic_consistent = true;
    let mut assignments = Vec::with_capacity(world_size as usize);

    for (rank, node) in (0..world_size).zip(nodes) {
        let local_rank = counter.local_rank(rank, node)?;
        ledger.claim(node, local_rank, rank)?;

        if resolve_local_rank(rank, topology.devices_per_node)? != local_rank {
            arithmetic_consistent = false;
        }

        let device = devices.get(local_rank).ok_or_else(|| {
            RankbindError::Config(format!("no visible device for local rank {}", local_rank))
        })?;

        assignments.push(RankAssignment {
            global_rank: rank,
            node,
            local_rank,
            device,
        });
    }

    if !ledger.is_complete() {
        return Err(RankbindError::Config(format!(
            "{} devices left idle",
            ledger.available_count()
        )));
    }

    if !arithmetic_consistent {
        warn!(
            distribution = %topology.distribution,
            strategy = counter.name(),
            "Rank arithmetic disagrees with launcher placement; bind from the node-local id"
        );
    }

    info!(
        world_size,
        nodes = topology.nodes,
        devices_per_node = topology.devices_per_node,
        distribution = %topology.distribution,
        "Job plan built"
    );

    Ok(JobPlan {
        world_size,
        node_count: topology.nodes,
        devices_per_node: topology.devices_per_node,
        distribution: topology.distribution,
        arithmetic_consistent,
        assignments,
    })
}
