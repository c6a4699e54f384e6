//! Local rank placement strategies

use rankbind_core::{resolve_local_rank, Rank, RankbindError, RankbindResult};
use std::collections::HashMap;

/// Strategy for deriving a process's node-local device index
pub trait PlacementStrategy: Send + Sync {
    /// Local rank of `global_rank`, which runs on `node`
    fn local_rank(&self, global_rank: Rank, node: u32) -> RankbindResult<Rank>;

    /// Strategy name for logs
    fn name(&self) -> &'static str;
}

/// Rank arithmetic: `global_rank mod devices_per_node`.
///
/// Only meaningful when the launcher assigns ranks in contiguous per-node
/// blocks; `node` is ignored.
pub struct BlockPlacement {
    devices_per_node: u32,
}

impl BlockPlacement {
    pub fn new(devices_per_node: u32) -> RankbindResult<Self> {
        if devices_per_node == 0 {
            return Err(RankbindError::Precondition(
                "devices_per_node must be at least 1".to_string(),
            ));
        }
        Ok(Self { devices_per_node })
    }
}

impl PlacementStrategy for BlockPlacement {
    fn local_rank(&self, global_rank: Rank, _node: u32) -> RankbindResult<Rank> {
        resolve_local_rank(global_rank, self.devices_per_node)
    }

    fn name(&self) -> &'static str {
        "block"
    }
}

/// Explicit per-node counter.
///
/// Built from the node of every global rank (index = global rank). A rank's
/// local rank is the number of lower ranks on the same node, which holds for
/// any assignment order.
pub struct NodeCounterPlacement {
    nodes: Vec<u32>,
    local_ranks: Vec<Rank>,
}

impl NodeCounterPlacement {
    pub fn new(nodes: Vec<u32>) -> Self {
        let mut counters: HashMap<u32, Rank> = HashMap::new();
        let local_ranks = nodes
            .iter()
            .map(|node| {
                let counter = counters.entry(*node).or_insert(0);
                let local = *counter;
                *counter += 1;
                local
            })
            .collect();

        Self { nodes, local_ranks }
    }

    /// Number of ranks placed on `node`
    pub fn ranks_on(&self, node: u32) -> u32 {
        self.nodes.iter().filter(|n| **n == node).count() as u32
    }
}

impl PlacementStrategy for NodeCounterPlacement {
    fn local_rank(&self, global_rank: Rank, node: u32) -> RankbindResult<Rank> {
        let idx = global_rank as usize;
        match self.nodes.get(idx) {
            Some(recorded) if *recorded == node => Ok(self.local_ranks[idx]),
            Some(recorded) => Err(RankbindError::Config(format!(
                "rank {} is recorded on node {}, not node {}",
                global_rank, recorded, node
            ))),
            None => Err(RankbindError::Config(format!(
                "rank {} is outside the {} recorded ranks",
                global_rank,
                self.nodes.len()
            ))),
        }
    }

    fn name(&self) -> &'static str {
        "node-counter"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_placement() {
        let strategy = BlockPlacement::new(4).unwrap();
        assert_eq!(strategy.local_rank(6, 1).unwrap(), 2);
        assert_eq!(strategy.name(), "block");
    }

    #[test]
    fn test_block_placement_zero_devices() {
        assert!(BlockPlacement::new(0).is_err());
    }

    #[test]
    fn test_node_counter_block_matches_arithmetic() {
        let nodes: Vec<u32> = (0..8).map(|r| r / 4).collect();
        let counter = NodeCounterPlacement::new(nodes.clone());
        let block = BlockPlacement::new(4).unwrap();

        for (rank, node) in nodes.iter().enumerate() {
            let rank = rank as Rank;
            assert_eq!(
                counter.local_rank(rank, *node).unwrap(),
                block.local_rank(rank, *node).unwrap()
            );
        }
    }

    #[test]
    fn test_node_counter_cyclic() {
        // 8 ranks dealt round-robin over 2 nodes
        let nodes: Vec<u32> = (0..8).map(|r| r % 2).collect();
        let counter = NodeCounterPlacement::new(nodes);

        assert_eq!(counter.local_rank(0, 0).unwrap(), 0);
        assert_eq!(counter.local_rank(1, 1).unwrap(), 0);
        assert_eq!(counter.local_rank(2, 0).unwrap(), 1);
        assert_eq!(counter.local_rank(7, 1).unwrap(), 3);
        assert_eq!(counter.ranks_on(0), 4);
    }

    #[test]
    fn test_node_counter_rejects_wrong_node() {
        let counter = NodeCounterPlacement::new(vec![0, 0, 1, 1]);
        assert!(counter.local_rank(2, 0).is_err());
        assert!(counter.local_rank(4, 1).is_err());
    }
}
