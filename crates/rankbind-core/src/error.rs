//! Error types for rankbind

use thiserror::Error;

/// Main error type for rankbind
#[derive(Error, Debug)]
pub enum RankbindError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Precondition violation (e.g. zero devices per node)
    #[error("Precondition violated: {0}")]
    Precondition(String),

    /// Requested process topology does not match the accelerator allocation
    #[error("Topology mismatch: {0}")]
    Topology(TopologyMismatch),

    /// Launcher environment is missing or malformed
    #[error("Environment error: {0}")]
    Environment(String),

    /// Failed to launch a bound process
    #[error("Launch error: {0}")]
    Launch(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for rankbind operations
pub type RankbindResult<T> = Result<T, RankbindError>;

/// The equality that failed when checking a topology or binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyMismatch {
    /// `world_size != node_count × processes_per_node`
    WorldSize {
        world_size: u32,
        node_count: u32,
        processes_per_node: u32,
    },
    /// `processes_per_node != devices_per_node`
    DevicesPerNode {
        processes_per_node: u32,
        devices_per_node: u32,
    },
    /// The launcher's own node-local id disagrees with rank arithmetic
    LocalRank {
        global_rank: u32,
        launcher: u32,
        derived: u32,
    },
    /// Two processes on one node resolved to the same device
    DeviceCollision {
        node: u32,
        local_rank: u32,
        holder: u32,
        claimant: u32,
    },
    /// A resolved device index is not present on the node
    DeviceOutOfRange {
        node: u32,
        local_rank: u32,
        devices_per_node: u32,
    },
}

impl std::fmt::Display for TopologyMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TopologyMismatch::WorldSize {
                world_size,
                node_count,
                processes_per_node,
            } => {
                let expected = u64::from(*node_count) * u64::from(*processes_per_node);
                write!(
                    f,
                    "world_size != node_count × processes_per_node ({} != {} × {} = {})",
                    world_size, node_count, processes_per_node, expected
                )
            }
            TopologyMismatch::DevicesPerNode {
                processes_per_node,
                devices_per_node,
            } => write!(
                f,
                "processes_per_node != devices_per_node ({} != {})",
                processes_per_node, devices_per_node
            ),
            TopologyMismatch::LocalRank {
                global_rank,
                launcher,
                derived,
            } => write!(
                f,
                "launcher local rank != derived local rank for global rank {} ({} != {})",
                global_rank, launcher, derived
            ),
            TopologyMismatch::DeviceCollision {
                node,
                local_rank,
                holder,
                claimant,
            } => write!(
                f,
                "device {} on node {} already bound to rank {}, requested by rank {}",
                local_rank, node, holder, claimant
            ),
            TopologyMismatch::DeviceOutOfRange {
                node,
                local_rank,
                devices_per_node,
            } => write!(
                f,
                "device {} on node {} is outside [0, {})",
                local_rank, node, devices_per_node
            ),
        }
    }
}

impl From<TopologyMismatch> for RankbindError {
    fn from(mismatch: TopologyMismatch) -> Self {
        RankbindError::Topology(mismatch)
    }
}

impl From<serde_json::Error> for RankbindError {
    fn from(err: serde_json::Error) -> Self {
        RankbindError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for RankbindError {
    fn from(err: toml::de::Error) -> Self {
        RankbindError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RankbindError::Config("invalid config".to_string());
        assert_eq!(err.to_string(), "Configuration error: invalid config");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: RankbindError = io_err.into();
        assert!(matches!(err, RankbindError::Io(_)));
    }

    #[test]
    fn test_world_size_mismatch_display() {
        let err: RankbindError = TopologyMismatch::WorldSize {
            world_size: 9,
            node_count: 2,
            processes_per_node: 4,
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Topology mismatch: world_size != node_count × processes_per_node (9 != 2 × 4 = 8)"
        );
    }

    #[test]
    fn test_devices_mismatch_display() {
        let mismatch = TopologyMismatch::DevicesPerNode {
            processes_per_node: 4,
            devices_per_node: 2,
        };
        assert_eq!(
            mismatch.to_string(),
            "processes_per_node != devices_per_node (4 != 2)"
        );
    }

    #[test]
    fn test_toml_error_is_config() {
        let err: RankbindError = toml::from_str::<toml::Value>("= broken")
            .unwrap_err()
            .into();
        assert!(matches!(err, RankbindError::Config(_)));
    }
}
