//! Topology discovery from launcher-provided environment
//!
//! Launchers hand every process its rank through environment variables. The
//! values are read exactly once into a [`LauncherEnv`]; everything after that
//! works on plain values.

use rankbind_core::{
    parse_per_node_count, resolve_local_rank, DeviceSet, ProcessTopology, Rank, RankbindError,
    RankbindResult, TopologyMismatch,
};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Source of environment variables
pub trait EnvSource {
    fn var(&self, key: &str) -> Option<String>;
}

/// The current process environment
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Fixed set of variables
#[derive(Debug, Clone, Default)]
pub struct MapEnv {
    vars: HashMap<String, String>,
}

impl MapEnv {
    pub fn new<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl EnvSource for MapEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

/// Process launcher that started this process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LauncherKind {
    /// torchrun / torch.distributed.run
    Torchrun,
    /// Open MPI `mpirun`
    OpenMpi,
    /// MPICH and Intel MPI (PMI)
    Mpich,
    /// MVAPICH
    Mvapich,
    /// Slurm `srun`
    Slurm,
}

impl std::fmt::Display for LauncherKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LauncherKind::Torchrun => write!(f, "torchrun"),
            LauncherKind::OpenMpi => write!(f, "openmpi"),
            LauncherKind::Mpich => write!(f, "mpich"),
            LauncherKind::Mvapich => write!(f, "mvapich"),
            LauncherKind::Slurm => write!(f, "slurm"),
        }
    }
}

/// Variable names one launcher uses
struct LauncherVars {
    kind: LauncherKind,
    rank: &'static str,
    size: &'static str,
    local_rank: &'static str,
    local_size: &'static str,
    nodes: Option<&'static str>,
    node_id: Option<&'static str>,
}

// Innermost launcher first: srun/sbatch variables leak into processes
// started by mpirun or torchrun inside a job step.
const LAUNCHERS: &[LauncherVars] = &[
    LauncherVars {
        kind: LauncherKind::Torchrun,
        rank: "RANK",
        size: "WORLD_SIZE",
        local_rank: "LOCAL_RANK",
        local_size: "LOCAL_WORLD_SIZE",
        nodes: None,
        node_id: Some("GROUP_RANK"),
    },
    LauncherVars {
        kind: LauncherKind::OpenMpi,
        rank: "OMPI_COMM_WORLD_RANK",
        size: "OMPI_COMM_WORLD_SIZE",
        local_rank: "OMPI_COMM_WORLD_LOCAL_RANK",
        local_size: "OMPI_COMM_WORLD_LOCAL_SIZE",
        nodes: None,
        node_id: None,
    },
    LauncherVars {
        kind: LauncherKind::Mpich,
        rank: "PMI_RANK",
        size: "PMI_SIZE",
        local_rank: "MPI_LOCALRANKID",
        local_size: "MPI_LOCALNRANKS",
        nodes: None,
        node_id: None,
    },
    LauncherVars {
        kind: LauncherKind::Mvapich,
        rank: "MV2_COMM_WORLD_RANK",
        size: "MV2_COMM_WORLD_SIZE",
        local_rank: "MV2_COMM_WORLD_LOCAL_RANK",
        local_size: "MV2_COMM_WORLD_LOCAL_SIZE",
        nodes: None,
        node_id: None,
    },
    LauncherVars {
        kind: LauncherKind::Slurm,
        rank: "SLURM_PROCID",
        size: "SLURM_NTASKS",
        local_rank: "SLURM_LOCALID",
        local_size: "SLURM_NTASKS_PER_NODE",
        nodes: Some("SLURM_NNODES"),
        node_id: Some("SLURM_NODEID"),
    },
];

/// How to pick the local rank when the launcher reports its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BindingPolicy {
    /// Trust the launcher's node-local id; warn if arithmetic disagrees
    #[default]
    PreferLauncher,
    /// Fail unless the launcher's id matches block rank arithmetic
    RequireBlock,
}

/// Rank information read from the launcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherEnv {
    pub kind: LauncherKind,
    pub global_rank: Rank,
    pub world_size: u32,
    pub node_count: Option<u32>,
    pub processes_per_node: Option<u32>,
    pub launcher_local_rank: Option<Rank>,
    pub node_id: Option<u32>,
    pub hostname: Option<String>,
}

/// Resolved device binding for this process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    /// Validated topology; use it for rank and size counts only
    pub topology: ProcessTopology,
    /// Node-local device index to bind to.
    ///
    /// This is authoritative. Under [`BindingPolicy::PreferLauncher`] it is
    /// the launcher's own id and may differ from `topology.local_rank()`,
    /// which assumes contiguous block placement.
    pub local_rank: Rank,
    /// Physical device id for `CUDA_VISIBLE_DEVICES`
    pub device: u32,
    pub node_rank: u32,
    pub hostname: String,
}

fn required(env: &impl EnvSource, key: &str) -> RankbindResult<u32> {
    let value = env
        .var(key)
        .ok_or_else(|| RankbindError::Environment(format!("{} is not set", key)))?;
    value.trim().parse().map_err(|_| {
        RankbindError::Environment(format!("{}='{}' is not a non-negative integer", key, value))
    })
}

fn optional(env: &impl EnvSource, key: &str) -> RankbindResult<Option<u32>> {
    match env.var(key) {
        Some(_) => required(env, key).map(Some),
        None => Ok(None),
    }
}

impl LauncherEnv {
    /// Detect the launcher and read its rank variables
    pub fn detect(env: &impl EnvSource) -> RankbindResult<Self> {
        let vars = LAUNCHERS
            .iter()
            .find(|l| {
                env.var(l.rank).is_some()
                    && (l.kind != LauncherKind::Torchrun || env.var(l.local_rank).is_some())
            })
            .ok_or_else(|| {
                RankbindError::Environment(
                    "no launcher rank variable found (SLURM_PROCID, RANK, OMPI_COMM_WORLD_RANK, PMI_RANK, MV2_COMM_WORLD_RANK)"
                        .to_string(),
                )
            })?;

        let processes_per_node = match env.var(vars.local_size) {
            Some(value) => Some(parse_per_node_count(&value).map_err(|_| {
                RankbindError::Environment(format!(
                    "{}='{}' is not a per-node count",
                    vars.local_size, value
                ))
            })?),
            None => None,
        };

        let launcher_env = Self {
            kind: vars.kind,
            global_rank: required(env, vars.rank)?,
            world_size: required(env, vars.size)?,
            node_count: vars.nodes.map(|k| optional(env, k)).transpose()?.flatten(),
            processes_per_node,
            launcher_local_rank: optional(env, vars.local_rank)?,
            node_id: vars.node_id.map(|k| optional(env, k)).transpose()?.flatten(),
            hostname: env.var("SLURMD_NODENAME"),
        };

        debug!(
            launcher = %launcher_env.kind,
            rank = launcher_env.global_rank,
            world_size = launcher_env.world_size,
            "Launcher environment detected"
        );

        Ok(launcher_env)
    }

    /// Node name reported by Slurm, else the local hostname
    pub fn host(&self) -> String {
        self.hostname
            .clone()
            .unwrap_or_else(|| gethostname::gethostname().to_string_lossy().into_owned())
    }

    /// Build the validated topology for `devices_per_node` devices per node.
    ///
    /// Without a per-node process count from the launcher, one process per
    /// device is assumed.
    pub fn topology(&self, devices_per_node: u32) -> RankbindResult<ProcessTopology> {
        let processes_per_node = self.processes_per_node.unwrap_or(devices_per_node);
        let node_count = match self.node_count {
            Some(n) => n,
            None if processes_per_node == 0 => 0,
            None => self.world_size / processes_per_node,
        };

        ProcessTopology::new(
            self.global_rank,
            self.world_size,
            node_count,
            processes_per_node,
            devices_per_node,
        )
    }

    /// Resolve this process's device binding.
    ///
    /// Must run before the process joins the process group; an error here
    /// means it must not join.
    pub fn bind(&self, devices: &DeviceSet, policy: BindingPolicy) -> RankbindResult<Binding> {
        let devices_per_node = devices.len();
        if devices_per_node == 0 {
            return Err(RankbindError::Precondition(
                "no accelerator devices visible on this node".to_string(),
            ));
        }

        let topology = self.topology(devices_per_node)?;
        let derived = resolve_local_rank(self.global_rank, devices_per_node)?;

        let local_rank = match self.launcher_local_rank {
            Some(launcher) if launcher != derived => {
                if policy == BindingPolicy::RequireBlock {
                    return Err(TopologyMismatch::LocalRank {
                        global_rank: self.global_rank,
                        launcher,
                        derived,
                    }
                    .into());
                }
                warn!(
                    rank = self.global_rank,
                    launcher_local_rank = launcher,
                    derived_local_rank = derived,
                    "Launcher does not place ranks in contiguous blocks; using its node-local id"
                );
                launcher
            }
            Some(launcher) => launcher,
            None => derived,
        };

        let node_rank = self.node_id.unwrap_or_else(|| topology.node_index());
        let device = devices.get(local_rank).ok_or_else(|| {
            RankbindError::from(TopologyMismatch::DeviceOutOfRange {
                node: node_rank,
                local_rank,
                devices_per_node,
            })
        })?;

        let hostname = self.host();

        info!(
            rank = self.global_rank,
            world_size = self.world_size,
            local_rank,
            device,
            node = node_rank,
            host = %hostname,
            "Resolved device binding"
        );

        Ok(Binding {
            topology,
            local_rank,
            device,
            node_rank,
            hostname,
        })
    }
}

/// Devices visible on this node.
///
/// `explicit` wins, then `SLURM_GPUS_ON_NODE`, `SLURM_GPUS_PER_NODE` and
/// finally the length of `CUDA_VISIBLE_DEVICES`. Physical ids come from
/// `CUDA_VISIBLE_DEVICES` when it is set; a list whose length differs from
/// the count is rejected rather than renumbered.
pub fn visible_devices(env: &impl EnvSource, explicit: Option<u32>) -> RankbindResult<DeviceSet> {
    let listed = match env.var("CUDA_VISIBLE_DEVICES") {
        Some(value) => Some(DeviceSet::parse(&value)?),
        None => None,
    };

    let count = match explicit {
        Some(n) => Some(n),
        None => match env
            .var("SLURM_GPUS_ON_NODE")
            .or_else(|| env.var("SLURM_GPUS_PER_NODE"))
        {
            Some(value) => Some(parse_per_node_count(&value)?),
            None => None,
        },
    };

    match (count, listed) {
        (Some(n), Some(set)) if set.len() == n => Ok(set),
        (Some(n), Some(set)) => Err(RankbindError::Config(format!(
            "CUDA_VISIBLE_DEVICES='{}' lists {} devices but {} devices per node were requested",
            set.to_env_value(),
            set.len(),
            n
        ))),
        (Some(n), None) => Ok(DeviceSet::from_count(n)),
        (None, Some(set)) => Ok(set),
        (None, None) => Err(RankbindError::Environment(
            "devices per node unknown: pass --devices-per-node or set SLURM_GPUS_ON_NODE / CUDA_VISIBLE_DEVICES"
                .to_string(),
        )),
    }
}
