//! Configuration types for rankbind

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{validate_topology, RankbindError, RankbindResult};

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "RANKBIND_CONFIG";

/// Top-level configuration file (`rankbind.toml`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RankbindConfig {
    /// Requested process topology
    pub topology: TopologyConfig,
    /// Batch job settings
    pub job: JobConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl RankbindConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> RankbindResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RankbindError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> RankbindResult<Self> {
        toml::from_str(content)
            .map_err(|e| RankbindError::Config(format!("Failed to parse config: {}", e)))
    }
}

/// Requested process topology
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    /// Number of physical nodes
    pub nodes: u32,
    /// Processes launched on every node
    pub tasks_per_node: u32,
    /// Accelerators allocated on every node
    pub devices_per_node: u32,
    /// How the launcher spreads ranks over nodes
    pub distribution: Distribution,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            nodes: 1,
            tasks_per_node: 1,
            devices_per_node: 1,
            distribution: Distribution::Block,
        }
    }
}

impl TopologyConfig {
    /// Total process count
    pub fn world_size(&self) -> RankbindResult<u32> {
        self.nodes.checked_mul(self.tasks_per_node).ok_or_else(|| {
            RankbindError::Config(format!(
                "{} nodes × {} tasks per node overflows",
                self.nodes, self.tasks_per_node
            ))
        })
    }

    /// Validate for a data-parallel run: one process per device
    pub fn validate(&self) -> RankbindResult<()> {
        validate_topology(
            self.world_size()?,
            self.nodes,
            self.tasks_per_node,
            self.devices_per_node,
        )
    }

    /// Validate for a job kind; only `ddp` needs the one-to-one device mapping
    pub fn validate_for(&self, kind: JobKind) -> RankbindResult<()> {
        if kind == JobKind::Ddp {
            return self.validate();
        }
        if self.nodes == 0 || self.tasks_per_node == 0 {
            return Err(RankbindError::Config(
                "nodes and tasks_per_node must be at least 1".to_string(),
            ));
        }
        if kind == JobKind::Gpu && self.devices_per_node == 0 {
            return Err(RankbindError::Config(
                "gpu jobs need devices_per_node of at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Slurm task distribution across nodes (`--distribution`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distribution {
    /// Consecutive ranks fill a node before moving on
    Block,
    /// Ranks are dealt round-robin over nodes
    Cyclic,
}

impl std::fmt::Display for Distribution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Distribution::Block => write!(f, "block"),
            Distribution::Cyclic => write!(f, "cyclic"),
        }
    }
}

impl std::str::FromStr for Distribution {
    type Err = RankbindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "block" => Ok(Distribution::Block),
            "cyclic" => Ok(Distribution::Cyclic),
            other => Err(RankbindError::Config(format!(
                "Unknown distribution '{}'",
                other
            ))),
        }
    }
}

/// Batch job settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Job name
    pub name: String,
    /// Kind of workload
    pub kind: JobKind,
    /// Partition to submit to
    pub partition: Option<String>,
    /// Wall-clock limit (e.g. "01:00:00")
    pub time: String,
    /// CPUs per task
    pub cpus_per_task: u32,
    /// Memory per node (e.g. "32G")
    pub memory: Option<String>,
    /// Environment modules to load
    pub modules: Vec<String>,
    /// Command run by every task
    pub command: String,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            name: "rankbind-job".to_string(),
            kind: JobKind::Serial,
            partition: None,
            time: "01:00:00".to_string(),
            cpus_per_task: 1,
            memory: None,
            modules: Vec::new(),
            command: "./a.out".to_string(),
        }
    }
}

/// Kind of batch workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Single task, single CPU
    Serial,
    /// Single task, many threads
    Openmp,
    /// Single task with accelerators
    Gpu,
    /// Many tasks via MPI
    Mpi,
    /// Distributed data-parallel training, one task per accelerator
    Ddp,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::Serial => write!(f, "serial"),
            JobKind::Openmp => write!(f, "openmp"),
            JobKind::Gpu => write!(f, "gpu"),
            JobKind::Mpi => write!(f, "mpi"),
            JobKind::Ddp => write!(f, "ddp"),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = RankbindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(RankbindError::Config(format!(
                "Unknown log format '{}'",
                other
            ))),
        }
    }
}
