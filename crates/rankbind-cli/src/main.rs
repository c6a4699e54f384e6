//! rankbind CLI
//!
//! Resolves and validates the accelerator binding of a distributed process
//! before it joins its process group.

mod commands;
mod logging;

use clap::{Parser, Subcommand};
use rankbind_core::{Distribution, LogFormat, RankbindConfig, CONFIG_ENV};
use std::path::PathBuf;

/// rankbind - rank-to-accelerator placement for Slurm jobs
#[derive(Parser, Debug)]
#[command(name = "rankbind")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to $RANKBIND_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text or json)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the local rank for a global rank
    Resolve {
        /// Global rank of the process
        #[arg(long)]
        global_rank: u32,

        /// Accelerators per node
        #[arg(long)]
        devices_per_node: u32,
    },

    /// Check that a topology maps one process onto each accelerator
    Validate {
        /// Total number of processes
        #[arg(long)]
        world_size: u32,

        /// Number of nodes
        #[arg(long)]
        nodes: u32,

        /// Processes per node
        #[arg(long)]
        tasks_per_node: u32,

        /// Accelerators per node
        #[arg(long)]
        devices_per_node: u32,
    },

    /// Show the binding of every rank in a job
    Plan {
        /// Number of nodes (defaults to config)
        #[arg(long)]
        nodes: Option<u32>,

        /// Processes per node (defaults to config)
        #[arg(long)]
        tasks_per_node: Option<u32>,

        /// Accelerators per node (defaults to config)
        #[arg(long)]
        devices_per_node: Option<u32>,

        /// Task distribution (block or cyclic)
        #[arg(long)]
        distribution: Option<Distribution>,

        /// Physical device ids, e.g. "0,1,2,3"
        #[arg(long)]
        visible_devices: Option<String>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Report rank, world size and host from the launcher
    Hello,

    /// Print export lines for this process's binding
    Env {
        /// Accelerators per node (defaults to the allocation)
        #[arg(long)]
        devices_per_node: Option<u32>,

        /// Fail if the launcher does not place ranks in contiguous blocks
        #[arg(long)]
        require_block: bool,
    },

    /// Bind this process to its accelerator and run a command
    Exec {
        /// Accelerators per node (defaults to the allocation)
        #[arg(long)]
        devices_per_node: Option<u32>,

        /// Fail if the launcher does not place ranks in contiguous blocks
        #[arg(long)]
        require_block: bool,

        /// Command and arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },

    /// Render a Slurm batch script from the config
    Script {
        /// Write to a file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<RankbindConfig> {
    let path = path.or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
    match path {
        Some(p) => Ok(RankbindConfig::from_file(&p)?),
        None => Ok(RankbindConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config)?;

    // Initialize logging
    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    logging::init(level, cli.log_format.unwrap_or(config.logging.format));

    match cli.command {
        Commands::Resolve {
            global_rank,
            devices_per_node,
        } => {
            commands::resolve(global_rank, devices_per_node)?;
        }
        Commands::Validate {
            world_size,
            nodes,
            tasks_per_node,
            devices_per_node,
        } => {
            commands::validate(world_size, nodes, tasks_per_node, devices_per_node)?;
        }
        Commands::Plan {
            nodes,
            tasks_per_node,
            devices_per_node,
            distribution,
            visible_devices,
            json,
        } => {
            let mut topology = config.topology.clone();
            if let Some(n) = nodes {
                topology.nodes = n;
            }
            if let Some(n) = tasks_per_node {
                topology.tasks_per_node = n;
            }
            if let Some(n) = devices_per_node {
                topology.devices_per_node = n;
            }
            if let Some(d) = distribution {
                topology.distribution = d;
            }
            commands::plan(&topology, visible_devices.as_deref(), json)?;
        }
        Commands::Hello => {
            commands::hello()?;
        }
        Commands::Env {
            devices_per_node,
            require_block,
        } => {
            commands::env(devices_per_node, require_block)?;
        }
        Commands::Exec {
            devices_per_node,
            require_block,
            command,
        } => {
            let code = commands::exec(devices_per_node, require_block, command).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Script { output } => {
            commands::script(&config, output)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_flag() {
        let cli = Cli::try_parse_from(["rankbind", "--log-format", "json", "hello"]).unwrap();
        assert_eq!(cli.log_format, Some(LogFormat::Json));

        assert!(Cli::try_parse_from(["rankbind", "--log-format", "yaml", "hello"]).is_err());
    }
}
