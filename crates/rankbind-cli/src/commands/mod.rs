//! CLI commands implementation

use anyhow::{Context, Result};
use rankbind_core::{
    render_batch_script, resolve_local_rank, validate_topology, DeviceSet, RankbindConfig,
    TopologyConfig,
};
use rankbind_launcher::{
    visible_devices, Binding, BindingPolicy, LauncherEnv, ProcessEnv, ProcessRuntime, Runtime,
};
use rankbind_placement::{plan_job_with_devices, JobPlan};
use std::path::PathBuf;
use tracing::info;

fn policy(require_block: bool) -> BindingPolicy {
    if require_block {
        BindingPolicy::RequireBlock
    } else {
        BindingPolicy::PreferLauncher
    }
}

/// Read the launcher environment and resolve this process's binding
fn bind_from_env(devices_per_node: Option<u32>, require_block: bool) -> Result<Binding> {
    let env = ProcessEnv;
    let launcher = LauncherEnv::detect(&env)?;
    let devices = visible_devices(&env, devices_per_node)?;
    Ok(launcher.bind(&devices, policy(require_block))?)
}

/// Print the local rank for a global rank
pub fn resolve(global_rank: u32, devices_per_node: u32) -> Result<()> {
    let local_rank = resolve_local_rank(global_rank, devices_per_node)?;
    println!("{}", local_rank);
    Ok(())
}

/// Validate a topology
pub fn validate(
    world_size: u32,
    nodes: u32,
    tasks_per_node: u32,
    devices_per_node: u32,
) -> Result<()> {
    validate_topology(world_size, nodes, tasks_per_node, devices_per_node)?;
    println!("ok");
    Ok(())
}

/// Show the binding of every rank
pub fn plan(topology: &TopologyConfig, visible: Option<&str>, json: bool) -> Result<()> {
    let devices = match visible {
        Some(list) => DeviceSet::parse(list)?,
        None => DeviceSet::from_count(topology.devices_per_node),
    };
    let plan = plan_job_with_devices(topology, &devices)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        print!("{}", format_plan(&plan));
    }
    Ok(())
}

/// Table form of a job plan
pub fn format_plan(plan: &JobPlan) -> String {
    let mut out = format!(
        "World size: {}, nodes: {}, devices per node: {}, distribution: {}\n",
        plan.world_size, plan.node_count, plan.devices_per_node, plan.distribution
    );
    if !plan.arithmetic_consistent {
        out.push_str("Warning: rank mod devices_per_node does not match this distribution\n");
    }
    out.push('\n');
    out.push_str(&format!(
        "{:<8} {:<6} {:<11} {:<6}\n",
        "RANK", "NODE", "LOCAL_RANK", "DEVICE"
    ));
    out.push_str(&"-".repeat(34));
    out.push('\n');
    for a in &plan.assignments {
        out.push_str(&format!(
            "{:<8} {:<6} {:<11} {:<6}\n",
            a.global_rank, a.node, a.local_rank, a.device
        ));
    }
    out
}

/// Report rank, world size and host
pub fn hello() -> Result<()> {
    let launcher = LauncherEnv::detect(&ProcessEnv)?;
    println!(
        "{}",
        format_hello(launcher.global_rank, launcher.world_size, &launcher.host())
    );
    Ok(())
}

pub fn format_hello(rank: u32, world_size: u32, host: &str) -> String {
    format!(
        "This is Process {:2} out of {:2} running on host {}",
        rank, world_size, host
    )
}

/// Print export lines for this process's binding
pub fn env(devices_per_node: Option<u32>, require_block: bool) -> Result<()> {
    let binding = bind_from_env(devices_per_node, require_block)?;
    print!("{}", format_exports(&binding));
    Ok(())
}

/// Shell `export` lines matching what `exec` sets for its child
pub fn format_exports(binding: &Binding) -> String {
    let topology = &binding.topology;
    [
        ("CUDA_VISIBLE_DEVICES", binding.device),
        ("LOCAL_RANK", binding.local_rank),
        ("RANK", topology.global_rank()),
        ("WORLD_SIZE", topology.world_size()),
        ("LOCAL_WORLD_SIZE", topology.processes_per_node()),
        ("NODE_RANK", binding.node_rank),
    ]
    .iter()
    .map(|(key, value)| format!("export {}={}\n", key, value))
    .collect()
}

/// Bind and run a command, returning its exit code
pub async fn exec(
    devices_per_node: Option<u32>,
    require_block: bool,
    command: Vec<String>,
) -> Result<i32> {
    let (program, args) = command
        .split_first()
        .context("no command given to exec")?;

    let binding = bind_from_env(devices_per_node, require_block)?;
    let runtime = ProcessRuntime::new();
    let code = runtime.run(&binding, program, args).await?;

    info!(code, runtime = runtime.name(), "Command finished");
    Ok(code)
}

/// Render the batch script
pub fn script(config: &RankbindConfig, output: Option<PathBuf>) -> Result<()> {
    let script = render_batch_script(config)?;
    match output {
        Some(path) => {
            std::fs::write(&path, script)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote {}", path.display());
        }
        None => print!("{}", script),
    }
    Ok(())
}
