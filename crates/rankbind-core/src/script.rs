//! Slurm batch-script rendering

use std::fmt::Write;

use crate::{JobKind, RankbindConfig, RankbindError, RankbindResult};

/// Render a Slurm batch script for the configured job.
///
/// Data-parallel jobs are validated first and every task is started through
/// `rankbind exec`, so a bad binding stops the task before it joins the
/// process group.
pub fn render_batch_script(config: &RankbindConfig) -> RankbindResult<String> {
    let job = &config.job;
    let topo = &config.topology;
    topo.validate_for(job.kind)?;

    if job.command.trim().is_empty() {
        return Err(RankbindError::Config("job.command is empty".to_string()));
    }

    let single_task = matches!(job.kind, JobKind::Serial | JobKind::Openmp | JobKind::Gpu);
    let (nodes, tasks_per_node) = if single_task {
        (1, 1)
    } else {
        (topo.nodes, topo.tasks_per_node)
    };

    let mut out = String::new();
    let mut line = |s: String| {
        // Writing to a String cannot fail
        let _ = writeln!(out, "{}", s);
    };

    line("#!/bin/bash".to_string());
    line(format!("#SBATCH --job-name={}", job.name));
    line(format!("#SBATCH --nodes={}", nodes));
    line(format!("#SBATCH --ntasks-per-node={}", tasks_per_node));
    line(format!("#SBATCH --cpus-per-task={}", job.cpus_per_task));
    line(format!("#SBATCH --time={}", job.time));
    if let Some(partition) = &job.partition {
        line(format!("#SBATCH --partition={}", partition));
    }
    if let Some(memory) = &job.memory {
        line(format!("#SBATCH --mem={}", memory));
    }
    if matches!(job.kind, JobKind::Gpu | JobKind::Ddp) {
        line(format!("#SBATCH --gres=gpu:{}", topo.devices_per_node));
    }
    if job.kind == JobKind::Ddp {
        line("#SBATCH --distribution=block".to_string());
    }
    line(format!("#SBATCH --output={}-%j.out", job.name));
    line(String::new());

    if !job.modules.is_empty() {
        line("module purge".to_string());
        for module in &job.modules {
            line(format!("module load {}", module));
        }
        line(String::new());
    }

    match job.kind {
        JobKind::Serial | JobKind::Gpu => line(job.command.clone()),
        JobKind::Openmp => {
            line("export OMP_NUM_THREADS=$SLURM_CPUS_PER_TASK".to_string());
            line(job.command.clone());
        }
        JobKind::Mpi => line(format!("srun {}", job.command)),
        JobKind::Ddp => {
            line("export MASTER_ADDR=$(scontrol show hostnames \"$SLURM_JOB_NODELIST\" | head -n 1)".to_string());
            line("export MASTER_PORT=${MASTER_PORT:-29500}".to_string());
            line(format!("srun rankbind exec -- {}", job.command));
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Distribution, TopologyConfig};

    fn ddp_config(devices_per_node: u32) -> RankbindConfig {
        let mut config = RankbindConfig::default();
        config.job.kind = JobKind::Ddp;
        config.job.name = "ddp".to_string();
        config.job.command = "python train.py".to_string();
        config.topology = TopologyConfig {
            nodes: 2,
            tasks_per_node: 4,
            devices_per_node,
            distribution: Distribution::Block,
        };
        config
    }

    #[test]
    fn test_render_serial() {
        let script = render_batch_script(&RankbindConfig::default()).unwrap();
        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains("#SBATCH --ntasks-per-node=1\n"));
        assert!(script.trim_end().ends_with("./a.out"));
        assert!(!script.contains("--gres"));
    }

    #[test]
    fn test_render_openmp_sets_threads() {
        let mut config = RankbindConfig::default();
        config.job.kind = JobKind::Openmp;
        config.job.cpus_per_task = 8;
        let script = render_batch_script(&config).unwrap();
        assert!(script.contains("#SBATCH --cpus-per-task=8\n"));
        assert!(script.contains("export OMP_NUM_THREADS=$SLURM_CPUS_PER_TASK\n"));
    }

    #[test]
    fn test_render_mpi_uses_srun() {
        let mut config = RankbindConfig::default();
        config.job.kind = JobKind::Mpi;
        config.job.command = "./mpi_test".to_string();
        config.job.modules = vec!["openmpi".to_string()];
        config.topology.nodes = 2;
        config.topology.tasks_per_node = 16;
        config.topology.devices_per_node = 0;

        let script = render_batch_script(&config).unwrap();
        assert!(script.contains("#SBATCH --nodes=2\n"));
        assert!(script.contains("#SBATCH --ntasks-per-node=16\n"));
        assert!(script.contains("module load openmpi\n"));
        assert!(script.contains("srun ./mpi_test\n"));
    }

    #[test]
    fn test_render_ddp() {
        let script = render_batch_script(&ddp_config(4)).unwrap();
        assert!(script.contains("#SBATCH --gres=gpu:4\n"));
        assert!(script.contains("#SBATCH --distribution=block\n"));
        assert!(script.contains("srun rankbind exec -- python train.py\n"));
    }

    #[test]
    fn test_render_ddp_rejects_mismatch() {
        let err = render_batch_script(&ddp_config(2)).unwrap_err();
        assert!(matches!(err, RankbindError::Topology(_)));
    }

    #[test]
    fn test_render_gpu_rejects_zero_devices() {
        let mut config = RankbindConfig::default();
        config.job.kind = JobKind::Gpu;
        config.topology.devices_per_node = 0;
        let err = render_batch_script(&config).unwrap_err();
        assert!(matches!(err, RankbindError::Config(_)));

        config.topology.devices_per_node = 2;
        let script = render_batch_script(&config).unwrap();
        assert!(script.contains("#SBATCH --gres=gpu:2\n"));
    }

    #[test]
    fn test_render_rejects_empty_command() {
        let mut config = RankbindConfig::default();
        config.job.command = "  ".to_string();
        assert!(render_batch_script(&config).is_err());
    }
}
