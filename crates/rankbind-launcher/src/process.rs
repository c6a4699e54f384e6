//! Process-based runtime implementation
//!
//! Starts the training program as a child process with exactly one visible
//! accelerator and the rank variables distributed frameworks read at
//! process-group initialization.

use async_trait::async_trait;
use rankbind_core::{RankbindError, RankbindResult};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::env::Binding;
use crate::traits::Runtime;

/// Process-based runtime
#[derive(Debug, Clone, Default)]
pub struct ProcessRuntime {
    /// Extra environment passed to every child
    extra_env: Vec<(String, String)>,
}

impl ProcessRuntime {
    /// Create a new process runtime
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an environment variable for every child
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_env.push((key.into(), value.into()));
        self
    }

    /// Build the command for a bound child
    pub fn bind_command(&self, binding: &Binding, program: &str, args: &[String]) -> Command {
        let topology = &binding.topology;
        let mut cmd = Command::new(program);
        cmd.args(args);

        cmd.env("CUDA_VISIBLE_DEVICES", binding.device.to_string());
        cmd.env("LOCAL_RANK", binding.local_rank.to_string());
        cmd.env("RANK", topology.global_rank().to_string());
        cmd.env("WORLD_SIZE", topology.world_size().to_string());
        cmd.env(
            "LOCAL_WORLD_SIZE",
            topology.processes_per_node().to_string(),
        );
        cmd.env("NODE_RANK", binding.node_rank.to_string());

        for (key, value) in &self.extra_env {
            cmd.env(key, value);
        }

        cmd.stdin(Stdio::inherit());
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::inherit());

        cmd
    }
}

#[async_trait]
impl Runtime for ProcessRuntime {
    async fn run(&self, binding: &Binding, program: &str, args: &[String]) -> RankbindResult<i32> {
        info!(
            rank = binding.topology.global_rank(),
            device = binding.device,
            program,
            "Starting bound process"
        );

        let mut cmd = self.bind_command(binding, program, args);
        let mut child = cmd.spawn().map_err(|e| {
            error!(program, error = %e, "Failed to spawn process");
            RankbindError::Launch(format!("Failed to spawn {}: {}", program, e))
        })?;

        debug!(pid = child.id().unwrap_or(0), "Process spawned");

        let status = child
            .wait()
            .await
            .map_err(|e| RankbindError::Launch(format!("Failed to wait for {}: {}", program, e)))?;

        let code = exit_code(status);
        debug!(code, "Process exited");
        Ok(code)
    }

    fn name(&self) -> &'static str {
        "process"
    }
}

/// Shell-style exit code, `128 + signal` for signalled children
fn exit_code(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use rankbind_core::ProcessTopology;
    use std::ffi::OsStr;

    fn binding() -> Binding {
        Binding {
            topology: ProcessTopology::new(6, 8, 2, 4, 4).unwrap(),
            local_rank: 2,
            device: 5,
            node_rank: 1,
            hostname: "node-1".to_string(),
        }
    }

    fn env_of<'a>(cmd: &'a Command, key: &str) -> Option<&'a OsStr> {
        cmd.as_std()
            .get_envs()
            .find(|(k, _)| *k == OsStr::new(key))
            .and_then(|(_, v)| v)
    }

    #[test]
    fn test_bind_command_env() {
        let runtime = ProcessRuntime::new().with_env("MASTER_PORT", "29500");
        let cmd = runtime.bind_command(&binding(), "python", &["train.py".to_string()]);

        assert_eq!(env_of(&cmd, "CUDA_VISIBLE_DEVICES"), Some(OsStr::new("5")));
        assert_eq!(env_of(&cmd, "LOCAL_RANK"), Some(OsStr::new("2")));
        assert_eq!(env_of(&cmd, "RANK"), Some(OsStr::new("6")));
        assert_eq!(env_of(&cmd, "WORLD_SIZE"), Some(OsStr::new("8")));
        assert_eq!(env_of(&cmd, "LOCAL_WORLD_SIZE"), Some(OsStr::new("4")));
        assert_eq!(env_of(&cmd, "NODE_RANK"), Some(OsStr::new("1")));
        assert_eq!(env_of(&cmd, "MASTER_PORT"), Some(OsStr::new("29500")));
        assert_eq!(cmd.as_std().get_program(), OsStr::new("python"));
        assert_eq!(runtime.name(), "process");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_sees_binding() {
        let runtime = ProcessRuntime::new();
        let args = vec![
            "-c".to_string(),
            r#"test "$LOCAL_RANK" = 2 && test "$CUDA_VISIBLE_DEVICES" = 5"#.to_string(),
        ];
        let code = runtime.run(&binding(), "sh", &args).await.unwrap();
        assert_eq!(code, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_propagates_exit_code() {
        let runtime = ProcessRuntime::new();
        let args = vec!["-c".to_string(), "exit 3".to_string()];
        let code = runtime.run(&binding(), "sh", &args).await.unwrap();
        assert_eq!(code, 3);
    }

    #[tokio::test]
    async fn test_run_missing_program() {
        let runtime = ProcessRuntime::new();
        let err = runtime
            .run(&binding(), "/nonexistent/rankbind-test-binary", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, RankbindError::Launch(_)));
    }
}
