use crate::config::WorkloadConfig;
use anyhow::{Context, Result};
use std::process::Stdio;
use tokio::process::{Child, Command};

#[cfg(test)]
use mockall::automock;

/// Spawns one dummy workload process bound to a specific GPU.
///
/// The trait seam exists so the supervisor can be exercised in tests with a
/// launcher that spawns throwaway processes instead of real GPU work.
#[cfg_attr(test, automock)]
pub trait WorkloadLauncher {
    fn launch(&self, gpu_index: u32) -> Result<Child>;
}

/// Launches the configured workload command with CUDA_VISIBLE_DEVICES
/// pinned to the target GPU, so the child's resource usage shows up on
/// exactly that device in later polls.
pub struct CommandLauncher {
    command: String,
    args: Vec<String>,
}

impl CommandLauncher {
    pub fn new(workload: &WorkloadConfig) -> Self {
        Self {
            command: workload.command.clone(),
            args: workload.args.clone(),
        }
    }
}

impl WorkloadLauncher for CommandLauncher {
    fn launch(&self, gpu_index: u32) -> Result<Child> {
        Command::new(&self.command)
            .args(&self.args)
            .env("CUDA_VISIBLE_DEVICES", gpu_index.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            // Safety net in case the daemon exits without running shutdown
            .kill_on_drop(true)
            .spawn()
            .with_context(|| {
                format!(
                    "Failed to spawn workload '{}' on GPU {gpu_index}",
                    self.command
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_launch_sets_up_a_killable_child() {
        let launcher = CommandLauncher {
            command: "sleep".to_string(),
            args: vec!["30".to_string()],
        };

        let mut child = launcher.launch(3).unwrap();
        assert!(child.id().is_some());
        child.kill().await.unwrap();
    }

    #[tokio::test]
    async fn test_launch_missing_command_is_an_error() {
        let launcher = CommandLauncher {
            command: "definitely-not-a-real-binary".to_string(),
            args: vec![],
        };
        assert!(launcher.launch(0).is_err());
    }
}
