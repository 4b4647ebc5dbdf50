use crate::core::get_config_dir;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Deserialize, Debug, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub workload: WorkloadConfig,
}

#[derive(Deserialize, Debug, Clone)]
pub struct DaemonConfig {
    /// Seconds between reconciliation cycles
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Limit which GPUs the daemon keeps warm (None = all GPUs)
    #[serde(default)]
    pub gpus: Option<Vec<u32>>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct WorkloadConfig {
    /// Program spawned per idle GPU. The daemon pins the target device via
    /// CUDA_VISIBLE_DEVICES, so the command always addresses `cuda:0`.
    #[serde(default = "default_workload_command")]
    pub command: String,
    #[serde(default = "default_workload_args")]
    pub args: Vec<String>,
    /// Tear the workload down when an unrelated process shows up on its GPU.
    /// Off by default: once foreign work is running, our workload is
    /// indistinguishable from legitimate use and killing it buys nothing.
    #[serde(default)]
    pub stop_on_external: bool,
    /// How long to wait after SIGTERM before force-killing a workload
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl DaemonConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

impl WorkloadConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs.max(1))
    }
}

fn default_poll_interval_secs() -> u64 {
    300
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

fn default_workload_command() -> String {
    "python3".to_string()
}

/// Repeating large matmul, the same computation the hand-rolled watcher
/// scripts use. Runs until the process is terminated.
const DEFAULT_WORKLOAD_SNIPPET: &str = "\
import torch
a = torch.randn(8192, 8192, device='cuda')
b = torch.randn(8192, 8192, device='cuda')
while True:
    torch.matmul(a, b)
    torch.cuda.synchronize()
";

fn default_workload_args() -> Vec<String> {
    vec!["-c".to_string(), DEFAULT_WORKLOAD_SNIPPET.to_string()]
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            gpus: None,
        }
    }
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            command: default_workload_command(),
            args: default_workload_args(),
            stop_on_external: false,
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

pub fn load_config(config_path: Option<&PathBuf>) -> Result<Config, config::ConfigError> {
    let mut config_vec = vec![];

    // User-provided config file
    if let Some(config_path) = config_path {
        if config_path.exists() {
            config_vec.push(config_path.clone());
        } else {
            eprintln!("Warning: Config file {config_path:?} not found.");
        }
    }

    // Default config file
    if let Ok(default_config_path) = get_config_dir().map(|d| d.join("gwarm.toml")) {
        if default_config_path.exists() {
            config_vec.push(default_config_path);
        }
    }

    let settings = config::Config::builder();
    let settings = config_vec.iter().fold(settings, |s, path| {
        s.add_source(config::File::from(path.as_path()))
    });

    settings
        .add_source(
            config::Environment::with_prefix("GWARM")
                .separator("_")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("daemon.gpus"),
        )
        .build()?
        .try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.daemon.poll_interval_secs, 300);
        assert_eq!(config.daemon.gpus, None);
        assert!(!config.workload.stop_on_external);
        assert_eq!(config.workload.command, "python3");
        assert_eq!(config.workload.shutdown_grace(), Duration::from_secs(10));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
[daemon]
poll_interval_secs = 30
gpus = [0, 2]

[workload]
command = "burn"
args = ["--forever"]
stop_on_external = true
"#
        )
        .unwrap();

        let config = load_config(Some(&file.path().to_path_buf())).unwrap();
        assert_eq!(config.daemon.poll_interval_secs, 30);
        assert_eq!(config.daemon.gpus, Some(vec![0, 2]));
        assert_eq!(config.workload.command, "burn");
        assert_eq!(config.workload.args, vec!["--forever".to_string()]);
        assert!(config.workload.stop_on_external);
    }

    #[test]
    fn test_poll_interval_floor() {
        let config = Config {
            daemon: DaemonConfig {
                poll_interval_secs: 0,
                gpus: None,
            },
            ..Default::default()
        };
        assert_eq!(config.daemon.poll_interval(), Duration::from_secs(1));
    }
}
