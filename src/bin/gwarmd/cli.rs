use std::path::PathBuf;

use clap::Parser;
use clap_complete::Shell;
use clap_verbosity_flag::{InfoLevel, Verbosity};

#[derive(Debug, Parser)]
#[command(name = "gwarmd", author, version, about = "Keeps idle GPUs warm with dummy workloads")]
#[command(styles = gwarm::utils::STYLES)]
pub struct Gwarmd {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// The configuration file to use
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Seconds between polling cycles (overrides config)
    #[arg(short, long, value_name = "SECS")]
    pub interval: Option<u64>,

    /// Limit which GPUs are kept warm (e.g., "0,2" or "0-2")
    #[arg(long, value_name = "INDICES")]
    pub gpus: Option<String>,

    /// Per-cycle status lines are logged at info; quiet them with -q
    #[command(flatten)]
    pub verbosity: Verbosity<InfoLevel>,
}

#[derive(Debug, Parser)]
pub enum Commands {
    /// Generate shell completion scripts
    Completion {
        /// The shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}
