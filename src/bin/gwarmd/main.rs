use clap::{CommandFactory, Parser};
use clap_complete::generate;
use std::io;

mod cli;
mod daemon;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let gwarmd = cli::Gwarmd::parse();

    if let Some(cli::Commands::Completion { shell }) = gwarmd.command {
        let mut cmd = cli::Gwarmd::command();
        generate(shell, &mut cmd, "gwarmd", &mut io::stdout());
        return Ok(());
    }

    // Initialize tracing: console (stderr) + daily rolling file appender
    let log_dir = gwarm::core::get_data_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix("daemon")
        .filename_suffix("log")
        .max_log_files(7)
        .build(&log_dir)?;
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(non_blocking);

    tracing_subscriber::registry()
        .with(tracing_subscriber::filter::LevelFilter::from(
            gwarmd.verbosity,
        ))
        .with(console_layer)
        .with(file_layer)
        .init();

    let mut config = gwarm::config::load_config(gwarmd.config.as_ref())?;

    // CLI flags override the config file
    if let Some(interval) = gwarmd.interval {
        config.daemon.poll_interval_secs = interval;
    }
    if let Some(ref gpu_spec) = gwarmd.gpus {
        let indices = gwarm::utils::parse_gpu_indices(gpu_spec)?;
        config.daemon.gpus = Some(indices);
    }

    daemon::run(config).await
}
