use anyhow::{Context, Result};
use gwarm::config::Config;
use gwarm::core::launcher::CommandLauncher;
use gwarm::core::poller::{GpuPoller, NvmlPoller};
use gwarm::core::supervisor::{resolve_managed, run_cycle, Supervisor};
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::MissedTickBehavior;

pub async fn run(config: Config) -> Result<()> {
    // No way to observe GPUs at all is the one unrecoverable startup failure
    let poller = NvmlPoller::init()?;

    // Device indices are stable for the run, so the managed set is
    // resolved once against the initial enumeration.
    let samples = poller.sample().context("Initial GPU enumeration failed")?;
    let managed = resolve_managed(config.daemon.gpus.as_deref(), &samples)?;
    let mut sorted: Vec<u32> = managed.iter().copied().collect();
    sorted.sort_unstable();
    tracing::info!(
        "Keeping GPUs {sorted:?} warm, polling every {}s",
        config.daemon.poll_interval().as_secs()
    );

    let launcher = CommandLauncher::new(&config.workload);
    let mut supervisor = Supervisor::new(
        Box::new(launcher),
        config.workload.stop_on_external,
        config.workload.shutdown_grace(),
    );

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut interval = tokio::time::interval(config.daemon.poll_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // The sleep is the only suspension point; a signal interrupts it
        // instead of waiting out the poll interval.
        tokio::select! {
            _ = interval.tick() => {}
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, shutting down");
                break;
            }
        }

        run_cycle(&poller, &mut supervisor, &managed).await;
    }

    supervisor.shutdown().await;
    Ok(())
}
