use crate::core::launcher::WorkloadLauncher;
use crate::core::poller::{classify, GpuPoller, GpuSample, GpuStatus};
use anyhow::{bail, Result};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::process::Child;
use tokio::time::{timeout, Instant};

/// A dummy workload we spawned and exclusively own.
struct TrackedWorkload {
    pid: u32,
    child: Child,
}

/// Owns the GPU-to-child map and drives it toward "exactly one workload on
/// every idle-and-free GPU". All mutation happens on the single daemon
/// task, so no locking is involved.
pub struct Supervisor {
    launcher: Box<dyn WorkloadLauncher + Send>,
    workloads: HashMap<u32, TrackedWorkload>,
    stop_on_external: bool,
    grace: Duration,
    shut_down: bool,
}

impl Supervisor {
    pub fn new(
        launcher: Box<dyn WorkloadLauncher + Send>,
        stop_on_external: bool,
        grace: Duration,
    ) -> Self {
        Self {
            launcher,
            workloads: HashMap::new(),
            stop_on_external,
            grace,
            shut_down: false,
        }
    }

    /// PIDs of every child we currently track, for self-vs-foreign
    /// classification of attached GPU processes.
    pub fn tracked_pids(&self) -> HashSet<u32> {
        self.workloads.values().map(|w| w.pid).collect()
    }

    pub fn tracked_count(&self) -> usize {
        self.workloads.len()
    }

    pub fn has_workload(&self, gpu_index: u32) -> bool {
        self.workloads.contains_key(&gpu_index)
    }

    /// One reconciliation pass over a cycle's samples.
    ///
    /// Invariant: at most one tracked workload per GPU index, and no spawn
    /// ever happens on a GPU that carries a foreign process this cycle.
    pub async fn reconcile(&mut self, samples: &[GpuSample], managed: &HashSet<u32>) {
        if self.shut_down {
            return;
        }

        self.reap_exited();
        let our_pids = self.tracked_pids();

        for sample in samples.iter().filter(|s| managed.contains(&s.index)) {
            match classify(sample, &our_pids) {
                GpuStatus::Busy => self.on_busy(sample.index).await,
                GpuStatus::HeldByUs => {
                    tracing::debug!("GPU {}: workload already running", sample.index);
                }
                GpuStatus::Idle => self.on_idle(sample.index),
            }
        }
    }

    /// Remove children that exited on their own. Their GPUs become spawn
    /// candidates again in the same cycle.
    fn reap_exited(&mut self) {
        self.workloads.retain(|gpu, w| match w.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                tracing::warn!(
                    "Workload on GPU {gpu} (PID {}) exited on its own: {status}",
                    w.pid
                );
                false
            }
            Err(e) => {
                tracing::warn!("Failed to poll workload on GPU {gpu}: {e}");
                false
            }
        });
    }

    async fn on_busy(&mut self, gpu_index: u32) {
        if !self.workloads.contains_key(&gpu_index) {
            tracing::info!("GPU {gpu_index}: busy with external work");
            return;
        }

        if self.stop_on_external {
            tracing::info!("GPU {gpu_index}: external work detected, stopping our workload");
            if let Some(workload) = self.workloads.remove(&gpu_index) {
                terminate(gpu_index, workload, self.grace).await;
            }
        } else {
            // Policy choice: once foreign work runs alongside ours, the
            // workload is left alone until shutdown.
            tracing::debug!("GPU {gpu_index}: external work alongside our workload, leaving it");
        }
    }

    fn on_idle(&mut self, gpu_index: u32) {
        if self.workloads.contains_key(&gpu_index) {
            // Freshly spawned child that has not shown up on the device yet
            tracing::debug!("GPU {gpu_index}: workload spawned but not visible yet");
            return;
        }

        match self.launcher.launch(gpu_index) {
            Ok(child) => match child.id() {
                Some(pid) => {
                    tracing::info!("GPU {gpu_index}: idle, launched workload (PID {pid})");
                    self.workloads.insert(gpu_index, TrackedWorkload { pid, child });
                }
                None => {
                    tracing::warn!("GPU {gpu_index}: workload exited before it could be tracked");
                }
            },
            Err(e) => {
                tracing::warn!("GPU {gpu_index}: workload spawn failed, will retry next cycle: {e:#}");
            }
        }
    }

    /// Terminate every tracked workload: SIGTERM all of them, share one
    /// grace period across the waits, SIGKILL whatever remains.
    ///
    /// Invoked from both the signal path and the end of the run loop, so
    /// repeated calls are a no-op.
    pub async fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        if self.workloads.is_empty() {
            return;
        }

        tracing::info!("Shutting down {} dummy workload(s)", self.workloads.len());
        for workload in self.workloads.values() {
            send_sigterm(workload.pid);
        }

        let deadline = Instant::now() + self.grace;
        for (gpu, mut workload) in self.workloads.drain() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, workload.child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::info!("Workload on GPU {gpu} (PID {}) exited: {status}", workload.pid);
                }
                Ok(Err(e)) => {
                    tracing::warn!("Failed waiting for workload on GPU {gpu}: {e}");
                }
                Err(_) => {
                    tracing::warn!(
                        "Workload on GPU {gpu} (PID {}) ignored SIGTERM, force-killing",
                        workload.pid
                    );
                    let _ = workload.child.kill().await;
                }
            }
        }
    }
}

/// Terminate a single workload: SIGTERM, bounded wait, then SIGKILL.
async fn terminate(gpu_index: u32, mut workload: TrackedWorkload, grace: Duration) {
    send_sigterm(workload.pid);
    match timeout(grace, workload.child.wait()).await {
        Ok(Ok(status)) => {
            tracing::debug!("Workload on GPU {gpu_index} exited: {status}");
        }
        Ok(Err(e)) => {
            tracing::warn!("Failed waiting for workload on GPU {gpu_index}: {e}");
        }
        Err(_) => {
            tracing::warn!("Workload on GPU {gpu_index} ignored SIGTERM, force-killing");
            let _ = workload.child.kill().await;
        }
    }
}

fn send_sigterm(pid: u32) {
    // tokio's Child only exposes SIGKILL; the graceful request goes
    // through libc directly.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc != 0 {
        tracing::debug!("SIGTERM to PID {pid} failed (already gone?)");
    }
}

/// One full poll-and-reconcile cycle. A poller failure skips the cycle
/// without touching any tracked state.
pub async fn run_cycle<P: GpuPoller>(
    poller: &P,
    supervisor: &mut Supervisor,
    managed: &HashSet<u32>,
) {
    match poller.sample() {
        Ok(samples) => supervisor.reconcile(&samples, managed).await,
        Err(e) => tracing::warn!("GPU poll failed, skipping this cycle: {e:#}"),
    }
}

/// Intersect the requested GPU set with what the host actually has.
/// Unknown indices are warned about and dropped; an empty result is a
/// startup error.
pub fn resolve_managed(requested: Option<&[u32]>, samples: &[GpuSample]) -> Result<HashSet<u32>> {
    let detected: HashSet<u32> = samples.iter().map(|s| s.index).collect();

    let managed: HashSet<u32> = match requested {
        Some(indices) => {
            let (valid, invalid): (Vec<u32>, Vec<u32>) = indices
                .iter()
                .copied()
                .partition(|idx| detected.contains(idx));
            if !invalid.is_empty() {
                tracing::warn!(
                    "GPU indices {invalid:?} do not exist on this host ({} detected), skipping them",
                    detected.len()
                );
            }
            valid.into_iter().collect()
        }
        None => detected,
    };

    if managed.is_empty() {
        bail!("No GPUs selected");
    }
    Ok(managed)
}
