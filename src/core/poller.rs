use anyhow::{Context, Result};
use nvml_wrapper::Nvml;
use std::collections::HashSet;

#[cfg(test)]
use mockall::automock;

/// One GPU as seen during a single polling cycle.
#[derive(Debug, Clone)]
pub struct GpuSample {
    pub index: u32,
    pub uuid: String,
    /// PIDs of every compute process currently attached to the device
    pub pids: Vec<u32>,
}

/// Per-cycle classification of a GPU. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuStatus {
    /// No compute process attached
    Idle,
    /// At least one process we did not spawn is attached
    Busy,
    /// Occupied solely by our own tracked workload
    HeldByUs,
}

/// Classify a GPU sample against the set of PIDs we spawned ourselves.
///
/// A GPU carrying only our own workload is not a spawn candidate, but it is
/// not "busy" either — no foreign process is using it.
pub fn classify(sample: &GpuSample, our_pids: &HashSet<u32>) -> GpuStatus {
    if sample.pids.is_empty() {
        GpuStatus::Idle
    } else if sample.pids.iter().all(|pid| our_pids.contains(pid)) {
        GpuStatus::HeldByUs
    } else {
        GpuStatus::Busy
    }
}

/// Source of per-cycle GPU samples.
///
/// A failed call fails that cycle only; the caller logs it and retries on
/// the next interval.
#[cfg_attr(test, automock)]
pub trait GpuPoller {
    fn sample(&self) -> Result<Vec<GpuSample>>;
}

/// NVML-backed poller. Device indices are stable for the lifetime of the
/// run, so a sample can be matched against earlier cycles by index.
pub struct NvmlPoller {
    nvml: Nvml,
}

impl NvmlPoller {
    /// Initialize NVML. Failure here means there is no way to observe the
    /// host's GPUs at all, which is fatal at startup.
    pub fn init() -> Result<Self> {
        let nvml = Nvml::init().context("NVML init failed (is the NVIDIA driver installed?)")?;
        Ok(Self { nvml })
    }
}

impl GpuPoller for NvmlPoller {
    fn sample(&self) -> Result<Vec<GpuSample>> {
        let device_count = self
            .nvml
            .device_count()
            .context("NVML device_count failed")?;

        let mut samples = Vec::with_capacity(device_count as usize);
        for i in 0..device_count {
            let device = self
                .nvml
                .device_by_index(i)
                .with_context(|| format!("NVML lookup of GPU {i} failed"))?;
            let uuid = device
                .uuid()
                .with_context(|| format!("NVML uuid query for GPU {i} failed"))?;
            let pids = device
                .running_compute_processes()
                .with_context(|| format!("NVML compute process query for GPU {i} failed"))?
                .into_iter()
                .map(|proc| proc.pid)
                .collect();
            samples.push(GpuSample {
                index: i,
                uuid,
                pids,
            });
        }

        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(index: u32, pids: Vec<u32>) -> GpuSample {
        GpuSample {
            index,
            uuid: format!("GPU-{index}"),
            pids,
        }
    }

    #[test]
    fn test_classify_idle_when_no_processes() {
        let ours = HashSet::new();
        assert_eq!(classify(&sample(0, vec![]), &ours), GpuStatus::Idle);
    }

    #[test]
    fn test_classify_busy_with_foreign_process() {
        let ours = HashSet::from([1234]);
        assert_eq!(classify(&sample(0, vec![9999]), &ours), GpuStatus::Busy);
        // Our workload plus a foreign process is still busy
        assert_eq!(
            classify(&sample(0, vec![1234, 9999]), &ours),
            GpuStatus::Busy
        );
    }

    #[test]
    fn test_classify_held_by_us() {
        let ours = HashSet::from([1234]);
        assert_eq!(
            classify(&sample(0, vec![1234]), &ours),
            GpuStatus::HeldByUs
        );
    }
}
