//! Agent - System Metrics
//!
//! Reads CPU, RAM and disk figures for each collection cycle.

use std::path::{Path, PathBuf};
use std::time::Duration;

use common::MetricKind;
use sysinfo::{Disks, System};

use crate::error::CollectError;

/// The three sampling functions the collection loop consumes.
///
/// Each call is independent: one failing must not affect the others.
pub trait MetricSource: Send {
    /// CPU utilization since the previous call, 0-100.
    fn cpu_usage_percent(&mut self) -> Result<f64, CollectError>;

    /// Used memory in bytes.
    fn memory_used_bytes(&mut self) -> Result<f64, CollectError>;

    /// Used share of the monitored filesystem, 0-100.
    fn disk_usage_percent(&mut self) -> Result<f64, CollectError>;

    /// Shortest gap after a CPU read for the next one to cover a new window.
    fn warm_up_pause(&self) -> Duration {
        Duration::ZERO
    }

    fn read(&mut self, kind: MetricKind) -> Result<f64, CollectError> {
        match kind {
            MetricKind::Cpu => self.cpu_usage_percent(),
            MetricKind::Memory => self.memory_used_bytes(),
            MetricKind::Disk => self.disk_usage_percent(),
        }
    }
}

/// `sysinfo`-backed source for the local host.
pub struct SystemSource {
    system: System,
    mount_point: PathBuf,
}

impl SystemSource {
    pub fn new(mount_point: impl Into<PathBuf>) -> Self {
        Self {
            system: System::new(),
            mount_point: mount_point.into(),
        }
    }

    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }
}

impl Default for SystemSource {
    fn default() -> Self {
        Self::new("/")
    }
}

impl MetricSource for SystemSource {
    // Differential: the first call after construction has nothing to diff
    // against and reports the since-boot average. Refreshes closer together
    // than MINIMUM_CPU_UPDATE_INTERVAL keep the previous reading.
    fn cpu_usage_percent(&mut self) -> Result<f64, CollectError> {
        self.system.refresh_cpu_usage();
        if self.system.cpus().is_empty() {
            return Err(CollectError::unavailable(MetricKind::Cpu, "no CPUs reported"));
        }
        Ok(f64::from(self.system.global_cpu_usage()))
    }

    fn memory_used_bytes(&mut self) -> Result<f64, CollectError> {
        self.system.refresh_memory();
        if self.system.total_memory() == 0 {
            return Err(CollectError::unavailable(
                MetricKind::Memory,
                "total memory reported as 0",
            ));
        }
        Ok(self.system.used_memory() as f64)
    }

    fn disk_usage_percent(&mut self) -> Result<f64, CollectError> {
        let disks = Disks::new_with_refreshed_list();
        let disk = disks
            .list()
            .iter()
            .find(|disk| disk.mount_point() == self.mount_point)
            .ok_or_else(|| {
                CollectError::unavailable(
                    MetricKind::Disk,
                    format!("no filesystem mounted at {}", self.mount_point.display()),
                )
            })?;

        let total = disk.total_space();
        if total == 0 {
            return Err(CollectError::unavailable(
                MetricKind::Disk,
                format!("{} reports zero capacity", self.mount_point.display()),
            ));
        }
        // Blocks reserved for root count as used
        let used = total.saturating_sub(disk.available_space());
        Ok(used as f64 / total as f64 * 100.0)
    }

    fn warm_up_pause(&self) -> Duration {
        sysinfo::MINIMUM_CPU_UPDATE_INTERVAL
    }
}
