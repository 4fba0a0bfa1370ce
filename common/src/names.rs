//! Standard metric-name vocabulary.

use std::fmt;

/// Longest metric name accepted by the ingestion side.
pub const MAX_METRIC_NAME_LEN: usize = 64;

pub const CPU_USAGE_PERCENT: &str = "cpu.usage.percent";
pub const MEMORY_USED_BYTES: &str = "memory.used.bytes";
pub const DISK_USAGE_PERCENT: &str = "disk.usage.percent";

/// The resource kinds sampled every cycle, in collection order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Cpu,
    Memory,
    Disk,
}

impl MetricKind {
    /// Collection order: CPU, then memory, then disk.
    pub const ALL: [MetricKind; 3] = [MetricKind::Cpu, MetricKind::Memory, MetricKind::Disk];

    /// Fixed wire name for this kind.
    pub fn metric_name(self) -> &'static str {
        match self {
            MetricKind::Cpu => CPU_USAGE_PERCENT,
            MetricKind::Memory => MEMORY_USED_BYTES,
            MetricKind::Disk => DISK_USAGE_PERCENT,
        }
    }

    pub fn from_metric_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.metric_name() == name)
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MetricKind::Cpu => "CPU",
            MetricKind::Memory => "Memory",
            MetricKind::Disk => "Disk",
        };
        f.write_str(label)
    }
}

/// Whether `name` follows the dotted lowercase convention
/// (`segment(.segment)*`, segments of `[a-z0-9_]`) within the length limit.
///
/// Not enforced at construction; used to flag unusual names when inspecting
/// traffic.
pub fn is_canonical_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_METRIC_NAME_LEN
        && name.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .bytes()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
        })
}
