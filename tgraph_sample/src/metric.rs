//! The metrics a log line may carry
//!
//! Every metric tgraph can chart is a variant of [`MetricSelector`]. Keys are
//! the camelCase field names producers write, for instance `heapUsed` or
//! `cpuPercent`. Parsing a key never fails: unknown keys resolve to the
//! default metric, [`MetricSelector::HeapUsed`].

use std::{convert::Infallible, fmt, str};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "&'static str")]
/// Selects one numeric field of a log line.
pub enum MetricSelector {
    /// Used heap, megabytes.
    #[default]
    HeapUsed,
    /// Total heap, megabytes.
    HeapTotal,
    /// Used heap as a percentage of total heap.
    HeapPercent,
    /// Resident set size, megabytes.
    Rss,
    /// Memory held outside the heap, megabytes.
    External,
    /// CPU utilization, percent.
    CpuPercent,
    /// User CPU time in the sampling interval, milliseconds.
    CpuUser,
    /// System CPU time in the sampling interval, milliseconds.
    CpuSystem,
    /// User plus system CPU time in the sampling interval, milliseconds.
    CpuTotal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Coarse grouping of metrics, used to flip a viewer between memory and CPU.
pub enum Family {
    /// Heap and resident memory metrics.
    Memory,
    /// CPU time and utilization metrics.
    Cpu,
}

impl MetricSelector {
    /// Every selector, in display order.
    pub const ALL: [MetricSelector; 9] = [
        MetricSelector::HeapUsed,
        MetricSelector::HeapTotal,
        MetricSelector::HeapPercent,
        MetricSelector::Rss,
        MetricSelector::External,
        MetricSelector::CpuPercent,
        MetricSelector::CpuUser,
        MetricSelector::CpuSystem,
        MetricSelector::CpuTotal,
    ];

    /// Resolve a field key to a selector. Unknown keys resolve to
    /// [`MetricSelector::HeapUsed`].
    #[must_use]
    pub fn from_key(key: &str) -> Self {
        Self::lookup(key).unwrap_or_default()
    }

    /// Resolve a field key to a selector, `None` if the key is not known.
    #[must_use]
    pub fn lookup(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.key() == key)
    }

    /// The log line field this selector reads.
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            MetricSelector::HeapUsed => "heapUsed",
            MetricSelector::HeapTotal => "heapTotal",
            MetricSelector::HeapPercent => "heapPercent",
            MetricSelector::Rss => "rss",
            MetricSelector::External => "external",
            MetricSelector::CpuPercent => "cpuPercent",
            MetricSelector::CpuUser => "cpuUser",
            MetricSelector::CpuSystem => "cpuSystem",
            MetricSelector::CpuTotal => "cpuTotal",
        }
    }

    /// Human readable label, unit included.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            MetricSelector::HeapUsed => "Heap Used (MB)",
            MetricSelector::HeapTotal => "Heap Total (MB)",
            MetricSelector::HeapPercent => "Heap Usage (%)",
            MetricSelector::Rss => "RSS Memory (MB)",
            MetricSelector::External => "External Memory (MB)",
            MetricSelector::CpuPercent => "CPU Usage (%)",
            MetricSelector::CpuUser => "CPU User Time (ms)",
            MetricSelector::CpuSystem => "CPU System Time (ms)",
            MetricSelector::CpuTotal => "CPU Total Time (ms)",
        }
    }

    /// The family this metric belongs to.
    #[must_use]
    pub fn family(self) -> Family {
        match self {
            MetricSelector::CpuPercent
            | MetricSelector::CpuUser
            | MetricSelector::CpuSystem
            | MetricSelector::CpuTotal => Family::Cpu,
            MetricSelector::HeapUsed
            | MetricSelector::HeapTotal
            | MetricSelector::HeapPercent
            | MetricSelector::Rss
            | MetricSelector::External => Family::Memory,
        }
    }

    /// The headline metric of the other family: heap used <-> CPU percent.
    #[must_use]
    pub fn toggle_family(self) -> Self {
        match self.family() {
            Family::Memory => MetricSelector::CpuPercent,
            Family::Cpu => MetricSelector::HeapUsed,
        }
    }
}

impl From<String> for MetricSelector {
    fn from(key: String) -> Self {
        Self::from_key(&key)
    }
}

impl From<MetricSelector> for &'static str {
    fn from(metric: MetricSelector) -> Self {
        metric.key()
    }
}

impl str::FromStr for MetricSelector {
    type Err = Infallible;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_key(input))
    }
}

impl fmt::Display for MetricSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}
