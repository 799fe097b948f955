//! Host metric snapshots.

use serde::{Deserialize, Serialize};

/// Full host snapshot served at `/api/host/stats` and broadcast as
/// `host:stats`. Each section is independently optional: a collector that
/// cannot read its source simply leaves the section out.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostStats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk: Option<DiskStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub containers: Option<ContainerCapacity>,
}

/// CPU usage derived from successive `/proc/stat` samples.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CpuStats {
    pub usage_percent: f64,
    pub cores: usize,
    pub threads: usize,
}

/// Memory usage from `/proc/meminfo`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MemoryStats {
    pub used_bytes: u64,
    pub total_bytes: u64,
    pub percent: f64,
}

/// Filesystem usage of the workspace volume.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DiskStats {
    pub used_bytes: u64,
    pub total_bytes: u64,
    pub percent: f64,
}

/// Container counts from the runtime, plus the configured ceiling.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ContainerCapacity {
    pub running: usize,
    pub total: usize,
    pub max: usize,
}
