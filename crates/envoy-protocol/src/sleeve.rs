//! Sleeve records and spawn requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One active sleeve: an ephemeral container bound to exactly one
/// workspace.
///
/// The lifecycle fields (`name` through `cpu_limit`) are owned by the
/// sleeve manager; the enrichment fields (`integrity` through `resources`)
/// are refreshed by the status broadcaster and carry last-known values
/// when a collaborator is unreachable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SleeveInfo {
    pub name: String,
    pub container_id: String,
    pub container_name: String,
    pub workspace: String,
    pub spawn_time: DateTime<Utc>,
    pub status: String,
    #[serde(default)]
    pub constrained: bool,
    #[serde(default)]
    pub memory_limit_mb: i64,
    #[serde(default)]
    pub cpu_limit: i64,
    /// Task-completion ratio in `[0, 100]`, `100` when no task tracker
    /// is present.
    #[serde(default = "default_integrity")]
    pub integrity: f64,
    #[serde(default)]
    pub dhf: String,
    #[serde(default)]
    pub dhf_version: String,
    #[serde(default)]
    pub sidecar_healthy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ContainerResourceStats>,
}

fn default_integrity() -> f64 {
    100.0
}

/// Request body for `POST /api/sleeves`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpawnSleeveRequest {
    pub workspace: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub memory_limit_mb: i64,
    #[serde(default)]
    pub cpu_limit: i64,
}

/// Point-in-time resource usage of one container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerResourceStats {
    pub cpu_percent: f64,
    pub memory_used_bytes: u64,
    pub memory_limit_bytes: u64,
    pub memory_percent: f64,
}
