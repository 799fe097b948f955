//! Container runtime adapter.
//!
//! The orchestration layers talk to the runtime through the capability
//! traits in this module so that tests can substitute in-memory fakes;
//! [`DockerRuntime`] is the production implementation over bollard.

mod docker;

pub use docker::DockerRuntime;

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use envoy_protocol::{ContainerResourceStats, ContainerSummary, NetworkSummary};
use futures_util::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use tokio::io::AsyncWrite;

/// Label marking a container as a sleeve.
pub const LABEL_SLEEVE: &str = "sleeve";
/// Label carrying the sleeve name.
pub const LABEL_NAME: &str = "sleeve.name";
/// Label carrying the workspace path.
pub const LABEL_WORKSPACE: &str = "sleeve.workspace";
/// Label flagging resource-constrained sleeves.
pub const LABEL_CONSTRAINED: &str = "sleeve.constrained";
/// Label carrying the memory limit in MiB.
pub const LABEL_MEMORY_LIMIT_MB: &str = "sleeve.memory_limit_mb";
/// Label carrying the CPU limit in cores.
pub const LABEL_CPU_LIMIT: &str = "sleeve.cpu_limit";

/// Minimal container record surfaced by list and inspect operations.
#[derive(Debug, Clone, Default)]
pub struct ContainerRecord {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: String,
    pub status: String,
    pub labels: HashMap<String, String>,
    /// Creation time, seconds since the epoch.
    pub created: i64,
}

/// A named volume mounted into a container.
#[derive(Debug, Clone)]
pub struct VolumeMount {
    pub volume: String,
    /// Subdirectory of the volume to mount instead of its root.
    pub subpath: Option<String>,
    pub target: String,
    pub read_only: bool,
}

/// Everything needed to create one container.
#[derive(Debug, Clone)]
pub struct CreateContainerSpec {
    pub name: String,
    pub image: String,
    pub labels: HashMap<String, String>,
    pub network: String,
    pub mounts: Vec<VolumeMount>,
    pub memory_limit_bytes: Option<i64>,
    pub nano_cpus: Option<i64>,
}

/// Running and total container counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeCounts {
    pub running: usize,
    pub total: usize,
}

/// Parameters for an interactive exec session.
#[derive(Debug, Clone)]
pub struct ExecSpec {
    pub cmd: Vec<String>,
    pub user: String,
    pub cols: u16,
    pub rows: u16,
}

/// An attached exec session: its id plus the bidirectional byte streams.
pub struct ExecSession {
    pub id: String,
    /// Multiplexed stdout/stderr of the exec process.
    pub output: Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>,
    /// Stdin of the exec process.
    pub input: Pin<Box<dyn AsyncWrite + Send>>,
}

/// Agent binary detected inside a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DhfInfo {
    pub name: String,
    pub version: String,
}

/// Container lifecycle operations used by the sleeve manager.
#[async_trait]
pub trait SleeveRuntime: Send + Sync {
    /// Creates the bridged network iff absent. Idempotent.
    async fn ensure_network(&self, name: &str) -> Result<()>;

    /// Creates a container and returns its id.
    async fn create_container(&self, spec: CreateContainerSpec) -> Result<String>;

    /// Starts a created container.
    async fn start_container(&self, id: &str) -> Result<()>;

    /// Stops a running container.
    async fn stop_container(&self, id: &str) -> Result<()>;

    /// Force-removes a container.
    async fn remove_container(&self, id: &str) -> Result<()>;

    /// Resolves a container by exact name.
    async fn get_by_name(&self, name: &str) -> Result<Option<ContainerRecord>>;

    /// Lists containers carrying the sleeve label, running or not.
    async fn list_sleeve_containers(&self) -> Result<Vec<ContainerRecord>>;

    /// Inspects one container.
    async fn inspect(&self, id: &str) -> Result<ContainerRecord>;
}

/// Interactive exec operations used by the terminal gateway.
#[async_trait]
pub trait ExecRuntime: Send + Sync {
    /// Creates and attaches to an exec session, sizing its TTY when the
    /// spec carries non-zero dimensions.
    async fn exec_attach(&self, container: &str, spec: ExecSpec) -> Result<ExecSession>;

    /// Resizes the TTY of an exec session. Best-effort.
    async fn exec_resize(&self, exec_id: &str, cols: u16, rows: u16) -> Result<()>;
}

/// Monitoring operations used by the status broadcaster and host stats.
#[async_trait]
pub trait StatsRuntime: Send + Sync {
    /// Resource usage of one container, cached for five seconds.
    async fn container_stats(&self, id: &str) -> Result<ContainerResourceStats>;

    /// Running and total container counts.
    async fn container_counts(&self) -> Result<RuntimeCounts>;

    /// Detects the agent CLI inside a container, cached for the lifetime
    /// of the container id.
    async fn detect_cli(&self, id: &str) -> Result<DhfInfo>;
}

/// Inventory and health operations used by the system handlers.
#[async_trait]
pub trait InventoryRuntime: Send + Sync {
    /// Pings the runtime daemon.
    async fn ping(&self) -> Result<()>;

    /// Lists all containers.
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>>;

    /// Lists all networks.
    async fn list_networks(&self) -> Result<Vec<NetworkSummary>>;
}
