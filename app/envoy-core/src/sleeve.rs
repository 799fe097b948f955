//! Sleeve lifecycle manager.
//!
//! Owns the (workspace, name) reservation invariant: at any moment at most
//! one active or pending sleeve references a workspace, and sleeve names
//! are unique. Reservation happens atomically under one lock; the
//! container runtime is only driven after a reservation succeeds, and
//! every failure path releases what it reserved.

use crate::config::EnvoyConfig;
use crate::error::{CoreError, Result};
use crate::runtime::{
    ContainerRecord, CreateContainerSpec, SleeveRuntime, VolumeMount, LABEL_CONSTRAINED,
    LABEL_CPU_LIMIT, LABEL_MEMORY_LIMIT_MB, LABEL_NAME, LABEL_SLEEVE, LABEL_WORKSPACE,
};
use chrono::Utc;
use envoy_protocol::{SleeveInfo, SpawnSleeveRequest};
use std::collections::{HashMap, HashSet};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::{Arc, RwLock};

/// Fixed name pool, scanned in order. First free name wins; when the pool
/// is exhausted a time-based synthetic name is used instead.
const NAME_POOL: [&str; 11] = [
    "athena", "apollo", "hermes", "iris", "artemis", "orpheus", "calypso", "daedalus",
    "penelope", "icarus", "odysseus",
];

const WORKSPACE_MOUNT: &str = "/home/agent/workspace";
const CREDS_MOUNT: &str = "/home/agent/.creds";

/// Read access to the active sleeve set, as consumed by the workspace
/// manager and the status broadcaster.
pub trait SleeveDirectory: Send + Sync {
    /// Snapshot of all active sleeves.
    fn list(&self) -> Vec<SleeveInfo>;
}

struct Registry {
    sleeves: HashMap<String, SleeveInfo>,
    used_names: HashSet<String>,
    /// Workspaces with a spawn in flight, covering the window between
    /// reservation and container creation.
    pending_workspaces: HashSet<String>,
}

/// Manager for the sleeve fleet.
pub struct SleeveManager {
    runtime: Arc<dyn SleeveRuntime>,
    cfg: EnvoyConfig,
    registry: RwLock<Registry>,
}

/// Removes the pending-workspace flag on every exit path of a spawn.
struct PendingGuard<'a> {
    manager: &'a SleeveManager,
    workspace: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut registry) = self.manager.registry.write() {
            registry.pending_workspaces.remove(&self.workspace);
        }
    }
}

impl SleeveManager {
    /// Creates a manager over the given runtime.
    #[must_use]
    pub fn new(runtime: Arc<dyn SleeveRuntime>, cfg: EnvoyConfig) -> Self {
        Self {
            runtime,
            cfg,
            registry: RwLock::new(Registry {
                sleeves: HashMap::new(),
                used_names: HashSet::new(),
                pending_workspaces: HashSet::new(),
            }),
        }
    }

    /// Snapshot of all active sleeves.
    #[must_use]
    pub fn list(&self) -> Vec<SleeveInfo> {
        self.registry
            .read()
            .map(|r| r.sleeves.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Looks up one sleeve by name.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown names.
    pub fn get(&self, name: &str) -> Result<SleeveInfo> {
        self.registry
            .read()
            .ok()
            .and_then(|r| r.sleeves.get(name).cloned())
            .ok_or_else(|| CoreError::not_found(format!("sleeve {name:?}")))
    }

    fn release_name(&self, name: &str) {
        if let Ok(mut registry) = self.registry.write() {
            registry.used_names.remove(name);
        }
    }

    /// Atomically checks workspace availability and claims both the
    /// workspace (marking it pending) and a sleeve name.
    fn reserve(&self, workspace: &str, requested_name: &str) -> Result<String> {
        let mut registry = self.registry.write().map_err(|_| lock_poisoned())?;

        if registry.pending_workspaces.contains(workspace) {
            return Err(CoreError::conflict(format!(
                "workspace {workspace:?} already has a spawn in progress"
            )));
        }
        if let Some(owner) = registry
            .sleeves
            .values()
            .find(|s| s.workspace == workspace)
        {
            return Err(CoreError::conflict(format!(
                "workspace {workspace:?} is already in use by sleeve {:?}",
                owner.name
            )));
        }

        let name = if requested_name.is_empty() {
            NAME_POOL
                .iter()
                .find(|n| !registry.used_names.contains(**n))
                .map_or_else(
                    || {
                        format!(
                            "sleeve-{}",
                            Utc::now().timestamp_nanos_opt().unwrap_or_default()
                        )
                    },
                    |n| (*n).to_string(),
                )
        } else {
            if registry.used_names.contains(requested_name) {
                return Err(CoreError::conflict(format!(
                    "sleeve name {requested_name:?} already in use"
                )));
            }
            requested_name.to_string()
        };

        registry.pending_workspaces.insert(workspace.to_string());
        registry.used_names.insert(name.clone());
        Ok(name)
    }

    /// Spawns a new sleeve bound to the requested workspace.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an empty workspace path, `Conflict` when
    /// the workspace or name is taken, and runtime errors when container
    /// creation fails. The reserved name is released on every failure
    /// after reservation; a created-but-unstartable container is removed.
    pub async fn spawn(&self, req: SpawnSleeveRequest) -> Result<SleeveInfo> {
        let workspace = req.workspace.clone();
        if workspace.is_empty() {
            return Err(CoreError::validation("workspace path required"));
        }

        // The runtime's volume subpath mount requires the directory to
        // exist before container creation.
        create_workspace_dir(Path::new(&workspace))?;

        let name = self.reserve(&workspace, &req.name)?;
        let _pending = PendingGuard {
            manager: self,
            workspace: workspace.clone(),
        };

        let container_name = format!("sleeve-{name}");

        if let Err(err) = self.runtime.ensure_network(&self.cfg.runtime.network).await {
            self.release_name(&name);
            return Err(CoreError::Runtime(format!(
                "failed to ensure network: {err}"
            )));
        }

        let constrained = req.memory_limit_mb > 0 || req.cpu_limit > 0;

        let mut labels = HashMap::from([
            (LABEL_SLEEVE.to_string(), "true".to_string()),
            (LABEL_NAME.to_string(), name.clone()),
            (LABEL_WORKSPACE.to_string(), workspace.clone()),
        ]);
        if req.memory_limit_mb > 0 {
            labels.insert(LABEL_CONSTRAINED.to_string(), "true".to_string());
            labels.insert(
                LABEL_MEMORY_LIMIT_MB.to_string(),
                req.memory_limit_mb.to_string(),
            );
        }
        if req.cpu_limit > 0 {
            labels.insert(LABEL_CONSTRAINED.to_string(), "true".to_string());
            labels.insert(LABEL_CPU_LIMIT.to_string(), req.cpu_limit.to_string());
        }

        let spec = CreateContainerSpec {
            name: container_name.clone(),
            image: self.cfg.sleeves.image.clone(),
            labels,
            network: self.cfg.runtime.network.clone(),
            mounts: vec![
                VolumeMount {
                    volume: self.cfg.runtime.workspace_volume.clone(),
                    subpath: Some(self.workspace_name(&workspace)),
                    target: WORKSPACE_MOUNT.to_string(),
                    read_only: false,
                },
                VolumeMount {
                    volume: self.cfg.runtime.creds_volume.clone(),
                    subpath: None,
                    target: CREDS_MOUNT.to_string(),
                    read_only: true,
                },
            ],
            memory_limit_bytes: (req.memory_limit_mb > 0)
                .then(|| req.memory_limit_mb * 1024 * 1024),
            nano_cpus: (req.cpu_limit > 0).then(|| req.cpu_limit * 1_000_000_000),
        };

        let container_id = match self.runtime.create_container(spec).await {
            Ok(id) => id,
            Err(err) => {
                self.release_name(&name);
                return Err(CoreError::Runtime(format!(
                    "failed to create container: {err}"
                )));
            }
        };

        if let Err(err) = self.runtime.start_container(&container_id).await {
            let _ = self.runtime.remove_container(&container_id).await;
            self.release_name(&name);
            return Err(CoreError::Runtime(format!(
                "failed to start container: {err}"
            )));
        }

        let sleeve = SleeveInfo {
            name: name.clone(),
            container_id: container_id.chars().take(12).collect(),
            container_name,
            workspace,
            spawn_time: Utc::now(),
            status: "running".to_string(),
            constrained,
            memory_limit_mb: req.memory_limit_mb,
            cpu_limit: req.cpu_limit,
            integrity: 100.0,
            dhf: String::new(),
            dhf_version: String::new(),
            sidecar_healthy: false,
            resources: None,
        };

        let mut registry = self.registry.write().map_err(|_| lock_poisoned())?;
        registry.sleeves.insert(name, sleeve.clone());
        Ok(sleeve)
    }

    /// Kills a sleeve: stops and removes its container, then releases the
    /// name for re-allocation.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown names and runtime errors when the
    /// container cannot be removed. Stop failures are ignored; removal is
    /// forced.
    pub async fn kill(&self, name: &str) -> Result<()> {
        let sleeve = self.get(name)?;

        let container = self
            .runtime
            .get_by_name(&sleeve.container_name)
            .await
            .map_err(|err| CoreError::Runtime(format!("failed to find container: {err}")))?;

        if let Some(container) = container {
            if let Err(err) = self.runtime.stop_container(&container.id).await {
                tracing::debug!(sleeve = name, "stop before remove failed: {err}");
            }
            self.runtime
                .remove_container(&container.id)
                .await
                .map_err(|err| CoreError::Runtime(format!("failed to remove container: {err}")))?;
        }

        let mut registry = self.registry.write().map_err(|_| lock_poisoned())?;
        registry.sleeves.remove(name);
        registry.used_names.remove(name);
        Ok(())
    }

    /// Rebuilds the sleeve map from containers carrying the sleeve label.
    /// Called once at startup for crash-safe restart.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot list containers.
    pub async fn recover(&self) -> Result<usize> {
        let containers = self
            .runtime
            .list_sleeve_containers()
            .await
            .map_err(|err| CoreError::Runtime(format!("failed to list sleeve containers: {err}")))?;

        let mut registry = self.registry.write().map_err(|_| lock_poisoned())?;
        let mut recovered = 0;

        for container in containers {
            let Some(sleeve) = sleeve_from_record(&container) else {
                continue;
            };
            if registry.sleeves.contains_key(&sleeve.name) {
                continue;
            }

            registry.used_names.insert(sleeve.name.clone());
            registry.sleeves.insert(sleeve.name.clone(), sleeve);
            recovered += 1;
        }

        if recovered > 0 {
            tracing::info!("recovered {recovered} existing sleeve(s) from the runtime");
        }
        Ok(recovered)
    }

    /// Extracts the workspace name (the volume subpath) from a full path.
    fn workspace_name(&self, workspace: &str) -> String {
        let root = self.cfg.runtime.workspace_root.to_string_lossy();
        workspace
            .strip_prefix(&format!("{root}/"))
            .map_or_else(
                || {
                    workspace
                        .rsplit('/')
                        .next()
                        .unwrap_or(workspace)
                        .to_string()
                },
                ToString::to_string,
            )
    }
}

impl SleeveDirectory for SleeveManager {
    fn list(&self) -> Vec<SleeveInfo> {
        Self::list(self)
    }
}

fn sleeve_from_record(container: &ContainerRecord) -> Option<SleeveInfo> {
    let name = container.labels.get(LABEL_NAME)?.clone();
    if name.is_empty() {
        return None;
    }
    let workspace = container
        .labels
        .get(LABEL_WORKSPACE)
        .cloned()
        .unwrap_or_default();

    let status = match container.state.as_str() {
        "running" => "running".to_string(),
        "exited" => "stopped".to_string(),
        other => other.to_string(),
    };

    let memory_limit_mb = container
        .labels
        .get(LABEL_MEMORY_LIMIT_MB)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let cpu_limit = container
        .labels
        .get(LABEL_CPU_LIMIT)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    Some(SleeveInfo {
        container_name: format!("sleeve-{name}"),
        name,
        container_id: container.id.chars().take(12).collect(),
        workspace,
        spawn_time: chrono::DateTime::from_timestamp(container.created, 0)
            .unwrap_or_else(Utc::now),
        status,
        constrained: container.labels.get(LABEL_CONSTRAINED).map(String::as_str) == Some("true"),
        memory_limit_mb,
        cpu_limit,
        integrity: 100.0,
        dhf: String::new(),
        dhf_version: String::new(),
        sidecar_healthy: false,
        resources: None,
    })
}

fn create_workspace_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|err| {
        CoreError::Common(envoy_error::CommonError::external(format!(
            "failed to create workspace directory {}: {err}",
            path.display()
        )))
    })?;
    let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755));
    Ok(())
}

fn lock_poisoned() -> CoreError {
    CoreError::Common(envoy_error::CommonError::internal("lock poisoned"))
}
