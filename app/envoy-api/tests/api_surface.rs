//! Handler-level tests over an in-memory runtime.

use async_trait::async_trait;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use bytes::Bytes;
use envoy_api::handlers::{auth, sleeves, system, workspaces};
use envoy_api::AppState;
use envoy_core::broadcast::StatusBroadcaster;
use envoy_core::creds::CredentialStore;
use envoy_core::error::Result as CoreResult;
use envoy_core::host_stats::HostStatsCollector;
use envoy_core::hub::EventHub;
use envoy_core::runtime::{
    ContainerRecord, CreateContainerSpec, DhfInfo, ExecRuntime, ExecSession, ExecSpec,
    InventoryRuntime, RuntimeCounts, SleeveRuntime, StatsRuntime, LABEL_SLEEVE,
};
use envoy_core::sidecar::SidecarStatusSource;
use envoy_core::sleeve::SleeveManager;
use envoy_core::workspace::WorkspaceManager;
use envoy_core::{CoreError, EnvoyConfig};
use envoy_protocol::{
    AuthLoginRequest, AuthMethod, AuthProvider, CloneStatus, CloneWorkspaceRequest,
    ContainerResourceStats, ContainerSummary, DoctorStatus, NetworkSummary, SidecarStatus,
    SpawnSleeveRequest, SwitchBranchRequest,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

#[derive(Default)]
struct FakeRuntime {
    containers: Mutex<HashMap<String, ContainerRecord>>,
    next_id: Mutex<u32>,
}

#[async_trait]
impl SleeveRuntime for FakeRuntime {
    async fn ensure_network(&self, _name: &str) -> CoreResult<()> {
        Ok(())
    }

    async fn create_container(&self, spec: CreateContainerSpec) -> CoreResult<String> {
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        let id = format!("{:064x}", *next);
        self.containers.lock().unwrap().insert(
            id.clone(),
            ContainerRecord {
                id: id.clone(),
                name: spec.name,
                image: spec.image,
                state: "created".to_string(),
                labels: spec.labels,
                ..Default::default()
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> CoreResult<()> {
        if let Some(c) = self.containers.lock().unwrap().get_mut(id) {
            c.state = "running".to_string();
        }
        Ok(())
    }

    async fn stop_container(&self, _id: &str) -> CoreResult<()> {
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> CoreResult<()> {
        self.containers.lock().unwrap().remove(id);
        Ok(())
    }

    async fn get_by_name(&self, name: &str) -> CoreResult<Option<ContainerRecord>> {
        Ok(self
            .containers
            .lock()
            .unwrap()
            .values()
            .find(|c| c.name == name)
            .cloned())
    }

    async fn list_sleeve_containers(&self) -> CoreResult<Vec<ContainerRecord>> {
        Ok(self
            .containers
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.labels.get(LABEL_SLEEVE).map(String::as_str) == Some("true"))
            .cloned()
            .collect())
    }

    async fn inspect(&self, id: &str) -> CoreResult<ContainerRecord> {
        let full = self
            .containers
            .lock()
            .unwrap()
            .iter()
            .find(|(cid, _)| cid.starts_with(id))
            .map(|(_, c)| c.clone());
        full.ok_or_else(|| CoreError::not_found(format!("container {id}")))
    }
}

#[async_trait]
impl ExecRuntime for FakeRuntime {
    async fn exec_attach(&self, _container: &str, _spec: ExecSpec) -> CoreResult<ExecSession> {
        Ok(ExecSession {
            id: "exec-1".to_string(),
            output: Box::pin(futures_util::stream::empty::<std::io::Result<Bytes>>()),
            input: Box::pin(tokio::io::sink()),
        })
    }

    async fn exec_resize(&self, _exec_id: &str, _cols: u16, _rows: u16) -> CoreResult<()> {
        Ok(())
    }
}

#[async_trait]
impl StatsRuntime for FakeRuntime {
    async fn container_stats(&self, _id: &str) -> CoreResult<ContainerResourceStats> {
        Ok(ContainerResourceStats::default())
    }

    async fn container_counts(&self) -> CoreResult<RuntimeCounts> {
        let containers = self.containers.lock().unwrap();
        Ok(RuntimeCounts {
            running: containers.values().filter(|c| c.state == "running").count(),
            total: containers.len(),
        })
    }

    async fn detect_cli(&self, _id: &str) -> CoreResult<DhfInfo> {
        Ok(DhfInfo::default())
    }
}

#[async_trait]
impl InventoryRuntime for FakeRuntime {
    async fn ping(&self) -> CoreResult<()> {
        Ok(())
    }

    async fn list_containers(&self) -> CoreResult<Vec<ContainerSummary>> {
        Ok(self
            .containers
            .lock()
            .unwrap()
            .values()
            .map(|c| ContainerSummary {
                id: c.id.chars().take(12).collect(),
                name: c.name.clone(),
                image: c.image.clone(),
                state: c.state.clone(),
                status: c.status.clone(),
                ports: Vec::new(),
                created: c.created,
            })
            .collect())
    }

    async fn list_networks(&self) -> CoreResult<Vec<NetworkSummary>> {
        Ok(vec![NetworkSummary {
            id: "abc123def456".to_string(),
            name: "sleevenet".to_string(),
            driver: "bridge".to_string(),
            scope: "local".to_string(),
        }])
    }
}

struct NoSidecars;

#[async_trait]
impl SidecarStatusSource for NoSidecars {
    async fn batch_status(&self, _names: &[String]) -> HashMap<String, SidecarStatus> {
        HashMap::new()
    }
}

struct TestContext {
    _temp_dir: tempfile::TempDir,
    state: AppState,
}

impl TestContext {
    fn workspace_path(&self, name: &str) -> String {
        let config = self.state.config.read().unwrap();
        config
            .runtime
            .workspace_root
            .join(name)
            .to_string_lossy()
            .into_owned()
    }
}

fn test_context() -> TestContext {
    let temp_dir = tempfile::tempdir().expect("tempdir failed");

    let mut config = EnvoyConfig::default();
    config.runtime.workspace_root = temp_dir.path().join("workspaces");
    config.runtime.creds_root = temp_dir.path().join("creds");

    let runtime = Arc::new(FakeRuntime::default());
    let sleeves = Arc::new(SleeveManager::new(runtime.clone(), config.clone()));
    let workspaces = Arc::new(WorkspaceManager::new(config.clone(), sleeves.clone()));
    let creds = Arc::new(CredentialStore::new(config.runtime.creds_root.clone()));
    let host_stats = Arc::new(HostStatsCollector::with_proc_path(
        temp_dir.path().join("proc"),
        runtime.clone(),
        temp_dir.path(),
        10,
    ));

    let hub = Arc::new(EventHub::new());
    let broadcaster = Arc::new(StatusBroadcaster::new(
        hub.clone(),
        sleeves.clone(),
        Arc::new(NoSidecars),
        runtime.clone(),
        host_stats.clone(),
    ));

    let state = AppState {
        config: Arc::new(RwLock::new(config)),
        sleeves,
        workspaces,
        creds,
        host_stats,
        hub,
        broadcaster,
        exec: runtime.clone(),
        containers: runtime.clone(),
        inventory: runtime,
    };

    TestContext {
        _temp_dir: temp_dir,
        state,
    }
}

#[tokio::test]
async fn health_reports_ok() {
    let Json(body) = system::health().await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn spawn_then_conflict_then_kill() {
    let ctx = test_context();
    let workspace = ctx.workspace_path("widgets");

    let (status, Json(sleeve)) = sleeves::spawn(
        State(ctx.state.clone()),
        Json(SpawnSleeveRequest {
            workspace: workspace.clone(),
            ..Default::default()
        }),
    )
    .await
    .expect("spawn");
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(sleeve.status, "running");
    assert_eq!(sleeve.name, "athena");

    // The same workspace cannot be claimed twice.
    let err = sleeves::spawn(
        State(ctx.state.clone()),
        Json(SpawnSleeveRequest {
            workspace: workspace.clone(),
            ..Default::default()
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::CONFLICT);

    let Json(listed) = sleeves::list(State(ctx.state.clone())).await;
    assert_eq!(listed.len(), 1);

    let status = sleeves::kill(State(ctx.state.clone()), Path("athena".to_string()))
        .await
        .expect("kill");
    assert_eq!(status, StatusCode::NO_CONTENT);

    let err = sleeves::info(State(ctx.state.clone()), Path("athena".to_string()))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

    // Spawn -> kill -> spawn on the same workspace succeeds.
    let (status, _) = sleeves::spawn(
        State(ctx.state.clone()),
        Json(SpawnSleeveRequest {
            workspace,
            ..Default::default()
        }),
    )
    .await
    .expect("respawn");
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn workspace_create_conflicts_on_second_call() {
    let ctx = test_context();

    let (status, Json(ws)) = workspaces::create(
        State(ctx.state.clone()),
        Json(workspaces::CreateWorkspaceRequest {
            name: "widgets".to_string(),
        }),
    )
    .await
    .expect("create");
    assert_eq!(status, StatusCode::CREATED);
    assert!(!ws.in_use);

    let err = workspaces::create(
        State(ctx.state.clone()),
        Json(workspaces::CreateWorkspaceRequest {
            name: "widgets".to_string(),
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::CONFLICT);
    assert!(std::path::Path::new(&ws.path).is_dir());
}

#[tokio::test]
async fn clone_submission_rewrites_to_ssh_and_polls() {
    let ctx = test_context();

    let (status, Json(job)) = workspaces::clone_submit(
        State(ctx.state.clone()),
        Json(CloneWorkspaceRequest {
            repo_url: "https://github.com/acme/widgets".to_string(),
            name: String::new(),
        }),
    )
    .await
    .expect("clone submit");

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(job.id.len(), 16);
    assert!(job.id.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(job.repo_url, "git@github.com:acme/widgets.git");
    assert!(job.workspace.ends_with("/widgets"));
    assert_eq!(job.status, CloneStatus::Cloning);

    let Json(polled) = workspaces::clone_status(
        State(ctx.state.clone()),
        Query(workspaces::CloneStatusQuery { id: job.id.clone() }),
    )
    .await
    .expect("poll");
    assert_eq!(polled.id, job.id);

    let err = workspaces::clone_status(
        State(ctx.state.clone()),
        Query(workspaces::CloneStatusQuery { id: String::new() }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

    let err = workspaces::clone_status(
        State(ctx.state.clone()),
        Query(workspaces::CloneStatusQuery {
            id: "0123456789abcdef".to_string(),
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn branch_switch_on_in_use_workspace_conflicts() {
    let ctx = test_context();
    let workspace = ctx.workspace_path("widgets");
    std::fs::create_dir_all(std::path::Path::new(&workspace).join(".git")).unwrap();

    sleeves::spawn(
        State(ctx.state.clone()),
        Json(SpawnSleeveRequest {
            workspace: workspace.clone(),
            ..Default::default()
        }),
    )
    .await
    .expect("spawn");

    let err = workspaces::branch_action(
        State(ctx.state.clone()),
        Query(workspaces::BranchQuery {
            workspace: workspace.clone(),
            action: "switch".to_string(),
        }),
        Some(Json(SwitchBranchRequest {
            branch: "feature/x".to_string(),
        })),
    )
    .await
    .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::CONFLICT);

    // Unknown actions are client errors.
    let err = workspaces::branch_action(
        State(ctx.state.clone()),
        Query(workspaces::BranchQuery {
            workspace,
            action: "rebase".to_string(),
        }),
        None,
    )
    .await
    .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn auth_login_roundtrip() {
    let ctx = test_context();

    // Empty token: rejected, nothing stored.
    let (status, Json(result)) = auth::login(
        State(ctx.state.clone()),
        Path("claude".to_string()),
        Some(Json(AuthLoginRequest {
            token: String::new(),
        })),
    )
    .await
    .expect("login call");
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(!result.success);
    assert!(result.error.unwrap().contains("token required"));

    let (status, Json(result)) = auth::login(
        State(ctx.state.clone()),
        Path("claude".to_string()),
        Some(Json(AuthLoginRequest {
            token: "abc".to_string(),
        })),
    )
    .await
    .expect("login call");
    assert_eq!(status, StatusCode::OK);
    assert!(result.success);

    let Json(status_body) = auth::status(State(ctx.state.clone())).await;
    let claude = &status_body.providers[&AuthProvider::Claude];
    assert!(claude.authenticated);
    assert_eq!(claude.method, Some(AuthMethod::Token));

    let Json(revoked) = auth::revoke(State(ctx.state.clone()), Path("claude".to_string()))
        .await
        .expect("revoke");
    assert!(revoked.success);

    let Json(status_body) = auth::status(State(ctx.state.clone())).await;
    assert!(!status_body.providers[&AuthProvider::Claude].authenticated);

    // Unknown providers are client errors.
    let err = auth::login(
        State(ctx.state.clone()),
        Path("openai".to_string()),
        None,
    )
    .await
    .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn doctor_reports_runtime_and_network() {
    let ctx = test_context();
    let Json(checks) = system::doctor(State(ctx.state.clone())).await;

    let runtime_check = checks
        .iter()
        .find(|c| c.name == "Container runtime")
        .expect("runtime check present");
    assert_eq!(runtime_check.status, DoctorStatus::Pass);

    let network_check = checks
        .iter()
        .find(|c| c.name == "Sleeve network")
        .expect("network check present");
    assert_eq!(network_check.status, DoctorStatus::Pass);

    // No credentials in a fresh store.
    assert!(checks
        .iter()
        .any(|c| c.name.contains("credentials") && c.status == DoctorStatus::Warning));
}

#[tokio::test]
async fn host_stats_snapshot_always_carries_container_counts() {
    let ctx = test_context();
    let Json(stats) = system::host_stats(State(ctx.state.clone())).await;
    // Fake procfs directory is empty, so kernel sections are absent.
    assert!(stats.cpu.is_none());
    assert!(stats.memory.is_none());
    assert!(stats.containers.is_some());
    assert_eq!(stats.containers.unwrap().max, 10);
}

#[tokio::test]
async fn inventory_lists_spawned_containers() {
    let ctx = test_context();
    let workspace = ctx.workspace_path("widgets");

    sleeves::spawn(
        State(ctx.state.clone()),
        Json(SpawnSleeveRequest {
            workspace,
            ..Default::default()
        }),
    )
    .await
    .expect("spawn");

    let Json(containers) = system::containers(State(ctx.state.clone()))
        .await
        .expect("containers");
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].name, "sleeve-athena");
    assert_eq!(containers[0].state, "running");

    let Json(networks) = system::networks(State(ctx.state.clone()))
        .await
        .expect("networks");
    assert_eq!(networks[0].name, "sleevenet");
}
