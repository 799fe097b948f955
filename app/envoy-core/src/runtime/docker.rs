//! Docker implementation of the runtime capability traits.

use super::{
    ContainerRecord, CreateContainerSpec, DhfInfo, ExecRuntime, ExecSession, ExecSpec,
    InventoryRuntime, RuntimeCounts, SleeveRuntime, StatsRuntime, LABEL_SLEEVE,
};
use crate::error::{CoreError, Result};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, NetworkingConfig,
    RemoveContainerOptions, StatsOptions,
};
use bollard::exec::{CreateExecOptions, ResizeExecOptions, StartExecResults};
use bollard::models::{EndpointSettings, HostConfig, Mount, MountTypeEnum, MountVolumeOptions};
use bollard::network::CreateNetworkOptions;
use bollard::Docker;
use envoy_protocol::{ContainerResourceStats, ContainerSummary, NetworkSummary};
use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

const STATS_CACHE_TTL: Duration = Duration::from_secs(5);

/// CLI candidates probed by [`StatsRuntime::detect_cli`], in order.
const CLI_CANDIDATES: [(&str, &str); 3] = [
    ("claude", "Claude Code"),
    ("gemini", "Gemini CLI"),
    ("codex", "Codex CLI"),
];

/// Thin adapter over the Docker daemon.
///
/// Holds two caches: per-container resource stats with a five second TTL,
/// and detected CLI info keyed by container id for the container lifetime.
pub struct DockerRuntime {
    docker: Docker,
    stats_cache: RwLock<HashMap<String, (Instant, ContainerResourceStats)>>,
    dhf_cache: RwLock<HashMap<String, DhfInfo>>,
}

impl DockerRuntime {
    /// Connects to the local Docker daemon.
    ///
    /// # Errors
    ///
    /// Returns an error if the daemon socket cannot be reached.
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self {
            docker,
            stats_cache: RwLock::new(HashMap::new()),
            dhf_cache: RwLock::new(HashMap::new()),
        })
    }

    fn cached_stats(&self, id: &str) -> Option<ContainerResourceStats> {
        let cache = self.stats_cache.read().ok()?;
        cache
            .get(id)
            .filter(|(at, _)| at.elapsed() < STATS_CACHE_TTL)
            .map(|(_, stats)| *stats)
    }

    /// Runs a command in a container and returns the first line of stdout.
    async fn exec_capture(&self, container: &str, cmd: Vec<String>) -> Result<String> {
        let exec = self
            .docker
            .create_exec(
                container,
                CreateExecOptions {
                    cmd: Some(cmd),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await?;

        let mut stdout = Vec::new();
        match self.docker.start_exec(&exec.id, None).await? {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(chunk) = output.next().await {
                    if let bollard::container::LogOutput::StdOut { message } = chunk? {
                        stdout.extend_from_slice(&message);
                    }
                }
            }
            StartExecResults::Detached => {}
        }

        let inspect = self.docker.inspect_exec(&exec.id).await?;
        if inspect.exit_code.unwrap_or(0) != 0 {
            return Err(CoreError::Runtime(format!(
                "exit code {}",
                inspect.exit_code.unwrap_or(-1)
            )));
        }

        let text = String::from_utf8_lossy(&stdout);
        Ok(text.lines().next().unwrap_or_default().trim().to_string())
    }
}

fn record_from_summary(c: bollard::models::ContainerSummary) -> ContainerRecord {
    ContainerRecord {
        id: c.id.unwrap_or_default(),
        name: c
            .names
            .unwrap_or_default()
            .first()
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_default(),
        image: c.image.unwrap_or_default(),
        state: c.state.unwrap_or_default(),
        status: c.status.unwrap_or_default(),
        labels: c.labels.unwrap_or_default(),
        created: c.created.unwrap_or_default(),
    }
}

fn format_port(p: &bollard::models::Port) -> String {
    let proto = p
        .typ
        .map(|t| format!("{t:?}").to_lowercase())
        .unwrap_or_default();
    match (p.ip.as_deref(), p.public_port) {
        (Some(ip), Some(public)) if !ip.is_empty() => {
            format!("{ip}:{public}->{}/{proto}", p.private_port)
        }
        (_, Some(public)) => format!("{public}->{}/{proto}", p.private_port),
        _ => format!("{}/{proto}", p.private_port),
    }
}

#[async_trait]
impl SleeveRuntime for DockerRuntime {
    async fn ensure_network(&self, name: &str) -> Result<()> {
        let networks = self.docker.list_networks::<String>(None).await?;
        if networks.iter().any(|n| n.name.as_deref() == Some(name)) {
            return Ok(());
        }

        self.docker
            .create_network(CreateNetworkOptions {
                name: name.to_string(),
                driver: "bridge".to_string(),
                ..Default::default()
            })
            .await?;
        Ok(())
    }

    async fn create_container(&self, spec: CreateContainerSpec) -> Result<String> {
        let mounts: Vec<Mount> = spec
            .mounts
            .iter()
            .map(|m| Mount {
                target: Some(m.target.clone()),
                source: Some(m.volume.clone()),
                typ: Some(MountTypeEnum::VOLUME),
                read_only: Some(m.read_only),
                volume_options: m.subpath.as_ref().map(|sp| MountVolumeOptions {
                    subpath: Some(sp.clone()),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .collect();

        let host_config = HostConfig {
            mounts: Some(mounts),
            memory: spec.memory_limit_bytes,
            nano_cpus: spec.nano_cpus,
            ..Default::default()
        };

        let networking_config = NetworkingConfig {
            endpoints_config: HashMap::from([(spec.network.clone(), EndpointSettings::default())]),
        };

        let response = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                Config {
                    image: Some(spec.image.clone()),
                    labels: Some(spec.labels.clone()),
                    host_config: Some(host_config),
                    networking_config: Some(networking_config),
                    ..Default::default()
                },
            )
            .await?;

        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.docker
            .start_container::<String>(id, None)
            .await
            .map_err(Into::into)
    }

    async fn stop_container(&self, id: &str) -> Result<()> {
        self.docker.stop_container(id, None).await.map_err(Into::into)
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await?;
        self.stats_cache.write().map(|mut c| c.remove(id)).ok();
        self.dhf_cache.write().map(|mut c| c.remove(id)).ok();
        Ok(())
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<ContainerRecord>> {
        let filters = HashMap::from([("name".to_string(), vec![name.to_string()])]);
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters,
                ..Default::default()
            }))
            .await?;

        // The name filter matches substrings; require the exact name.
        let wanted = format!("/{name}");
        Ok(containers
            .into_iter()
            .find(|c| {
                c.names
                    .as_ref()
                    .is_some_and(|names| names.iter().any(|n| n == &wanted))
            })
            .map(record_from_summary))
    }

    async fn list_sleeve_containers(&self) -> Result<Vec<ContainerRecord>> {
        let filters = HashMap::from([(
            "label".to_string(),
            vec![format!("{LABEL_SLEEVE}=true")],
        )]);
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters,
                ..Default::default()
            }))
            .await?;

        Ok(containers.into_iter().map(record_from_summary).collect())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerRecord> {
        let response = self.docker.inspect_container(id, None).await?;
        let config = response.config.unwrap_or_default();
        let created = response
            .created
            .as_deref()
            .and_then(|c| chrono::DateTime::parse_from_rfc3339(c).ok())
            .map(|t| t.timestamp())
            .unwrap_or_default();

        Ok(ContainerRecord {
            id: response.id.unwrap_or_default(),
            name: response
                .name
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_default(),
            image: config.image.unwrap_or_default(),
            state: response
                .state
                .as_ref()
                .and_then(|s| s.status)
                .map(|s| format!("{s:?}").to_lowercase())
                .unwrap_or_default(),
            status: String::new(),
            labels: config.labels.unwrap_or_default(),
            created,
        })
    }
}

#[async_trait]
impl ExecRuntime for DockerRuntime {
    async fn exec_attach(&self, container: &str, spec: ExecSpec) -> Result<ExecSession> {
        let exec = self
            .docker
            .create_exec(
                container,
                CreateExecOptions {
                    cmd: Some(spec.cmd.clone()),
                    user: (!spec.user.is_empty()).then(|| spec.user.clone()),
                    tty: Some(true),
                    attach_stdin: Some(true),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await?;

        let results = self.docker.start_exec(&exec.id, None).await?;
        let (output, input) = match results {
            StartExecResults::Attached { output, input } => (output, input),
            StartExecResults::Detached => {
                return Err(CoreError::Runtime(
                    "exec session started detached".to_string(),
                ))
            }
        };

        if spec.cols > 0 && spec.rows > 0 {
            let _ = self
                .docker
                .resize_exec(
                    &exec.id,
                    ResizeExecOptions {
                        height: spec.rows,
                        width: spec.cols,
                    },
                )
                .await;
        }

        let output = output
            .map(|item| item.map(|chunk| chunk.into_bytes()).map_err(std::io::Error::other));

        Ok(ExecSession {
            id: exec.id,
            output: Box::pin(output),
            input,
        })
    }

    async fn exec_resize(&self, exec_id: &str, cols: u16, rows: u16) -> Result<()> {
        self.docker
            .resize_exec(
                exec_id,
                ResizeExecOptions {
                    height: rows,
                    width: cols,
                },
            )
            .await
            .map_err(Into::into)
    }
}

#[async_trait]
impl StatsRuntime for DockerRuntime {
    async fn container_stats(&self, id: &str) -> Result<ContainerResourceStats> {
        if let Some(stats) = self.cached_stats(id) {
            return Ok(stats);
        }

        let mut stream = self.docker.stats(
            id,
            Some(StatsOptions {
                stream: false,
                one_shot: false,
            }),
        );
        let sample = stream
            .next()
            .await
            .ok_or_else(|| CoreError::Runtime(format!("no stats sample for {id}")))??;

        let memory_used = sample.memory_stats.usage.unwrap_or(0);
        let memory_limit = sample.memory_stats.limit.unwrap_or(0);
        let memory_percent = if memory_limit > 0 {
            memory_used as f64 / memory_limit as f64 * 100.0
        } else {
            0.0
        };

        let cpu_delta = sample
            .cpu_stats
            .cpu_usage
            .total_usage
            .saturating_sub(sample.precpu_stats.cpu_usage.total_usage)
            as f64;
        let system_delta = sample
            .cpu_stats
            .system_cpu_usage
            .unwrap_or(0)
            .saturating_sub(sample.precpu_stats.system_cpu_usage.unwrap_or(0))
            as f64;
        let cores = sample
            .cpu_stats
            .online_cpus
            .filter(|n| *n > 0)
            .unwrap_or_else(|| {
                sample
                    .cpu_stats
                    .cpu_usage
                    .percpu_usage
                    .as_ref()
                    .map_or(0, |v| v.len() as u64)
            }) as f64;
        let cpu_percent = if system_delta > 0.0 && cpu_delta > 0.0 && cores > 0.0 {
            cpu_delta / system_delta * cores * 100.0
        } else {
            0.0
        };

        let stats = ContainerResourceStats {
            cpu_percent,
            memory_used_bytes: memory_used,
            memory_limit_bytes: memory_limit,
            memory_percent,
        };

        if let Ok(mut cache) = self.stats_cache.write() {
            cache.insert(id.to_string(), (Instant::now(), stats));
        }

        Ok(stats)
    }

    async fn container_counts(&self) -> Result<RuntimeCounts> {
        let containers = self
            .docker
            .list_containers::<String>(Some(ListContainersOptions {
                all: true,
                ..Default::default()
            }))
            .await?;

        let running = containers
            .iter()
            .filter(|c| c.state.as_deref() == Some("running"))
            .count();

        Ok(RuntimeCounts {
            running,
            total: containers.len(),
        })
    }

    async fn detect_cli(&self, id: &str) -> Result<DhfInfo> {
        if let Some(info) = self.dhf_cache.read().ok().and_then(|c| c.get(id).cloned()) {
            return Ok(info);
        }

        let mut detected = DhfInfo {
            name: "Unknown".to_string(),
            version: String::new(),
        };
        for (cmd, name) in CLI_CANDIDATES {
            match self
                .exec_capture(id, vec![cmd.to_string(), "--version".to_string()])
                .await
            {
                Ok(version) if !version.is_empty() => {
                    detected = DhfInfo {
                        name: name.to_string(),
                        version,
                    };
                    break;
                }
                _ => {}
            }
        }

        if let Ok(mut cache) = self.dhf_cache.write() {
            cache.insert(id.to_string(), detected.clone());
        }

        Ok(detected)
    }
}

#[async_trait]
impl InventoryRuntime for DockerRuntime {
    async fn ping(&self) -> Result<()> {
        self.docker.ping().await?;
        Ok(())
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        let containers = self
            .docker
            .list_containers::<String>(Some(ListContainersOptions {
                all: true,
                ..Default::default()
            }))
            .await?;

        Ok(containers
            .into_iter()
            .map(|c| {
                let ports = c
                    .ports
                    .as_ref()
                    .map(|ports| {
                        ports
                            .iter()
                            .filter(|p| p.public_port.is_some())
                            .map(format_port)
                            .collect()
                    })
                    .unwrap_or_default();
                let record = record_from_summary(c);
                ContainerSummary {
                    id: record.id.chars().take(12).collect(),
                    name: record.name,
                    image: record.image,
                    state: record.state,
                    status: record.status,
                    ports,
                    created: record.created,
                }
            })
            .collect())
    }

    async fn list_networks(&self) -> Result<Vec<NetworkSummary>> {
        let networks = self.docker.list_networks::<String>(None).await?;

        Ok(networks
            .into_iter()
            .map(|n| NetworkSummary {
                id: n.id.unwrap_or_default().chars().take(12).collect(),
                name: n.name.unwrap_or_default(),
                driver: n.driver.unwrap_or_default(),
                scope: n.scope.unwrap_or_default(),
            })
            .collect())
    }
}
