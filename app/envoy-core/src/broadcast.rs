//! Status broadcaster: periodic enrichment and change-driven fan-out.
//!
//! Two timers drive it: every three seconds the sleeve fleet is
//! snapshotted, enriched, and diffed against the previous content hashes;
//! every five seconds the host snapshot is hashed the same way. Only
//! changes are broadcast. A new subscriber asks for a full `init` through
//! a single-slot signal so repeated requests coalesce.

use crate::host_stats::HostStatsSource;
use crate::hub::EventHub;
use crate::runtime::StatsRuntime;
use crate::sidecar::SidecarStatusSource;
use crate::sleeve::SleeveDirectory;
use envoy_protocol::{CloneStatus, SleeveInfo};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

const SLEEVE_INTERVAL: Duration = Duration::from_secs(3);
const HOST_INTERVAL: Duration = Duration::from_secs(5);

/// Event names on the wire.
pub const EVENT_INIT: &str = "init";
pub const EVENT_SLEEVE_ADD: &str = "sleeve:add";
pub const EVENT_SLEEVE_UPDATE: &str = "sleeve:update";
pub const EVENT_SLEEVE_REMOVE: &str = "sleeve:remove";
pub const EVENT_HOST_STATS: &str = "host:stats";
pub const EVENT_CLONE_PROGRESS: &str = "clone:progress";

/// Periodic status enrichment and broadcast.
pub struct StatusBroadcaster {
    hub: Arc<EventHub>,
    sleeves: Arc<dyn SleeveDirectory>,
    sidecar: Arc<dyn SidecarStatusSource>,
    stats: Arc<dyn StatsRuntime>,
    host: Arc<dyn HostStatsSource>,

    prev_snapshots: Mutex<HashMap<String, String>>,
    prev_host_hash: Mutex<String>,
    init_tx: mpsc::Sender<()>,
    init_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl StatusBroadcaster {
    /// Creates a broadcaster over the given sources.
    #[must_use]
    pub fn new(
        hub: Arc<EventHub>,
        sleeves: Arc<dyn SleeveDirectory>,
        sidecar: Arc<dyn SidecarStatusSource>,
        stats: Arc<dyn StatsRuntime>,
        host: Arc<dyn HostStatsSource>,
    ) -> Self {
        let (init_tx, init_rx) = mpsc::channel(1);
        Self {
            hub,
            sleeves,
            sidecar,
            stats,
            host,
            prev_snapshots: Mutex::new(HashMap::new()),
            prev_host_hash: Mutex::new(String::new()),
            init_tx,
            init_rx: Mutex::new(Some(init_rx)),
        }
    }

    /// Spawns the polling loop. Subsequent calls are no-ops.
    pub fn start(self: &Arc<Self>) {
        let Some(mut init_rx) = self.init_rx.lock().ok().and_then(|mut rx| rx.take()) else {
            return;
        };

        let broadcaster = Arc::clone(self);
        tokio::spawn(async move {
            let now = tokio::time::Instant::now();
            let mut sleeve_tick = tokio::time::interval_at(now + SLEEVE_INTERVAL, SLEEVE_INTERVAL);
            let mut host_tick = tokio::time::interval_at(now + HOST_INTERVAL, HOST_INTERVAL);

            loop {
                tokio::select! {
                    _ = init_rx.recv() => {
                        if broadcaster.hub.client_count() > 0 {
                            broadcaster.broadcast_init().await;
                            broadcaster.broadcast_host_stats(true).await;
                        }
                    }
                    _ = sleeve_tick.tick() => {
                        if broadcaster.hub.client_count() > 0 {
                            broadcaster.check_sleeve_changes().await;
                        }
                    }
                    _ = host_tick.tick() => {
                        if broadcaster.hub.client_count() > 0 {
                            broadcaster.broadcast_host_stats(false).await;
                        }
                    }
                }
            }
        });
    }

    /// Requests an initial-state broadcast for a newly connected
    /// subscriber. Single-slot: calls made while one is pending coalesce.
    pub fn request_init(&self) {
        let _ = self.init_tx.try_send(());
    }

    /// Emits a `clone:progress` event. Called by the workspace manager's
    /// observer hook.
    pub fn clone_progress(&self, job_id: &str, status: CloneStatus, progress: u8, error: Option<&str>) {
        let payload = serde_json::json!({
            "id": job_id,
            "status": status,
            "progress": progress,
            "error": error.unwrap_or(""),
        });
        self.hub.broadcast(EVENT_CLONE_PROGRESS, payload.to_string());
    }

    /// Sends the complete enriched sleeve set and resets the change
    /// baseline.
    async fn broadcast_init(&self) {
        let mut sleeves = self.sleeves.list();
        self.enrich(&mut sleeves).await;

        let payload = serde_json::to_string(&sleeves).unwrap_or_else(|_| "[]".to_string());
        self.hub.broadcast(EVENT_INIT, payload);

        if let Ok(mut prev) = self.prev_snapshots.lock() {
            *prev = sleeves.iter().map(|s| (s.name.clone(), hash_sleeve(s))).collect();
        }
    }

    /// Diffs the enriched fleet against the previous tick and emits
    /// add/update/remove events.
    async fn check_sleeve_changes(&self) {
        let mut sleeves = self.sleeves.list();
        self.enrich(&mut sleeves).await;

        let current_hashes: HashMap<String, String> = sleeves
            .iter()
            .map(|s| (s.name.clone(), hash_sleeve(s)))
            .collect();

        let Ok(mut prev) = self.prev_snapshots.lock() else {
            return;
        };

        for name in prev.keys() {
            if !current_hashes.contains_key(name) {
                let payload = serde_json::json!({ "name": name });
                self.hub.broadcast(EVENT_SLEEVE_REMOVE, payload.to_string());
            }
        }

        for sleeve in &sleeves {
            let Ok(payload) = serde_json::to_string(sleeve) else {
                continue;
            };
            match prev.get(&sleeve.name) {
                None => self.hub.broadcast(EVENT_SLEEVE_ADD, payload),
                Some(prev_hash) if prev_hash != &current_hashes[&sleeve.name] => {
                    self.hub.broadcast(EVENT_SLEEVE_UPDATE, payload);
                }
                Some(_) => {}
            }
        }

        *prev = current_hashes;
    }

    /// Emits `host:stats` when the snapshot hash changed (or always, when
    /// forced for a fresh subscriber).
    async fn broadcast_host_stats(&self, force: bool) {
        let stats = self.host.stats().await;
        let Ok(payload) = serde_json::to_string(&stats) else {
            return;
        };
        let hash = hash_str(&payload);

        let changed = match self.prev_host_hash.lock() {
            Ok(mut prev) => {
                let changed = *prev != hash;
                if changed || force {
                    *prev = hash;
                }
                changed
            }
            Err(_) => return,
        };

        if changed || force {
            self.hub.broadcast(EVENT_HOST_STATS, payload);
        }
    }

    /// Enriches a batch of sleeves with sidecar introspection and
    /// per-container stats. Individual failures degrade the affected
    /// sleeve only.
    async fn enrich(&self, sleeves: &mut [SleeveInfo]) {
        let container_names: Vec<String> =
            sleeves.iter().map(|s| s.container_name.clone()).collect();
        let statuses = self.sidecar.batch_status(&container_names).await;

        for sleeve in sleeves.iter_mut() {
            sleeve.integrity = 100.0;

            if let Some(status) = statuses.get(&sleeve.container_name) {
                sleeve.sidecar_healthy = true;
                if let Some(dhf) = &status.dhf {
                    sleeve.dhf = dhf.name.clone();
                    sleeve.dhf_version = dhf.version.clone();
                }
                if let Some(cstack) = status.workspace.as_ref().and_then(|w| w.cstack.as_ref()) {
                    sleeve.integrity = integrity_from_cstack(cstack.closed, cstack.total);
                }
            } else if sleeve.status == "running" && sleeve.dhf.is_empty() {
                // No sidecar: fall back to probing the container once.
                if let Ok(info) = self.stats.detect_cli(&sleeve.container_id).await {
                    sleeve.dhf = info.name;
                    sleeve.dhf_version = info.version;
                }
            }

            if let Ok(stats) = self.stats.container_stats(&sleeve.container_id).await {
                sleeve.resources = Some(stats);
            }
        }
    }
}

/// `closed/total*100`, defaulting to full marks when the tracker reports
/// no tasks.
fn integrity_from_cstack(closed: u32, total: u32) -> f64 {
    if total == 0 {
        return 100.0;
    }
    f64::from(closed) / f64::from(total) * 100.0
}

#[derive(Serialize)]
struct SleeveDigest<'a> {
    name: &'a str,
    status: &'a str,
    integrity: f64,
    sidecar_healthy: bool,
    dhf: &'a str,
    dhf_version: &'a str,
    mem_used: u64,
    cpu_pct: f64,
}

/// Content hash over the fields whose changes warrant an update event.
fn hash_sleeve(sleeve: &SleeveInfo) -> String {
    let (mem_used, cpu_pct) = sleeve
        .resources
        .map_or((0, 0.0), |r| (r.memory_used_bytes, r.cpu_percent));

    let digest = SleeveDigest {
        name: &sleeve.name,
        status: &sleeve.status,
        integrity: sleeve.integrity,
        sidecar_healthy: sleeve.sidecar_healthy,
        dhf: &sleeve.dhf,
        dhf_version: &sleeve.dhf_version,
        mem_used,
        cpu_pct,
    };
    hash_str(&serde_json::to_string(&digest).unwrap_or_default())
}

fn hash_str(s: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(s.as_bytes());
    hex::encode(&digest[..8])
}
