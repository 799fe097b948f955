//! Host metric collection.
//!
//! Reads kernel counters from procfs (a bind-mounted host path when
//! present) plus `statvfs` for the workspace filesystem. CPU usage is a
//! delta between successive cumulative samples, so the first call after
//! startup reports zero.

use crate::runtime::StatsRuntime;
use async_trait::async_trait;
use envoy_protocol::{ContainerCapacity, CpuStats, DiskStats, HostStats, MemoryStats};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const HOST_PROC: &str = "/host/proc";

/// Host snapshot provider, as consumed by the status broadcaster.
#[async_trait]
pub trait HostStatsSource: Send + Sync {
    /// Collects a full host snapshot. Sections that cannot be read are
    /// omitted rather than failing the snapshot.
    async fn stats(&self) -> HostStats;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct CpuSample {
    user: u64,
    nice: u64,
    system: u64,
    idle: u64,
    iowait: u64,
    irq: u64,
    softirq: u64,
    steal: u64,
}

impl CpuSample {
    const fn total(self) -> u64 {
        self.user
            + self.nice
            + self.system
            + self.idle
            + self.iowait
            + self.irq
            + self.softirq
            + self.steal
    }

    const fn active(self) -> u64 {
        self.user + self.nice + self.system + self.irq + self.softirq + self.steal
    }
}

/// Collector over procfs, statvfs, and runtime container counts.
pub struct HostStatsCollector {
    proc_path: PathBuf,
    disk_path: PathBuf,
    runtime: Arc<dyn StatsRuntime>,
    max_containers: usize,
    last_cpu: Mutex<Option<CpuSample>>,
}

impl HostStatsCollector {
    /// Creates a collector, preferring the bind-mounted host procfs when
    /// present.
    #[must_use]
    pub fn new(
        runtime: Arc<dyn StatsRuntime>,
        disk_path: impl Into<PathBuf>,
        max_containers: usize,
    ) -> Self {
        let proc_path = if Path::new(HOST_PROC).exists() {
            PathBuf::from(HOST_PROC)
        } else {
            PathBuf::from("/proc")
        };
        Self::with_proc_path(proc_path, runtime, disk_path, max_containers)
    }

    /// Creates a collector reading procfs from an explicit location.
    #[must_use]
    pub fn with_proc_path(
        proc_path: impl Into<PathBuf>,
        runtime: Arc<dyn StatsRuntime>,
        disk_path: impl Into<PathBuf>,
        max_containers: usize,
    ) -> Self {
        Self {
            proc_path: proc_path.into(),
            disk_path: disk_path.into(),
            runtime,
            max_containers,
            last_cpu: Mutex::new(None),
        }
    }

    /// Memory usage from `meminfo`.
    #[must_use]
    pub fn memory_stats(&self) -> Option<MemoryStats> {
        let content = std::fs::read_to_string(self.proc_path.join("meminfo")).ok()?;
        parse_meminfo(&content)
    }

    /// CPU usage from successive `stat` samples.
    #[must_use]
    pub fn cpu_stats(&self) -> Option<CpuStats> {
        let content = std::fs::read_to_string(self.proc_path.join("stat")).ok()?;
        let (current, threads) = parse_proc_stat(&content)?;

        let cores = std::fs::read_to_string(self.proc_path.join("cpuinfo"))
            .ok()
            .map(|info| parse_core_count(&info))
            .filter(|c| *c > 0)
            .unwrap_or(threads);

        let mut last = self.last_cpu.lock().ok()?;
        let usage_percent = last.map_or(0.0, |prev| usage_percent(prev, current));
        *last = Some(current);

        Some(CpuStats {
            usage_percent,
            cores,
            threads,
        })
    }

    /// Filesystem usage of the workspace volume.
    #[must_use]
    pub fn disk_stats(&self) -> Option<DiskStats> {
        let stat = nix::sys::statvfs::statvfs(&self.disk_path).ok()?;
        let block = stat.fragment_size() as u64;
        let total = stat.blocks() as u64 * block;
        let free = stat.blocks_free() as u64 * block;
        if total == 0 {
            return None;
        }
        let used = total - free;
        Some(DiskStats {
            used_bytes: used,
            total_bytes: total,
            percent: used as f64 / total as f64 * 100.0,
        })
    }

    /// Container counts from the runtime plus the configured ceiling.
    pub async fn container_capacity(&self) -> Option<ContainerCapacity> {
        let counts = self.runtime.container_counts().await.ok()?;
        Some(ContainerCapacity {
            running: counts.running,
            total: counts.total,
            max: self.max_containers,
        })
    }
}

#[async_trait]
impl HostStatsSource for HostStatsCollector {
    async fn stats(&self) -> HostStats {
        HostStats {
            cpu: self.cpu_stats(),
            memory: self.memory_stats(),
            disk: self.disk_stats(),
            containers: self.container_capacity().await,
        }
    }
}

fn parse_meminfo(content: &str) -> Option<MemoryStats> {
    let mut total = 0u64;
    let mut available = 0u64;

    for line in content.lines() {
        let mut fields = line.split_whitespace();
        let Some(key) = fields.next() else { continue };
        let Some(value) = fields.next().and_then(|v| v.parse::<u64>().ok()) else {
            continue;
        };
        match key {
            "MemTotal:" => total = value * 1024,
            "MemAvailable:" => available = value * 1024,
            _ => {}
        }
    }

    if total == 0 {
        return None;
    }
    let used = total.saturating_sub(available);
    Some(MemoryStats {
        used_bytes: used,
        total_bytes: total,
        percent: used as f64 / total as f64 * 100.0,
    })
}

fn parse_proc_stat(content: &str) -> Option<(CpuSample, usize)> {
    let mut sample = None;
    let mut threads = 0;

    for line in content.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.first() {
            Some(&"cpu") if fields.len() >= 5 => {
                let at = |i: usize| fields.get(i).and_then(|f| f.parse().ok()).unwrap_or(0);
                sample = Some(CpuSample {
                    user: at(1),
                    nice: at(2),
                    system: at(3),
                    idle: at(4),
                    iowait: at(5),
                    irq: at(6),
                    softirq: at(7),
                    steal: at(8),
                });
            }
            Some(name) if name.starts_with("cpu") => threads += 1,
            _ => {}
        }
    }

    sample.map(|s| (s, threads))
}

fn parse_core_count(cpuinfo: &str) -> usize {
    let mut ids = HashSet::new();
    for line in cpuinfo.lines() {
        if let Some(rest) = line.strip_prefix("core id") {
            if let Some((_, id)) = rest.split_once(':') {
                ids.insert(id.trim().to_string());
            }
        }
    }
    ids.len()
}

fn usage_percent(prev: CpuSample, current: CpuSample) -> f64 {
    let total_delta = current.total().saturating_sub(prev.total());
    let active_delta = current.active().saturating_sub(prev.active());
    if total_delta == 0 {
        return 0.0;
    }
    active_delta as f64 / total_delta as f64 * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::runtime::{DhfInfo, RuntimeCounts};
    use envoy_protocol::ContainerResourceStats;

    struct FixedCounts;

    #[async_trait]
    impl StatsRuntime for FixedCounts {
        async fn container_stats(&self, _id: &str) -> Result<ContainerResourceStats> {
            Ok(ContainerResourceStats::default())
        }

        async fn container_counts(&self) -> Result<RuntimeCounts> {
            Ok(RuntimeCounts {
                running: 2,
                total: 5,
            })
        }

        async fn detect_cli(&self, _id: &str) -> Result<DhfInfo> {
            Ok(DhfInfo::default())
        }
    }

    const MEMINFO: &str = "MemTotal:       16384000 kB\nMemFree:         1000000 kB\nMemAvailable:    8192000 kB\n";

    const PROC_STAT_T0: &str = "cpu  100 0 100 800 0 0 0 0 0 0\ncpu0 50 0 50 400 0 0 0 0 0 0\ncpu1 50 0 50 400 0 0 0 0 0 0\nintr 12345\n";
    const PROC_STAT_T1: &str = "cpu  150 0 150 900 0 0 0 0 0 0\ncpu0 75 0 75 450 0 0 0 0 0 0\ncpu1 75 0 75 450 0 0 0 0 0 0\nintr 12345\n";

    const CPUINFO: &str = "processor\t: 0\ncore id\t\t: 0\nprocessor\t: 1\ncore id\t\t: 0\n";

    fn collector(proc_dir: &Path) -> HostStatsCollector {
        HostStatsCollector::with_proc_path(proc_dir, Arc::new(FixedCounts), "/", 20)
    }

    #[test]
    fn meminfo_parses_used_and_percent() {
        let stats = parse_meminfo(MEMINFO).unwrap();
        assert_eq!(stats.total_bytes, 16_384_000 * 1024);
        assert_eq!(stats.used_bytes, (16_384_000 - 8_192_000) * 1024);
        assert!((stats.percent - 50.0).abs() < 0.01);
    }

    #[test]
    fn meminfo_without_total_is_none() {
        assert!(parse_meminfo("MemFree: 12 kB\n").is_none());
        assert!(parse_meminfo("").is_none());
    }

    #[test]
    fn proc_stat_parses_aggregate_and_threads() {
        let (sample, threads) = parse_proc_stat(PROC_STAT_T0).unwrap();
        assert_eq!(sample.user, 100);
        assert_eq!(sample.idle, 800);
        assert_eq!(threads, 2);
    }

    #[test]
    fn core_ids_deduplicate() {
        assert_eq!(parse_core_count(CPUINFO), 1);
        assert_eq!(parse_core_count(""), 0);
    }

    #[test]
    fn first_cpu_sample_reports_zero_then_delta() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("cpuinfo"), CPUINFO).unwrap();

        let collector = collector(tmp.path());

        std::fs::write(tmp.path().join("stat"), PROC_STAT_T0).unwrap();
        let first = collector.cpu_stats().unwrap();
        assert_eq!(first.usage_percent, 0.0);
        assert_eq!(first.threads, 2);
        assert_eq!(first.cores, 1);

        std::fs::write(tmp.path().join("stat"), PROC_STAT_T1).unwrap();
        let second = collector.cpu_stats().unwrap();
        // active delta 100 over total delta 200.
        assert!((second.usage_percent - 50.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn capacity_carries_configured_ceiling() {
        let tmp = tempfile::tempdir().unwrap();
        let collector = collector(tmp.path());
        let capacity = collector.container_capacity().await.unwrap();
        assert_eq!(capacity.running, 2);
        assert_eq!(capacity.total, 5);
        assert_eq!(capacity.max, 20);
    }

    #[tokio::test]
    async fn snapshot_omits_unreadable_sections() {
        let tmp = tempfile::tempdir().unwrap();
        let collector = collector(tmp.path());
        let stats = collector.stats().await;
        assert!(stats.cpu.is_none());
        assert!(stats.memory.is_none());
        assert!(stats.containers.is_some());
    }
}
