use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// Subset of the Docker Engine API JSON, as relayed by the dockerops proxy.

// --- Container list ---

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerSummary {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub image: String,
    #[serde(default, rename = "ImageID")]
    pub image_id: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub ports: Vec<Port>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_rw: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_root_fs: Option<i64>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub mounts: Vec<Mount>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Port {
    #[serde(default, rename = "IP", skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, rename = "PrivatePort")]
    pub private_port: u16,
    #[serde(default, rename = "PublicPort", skip_serializing_if = "Option::is_none")]
    pub public_port: Option<u16>,
    #[serde(default, rename = "Type")]
    pub protocol: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct Mount {
    #[serde(default, rename = "Type")]
    pub mount_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(default, rename = "RW")]
    pub rw: bool,
}

impl ContainerSummary {
    /// First name without the leading slash Docker puts on it.
    pub fn display_name(&self) -> String {
        self.names
            .first()
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_else(|| self.id.chars().take(12).collect())
    }
}

// --- Stats ---

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StatsSample {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub read: String,
    #[serde(default)]
    pub preread: String,
    #[serde(default)]
    pub num_procs: u32,
    #[serde(default)]
    pub pids_stats: PidsStats,
    #[serde(default)]
    pub cpu_stats: CpuStats,
    #[serde(default)]
    pub precpu_stats: CpuStats,
    #[serde(default)]
    pub memory_stats: MemoryStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub networks: Option<HashMap<String, NetworkStats>>,
    #[serde(default)]
    pub blkio_stats: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PidsStats {
    #[serde(default)]
    pub current: Option<u64>,
    #[serde(default)]
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CpuStats {
    #[serde(default)]
    pub cpu_usage: CpuUsage,
    #[serde(default)]
    pub system_cpu_usage: Option<u64>,
    #[serde(default)]
    pub online_cpus: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CpuUsage {
    #[serde(default)]
    pub total_usage: u64,
    #[serde(default)]
    pub percpu_usage: Option<Vec<u64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MemoryStats {
    #[serde(default)]
    pub usage: Option<u64>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub stats: HashMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NetworkStats {
    #[serde(default)]
    pub rx_bytes: u64,
    #[serde(default)]
    pub tx_bytes: u64,
    #[serde(default)]
    pub rx_packets: u64,
    #[serde(default)]
    pub tx_packets: u64,
}

/// Figures shown on the Stats tab, derived from one sample.
#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct StatsSummary {
    pub cpu_percent: f64,
    pub memory_usage: u64,
    pub memory_limit: u64,
    pub memory_percent: f64,
    pub net_rx: u64,
    pub net_tx: u64,
    pub pids: u64,
}

impl StatsSample {
    pub fn summary(&self) -> StatsSummary {
        let cpu_delta = self
            .cpu_stats
            .cpu_usage
            .total_usage
            .saturating_sub(self.precpu_stats.cpu_usage.total_usage);
        let system_delta = self
            .cpu_stats
            .system_cpu_usage
            .unwrap_or(0)
            .saturating_sub(self.precpu_stats.system_cpu_usage.unwrap_or(0));

        let cpu_percent = if system_delta > 0 && cpu_delta > 0 {
            let num_cpus = self.cpu_stats.online_cpus.unwrap_or_else(|| {
                self.cpu_stats
                    .cpu_usage
                    .percpu_usage
                    .as_ref()
                    .map(|p| p.len() as u32)
                    .unwrap_or(1)
            });
            (cpu_delta as f64 / system_delta as f64) * num_cpus.max(1) as f64 * 100.0
        } else {
            0.0
        };

        // cgroup v2 reports inactive_file, v1 reports cache
        let cache = self
            .memory_stats
            .stats
            .get("inactive_file")
            .or_else(|| self.memory_stats.stats.get("cache"))
            .copied()
            .unwrap_or(0);
        let memory_usage = self.memory_stats.usage.unwrap_or(0).saturating_sub(cache);
        let memory_limit = self.memory_stats.limit.unwrap_or(0);
        let memory_percent = if memory_limit > 0 {
            memory_usage as f64 / memory_limit as f64 * 100.0
        } else {
            0.0
        };

        let (net_rx, net_tx) = self
            .networks
            .as_ref()
            .map(|nets| {
                nets.values()
                    .fold((0, 0), |(rx, tx), n| (rx + n.rx_bytes, tx + n.tx_bytes))
            })
            .unwrap_or((0, 0));

        StatsSummary {
            cpu_percent,
            memory_usage,
            memory_limit,
            memory_percent,
            net_rx,
            net_tx,
            pids: self.pids_stats.current.unwrap_or(self.num_procs as u64),
        }
    }
}
