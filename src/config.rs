use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::clients::DockerTarget;
use crate::logs::LogRange;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    #[serde(default)]
    pub backend_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
    #[serde(default = "default_log_range")]
    pub default_log_range: String,
    #[serde(default = "default_card_grace_secs")]
    pub card_grace_secs: u64,
    #[serde(default)]
    pub hosts: Vec<HostDef>,
}

/// A Docker engine reachable through the backend proxy.
#[derive(Debug, Clone, Deserialize)]
pub struct HostDef {
    pub name: String,
    pub host: String,
    #[serde(default = "default_docker_port")]
    pub port: u16,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default)]
    pub ca: Option<String>,
    #[serde(default)]
    pub cert: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
}

fn default_listen_port() -> u16 {
    9090
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_stats_interval_secs() -> u64 {
    3
}

fn default_log_range() -> String {
    "100".to_string()
}

fn default_card_grace_secs() -> u64 {
    30
}

fn default_docker_port() -> u16 {
    2375
}

fn default_protocol() -> String {
    "http".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| format!("reading config {}: {}", path.display(), e))?;
        Self::parse(&data)
    }

    pub fn parse(data: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let mut cfg: Config =
            serde_yaml::from_str(data).map_err(|e| format!("parsing config: {}", e))?;

        cfg.backend_url = cfg.backend_url.trim_end_matches('/').to_string();
        if cfg.backend_url.is_empty() {
            return Err("backend_url must be configured".into());
        }

        if cfg.hosts.is_empty() {
            return Err("at least one docker host must be configured".into());
        }

        if cfg.stats_interval_secs == 0 {
            return Err("stats_interval_secs must be greater than zero".into());
        }

        if cfg.card_grace_secs == 0 {
            return Err("card_grace_secs must be greater than zero".into());
        }

        cfg.default_log_range = cfg.default_log_range.trim().to_string();
        if !LogRange::is_offered(&cfg.default_log_range) {
            return Err(format!("invalid default_log_range {:?}", cfg.default_log_range).into());
        }

        Ok(cfg)
    }

    pub fn listen_addr(&self) -> String {
        format!("0.0.0.0:{}", self.listen_port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }

    /// How long a card may go without an open event stream.
    pub fn card_grace(&self) -> Duration {
        Duration::from_secs(self.card_grace_secs)
    }

    pub fn host(&self, name: &str) -> Option<&HostDef> {
        self.hosts.iter().find(|h| h.name == name)
    }
}

impl HostDef {
    pub fn target(&self) -> DockerTarget {
        DockerTarget {
            host: self.host.clone(),
            port: self.port,
            protocol: self.protocol.clone(),
            ca: self.ca.clone(),
            cert: self.cert.clone(),
            key: self.key.clone(),
        }
    }
}
