pub mod stream;

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{OpsError, Result};
use crate::logs::LogRange;
use crate::models::docker::{ContainerSummary, StatsSample};

pub use stream::{ChunkSink, LogStream, StreamCanceller, StreamEnd};

/// Connection parameters of one Docker engine, passed through to the proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerTarget {
    pub host: String,
    pub port: u16,
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl DockerTarget {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("host", self.host.clone()),
            ("port", self.port.to_string()),
            ("protocol", self.protocol.clone()),
        ];
        for (name, value) in [("ca", &self.ca), ("cert", &self.cert), ("key", &self.key)] {
            if let Some(v) = value {
                pairs.push((name, v.clone()));
            }
        }
        pairs
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub all: bool,
    pub limit: Option<u32>,
    pub size: bool,
    pub filters: Option<HashMap<String, Vec<String>>>,
}

#[derive(Deserialize)]
struct LogsBody {
    logs: String,
}

/// REST client for the backend's `/dockerops` proxy endpoints.
pub struct DockerOpsClient {
    base_url: String,
    http: Client,
    // no total timeout: follow streams stay open indefinitely
    stream_http: Client,
}

impl DockerOpsClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OpsError::Transport(format!("building HTTP client: {}", e)))?;
        let stream_http = Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| OpsError::Transport(format!("building HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            stream_http,
        })
    }

    pub async fn list_containers(
        &self,
        target: &DockerTarget,
        opts: &ListOptions,
    ) -> Result<Vec<ContainerSummary>> {
        let mut query = target.query_pairs();
        query.push(("all", opts.all.to_string()));
        query.push(("size", opts.size.to_string()));
        if let Some(limit) = opts.limit {
            query.push(("limit", limit.to_string()));
        }
        if let Some(ref filters) = opts.filters {
            query.push(("filters", serde_json::to_string(filters)?));
        }
        self.get_json("/dockerops/containers", &query).await
    }

    pub async fn inspect_container(
        &self,
        target: &DockerTarget,
        id: &str,
        size: bool,
    ) -> Result<serde_json::Value> {
        let mut query = target.query_pairs();
        query.push(("size", size.to_string()));
        self.get_json(&format!("/dockerops/containers/{}/inspect", id), &query)
            .await
    }

    pub async fn container_stats(&self, target: &DockerTarget, id: &str) -> Result<StatsSample> {
        let mut query = target.query_pairs();
        query.push(("stream", "false".to_string()));
        self.get_json(&format!("/dockerops/containers/{}/stats", id), &query)
            .await
    }

    /// One-shot log fetch (`follow=false`).
    pub async fn fetch_logs(
        &self,
        target: &DockerTarget,
        id: &str,
        range: &LogRange,
    ) -> Result<String> {
        let query = log_query(target, range, false);
        let body: LogsBody = self
            .get_json(&format!("/dockerops/containers/{}/logs", id), &query)
            .await?;
        Ok(body.logs)
    }

    /// Opens a follow stream and hands decoded text to `on_chunk` as it
    /// arrives. Fails only if the stream cannot be opened.
    pub async fn stream_logs(
        &self,
        target: &DockerTarget,
        id: &str,
        range: &LogRange,
        on_chunk: ChunkSink,
    ) -> Result<LogStream> {
        let path = format!("/dockerops/containers/{}/logs", id);
        let query = log_query(target, range, true);
        let resp = self
            .stream_http
            .get(format!("{}{}", self.base_url, path))
            .query(&query)
            .send()
            .await?;
        let resp = check_status(&path, resp).await?;

        info!("streaming logs for container {} on {}", id, target.host);
        Ok(LogStream::spawn(
            resp.bytes_stream(),
            on_chunk,
            format!("{}@{}", id, target.host),
        ))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&'static str, String)],
    ) -> Result<T> {
        debug!("GET {}", path);
        let resp = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .header("Accept", "application/json")
            .query(query)
            .send()
            .await?;
        let resp = check_status(path, resp).await?;

        let bytes = resp.bytes().await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| OpsError::MalformedResponse(format!("GET {}: {}", path, e)))
    }
}

fn log_query(target: &DockerTarget, range: &LogRange, follow: bool) -> Vec<(&'static str, String)> {
    let mut query = target.query_pairs();
    query.push(("stdout", "true".to_string()));
    query.push(("stderr", "true".to_string()));
    query.push(("follow", follow.to_string()));
    query.extend(range.query_pairs());
    query
}

async fn check_status(path: &str, resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(OpsError::Transport(format!(
        "GET {} returned {}: {}",
        path,
        status.as_u16(),
        body.trim()
    )))
}
