//! In-process stand-in for the backend's `/dockerops` proxy.

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use futures_util::stream::{self, StreamExt};
use serde_json::json;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;

use crate::clients::DockerTarget;

pub const STATIC_LOGS: &str = "\u{1b}[32mINFO\u{1b}[0m boot\nWARN <disk> low\nINFO ready";
pub const BROKEN_ID: &str = "broken";
pub const GARBLED_ID: &str = "garbled";

#[derive(Default)]
pub struct MockState {
    queries: Mutex<Vec<HashMap<String, String>>>,
    stream_chunks: Mutex<Vec<Vec<u8>>>,
    stream_keep_open: AtomicBool,
    stats_calls: AtomicUsize,
    stats_delay_ms: AtomicU64,
    fail_stats: AtomicBool,
    logs_calls: AtomicUsize,
    logs_delay_ms: AtomicU64,
}

impl MockState {
    pub fn last_query(&self) -> HashMap<String, String> {
        self.queries.lock().unwrap().last().cloned().unwrap_or_default()
    }

    pub fn set_stream_chunks(&self, chunks: Vec<Vec<u8>>, keep_open: bool) {
        *self.stream_chunks.lock().unwrap() = chunks;
        self.stream_keep_open.store(keep_open, Ordering::SeqCst);
    }

    pub fn stats_calls(&self) -> usize {
        self.stats_calls.load(Ordering::SeqCst)
    }

    pub fn logs_calls(&self) -> usize {
        self.logs_calls.load(Ordering::SeqCst)
    }

    pub fn set_stats_delay(&self, delay: Duration) {
        self.stats_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_logs_delay(&self, delay: Duration) {
        self.logs_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_fail_stats(&self, fail: bool) {
        self.fail_stats.store(fail, Ordering::SeqCst);
    }

    fn record(&self, query: HashMap<String, String>) {
        self.queries.lock().unwrap().push(query);
    }
}

pub struct MockBackend {
    pub base_url: String,
    pub state: Arc<MockState>,
}

pub fn target() -> DockerTarget {
    DockerTarget {
        host: "10.0.0.1".to_string(),
        port: 2375,
        protocol: "http".to_string(),
        ca: None,
        cert: None,
        key: None,
    }
}

pub async fn spawn() -> MockBackend {
    let state = Arc::new(MockState::default());
    let router = Router::new()
        .route("/dockerops/containers", get(list))
        .route("/dockerops/containers/{id}/inspect", get(inspect))
        .route("/dockerops/containers/{id}/stats", get(stats))
        .route("/dockerops/containers/{id}/logs", get(logs))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    MockBackend {
        base_url: format!("http://{}", addr),
        state,
    }
}

/// Polls `cond` until it holds, panicking after two seconds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}

async fn list(
    State(state): State<Arc<MockState>>,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    state.record(q);
    Json(json!([
        {
            "Id": "aaa111", "Names": ["/web"], "Image": "nginx:1.27", "Created": 1_700_000_000,
            "Ports": [
                {"IP": "0.0.0.0", "PrivatePort": 80, "PublicPort": 8080, "Type": "tcp"},
                {"IP": "::", "PrivatePort": 80, "PublicPort": 8080, "Type": "tcp"}
            ],
            "State": "running", "Status": "Up 2 hours"
        },
        {
            "Id": "bbb222", "Names": ["/db"], "Image": "postgres:16", "Created": 1_700_000_100,
            "Ports": [{"PrivatePort": 5432, "Type": "tcp"}],
            "State": "exited", "Status": "Exited (0) 3 minutes ago"
        }
    ]))
    .into_response()
}

async fn inspect(
    State(state): State<Arc<MockState>>,
    Path(id): Path<String>,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    state.record(q);
    match id.as_str() {
        BROKEN_ID => (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response(),
        GARBLED_ID => (StatusCode::OK, "{not json").into_response(),
        _ => Json(json!({
            "Id": id,
            "Name": format!("/{}", id),
            "State": {"Status": "running", "Pid": 4242},
            "Config": {"Env": ["PATH=/usr/bin", "MODE=production"], "Image": "nginx:1.27"},
            "NetworkSettings": {"Networks": {"bridge": {"IPAddress": "172.17.0.2"}}}
        }))
        .into_response(),
    }
}

async fn stats(
    State(state): State<Arc<MockState>>,
    Path(id): Path<String>,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    state.record(q);
    let n = state.stats_calls.fetch_add(1, Ordering::SeqCst) + 1;
    let delay = state.stats_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    if id == BROKEN_ID || state.fail_stats.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "stats unavailable").into_response();
    }
    Json(json!({
        "id": id,
        "name": format!("/{}", id),
        "read": n.to_string(),
        "cpu_stats": {"cpu_usage": {"total_usage": 300}, "system_cpu_usage": 2000, "online_cpus": 1},
        "precpu_stats": {"cpu_usage": {"total_usage": 100}, "system_cpu_usage": 1000},
        "memory_stats": {"usage": 2048, "limit": 4096, "stats": {}},
        "pids_stats": {"current": 3}
    }))
    .into_response()
}

async fn logs(
    State(state): State<Arc<MockState>>,
    Path(id): Path<String>,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    let follow = q.get("follow").map(String::as_str) == Some("true");
    state.record(q);
    state.logs_calls.fetch_add(1, Ordering::SeqCst);
    let delay = state.logs_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    if id == BROKEN_ID {
        return (StatusCode::INTERNAL_SERVER_ERROR, "no such container").into_response();
    }

    if !follow {
        return Json(json!({ "logs": STATIC_LOGS })).into_response();
    }

    let chunks = state.stream_chunks.lock().unwrap().clone();
    let keep_open = state.stream_keep_open.load(Ordering::SeqCst);
    let body = stream::iter(chunks).then(|chunk| async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok::<_, Infallible>(chunk)
    });
    let body = if keep_open {
        body.chain(stream::pending()).boxed()
    } else {
        body.boxed()
    };

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        Body::from_stream(body),
    )
        .into_response()
}
