use axum::{
    Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;

use crate::AppState;
use crate::cards::{CardId, Tab};
use crate::cards::logs::LogsUpdate;
use crate::clients::ListOptions;
use crate::error::OpsError;
use crate::models::views::*;

#[derive(Deserialize)]
pub struct OpenCardRequest {
    pub host: String,
    pub container_id: String,
    /// Display name from the container list, used for the download file.
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Deserialize)]
pub struct InspectUpdate {
    #[serde(default)]
    pub search: String,
}

pub async fn handle_list_hosts(State(state): State<AppState>) -> Json<Vec<HostView>> {
    Json(
        state
            .config
            .hosts
            .iter()
            .map(|h| HostView {
                name: h.name.clone(),
                address: format!("{}://{}:{}", h.protocol, h.host, h.port),
            })
            .collect(),
    )
}

pub async fn handle_list_containers(
    State(state): State<AppState>,
    Path(host): Path<String>,
    Query(filter): Query<ContainerFilter>,
) -> Response {
    let Some(def) = state.config.host(&host) else {
        return OpsError::NotFound(format!("host {:?}", host)).into_response();
    };
    let opts = ListOptions {
        all: true,
        ..Default::default()
    };
    match state.client.list_containers(&def.target(), &opts).await {
        Ok(list) => Json(ContainerListView::build(&list, &filter, Utc::now().timestamp()))
            .into_response(),
        Err(e) => {
            tracing::warn!("listing containers on {} failed: {}", host, e);
            e.into_response()
        }
    }
}

pub async fn handle_list_cards(State(state): State<AppState>) -> Json<Vec<CardView>> {
    let cards = state.registry.list().await;
    Json(cards.iter().map(|c| c.snapshot()).collect())
}

pub async fn handle_open_card(
    State(state): State<AppState>,
    Json(req): Json<OpenCardRequest>,
) -> Response {
    let Some(def) = state.config.host(&req.host) else {
        return OpsError::NotFound(format!("host {:?}", req.host)).into_response();
    };
    if req.container_id.trim().is_empty() {
        return OpsError::InvalidRequest("container_id is required".to_string()).into_response();
    }
    let id = state
        .registry
        .open(def.name.clone(), def.target(), req.container_id, req.name)
        .await;
    // a browser that never connects its event stream leaves no card behind
    state.registry.close_if_unwatched(id);
    match state.registry.get(id).await {
        Ok(card) => (StatusCode::CREATED, Json(card.snapshot())).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn handle_get_card(State(state): State<AppState>, Path(id): Path<CardId>) -> Response {
    match state.registry.get(id).await {
        Ok(card) => Json(card.snapshot()).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn handle_close_card(State(state): State<AppState>, Path(id): Path<CardId>) -> Response {
    match state.registry.close(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn handle_toggle_tab(
    State(state): State<AppState>,
    Path((id, tab)): Path<(CardId, String)>,
) -> Response {
    let tab: Tab = match tab.parse() {
        Ok(t) => t,
        Err(e) => return e.into_response(),
    };
    match state.registry.get(id).await {
        Ok(card) => {
            card.toggle_tab(tab);
            Json(card.snapshot()).into_response()
        }
        Err(e) => e.into_response(),
    }
}

pub async fn handle_close_tab(State(state): State<AppState>, Path(id): Path<CardId>) -> Response {
    match state.registry.get(id).await {
        Ok(card) => {
            card.close_tab();
            Json(card.snapshot()).into_response()
        }
        Err(e) => e.into_response(),
    }
}

pub async fn handle_update_logs(
    State(state): State<AppState>,
    Path(id): Path<CardId>,
    Json(update): Json<LogsUpdate>,
) -> Response {
    let card = match state.registry.get(id).await {
        Ok(card) => card,
        Err(e) => return e.into_response(),
    };
    match card.update_logs(update) {
        Ok(_) => Json(card.snapshot()).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn handle_download_logs(
    State(state): State<AppState>,
    Path(id): Path<CardId>,
) -> Response {
    match state.registry.get(id).await {
        Ok(card) => {
            let (filename, text) = card.download_logs();
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{}\"", filename),
                    ),
                ],
                text,
            )
                .into_response()
        }
        Err(e) => e.into_response(),
    }
}

pub async fn handle_update_inspect(
    State(state): State<AppState>,
    Path(id): Path<CardId>,
    Json(update): Json<InspectUpdate>,
) -> Response {
    match state.registry.get(id).await {
        Ok(card) => {
            card.set_inspect_search(update.search);
            Json(card.snapshot()).into_response()
        }
        Err(e) => e.into_response(),
    }
}

pub async fn handle_healthz() -> &'static str {
    "ok\n"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cards::{CardRegistry, CardSettings};
    use crate::clients::DockerOpsClient;
    use crate::config::Config;
    use crate::routes::build_router;
    use crate::testing::{self, MockBackend};
    use futures_util::StreamExt;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::TcpListener;

    struct Console {
        base: String,
        http: reqwest::Client,
        backend: MockBackend,
    }

    async fn console() -> Console {
        console_with_grace(None).await
    }

    async fn console_with_grace(grace: Option<Duration>) -> Console {
        let backend = testing::spawn().await;
        let cfg = Config::parse(&format!(
            "backend_url: {}\nstats_interval_secs: 1\nhosts:\n  - name: docker-01\n    host: 10.0.0.1\n",
            backend.base_url
        ))
        .unwrap();
        let client =
            Arc::new(DockerOpsClient::new(cfg.backend_url.clone(), Duration::from_secs(5)).unwrap());
        let state = AppState {
            registry: Arc::new(CardRegistry::new(
                client.clone(),
                CardSettings {
                    stats_period: cfg.stats_interval(),
                    default_selector: cfg.default_log_range.clone(),
                    unwatched_grace: grace.unwrap_or_else(|| cfg.card_grace()),
                },
            )),
            client,
            config: Arc::new(cfg),
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, build_router(state)).await.unwrap();
        });
        Console {
            base: format!("http://{}", addr),
            http: reqwest::Client::new(),
            backend,
        }
    }

    impl Console {
        async fn open_card(&self) -> serde_json::Value {
            self.http
                .post(format!("{}/api/cards", self.base))
                .json(&serde_json::json!({
                    "host": "docker-01",
                    "container_id": "aaa111bbb222ccc333",
                    "name": "/web"
                }))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap()
        }

        async fn card(&self, id: u64) -> reqwest::Response {
            self.http
                .get(format!("{}/api/cards/{}", self.base, id))
                .send()
                .await
                .unwrap()
        }

        /// Polls the card until `done` holds for its view.
        async fn card_when(
            &self,
            id: u64,
            done: impl Fn(&serde_json::Value) -> bool,
        ) -> serde_json::Value {
            for _ in 0..100 {
                let view: serde_json::Value = self.card(id).await.json().await.unwrap();
                if done(&view) {
                    return view;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            panic!("card {} never reached the expected state", id);
        }

        async fn events(&self, id: u64) -> reqwest::Response {
            let resp = self
                .http
                .get(format!("{}/api/cards/{}/events", self.base, id))
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
            resp
        }
    }

    #[tokio::test]
    async fn lists_hosts_and_filtered_containers() {
        let c = console().await;
        let hosts: serde_json::Value = c
            .http
            .get(format!("{}/api/hosts", c.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(hosts[0]["address"], "http://10.0.0.1:2375");

        let list: serde_json::Value = c
            .http
            .get(format!("{}/api/hosts/docker-01/containers?status=running", c.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let containers = list["containers"].as_array().unwrap();
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0]["name"], "web");
        assert_eq!(containers[0]["ports"], serde_json::json!(["8080:80"]));
        assert_eq!(list["images"], serde_json::json!(["All", "nginx:1.27", "postgres:16"]));

        let missing = c
            .http
            .get(format!("{}/api/hosts/nope/containers", c.base))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn card_lifecycle_over_http() {
        let c = console().await;
        let card = c.open_card().await;
        let id = card["id"].as_u64().unwrap();
        assert!(card["active_tab"].is_null());
        assert_eq!(card["name"], "web");

        let view: serde_json::Value = c
            .http
            .post(format!("{}/api/cards/{}/tabs/logs", c.base, id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(view["active_tab"], "logs");
        let view = c.card_when(id, |v| v["logs"]["loading"] == false).await;
        assert_eq!(view["logs"]["lines"], 3);

        let view: serde_json::Value = c
            .http
            .put(format!("{}/api/cards/{}/logs", c.base, id))
            .json(&serde_json::json!({"search": "boot"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(!view["logs"]["markup"].as_str().unwrap().contains("ready"));

        let download = c
            .http
            .get(format!("{}/api/cards/{}/logs/download", c.base, id))
            .send()
            .await
            .unwrap();
        assert!(
            download.headers()[header::CONTENT_DISPOSITION]
                .to_str()
                .unwrap()
                .contains("\"web-logs.txt\"")
        );
        assert_eq!(download.text().await.unwrap(), "\u{1b}[32mINFO\u{1b}[0m boot");

        let bad_range = c
            .http
            .put(format!("{}/api/cards/{}/logs", c.base, id))
            .json(&serde_json::json!({"range": "2w"}))
            .send()
            .await
            .unwrap();
        assert_eq!(bad_range.status(), StatusCode::BAD_REQUEST);

        let bad_tab = c
            .http
            .post(format!("{}/api/cards/{}/tabs/shell", c.base, id))
            .send()
            .await
            .unwrap();
        assert_eq!(bad_tab.status(), StatusCode::BAD_REQUEST);

        let closed = c
            .http
            .delete(format!("{}/api/cards/{}", c.base, id))
            .send()
            .await
            .unwrap();
        assert_eq!(closed.status(), StatusCode::NO_CONTENT);
        assert_eq!(c.card(id).await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn tab_request_returns_before_logs_arrive() {
        let c = console().await;
        c.backend.state.set_logs_delay(Duration::from_millis(300));
        let id = c.open_card().await["id"].as_u64().unwrap();

        let view: serde_json::Value = c
            .http
            .post(format!("{}/api/cards/{}/tabs/logs", c.base, id))
            .timeout(Duration::from_millis(200))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(view["logs"]["loading"], true);

        let view = c.card_when(id, |v| v["logs"]["loading"] == false).await;
        assert_eq!(view["logs"]["lines"], 3);
    }

    #[tokio::test]
    async fn inspect_search_filters_snapshot() {
        let c = console().await;
        let id = c.open_card().await["id"].as_u64().unwrap();
        c.http
            .post(format!("{}/api/cards/{}/tabs/inspect", c.base, id))
            .send()
            .await
            .unwrap();
        c.card_when(id, |v| v["inspect"]["json"].is_string()).await;

        let view: serde_json::Value = c
            .http
            .put(format!("{}/api/cards/{}/inspect", c.base, id))
            .json(&serde_json::json!({"search": "pid"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let json: serde_json::Value =
            serde_json::from_str(view["inspect"]["json"].as_str().unwrap()).unwrap();
        assert_eq!(json, serde_json::json!({"State": {"Pid": 4242}}));
    }

    #[tokio::test]
    async fn event_stream_ends_when_card_closes() {
        let c = console().await;
        let id = c.open_card().await["id"].as_u64().unwrap();
        let mut events = Box::pin(c.events(id).await.bytes_stream());

        let first = events.next().await.unwrap().unwrap();
        assert!(String::from_utf8_lossy(&first).contains("event: card"));

        c.http
            .delete(format!("{}/api/cards/{}", c.base, id))
            .send()
            .await
            .unwrap();
        let drained = tokio::time::timeout(Duration::from_secs(2), async {
            while let Some(chunk) = events.next().await {
                if chunk.is_err() {
                    break;
                }
            }
        })
        .await;
        assert!(drained.is_ok(), "event stream still open after close");
    }

    #[tokio::test]
    async fn card_without_viewers_is_closed() {
        let c = console_with_grace(Some(Duration::from_millis(100))).await;

        let never_watched = c.open_card().await["id"].as_u64().unwrap();
        let watched = c.open_card().await["id"].as_u64().unwrap();
        let events = c.events(watched).await;

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(c.card(never_watched).await.status(), StatusCode::NOT_FOUND);
        assert_eq!(c.card(watched).await.status(), StatusCode::OK);

        drop(events);
        for _ in 0..100 {
            if c.card(watched).await.status() == StatusCode::NOT_FOUND {
                return;
            }
            tokio::time::sleep(Duration::from_millis(30)).await;
        }
        panic!("card {} still open after its viewer left", watched);
    }
}
