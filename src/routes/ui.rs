use askama::Template;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;

use crate::AppState;
use crate::clients::ListOptions;
use crate::logs::RANGE_OPTIONS;
use crate::models::views::*;

#[derive(Debug, Clone)]
struct Breadcrumb {
    label: String,
    url: String,
}

#[derive(Debug, Clone)]
struct RangeOption {
    value: String,
    label: String,
}

fn render_template(tmpl: &impl Template) -> Response {
    match tmpl.render() {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            tracing::error!("template error: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
        }
    }
}

// --- Containers ---

#[derive(Deserialize)]
pub struct ContainersQuery {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(flatten)]
    pub filter: ContainerFilter,
}

#[derive(Template)]
#[template(path = "containers.html")]
struct ContainersTemplate {
    title: String,
    current_nav: String,
    breadcrumbs: Vec<Breadcrumb>,
    hosts: Vec<HostView>,
    host: String,
    search: String,
    status: String,
    image: String,
    list: ContainerListView,
    error: String,
    ranges: Vec<RangeOption>,
    default_range: String,
}

pub async fn handle_containers(
    State(state): State<AppState>,
    Query(query): Query<ContainersQuery>,
) -> Response {
    let hosts: Vec<HostView> = state
        .config
        .hosts
        .iter()
        .map(|h| HostView {
            name: h.name.clone(),
            address: format!("{}://{}:{}", h.protocol, h.host, h.port),
        })
        .collect();

    let selected = query
        .host
        .as_deref()
        .and_then(|name| state.config.host(name))
        .or_else(|| state.config.hosts.first());

    let mut list = ContainerListView::default();
    let mut error = String::new();
    if let Some(def) = selected {
        let opts = ListOptions {
            all: true,
            ..Default::default()
        };
        match state.client.list_containers(&def.target(), &opts).await {
            Ok(containers) => {
                list = ContainerListView::build(&containers, &query.filter, Utc::now().timestamp())
            }
            Err(e) => {
                tracing::warn!("listing containers on {} failed: {}", def.name, e);
                error = e.to_string();
            }
        }
    }
    if list.statuses.is_empty() {
        list.statuses = STATUS_OPTIONS.iter().map(|s| s.to_string()).collect();
        list.images = vec!["All".to_string()];
    }

    let tmpl = ContainersTemplate {
        title: "Containers".to_string(),
        current_nav: "containers".to_string(),
        breadcrumbs: vec![Breadcrumb {
            label: "Containers".to_string(),
            url: "/ui/".to_string(),
        }],
        hosts,
        host: selected.map(|h| h.name.clone()).unwrap_or_default(),
        search: query.filter.search.clone().unwrap_or_default(),
        status: query.filter.status.clone().unwrap_or_else(|| "All".to_string()),
        image: query.filter.image.clone().unwrap_or_else(|| "All".to_string()),
        list,
        error,
        ranges: RANGE_OPTIONS
            .iter()
            .map(|(value, label)| RangeOption {
                value: value.to_string(),
                label: label.to_string(),
            })
            .collect(),
        default_range: state.config.default_log_range.clone(),
    };

    render_template(&tmpl)
}
