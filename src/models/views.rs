use serde::{Deserialize, Serialize};

use crate::cards::Tab;
use crate::helpers::{port_labels, started_on, state_class, uptime};
use crate::models::docker::{ContainerSummary, StatsSummary};

#[derive(Debug, Clone, Default, Serialize)]
pub struct HostView {
    pub name: String,
    pub address: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ContainerView {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: String,
    pub state_class: String,
    pub status: String,
    pub ports: Vec<String>,
    pub started_on: String,
    pub uptime: String,
}

impl ContainerView {
    pub fn build(c: &ContainerSummary, now: i64) -> Self {
        Self {
            id: c.id.clone(),
            name: c.display_name(),
            image: c.image.clone(),
            state: c.state.clone(),
            state_class: state_class(&c.state).to_string(),
            status: c.status.clone(),
            ports: port_labels(&c.ports),
            started_on: started_on(c.created),
            uptime: uptime(c.created, now),
        }
    }
}

/// Name search plus status and image selections of the container list.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerFilter {
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

pub const STATUS_OPTIONS: [&str; 4] = ["All", "running", "exited", "paused"];

impl ContainerFilter {
    pub fn matches(&self, c: &ContainerSummary) -> bool {
        let search = self
            .search
            .as_deref()
            .map(|s| s.trim().to_lowercase())
            .unwrap_or_default();
        let matches_search =
            search.is_empty() || c.names.iter().any(|n| n.to_lowercase().contains(&search));
        let matches_status = selection(&self.status).is_none_or(|s| c.state == s);
        let matches_image = selection(&self.image).is_none_or(|i| c.image == i);
        matches_search && matches_status && matches_image
    }
}

fn selection(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .filter(|v| !v.is_empty() && *v != "All")
}

/// Distinct images of a list, in first-seen order, after `All`.
pub fn image_options(containers: &[ContainerSummary]) -> Vec<String> {
    let mut options = vec!["All".to_string()];
    for c in containers {
        if !c.image.is_empty() && !options.contains(&c.image) {
            options.push(c.image.clone());
        }
    }
    options
}

/// Filtered container list with the options of its filter controls.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContainerListView {
    pub containers: Vec<ContainerView>,
    pub statuses: Vec<String>,
    pub images: Vec<String>,
    pub total: usize,
}

impl ContainerListView {
    pub fn build(list: &[ContainerSummary], filter: &ContainerFilter, now: i64) -> Self {
        Self {
            containers: list
                .iter()
                .filter(|c| filter.matches(c))
                .map(|c| ContainerView::build(c, now))
                .collect(),
            statuses: STATUS_OPTIONS.iter().map(|s| s.to_string()).collect(),
            images: image_options(list),
            total: list.len(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LogsView {
    pub markup: String,
    pub search: String,
    pub reversed: bool,
    pub range: String,
    pub follow: bool,
    pub loading: bool,
    pub live: bool,
    pub notice: Option<String>,
    pub lines: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct InspectView {
    pub json: Option<String>,
    pub search: String,
    pub loading: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsView {
    pub polling: bool,
    pub loading: bool,
    pub read: Option<String>,
    pub summary: Option<StatsSummary>,
    pub memory: String,
    pub network: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CardView {
    pub id: u64,
    pub host: String,
    pub container_id: String,
    pub name: String,
    pub active_tab: Option<Tab>,
    pub logs: LogsView,
    pub inspect: InspectView,
    pub stats: StatsView,
}
