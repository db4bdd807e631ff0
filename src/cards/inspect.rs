use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::clients::{DockerOpsClient, DockerTarget};
use crate::models::views::InspectView;

use super::Revision;

#[derive(Clone)]
pub struct InspectPane {
    client: Arc<DockerOpsClient>,
    target: DockerTarget,
    container_id: String,
    revision: Revision,
    state: Arc<Mutex<InspectState>>,
}

#[derive(Default)]
struct InspectState {
    snapshot: Option<Value>,
    search: String,
    loading: bool,
    error: Option<String>,
    generation: u64,
}

impl InspectPane {
    pub fn new(
        client: Arc<DockerOpsClient>,
        target: DockerTarget,
        container_id: String,
        revision: Revision,
    ) -> Self {
        Self {
            client,
            target,
            container_id,
            revision,
            state: Arc::new(Mutex::new(InspectState::default())),
        }
    }

    /// Fetches a fresh snapshot in the background; called each time the
    /// tab opens.
    pub fn load(&self) -> JoinHandle<()> {
        let generation = {
            let mut st = self.state.lock().unwrap();
            st.generation += 1;
            st.loading = true;
            st.error = None;
            st.generation
        };
        self.revision.bump();

        let pane = self.clone();
        tokio::spawn(async move { pane.fetch(generation).await })
    }

    async fn fetch(&self, generation: u64) {
        let result = self
            .client
            .inspect_container(&self.target, &self.container_id, true)
            .await;

        {
            let mut st = self.state.lock().unwrap();
            if st.generation != generation {
                return;
            }
            st.loading = false;
            match result {
                Ok(snapshot) => st.snapshot = Some(snapshot),
                Err(e) => {
                    warn!("inspect of {} failed: {}", self.container_id, e);
                    st.snapshot = None;
                    st.error = Some(e.to_string());
                }
            }
        }
        self.revision.bump();
    }

    /// Drops the snapshot when the tab closes; a late response is ignored.
    pub fn reset(&self) {
        let mut st = self.state.lock().unwrap();
        st.generation += 1;
        st.loading = false;
        st.snapshot = None;
        st.error = None;
    }

    pub fn set_search(&self, search: String) {
        self.state.lock().unwrap().search = search;
        self.revision.bump();
    }

    pub fn snapshot(&self) -> InspectView {
        let st = self.state.lock().unwrap();
        InspectView {
            json: st.snapshot.as_ref().map(|v| {
                serde_json::to_string_pretty(&filter_json(v, &st.search)).unwrap_or_default()
            }),
            search: st.search.clone(),
            loading: st.loading,
            error: st.error.clone(),
        }
    }
}

/// Keeps the parts of `value` whose keys or scalar values contain `search`
/// (case-insensitive). A matching key or a subtree with any matching value
/// is kept whole; other containers are pruned recursively.
pub fn filter_json(value: &Value, search: &str) -> Value {
    let term = search.trim().to_lowercase();
    if term.is_empty() {
        return value.clone();
    }
    match value {
        Value::Object(_) => prune(value, &term).unwrap_or_else(|| Value::Object(Map::new())),
        Value::Array(_) => prune(value, &term).unwrap_or_else(|| Value::Array(Vec::new())),
        other => other.clone(),
    }
}

fn contains(value: &Value, term: &str) -> bool {
    match value {
        Value::Null => false,
        Value::Object(m) => m.values().any(|v| contains(v, term)),
        Value::Array(a) => a.iter().any(|v| contains(v, term)),
        Value::String(s) => s.to_lowercase().contains(term),
        other => other.to_string().contains(term),
    }
}

fn prune(value: &Value, term: &str) -> Option<Value> {
    match value {
        Value::Object(m) => {
            let mut out = Map::new();
            for (k, v) in m {
                if k.to_lowercase().contains(term) || contains(v, term) {
                    out.insert(k.clone(), v.clone());
                } else if let Some(p) = prune(v, term) {
                    out.insert(k.clone(), p);
                }
            }
            (!out.is_empty()).then_some(Value::Object(out))
        }
        Value::Array(items) => {
            let out: Vec<Value> = items
                .iter()
                .filter_map(|item| {
                    if contains(item, term) {
                        Some(item.clone())
                    } else {
                        prune(item, term)
                    }
                })
                .collect();
            (!out.is_empty()).then_some(Value::Array(out))
        }
        _ => None,
    }
}
