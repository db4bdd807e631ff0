pub mod inspect;
pub mod logs;
pub mod stats;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::clients::{DockerOpsClient, DockerTarget};
use crate::error::{OpsError, Result};
use crate::models::views::CardView;

use inspect::InspectPane;
use logs::{LogPane, LogsUpdate};
use stats::PollingStatsController;

pub type CardId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tab {
    Logs,
    Inspect,
    Stats,
}

impl FromStr for Tab {
    type Err = OpsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "logs" => Ok(Tab::Logs),
            "inspect" => Ok(Tab::Inspect),
            "stats" => Ok(Tab::Stats),
            other => Err(OpsError::InvalidRequest(format!("unknown tab {:?}", other))),
        }
    }
}

/// Change counter of one card, watched by its event stream.
#[derive(Clone)]
pub struct Revision(Arc<watch::Sender<u64>>);

impl Revision {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self(Arc::new(tx))
    }

    pub fn bump(&self) {
        self.0.send_modify(|r| *r += 1);
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.0.subscribe()
    }

    pub fn watchers(&self) -> usize {
        self.0.receiver_count()
    }
}

impl Default for Revision {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct CardSettings {
    pub stats_period: Duration,
    pub default_selector: String,
    /// How long a card may sit without an event subscriber before it is
    /// closed.
    pub unwatched_grace: Duration,
}

/// One container card with its three tabs. At most one tab is open.
pub struct Card {
    pub id: CardId,
    pub host: String,
    pub container_id: String,
    pub name: String,
    active_tab: Mutex<Option<Tab>>,
    logs: LogPane,
    inspect: InspectPane,
    stats: PollingStatsController,
    revision: Revision,
    closed: CancellationToken,
}

impl Card {
    fn new(
        id: CardId,
        host: String,
        target: DockerTarget,
        container_id: String,
        name: Option<String>,
        client: Arc<DockerOpsClient>,
        settings: &CardSettings,
    ) -> Self {
        let revision = Revision::new();
        let name = name
            .as_deref()
            .map(|n| n.trim().trim_start_matches('/'))
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| container_id.chars().take(12).collect());
        Self {
            id,
            host,
            logs: LogPane::new(
                client.clone(),
                target.clone(),
                container_id.clone(),
                settings.default_selector.clone(),
                revision.clone(),
            ),
            inspect: InspectPane::new(
                client.clone(),
                target.clone(),
                container_id.clone(),
                revision.clone(),
            ),
            stats: PollingStatsController::new(
                client,
                target,
                settings.stats_period,
                revision.clone(),
            ),
            container_id,
            name,
            active_tab: Mutex::new(None),
            revision,
            closed: CancellationToken::new(),
        }
    }

    pub fn active_tab(&self) -> Option<Tab> {
        *self.active_tab.lock().unwrap()
    }

    /// Opens `tab`, or closes it when it is already the open one. Returns
    /// the background load started for Logs or Inspect.
    pub fn toggle_tab(&self, tab: Tab) -> Option<JoinHandle<()>> {
        let (leaving, entering) = {
            let mut active = self.active_tab.lock().unwrap();
            let previous = *active;
            if previous == Some(tab) {
                *active = None;
                (previous, None)
            } else {
                *active = Some(tab);
                (previous, Some(tab))
            }
        };

        if let Some(previous) = leaving {
            self.leave(previous);
        }
        self.revision.bump();

        match entering {
            Some(Tab::Logs) => Some(self.logs.open()),
            Some(Tab::Inspect) => Some(self.inspect.load()),
            Some(Tab::Stats) => {
                self.stats.open(&self.container_id);
                None
            }
            None => None,
        }
    }

    pub fn close_tab(&self) {
        let previous = self.active_tab.lock().unwrap().take();
        if let Some(previous) = previous {
            self.leave(previous);
            self.revision.bump();
        }
    }

    fn leave(&self, tab: Tab) {
        match tab {
            Tab::Logs => self.logs.stop(),
            Tab::Inspect => self.inspect.reset(),
            Tab::Stats => self.stats.close(),
        }
    }

    /// Range and follow changes only reload while the Logs tab is open;
    /// otherwise they are kept for the next time it opens.
    pub fn update_logs(&self, update: LogsUpdate) -> Result<Option<JoinHandle<()>>> {
        self.logs.update(update)
    }

    pub fn set_inspect_search(&self, search: String) {
        self.inspect.set_search(search);
    }

    /// File name and filtered log text for a download.
    pub fn download_logs(&self) -> (String, String) {
        let stem: String = self
            .name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        (format!("{}-logs.txt", stem), self.logs.export())
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Open event streams on this card.
    pub fn watchers(&self) -> usize {
        self.revision.watchers()
    }

    /// Cancelled once the card has been closed.
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    pub fn snapshot(&self) -> CardView {
        CardView {
            id: self.id,
            host: self.host.clone(),
            container_id: self.container_id.clone(),
            name: self.name.clone(),
            active_tab: self.active_tab(),
            logs: self.logs.snapshot(),
            inspect: self.inspect.snapshot(),
            stats: self.stats.snapshot(),
        }
    }

    /// Ends every session the card owns.
    pub fn shutdown(&self) {
        self.active_tab.lock().unwrap().take();
        self.logs.stop();
        self.inspect.reset();
        self.stats.close();
        self.closed.cancel();
    }
}

/// Open cards keyed by id. Each card owns its log, inspect and stats
/// sessions; closing the card ends them.
pub struct CardRegistry {
    client: Arc<DockerOpsClient>,
    settings: CardSettings,
    next_id: AtomicU64,
    cards: RwLock<HashMap<CardId, Arc<Card>>>,
}

impl CardRegistry {
    pub fn new(client: Arc<DockerOpsClient>, settings: CardSettings) -> Self {
        Self {
            client,
            settings,
            next_id: AtomicU64::new(1),
            cards: RwLock::new(HashMap::new()),
        }
    }

    pub async fn open(
        &self,
        host: String,
        target: DockerTarget,
        container_id: String,
        name: Option<String>,
    ) -> CardId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        info!("opening card {} for container {} on {}", id, container_id, host);
        let card = Card::new(
            id,
            host,
            target,
            container_id,
            name,
            self.client.clone(),
            &self.settings,
        );
        self.cards.write().await.insert(id, Arc::new(card));
        id
    }

    pub async fn get(&self, id: CardId) -> Result<Arc<Card>> {
        self.cards
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| OpsError::NotFound(format!("card {}", id)))
    }

    pub async fn list(&self) -> Vec<Arc<Card>> {
        let mut cards: Vec<_> = self.cards.read().await.values().cloned().collect();
        cards.sort_by_key(|c| c.id);
        cards
    }

    pub async fn close(&self, id: CardId) -> Result<()> {
        let card = self
            .cards
            .write()
            .await
            .remove(&id)
            .ok_or_else(|| OpsError::NotFound(format!("card {}", id)))?;
        info!("closing card {} ({})", id, card.container_id);
        card.shutdown();
        Ok(())
    }

    /// Closes card `id` once the grace period has passed if no event stream
    /// is watching it by then.
    pub fn close_if_unwatched(self: &Arc<Self>, id: CardId) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(registry.settings.unwatched_grace).await;
            let card = {
                let mut cards = registry.cards.write().await;
                match cards.get(&id) {
                    Some(card) if card.watchers() == 0 => cards.remove(&id),
                    _ => None,
                }
            };
            if let Some(card) = card {
                info!("card {} ({}) has no viewers, closing", id, card.container_id);
                card.shutdown();
            }
        })
    }

    pub async fn close_all(&self) {
        let cards: Vec<_> = self.cards.write().await.drain().map(|(_, c)| c).collect();
        if !cards.is_empty() {
            info!("closing {} open cards", cards.len());
        }
        for card in cards {
            card.shutdown();
        }
    }

    pub async fn len(&self) -> usize {
        self.cards.read().await.len()
    }
}
