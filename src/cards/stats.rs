use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clients::{DockerOpsClient, DockerTarget};
use crate::helpers::human_bytes;
use crate::models::docker::StatsSample;
use crate::models::views::StatsView;

use super::Revision;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Polling { container_id: String },
}

/// Polls one container's stats on a fixed interval while the Stats tab is
/// open. The last good sample survives failed polls.
pub struct PollingStatsController {
    client: Arc<DockerOpsClient>,
    target: DockerTarget,
    period: Duration,
    revision: Revision,
    slot: Arc<Mutex<StatsSlot>>,
    session: Mutex<Option<PollSession>>,
}

#[derive(Default)]
struct StatsSlot {
    generation: u64,
    latest: Option<StatsSample>,
    error: Option<String>,
    loading: bool,
}

struct PollSession {
    container_id: String,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl PollingStatsController {
    pub fn new(
        client: Arc<DockerOpsClient>,
        target: DockerTarget,
        period: Duration,
        revision: Revision,
    ) -> Self {
        Self {
            client,
            target,
            period,
            revision,
            slot: Arc::new(Mutex::new(StatsSlot::default())),
            session: Mutex::new(None),
        }
    }

    pub fn state(&self) -> PollState {
        match self.session.lock().unwrap().as_ref() {
            Some(s) => PollState::Polling {
                container_id: s.container_id.clone(),
            },
            None => PollState::Idle,
        }
    }

    /// Starts polling `container_id`, replacing any other container being
    /// polled. A no-op if that container is already polled.
    pub fn open(&self, container_id: &str) {
        let mut session = self.session.lock().unwrap();
        if session
            .as_ref()
            .is_some_and(|s| s.container_id == container_id)
        {
            return;
        }

        let generation = {
            let mut slot = self.slot.lock().unwrap();
            slot.generation += 1;
            slot.latest = None;
            slot.error = None;
            slot.loading = true;
            slot.generation
        };
        if let Some(previous) = session.take() {
            previous.stop();
        }

        info!(
            "polling stats for container {} every {:?}",
            container_id, self.period
        );
        let token = CancellationToken::new();
        let task = tokio::spawn(poll_loop(
            self.client.clone(),
            self.target.clone(),
            container_id.to_string(),
            self.period,
            generation,
            self.slot.clone(),
            self.revision.clone(),
            token.clone(),
        ));
        *session = Some(PollSession {
            container_id: container_id.to_string(),
            token,
            task,
        });
        drop(session);
        self.revision.bump();
    }

    /// Stops polling. A request already in flight is dropped, and its
    /// result would be ignored anyway.
    pub fn close(&self) {
        let mut session = self.session.lock().unwrap();
        {
            let mut slot = self.slot.lock().unwrap();
            slot.generation += 1;
            slot.loading = false;
        }
        if let Some(previous) = session.take() {
            info!("stopped stats polling for container {}", previous.container_id);
            previous.stop();
        }
        drop(session);
        self.revision.bump();
    }

    pub fn latest(&self) -> Option<StatsSample> {
        self.slot.lock().unwrap().latest.clone()
    }

    pub fn snapshot(&self) -> StatsView {
        let polling = self.session.lock().unwrap().is_some();
        let slot = self.slot.lock().unwrap();
        let summary = slot.latest.as_ref().map(StatsSample::summary);
        StatsView {
            polling,
            loading: slot.loading,
            read: slot.latest.as_ref().map(|s| s.read.clone()),
            memory: summary
                .as_ref()
                .map(|s| format!("{} / {}", human_bytes(s.memory_usage), human_bytes(s.memory_limit)))
                .unwrap_or_default(),
            network: summary
                .as_ref()
                .map(|s| format!("rx {} / tx {}", human_bytes(s.net_rx), human_bytes(s.net_tx)))
                .unwrap_or_default(),
            summary,
            error: slot.error.clone(),
        }
    }
}

impl Drop for PollingStatsController {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().ok().and_then(Option::take) {
            session.stop();
        }
    }
}

impl PollSession {
    fn stop(self) {
        self.token.cancel();
        self.task.abort();
    }
}

#[allow(clippy::too_many_arguments)]
async fn poll_loop(
    client: Arc<DockerOpsClient>,
    target: DockerTarget,
    container_id: String,
    period: Duration,
    generation: u64,
    slot: Arc<Mutex<StatsSlot>>,
    revision: Revision,
    token: CancellationToken,
) {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = interval.tick() => {}
        }

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            r = client.container_stats(&target, &container_id) => r,
        };

        let applied = {
            let mut slot = slot.lock().unwrap();
            if slot.generation != generation {
                false
            } else {
                slot.loading = false;
                match result {
                    Ok(sample) => {
                        debug!("stats sample for {} read at {}", container_id, sample.read);
                        slot.latest = Some(sample);
                        slot.error = None;
                    }
                    Err(e) => {
                        warn!("stats poll for {} failed: {}", container_id, e);
                        slot.error = Some(e.to_string());
                    }
                }
                true
            }
        };
        if !applied {
            break;
        }
        revision.bump();
    }
}
