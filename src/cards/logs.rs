use chrono::Utc;
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::clients::{ChunkSink, DockerOpsClient, DockerTarget, StreamCanceller, StreamEnd};
use crate::error::{OpsError, Result};
use crate::logs::{LogRange, ansi, view::LogViewModel};
use crate::models::views::LogsView;

use super::Revision;

pub const FETCH_FAILED: &str = "Failed to fetch logs";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogsUpdate {
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub reversed: Option<bool>,
    #[serde(default)]
    pub range: Option<String>,
    #[serde(default)]
    pub follow: Option<bool>,
}

/// Logs tab of one card: its buffer, view options, and at most one
/// fetch or follow session at a time. Sessions only run while the tab is
/// open; option changes made while it is closed apply on the next open.
#[derive(Clone)]
pub struct LogPane {
    client: Arc<DockerOpsClient>,
    target: DockerTarget,
    container_id: String,
    revision: Revision,
    state: Arc<Mutex<LogPaneState>>,
}

struct LogPaneState {
    view: LogViewModel,
    selector: String,
    follow: bool,
    open: bool,
    loading: bool,
    live: bool,
    notice: Option<String>,
    // Bumped whenever a session starts or stops; results of older
    // sessions are discarded.
    session: u64,
    stream: Option<StreamCanceller>,
}

impl LogPane {
    pub fn new(
        client: Arc<DockerOpsClient>,
        target: DockerTarget,
        container_id: String,
        default_selector: String,
        revision: Revision,
    ) -> Self {
        Self {
            client,
            target,
            container_id,
            revision,
            state: Arc::new(Mutex::new(LogPaneState {
                view: LogViewModel::new(),
                selector: default_selector,
                follow: false,
                open: false,
                loading: false,
                live: false,
                notice: None,
                session: 0,
                stream: None,
            })),
        }
    }

    /// Opens the pane and loads the current range.
    pub fn open(&self) -> JoinHandle<()> {
        self.state.lock().unwrap().open = true;
        self.reload()
    }

    /// Applies view options. A changed range or follow flag restarts the
    /// session when the pane is open; the returned handle tracks that load.
    pub fn update(&self, update: LogsUpdate) -> Result<Option<JoinHandle<()>>> {
        let range = update.range.map(|r| r.trim().to_string());
        if let Some(ref selector) = range {
            if LogRange::parse_selector(selector, Utc::now().timestamp()).is_none() {
                return Err(OpsError::InvalidRequest(format!(
                    "unknown log range {:?}",
                    selector
                )));
            }
        }

        let reload = {
            let mut st = self.state.lock().unwrap();
            if let Some(search) = update.search {
                st.view.set_search_term(search);
            }
            if let Some(reversed) = update.reversed {
                st.view.set_reversed(reversed);
            }
            let mut changed = false;
            if let Some(selector) = range {
                if selector != st.selector {
                    st.selector = selector;
                    changed = true;
                }
            }
            if let Some(follow) = update.follow {
                if follow != st.follow {
                    st.follow = follow;
                    changed = true;
                }
            }
            changed && st.open
        };

        self.revision.bump();
        Ok(reload.then(|| self.reload()))
    }

    /// Cancels whatever is running and loads the current range again in a
    /// background task, so a caller that goes away cannot strand the pane
    /// half way through.
    fn reload(&self) -> JoinHandle<()> {
        let (session, selector, follow) = {
            let mut st = self.state.lock().unwrap();
            let previous = st.stream.take();
            st.session += 1;
            st.loading = true;
            st.live = false;
            st.notice = None;
            let started = (st.session, st.selector.clone(), st.follow);
            drop(st);
            if let Some(previous) = previous {
                previous.cancel();
            }
            started
        };
        self.revision.bump();

        let pane = self.clone();
        tokio::spawn(async move { pane.load(session, selector, follow).await })
    }

    async fn load(&self, session: u64, selector: String, follow: bool) {
        let Some(range) = LogRange::parse_selector(&selector, Utc::now().timestamp()) else {
            self.finish(session, |st| st.notice = Some(FETCH_FAILED.to_string()));
            return;
        };

        if follow {
            self.start_stream(session, range).await;
        } else {
            self.fetch_once(session, range).await;
        }
    }

    /// Ends the current session, if any, and closes the pane.
    pub fn stop(&self) {
        let previous = {
            let mut st = self.state.lock().unwrap();
            st.open = false;
            st.session += 1;
            st.loading = false;
            st.live = false;
            st.stream.take()
        };
        if let Some(previous) = previous {
            info!("stopping log stream for container {}", self.container_id);
            previous.cancel();
        }
        self.revision.bump();
    }

    async fn fetch_once(&self, session: u64, range: LogRange) {
        let result = self
            .client
            .fetch_logs(&self.target, &self.container_id, &range)
            .await;

        self.finish(session, |st| match result {
            Ok(text) => st.view.replace_all(text),
            Err(e) => {
                warn!("fetching logs for {} failed: {}", self.container_id, e);
                st.view.replace_all(String::new());
                st.notice = Some(FETCH_FAILED.to_string());
            }
        });
    }

    async fn start_stream(&self, session: u64, range: LogRange) {
        let cleared = self.finish(session, |st| {
            st.loading = true;
            st.view.replace_all(String::new());
        });
        if !cleared {
            return;
        }

        let sink_state = self.state.clone();
        let sink_revision = self.revision.clone();
        let on_chunk: ChunkSink = Box::new(move |chunk| {
            let applied = {
                let mut st = sink_state.lock().unwrap();
                if st.session == session {
                    st.view.append_chunk(&chunk);
                    true
                } else {
                    false
                }
            };
            if applied {
                sink_revision.bump();
            }
        });

        let stream = match self
            .client
            .stream_logs(&self.target, &self.container_id, &range, on_chunk)
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                warn!("opening log stream for {} failed: {}", self.container_id, e);
                self.finish(session, |st| st.notice = Some(FETCH_FAILED.to_string()));
                return;
            }
        };

        let canceller = stream.canceller();
        let current = self.finish(session, |st| {
            st.live = true;
            st.stream = Some(canceller.clone());
        });
        if !current {
            // superseded while the stream was opening
            canceller.cancel();
            return;
        }

        let state = self.state.clone();
        let revision = self.revision.clone();
        let container_id = self.container_id.clone();
        tokio::spawn(async move {
            let end = stream.join().await;
            let changed = {
                let mut st = state.lock().unwrap();
                if st.session != session {
                    false
                } else {
                    st.live = false;
                    st.stream = None;
                    st.notice = match end {
                        StreamEnd::Interrupted(e) => Some(format!("Log stream ended: {}", e)),
                        StreamEnd::Completed => Some("Log stream closed by the server".to_string()),
                        StreamEnd::Cancelled => None,
                    };
                    true
                }
            };
            if changed {
                info!("log stream for container {} ended", container_id);
                revision.bump();
            }
        });
    }

    /// Runs `apply` if `session` is still current, clearing the loading
    /// flag. Returns whether it ran.
    fn finish(&self, session: u64, apply: impl FnOnce(&mut LogPaneState)) -> bool {
        let applied = {
            let mut st = self.state.lock().unwrap();
            if st.session == session {
                st.loading = false;
                apply(&mut *st);
                true
            } else {
                false
            }
        };
        if applied {
            self.revision.bump();
        }
        applied
    }

    pub fn is_live(&self) -> bool {
        self.state.lock().unwrap().live
    }

    /// Filtered text in buffer order, for copy and download.
    pub fn export(&self) -> String {
        self.state.lock().unwrap().view.filtered_text()
    }

    pub fn snapshot(&self) -> LogsView {
        let st = self.state.lock().unwrap();
        LogsView {
            markup: ansi::to_markup(&st.view.render()),
            search: st.view.search_term().to_string(),
            reversed: st.view.is_reversed(),
            range: st.selector.clone(),
            follow: st.follow,
            loading: st.loading,
            live: st.live,
            notice: st.notice.clone(),
            lines: if st.view.raw().is_empty() {
                0
            } else {
                st.view.line_count()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, MockBackend};
    use std::time::Duration;

    fn pane(backend: &MockBackend, container_id: &str) -> LogPane {
        let client = DockerOpsClient::new(&backend.base_url, Duration::from_secs(5)).unwrap();
        LogPane::new(
            Arc::new(client),
            testing::target(),
            container_id.to_string(),
            "100".to_string(),
            Revision::new(),
        )
    }

    async fn apply(p: &LogPane, update: LogsUpdate) {
        if let Some(load) = p.update(update).unwrap() {
            load.await.unwrap();
        }
    }

    #[tokio::test]
    async fn one_shot_fetch_renders_markup() {
        let backend = testing::spawn().await;
        let p = pane(&backend, "web");
        p.open().await.unwrap();

        let v = p.snapshot();
        assert!(!v.loading);
        assert_eq!(v.lines, 3);
        assert!(v.markup.starts_with("<span style=\"color:rgb(0,187,0);\">INFO</span> boot"));
        assert!(v.markup.contains("WARN &lt;disk&gt; low"));
        assert_eq!(backend.state.last_query().get("tail").map(String::as_str), Some("100"));
    }

    #[tokio::test]
    async fn search_and_reverse_do_not_refetch() {
        let backend = testing::spawn().await;
        let p = pane(&backend, "web");
        p.open().await.unwrap();
        let calls = backend.state.logs_calls();

        let load = p
            .update(LogsUpdate {
                search: Some("info".into()),
                reversed: Some(true),
                ..Default::default()
            })
            .unwrap();

        assert!(load.is_none());
        assert_eq!(backend.state.logs_calls(), calls);
        let v = p.snapshot();
        assert!(v.markup.starts_with("INFO ready\n"));
        assert!(!v.markup.contains("WARN"));
        assert_eq!(p.export(), "\u{1b}[32mINFO\u{1b}[0m boot\nINFO ready");
    }

    #[tokio::test]
    async fn failed_fetch_shows_notice() {
        let backend = testing::spawn().await;
        let p = pane(&backend, testing::BROKEN_ID);
        p.open().await.unwrap();
        let v = p.snapshot();
        assert_eq!(v.notice.as_deref(), Some(FETCH_FAILED));
        assert_eq!(v.markup, "");
        assert!(!v.loading);
    }

    #[tokio::test]
    async fn unknown_range_is_rejected() {
        let backend = testing::spawn().await;
        let p = pane(&backend, "web");
        for range in ["2w", "7h", "9999999999999999h"] {
            let err = p
                .update(LogsUpdate {
                    range: Some(range.into()),
                    ..Default::default()
                })
                .unwrap_err();
            assert!(matches!(err, OpsError::InvalidRequest(_)), "{range}");
        }
        assert_eq!(p.snapshot().range, "100");
        assert_eq!(backend.state.logs_calls(), 0);
    }

    #[tokio::test]
    async fn range_change_refetches_with_since() {
        let backend = testing::spawn().await;
        let p = pane(&backend, "web");
        p.open().await.unwrap();
        apply(
            &p,
            LogsUpdate {
                range: Some("6h".into()),
                ..Default::default()
            },
        )
        .await;
        let q = backend.state.last_query();
        let since: i64 = q.get("since").unwrap().parse().unwrap();
        assert!((Utc::now().timestamp() - 6 * 3600 - since).abs() < 60);
        assert!(q.get("tail").is_none());
    }

    #[tokio::test]
    async fn closed_pane_keeps_options_for_next_open() {
        let backend = testing::spawn().await;
        backend
            .state
            .set_stream_chunks(vec![b"tick\n".to_vec()], true);
        let p = pane(&backend, "web");

        let load = p
            .update(LogsUpdate {
                range: Some("500".into()),
                follow: Some(true),
                ..Default::default()
            })
            .unwrap();
        assert!(load.is_none());
        assert_eq!(backend.state.logs_calls(), 0);
        let v = p.snapshot();
        assert_eq!(v.range, "500");
        assert!(v.follow);
        assert!(!v.live);

        p.open().await.unwrap();
        testing::wait_until(|| p.snapshot().markup == "tick\n").await;
        let q = backend.state.last_query();
        assert_eq!(q.get("follow").map(String::as_str), Some("true"));
        assert_eq!(q.get("tail").map(String::as_str), Some("500"));

        p.stop();
        assert!(!p.is_live());
        assert!(p.update(LogsUpdate { range: Some("1000".into()), ..Default::default() })
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn load_finishes_after_caller_goes_away() {
        let backend = testing::spawn().await;
        backend.state.set_logs_delay(Duration::from_millis(150));
        let p = pane(&backend, "web");

        drop(p.open());
        assert!(p.snapshot().loading);

        testing::wait_until(|| !p.snapshot().loading).await;
        assert_eq!(p.snapshot().lines, 3);
    }

    #[tokio::test]
    async fn follow_streams_into_buffer() {
        let backend = testing::spawn().await;
        backend
            .state
            .set_stream_chunks(vec![b"li".to_vec(), b"ne1\nline".to_vec(), b"2".to_vec()], true);
        let p = pane(&backend, "web");
        p.open().await.unwrap();
        apply(
            &p,
            LogsUpdate {
                follow: Some(true),
                ..Default::default()
            },
        )
        .await;

        testing::wait_until(|| p.snapshot().markup == "line1\nline2").await;
        assert!(p.is_live());

        apply(
            &p,
            LogsUpdate {
                reversed: Some(true),
                ..Default::default()
            },
        )
        .await;
        assert_eq!(p.snapshot().markup, "line2\nline1");

        p.stop();
        assert!(!p.is_live());
    }

    #[tokio::test]
    async fn switching_range_replaces_the_stream() {
        let backend = testing::spawn().await;
        backend
            .state
            .set_stream_chunks(vec![b"old\n".to_vec()], true);
        let p = pane(&backend, "web");
        p.open().await.unwrap();
        apply(
            &p,
            LogsUpdate {
                follow: Some(true),
                ..Default::default()
            },
        )
        .await;
        testing::wait_until(|| p.snapshot().markup == "old\n").await;

        backend
            .state
            .set_stream_chunks(vec![b"new\n".to_vec()], true);
        apply(
            &p,
            LogsUpdate {
                range: Some("500".into()),
                ..Default::default()
            },
        )
        .await;
        testing::wait_until(|| p.snapshot().markup == "new\n").await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(p.snapshot().markup, "new\n");
    }

    #[tokio::test]
    async fn stream_opened_after_stop_is_cancelled() {
        let backend = testing::spawn().await;
        backend
            .state
            .set_stream_chunks(vec![b"late\n".to_vec()], true);
        backend.state.set_logs_delay(Duration::from_millis(100));
        let p = pane(&backend, "web");
        p.update(LogsUpdate {
            follow: Some(true),
            ..Default::default()
        })
        .unwrap();

        let load = p.open();
        testing::wait_until(|| backend.state.logs_calls() == 1).await;
        p.stop();
        load.await.unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        let v = p.snapshot();
        assert!(!v.live);
        assert!(!v.loading);
        assert_eq!(v.markup, "");
        assert!(v.notice.is_none());
    }

    #[tokio::test]
    async fn finished_stream_is_reported() {
        let backend = testing::spawn().await;
        backend
            .state
            .set_stream_chunks(vec![b"bye\n".to_vec()], false);
        let p = pane(&backend, "web");
        p.update(LogsUpdate {
            follow: Some(true),
            ..Default::default()
        })
        .unwrap();
        p.open().await.unwrap();

        testing::wait_until(|| p.snapshot().notice.is_some()).await;
        let v = p.snapshot();
        assert!(!v.live);
        assert_eq!(v.markup, "bye\n");
    }
}
