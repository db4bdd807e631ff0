use futures_util::{Stream, StreamExt};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::OpsError;

pub type ChunkSink = Box<dyn FnMut(String) + Send>;

/// Incremental UTF-8 decoder for a byte stream cut at arbitrary points.
///
/// A multi-byte character split across two chunks is held back until the
/// rest of it arrives. Invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    pending: Vec<u8>,
}

impl Utf8ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(chunk);

        let mut out = String::with_capacity(buf.len());
        let mut rest: &[u8] = &buf;
        loop {
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    out.push_str(s);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(n) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[n..];
                        }
                        // truncated sequence at the end, wait for more bytes
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        self.pending = rest.to_vec();
        out
    }

    /// Flushes bytes still held back once the stream is over.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        tail
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// How a follow stream stopped.
#[derive(Debug)]
pub enum StreamEnd {
    Completed,
    Cancelled,
    Interrupted(OpsError),
}

/// Cancels a running [`LogStream`]. Cheap to clone.
///
/// Once `cancel` returns, the chunk callback is never invoked again: the
/// callback is detached under the same lock the reader holds while
/// delivering.
#[derive(Clone)]
pub struct StreamCanceller {
    token: CancellationToken,
    sink: Arc<Mutex<Option<ChunkSink>>>,
}

impl StreamCanceller {
    pub fn cancel(&self) {
        self.token.cancel();
        self.sink.lock().unwrap().take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

pub struct LogStream {
    canceller: StreamCanceller,
    task: JoinHandle<StreamEnd>,
}

impl LogStream {
    /// Spawns the reader loop over a response body.
    pub fn spawn<S, B, E>(body: S, on_chunk: ChunkSink, label: String) -> Self
    where
        S: Stream<Item = Result<B, E>> + Send + 'static,
        B: AsRef<[u8]> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let canceller = StreamCanceller {
            token: CancellationToken::new(),
            sink: Arc::new(Mutex::new(Some(on_chunk))),
        };
        let token = canceller.token.clone();
        let sink = canceller.sink.clone();
        let task = tokio::spawn(async move {
            let end = read_loop(body, &token, &sink, &label).await;
            sink.lock().unwrap().take();
            end
        });
        Self { canceller, task }
    }

    pub fn cancel(&self) {
        self.canceller.cancel();
    }

    pub fn canceller(&self) -> StreamCanceller {
        self.canceller.clone()
    }

    pub async fn join(self) -> StreamEnd {
        match self.task.await {
            Ok(end) => end,
            Err(e) => StreamEnd::Interrupted(OpsError::StreamInterrupted(e.to_string())),
        }
    }
}

async fn read_loop<S, B, E>(
    body: S,
    token: &CancellationToken,
    sink: &Mutex<Option<ChunkSink>>,
    label: &str,
) -> StreamEnd
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut body = std::pin::pin!(body);
    let mut decoder = Utf8ChunkDecoder::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("log stream {} cancelled", label);
                return StreamEnd::Cancelled;
            }
            next = body.next() => next,
        };

        match next {
            Some(Ok(bytes)) => {
                if !deliver(sink, decoder.decode(bytes.as_ref())) {
                    return StreamEnd::Cancelled;
                }
            }
            Some(Err(e)) => {
                deliver(sink, decoder.finish());
                warn!("log stream {} interrupted: {}", label, e);
                return StreamEnd::Interrupted(OpsError::StreamInterrupted(e.to_string()));
            }
            None => {
                deliver(sink, decoder.finish());
                debug!("log stream {} completed", label);
                return StreamEnd::Completed;
            }
        }
    }
}

/// Returns false once the sink has been detached by a cancel.
fn deliver(sink: &Mutex<Option<ChunkSink>>, text: String) -> bool {
    let mut guard = sink.lock().unwrap();
    match guard.as_mut() {
        Some(on_chunk) => {
            if !text.is_empty() {
                on_chunk(text);
            }
            true
        }
        None => false,
    }
}
