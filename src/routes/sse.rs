use axum::{
    extract::{Path, State},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures_util::stream::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::WatchStream;

use crate::AppState;
use crate::cards::{Card, CardId, CardRegistry};

/// Held by one event stream. When the browser goes away the card is closed
/// unless another stream picks it up within the grace period.
struct Viewer {
    registry: Arc<CardRegistry>,
    card: Arc<Card>,
}

impl Drop for Viewer {
    fn drop(&mut self) {
        if tokio::runtime::Handle::try_current().is_ok() {
            self.registry.close_if_unwatched(self.card.id);
        }
    }
}

/// SSE endpoint that pushes a card snapshot to the browser whenever the
/// card changes: log chunks, stats samples, tab switches. The stream ends
/// when the card is closed.
pub async fn handle_card_events(
    State(state): State<AppState>,
    Path(id): Path<CardId>,
) -> Response {
    let card = match state.registry.get(id).await {
        Ok(card) => card,
        Err(e) => return e.into_response(),
    };
    let closed = card.closed();
    let revisions = card.subscribe();
    let viewer = Viewer {
        registry: state.registry.clone(),
        card,
    };

    // WatchStream yields the current revision first, so the browser gets a
    // snapshot right after connecting.
    let stream = WatchStream::new(revisions)
        .map(move |revision| {
            let data = serde_json::to_string(&viewer.card.snapshot()).unwrap_or_default();
            Ok::<_, Infallible>(
                Event::default()
                    .event("card")
                    .id(revision.to_string())
                    .data(data),
            )
        })
        .take_until(closed.cancelled_owned());

    Sse::new(stream)
        .keep_alive(KeepAlive::default().interval(Duration::from_secs(15)))
        .into_response()
}
