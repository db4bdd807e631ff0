pub mod api;
pub mod sse;
pub mod ui;

use axum::{
    Router,
    routing::{delete, get, post, put},
};
use tower_http::compression::CompressionLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Hosts and containers
        .route("/api/hosts", get(api::handle_list_hosts))
        .route(
            "/api/hosts/{host}/containers",
            get(api::handle_list_containers),
        )
        // Cards
        .route("/api/cards", get(api::handle_list_cards).post(api::handle_open_card))
        .route(
            "/api/cards/{id}",
            get(api::handle_get_card).delete(api::handle_close_card),
        )
        .route("/api/cards/{id}/tabs/{tab}", post(api::handle_toggle_tab))
        .route("/api/cards/{id}/tabs", delete(api::handle_close_tab))
        .route("/api/cards/{id}/logs", put(api::handle_update_logs))
        .route(
            "/api/cards/{id}/logs/download",
            get(api::handle_download_logs),
        )
        .route("/api/cards/{id}/inspect", put(api::handle_update_inspect))
        .route("/api/cards/{id}/events", get(sse::handle_card_events))
        // Health
        .route("/healthz", get(api::handle_healthz))
        // Console UI
        .route("/ui/", get(ui::handle_containers))
        // Static files
        .nest_service("/ui/static", ServeDir::new("static"))
        // Root redirect
        .route(
            "/",
            get(|| async {
                axum::response::Redirect::to("/ui/")
            }),
        )
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
