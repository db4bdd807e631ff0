mod cards;
mod clients;
mod config;
mod error;
mod helpers;
mod logs;
mod models;
mod routes;
#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;

use cards::{CardRegistry, CardSettings};
use clients::DockerOpsClient;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<CardRegistry>,
    pub client: Arc<DockerOpsClient>,
    pub config: Arc<config::Config>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dockerops_console=info".parse().unwrap()),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .filter(|a| !a.starts_with('-'))
        .or_else(|| {
            std::env::args().skip(1).zip(std::env::args().skip(2)).find_map(|(k, v)| {
                if k == "-config" || k == "--config" {
                    Some(v)
                } else {
                    None
                }
            })
        })
        .unwrap_or_else(|| "/etc/dockerops-console/config.yaml".to_string());

    let cfg = config::Config::load(&PathBuf::from(&config_path)).unwrap_or_else(|e| {
        eprintln!("error loading config: {}", e);
        std::process::exit(1);
    });

    let client = DockerOpsClient::new(cfg.backend_url.clone(), cfg.request_timeout())
        .unwrap_or_else(|e| {
            eprintln!("error creating backend client: {}", e);
            std::process::exit(1);
        });
    let client = Arc::new(client);

    let registry = Arc::new(CardRegistry::new(
        client.clone(),
        CardSettings {
            stats_period: cfg.stats_interval(),
            default_selector: cfg.default_log_range.clone(),
            unwatched_grace: cfg.card_grace(),
        },
    ));
    let cfg = Arc::new(cfg);

    let state = AppState {
        registry: registry.clone(),
        client,
        config: cfg.clone(),
    };

    let router = routes::build_router(state);

    let listen_addr = cfg.listen_addr();
    let listener = TcpListener::bind(&listen_addr).await.unwrap_or_else(|e| {
        eprintln!("failed to bind {}: {}", listen_addr, e);
        std::process::exit(1);
    });

    info!(
        "dockerops-console listening on {} (backend {}, {} hosts)",
        listen_addr,
        cfg.backend_url,
        cfg.hosts.len()
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap_or_else(|e| {
            eprintln!("server error: {}", e);
            std::process::exit(1);
        });

    registry.close_all().await;
    info!("dockerops-console stopped");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
