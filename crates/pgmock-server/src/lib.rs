pub mod config;
pub mod handler;
pub mod loader;
pub mod registry;
pub mod server;
pub mod session;

use config::Config;
use loader::LoaderState;
use metrics_exporter_prometheus::PrometheusBuilder;
use pgmock_store::ResponseStore;
use server::Server;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Starts the injection API and the protocol server, then serves until the
/// accept loop fails or the process receives ctrl-c.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let metrics = if config.loader.metrics_enabled {
        Some(PrometheusBuilder::new().install_recorder()?)
    } else {
        None
    };
    let store = Arc::new(match &config.storage.data_dir {
        Some(dir) => ResponseStore::open(dir)?,
        None => ResponseStore::in_memory(),
    });

    let loader_listener = TcpListener::bind(&config.loader.listen_addr).await?;
    info!("loader listening on {}", config.loader.listen_addr);
    let app = loader::router(LoaderState {
        store: store.clone(),
        metrics,
    });
    tokio::spawn(async move {
        if let Err(err) = axum::serve(loader_listener, app).await {
            error!("loader stopped: {err}");
        }
    });

    let server = Server::bind(
        &config.server.listen_addr,
        store,
        config.server.max_message_length,
    )
    .await?;
    tokio::select! {
        result = server.serve() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            Ok(())
        }
    }
}
