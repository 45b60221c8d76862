//! Event ingest gateway - main entry point.
//!
//! This binary runs the HTTP server that accepts events and the background
//! workers that forward them to the external sinks.

use ingest_gateway::config::Config;
use ingest_gateway::server::{AppState, build_router};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ingest_gateway=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    tracing::info!(
        ops_mode = config.ops_mode.as_str(),
        external_sync = config.external_sync,
        jsonl_always = config.spool.always,
        jsonl_fallback = config.spool.fallback,
        replay_enabled = config.replay.enabled,
        spool = %config.spool.path().display(),
        "Starting ingest gateway"
    );

    let listen_addr = config.listen_addr;
    let app_state = AppState::new(config);

    // Background workers run only when the mode machine arms them.
    let shutdown = CancellationToken::new();
    let workers = app_state.spawn_workers(&shutdown);
    tracing::info!(workers, "Background workers started");

    let app = build_router(app_state);

    tracing::info!("Listening on {}", listen_addr);

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .expect("Failed to bind to address");

    let server_shutdown = shutdown.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutdown signal received");
        // Workers finish their in-flight tick before exiting.
        server_shutdown.cancel();
    })
    .await
    .expect("Server failed to start");

    shutdown.cancel();
    tracing::info!("Ingest gateway stopped");
}
