use tracing_subscriber::EnvFilter;

use quizdeck_server::config::ServerConfig;
use quizdeck_server::{build_app, spawn_idle_session_cleanup, spawn_registry_maintenance};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = ServerConfig::load();
    config.validate();
    let listen_addr = config.listen_addr.clone();

    let (app, state, on_end_rx) = build_app(config);
    spawn_registry_maintenance(state.clone(), on_end_rx);
    spawn_idle_session_cleanup(state.clone());

    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to {listen_addr}: {e}"));

    tracing::info!("Quizdeck server listening on {listen_addr}");

    let shutdown = state.shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
            shutdown.cancel();
            // Session actors cancel their timers, minigame loops and
            // persistence flushes within the shutdown budget.
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        })
        .await
        .expect("Server error");
}
