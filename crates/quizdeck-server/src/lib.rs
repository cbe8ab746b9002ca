pub mod api;
pub mod config;
pub mod error;
pub mod health;
pub mod hub;
pub mod registry;
pub mod session;
pub mod state;
pub mod store;
pub mod ws;

use std::time::Duration;

use axum::Router;
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;

use config::ServerConfig;
use state::AppState;

/// Build the Axum router and application state from a config. The returned
/// receiver feeds [`spawn_registry_maintenance`].
pub fn build_app(
    config: ServerConfig,
) -> (Router<()>, AppState, mpsc::UnboundedReceiver<String>) {
    let (state, on_end_rx) = AppState::new(config);
    let app = build_router(state.clone());
    (app, state, on_end_rx)
}

fn build_router(state: AppState) -> Router<()> {
    let rest_routes = Router::new()
        .route("/sessions", axum::routing::post(api::create_session))
        .route(
            "/sessions/code/{code}",
            axum::routing::get(api::session_by_code),
        )
        .route("/quizzes/{quiz_id}", axum::routing::put(api::put_quiz))
        .route(
            "/quizzes/{quiz_id}/sessions/archive",
            axum::routing::post(api::archive_quiz_sessions),
        )
        .layer(ServiceBuilder::new().layer(TimeoutLayer::with_status_code(
            axum::http::StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(30),
        )));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", axum::routing::get(ws::ws_handler))
        .route("/healthz", axum::routing::get(health::healthz))
        .merge(rest_routes)
        .layer(cors)
        .with_state(state)
}

/// Background task that tears down ended sessions as their actors report in:
/// cancel the actor, drop the hub room, quarantine the join code.
pub fn spawn_registry_maintenance(state: AppState, mut on_end_rx: mpsc::UnboundedReceiver<String>) {
    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Registry maintenance shutting down");
                    state.registry.write().await.shutdown_all();
                    break;
                }
                code = on_end_rx.recv() => {
                    let Some(code) = code else { break };
                    state.registry.write().await.mark_ended(&code).await;
                }
            }
        }
    });
}

/// Background task that expires idle sessions and releases quarantined join
/// codes on an interval.
pub fn spawn_idle_session_cleanup(state: AppState) {
    let check_interval = state.config.sessions.idle_check_interval_secs;
    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(check_interval));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Idle session cleanup shutting down");
                    break;
                }
                _ = interval.tick() => {
                    let expired = state.registry.write().await.cleanup();
                    if expired > 0 {
                        tracing::info!(expired, "Expired idle sessions");
                    }
                }
            }
        }
    });
}
