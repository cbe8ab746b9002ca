use std::sync::atomic::Ordering;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;
use uuid::Uuid;

use crate::state::AppState;

/// Structured health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub protocol: u8,
    pub connections: usize,
    pub rooms: RoomInfo,
}

#[derive(Serialize)]
pub struct RoomInfo {
    pub active: usize,
    pub members: usize,
}

/// `GET /healthz`: 200 with stats when the store and hub respond, 503
/// otherwise.
pub async fn healthz(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, StatusCode> {
    // Probe the store with a read that is cheap and allowed to miss.
    if let Err(e) = state.store.get_quiz(Uuid::nil()).await
        && !matches!(e, crate::store::StoreError::NotFound)
    {
        tracing::error!(error = %e, "Health check store probe failed");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    let (active, members) = state.hub.read().await.stats();
    Ok(Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        protocol: quizdeck_core::net::protocol::PROTOCOL_VERSION,
        connections: state.ws_connection_count.load(Ordering::Relaxed),
        rooms: RoomInfo { active, members },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_response_serializes() {
        let resp = HealthResponse {
            status: "healthy",
            version: "0.1.0",
            protocol: 1,
            connections: 4,
            rooms: RoomInfo {
                active: 2,
                members: 7,
            },
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"healthy\""));
        assert!(json.contains("\"connections\":4"));
        assert!(json.contains("\"active\":2"));
    }
}
