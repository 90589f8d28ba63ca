//! Liveness and engine availability

use axum::extract::State;
use axum::response::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::server::AppState;

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Service name
    pub service: &'static str,
    /// Crate version
    pub version: &'static str,
    /// Name of the configured transcoding engine
    pub engine: &'static str,
    /// Whether the engine can start sessions right now
    pub engine_available: bool,
    /// Seconds since the server started
    pub uptime_seconds: i64,
    /// Server start time
    pub started_at: DateTime<Utc>,
}

/// Reports service identity and whether transcoding is possible.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let engine_available = state.service.engine_available().await;

    Json(HealthResponse {
        service: "tidecast",
        version: env!("CARGO_PKG_VERSION"),
        engine: state.service.engine_name(),
        engine_available,
        uptime_seconds: (Utc::now() - state.started_at).num_seconds().max(0),
        started_at: state.started_at,
    })
}
