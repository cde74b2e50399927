//! Health check endpoints

use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use serde::Serialize;

use super::SharedStatus;
use crate::status::PluginState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Readiness response summarizing plugin states
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub plugins: PluginCounts,
}

#[derive(Debug, Default, Serialize)]
pub struct PluginCounts {
    pub total: usize,
    pub running: usize,
    pub stopped: usize,
    /// Unhealthy, unreachable or errored
    pub failing: usize,
}

/// Liveness probe - is the runtime up?
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Readiness probe - are all started plugins healthy?
async fn ready(State(status): State<SharedStatus>) -> (StatusCode, Json<ReadinessResponse>) {
    let mut counts = PluginCounts::default();
    for plugin in status.list_plugins(None).await {
        counts.total += 1;
        match plugin.state {
            PluginState::Running => counts.running += 1,
            PluginState::Stopped => counts.stopped += 1,
            PluginState::Unhealthy | PluginState::Unreachable | PluginState::Error => {
                counts.failing += 1;
            }
        }
    }

    let (http_status, label) = if counts.failing == 0 {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        http_status,
        Json(ReadinessResponse {
            status: label,
            plugins: counts,
        }),
    )
}

/// Liveness route
pub fn router() -> Router {
    Router::new().route("/health", get(health))
}

/// Readiness route
pub fn ready_router(status: SharedStatus) -> Router {
    Router::new()
        .route("/ready", get(ready))
        .with_state(status)
}
