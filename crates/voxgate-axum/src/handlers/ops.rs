//! Minimal ops surface: liveness and active-call stats.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;
use voxgate_voice::registry::ActiveCall;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthBody {
    status: &'static str,
}

/// `GET /health`
pub async fn health() -> Json<HealthBody> {
    Json(HealthBody { status: "ok" })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsBody {
    active_calls: usize,
    uptime_seconds: i64,
    calls: Vec<ActiveCall>,
}

/// `GET /stats`
pub async fn stats(State(state): State<AppState>) -> Json<StatsBody> {
    Json(StatsBody {
        active_calls: state.registry.active_count(),
        uptime_seconds: (chrono::Utc::now() - state.started_at).num_seconds(),
        calls: state.registry.active_calls(),
    })
}
