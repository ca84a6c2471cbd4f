use crate::AppState;
use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub lookup_table: String,
    pub blob_store: String,
    pub workers: String,
    pub pending_jobs: usize,
    pub version: String,
}

fn reachability(ok: bool) -> String {
    if ok { "connected" } else { "disconnected" }.to_string()
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Gateway health status", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let table_ok = state.lookup_table.ping().await.is_ok();
    // A missing probe key is still a successful round trip
    let blobs_ok = state.blob_store.exists("health-check").await.is_ok();
    let workers_ok = !state.executor.is_closed();

    let status = if table_ok && blobs_ok && workers_ok {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        lookup_table: reachability(table_ok),
        blob_store: reachability(blobs_ok),
        workers: if workers_ok { "running" } else { "stopped" }.to_string(),
        pending_jobs: state.executor.pending_jobs(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
