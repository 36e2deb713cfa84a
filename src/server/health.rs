use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use super::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_seconds: u64,
    pub running_jobs: usize,
    pub available_slots: usize,
    pub max_workers: usize,
    pub safe_token_limit: usize,
    pub version: String,
    pub storage_dir: String,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Health check");

    let worker = state.ctx.worker();
    let response = HealthResponse {
        status: if worker.is_shutting_down() {
            "shutting_down".to_string()
        } else {
            "ok".to_string()
        },
        uptime_seconds: state.start_time.elapsed().as_secs(),
        running_jobs: worker.running_count(),
        available_slots: worker.available_slots(),
        max_workers: worker.max_workers(),
        safe_token_limit: state.ctx.router().safe_limit(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        storage_dir: state.ctx.storage_root().display().to_string(),
    };

    (StatusCode::OK, Json(response))
}
