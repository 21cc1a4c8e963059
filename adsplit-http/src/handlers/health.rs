use adsplit::{ExperimentFilter, ExperimentStatus};
use axum::{extract::State, Json};
use std::sync::Arc;

use super::AppState;

/// Health check endpoint
pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let running = state
        .controller
        .list(&ExperimentFilter {
            status: Some(ExperimentStatus::Running),
        })
        .len();
    let config = state.controller.config();

    Json(serde_json::json!({
        "status": "ok",
        "running_experiments": running,
        "min_sample_per_arm": config.min_sample_per_arm,
        "build_profile": if cfg!(debug_assertions) { "debug" } else { "release" },
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
