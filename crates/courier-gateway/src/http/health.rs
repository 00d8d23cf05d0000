use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health: liveness probe.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let adapters = state.registry.all();
    let running = adapters.iter().filter(|a| a.is_running()).count();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "adapters": adapters.len(),
        "running": running,
    }))
}
