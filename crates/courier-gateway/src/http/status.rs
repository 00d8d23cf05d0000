use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /status: runtime state of every adapter, sorted by id.
pub async fn status_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let mut adapters = state.registry.all();
    adapters.sort_by(|a, b| a.id().cmp(b.id()));

    let entries: Vec<Value> = adapters
        .iter()
        .map(|a| {
            json!({
                "id": a.id(),
                "name": a.name(),
                "channel_type": a.channel_type(),
                "transport": a.capabilities().transport(),
                "state": a.state(),
            })
        })
        .collect();

    Json(json!({ "adapters": entries }))
}
