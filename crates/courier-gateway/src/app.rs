use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use courier_channels::Registry;

/// Shared state passed as `Arc<AppState>` to the HTTP handlers.
pub struct AppState {
    pub registry: Arc<Registry>,
}

impl AppState {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }
}

/// Status endpoints plus each webhook adapter's callback routes under
/// `/webhooks/{adapter_id}`.
pub fn build_router(state: Arc<AppState>, webhooks: Vec<(String, Router)>) -> Router {
    let mut router = Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/status", get(crate::http::status::status_handler))
        .with_state(state);

    for (id, routes) in webhooks {
        router = router.nest(&format!("/webhooks/{id}"), routes);
    }

    router.layer(TraceLayer::new_for_http())
}
