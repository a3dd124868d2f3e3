use axum::{extract::State, routing::get, Json, Router};
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// GET /health: liveness plus who is currently online.
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "online": state.registry.count(),
        "names": state.registry.names(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Build the axum Router: the relay endpoint and a health probe.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler::ws_upgrade))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
