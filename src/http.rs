//! Health/status HTTP surface
//!
//! `GET /` always reports healthy so a platform health probe never kills
//! the process mid-startup; `/health` and `/status` expose the agent's
//! actual counters read off the shared status handle. Matches the route
//! shapes in `main.py`'s FastAPI app, rebuilt on `axum` the way
//! `api/routes.rs` wires its own routes.

use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use parking_lot::RwLock;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::agent::AgentStatus;

#[derive(Clone)]
struct HttpState {
    status: Arc<RwLock<AgentStatus>>,
}

pub fn router(status: Arc<RwLock<AgentStatus>>) -> Router {
    let state = HttpState { status };

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/status", get(status_endpoint))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root() -> Json<Value> {
    Json(json!({"status": "healthy", "service": "amen-agent"}))
}

async fn health(State(state): State<HttpState>) -> Json<Value> {
    let status = state.status.read().clone();
    Json(json!({
        "status": status.status,
        "agent": status,
    }))
}

async fn status_endpoint(State(state): State<HttpState>) -> Json<AgentStatus> {
    Json(state.status.read().clone())
}
