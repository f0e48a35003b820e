use axum::extract::State;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health — liveness probe plus task-queue diagnostics.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> axum::Json<Value> {
    let pending_tasks = state.tasks.count_pending().unwrap_or(-1);

    axum::Json(json!({
        "status": "ok",
        "pending_tasks": pending_tasks,
        "cache_type": format!("{:?}", state.config.cache.r#type),
    }))
}
