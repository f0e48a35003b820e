use std::sync::Arc;

use axum::extract::{Extension, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::StreamExt;
use serde::Deserialize;

use memsvc_core::error::Result;
use memsvc_core::types::Identity;

use crate::app::AppState;

#[derive(Debug, Deserialize)]
pub struct EvictBody {
    #[serde(rename = "retentionPeriod")]
    pub retention_period: String,
    #[serde(rename = "resourceTypes")]
    pub resource_types: Vec<String>,
    pub justification: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EvictQuery {
    #[serde(default, rename = "async")]
    pub run_async: bool,
}

fn wants_sse(headers: &HeaderMap, query: &EvictQuery) -> bool {
    if query.run_async {
        return true;
    }
    headers
        .get(axum::http::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/event-stream"))
        .unwrap_or(false)
}

/// POST /v1/admin/evict. `resourceTypes`/`retentionPeriod` pick the sweep;
/// `justification` is required only when `eviction.require_justification`
/// is configured on (see `EvictionEngine::run`). Returns a progress SSE
/// stream when the caller asks for one (`Accept: text/event-stream` or
/// `?async=true`); otherwise runs the sweep to completion and answers 204.
pub async fn evict(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Identity>,
    Query(query): Query<EvictQuery>,
    headers: HeaderMap,
    Json(body): Json<EvictBody>,
) -> Result<Response> {
    let stream = state.eviction.run(
        &actor,
        &body.retention_period,
        &body.resource_types,
        body.justification.as_deref(),
    )?;

    if wants_sse(&headers, &query) {
        let sse_stream = stream.map(|progress| Event::default().json_data(progress).map_err(axum::Error::new));
        Ok(Sse::new(sse_stream).keep_alive(KeepAlive::default()).into_response())
    } else {
        tokio::pin!(stream);
        while stream.next().await.is_some() {}
        Ok(axum::http::StatusCode::NO_CONTENT.into_response())
    }
}
