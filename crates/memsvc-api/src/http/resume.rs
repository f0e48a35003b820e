use std::sync::Arc;

use axum::extract::{Extension, Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures_util::StreamExt;
use serde::Deserialize;

use memsvc_core::error::Result;
use memsvc_core::types::Identity;

use crate::app::AppState;

#[derive(Debug, Deserialize)]
pub struct ResumeQuery {
    #[serde(default, rename = "resumePosition")]
    pub resume_position: usize,
}

/// GET /v1/conversations/{id}/resume — reattaches to an in-flight (or
/// recently-completed) response stream from `resumePosition` tokens in.
/// Requires `Reader` on the conversation's group, same as `get_entries`.
pub async fn resume(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Identity>,
    Path(id): Path<String>,
    Query(query): Query<ResumeQuery>,
) -> Result<Sse<impl futures_util::Stream<Item = std::result::Result<Event, axum::Error>>>> {
    state.store.get_conversation(&actor, &id)?;
    let tokens = state.recorder.replay(&id, query.resume_position)?;
    let sse_stream = tokens.map(|token| Ok(Event::default().data(token)));
    Ok(Sse::new(sse_stream).keep_alive(KeepAlive::default()))
}

pub async fn resume_check(
    State(state): State<Arc<AppState>>,
    Extension(_actor): Extension<Identity>,
    Json(conversation_ids): Json<Vec<String>>,
) -> Result<Json<Vec<String>>> {
    Ok(Json(state.recorder.check(&conversation_ids)))
}

pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Identity>,
    Path(id): Path<String>,
) -> Result<axum::http::StatusCode> {
    state.store.get_conversation(&actor, &id)?;
    let cancelled = state.recorder.request_cancel(&id);
    if cancelled {
        Ok(axum::http::StatusCode::NO_CONTENT)
    } else {
        Ok(axum::http::StatusCode::NOT_FOUND)
    }
}
