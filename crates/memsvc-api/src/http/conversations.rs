use std::sync::Arc;

use axum::extract::{Extension, Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use memsvc_core::error::{MemsvcError, Result};
use memsvc_core::types::{Channel, EpochFilter, Identity, ListMode};
use memsvc_store::{Conversation, ContentBlock, CreateEntryRequest, Entry, ForkSummary};

use crate::app::AppState;

const DEFAULT_LIST_LIMIT: usize = 50;
const DEFAULT_ENTRIES_LIMIT: usize = 100;
const DEFAULT_SEARCH_LIMIT: usize = 20;

#[derive(Debug, Deserialize)]
pub struct CreateConversationBody {
    pub title: Option<String>,
    pub metadata: Option<Value>,
}

pub async fn create_conversation(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Identity>,
    Json(body): Json<CreateConversationBody>,
) -> Result<Json<Conversation>> {
    let conversation = state
        .store
        .create_conversation(&actor, body.title.as_deref(), body.metadata)?;
    Ok(Json(conversation))
}

#[derive(Debug, Deserialize)]
pub struct ListConversationsQuery {
    pub q: Option<String>,
    pub after: Option<String>,
    pub limit: Option<usize>,
    pub mode: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PageDto<T> {
    pub data: Vec<T>,
    #[serde(rename = "nextCursor", skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Identity>,
    Query(query): Query<ListConversationsQuery>,
) -> Result<Json<PageDto<Conversation>>> {
    let mode = match &query.mode {
        Some(m) => m.parse::<ListMode>().map_err(MemsvcError::BadRequest)?,
        None => ListMode::All,
    };
    let page = state.store.list_conversations(
        &actor,
        query.q.as_deref(),
        mode,
        query.after.as_deref(),
        query.limit.unwrap_or(DEFAULT_LIST_LIMIT),
    )?;
    Ok(Json(PageDto {
        data: page.data,
        next_cursor: page.next_cursor,
    }))
}

pub async fn get_conversation(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Identity>,
    Path(id): Path<String>,
) -> Result<Json<Conversation>> {
    Ok(Json(state.store.get_conversation(&actor, &id)?))
}

#[derive(Debug, Deserialize)]
pub struct DeleteConversationQuery {
    pub justification: Option<String>,
}

pub async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Identity>,
    Path(id): Path<String>,
    Query(query): Query<DeleteConversationQuery>,
) -> Result<axum::http::StatusCode> {
    state.store.delete_conversation(&actor, &id, query.justification.as_deref())?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct GetEntriesQuery {
    pub channel: Option<String>,
    pub epoch: Option<String>,
    pub after: Option<String>,
    pub limit: Option<usize>,
    #[serde(rename = "clientId")]
    pub client_id: Option<String>,
}

pub async fn get_entries(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Identity>,
    Path(id): Path<String>,
    Query(query): Query<GetEntriesQuery>,
) -> Result<Json<PageDto<Entry>>> {
    let channel = query
        .channel
        .as_deref()
        .map(|c| c.parse::<Channel>().map_err(MemsvcError::BadRequest))
        .transpose()?;
    let epoch_filter = query
        .epoch
        .as_deref()
        .map(parse_epoch_filter)
        .transpose()?;
    let client_id = query.client_id.as_deref().or(actor.client_id.as_deref());

    let page = state.store.get_entries(
        &actor,
        &id,
        channel,
        query.after.as_deref(),
        query.limit.unwrap_or(DEFAULT_ENTRIES_LIMIT),
        epoch_filter,
        client_id,
    )?;
    Ok(Json(PageDto {
        data: page.data,
        next_cursor: page.next_cursor,
    }))
}

fn parse_epoch_filter(raw: &str) -> Result<EpochFilter> {
    match raw {
        "ALL" => Ok(EpochFilter::All),
        "LATEST" => Ok(EpochFilter::Latest),
        other => other
            .parse::<i64>()
            .map(EpochFilter::Epoch)
            .map_err(|_| MemsvcError::BadRequest(format!("invalid epoch filter: {other}"))),
    }
}

#[derive(Debug, Deserialize)]
pub struct AppendEntryBody {
    pub channel: Option<String>,
    pub content: Vec<ContentBlock>,
    #[serde(rename = "memoryEpoch")]
    pub memory_epoch: Option<i64>,
}

/// Channel defaults to `HISTORY` for human callers (no `client_id`) and
/// `MEMORY` for agent callers, per spec.md §6.
pub async fn append_entry(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Identity>,
    Path(id): Path<String>,
    Json(body): Json<AppendEntryBody>,
) -> Result<Json<Entry>> {
    match &actor.client_id {
        None => {
            if let Some(channel) = &body.channel {
                if channel != "HISTORY" {
                    return Err(MemsvcError::BadRequest(
                        "human callers may only append to the HISTORY channel".to_string(),
                    ));
                }
            }
            Ok(Json(state.store.append_user_entry(&actor, &id, body.content)?))
        }
        Some(client_id) => {
            let channel = match &body.channel {
                Some(c) => c.parse::<Channel>().map_err(MemsvcError::BadRequest)?,
                None => Channel::Memory,
            };
            let request = CreateEntryRequest {
                channel,
                content: body.content,
                memory_epoch: body.memory_epoch,
            };
            let mut entries = state.store.append_agent_entries(&actor, &id, vec![request], client_id)?;
            entries
                .pop()
                .ok_or_else(|| MemsvcError::Internal("append_agent_entries returned no entries".to_string()))
                .map(Json)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BulkEntryItem {
    pub channel: String,
    pub content: Vec<ContentBlock>,
    #[serde(rename = "memoryEpoch")]
    pub memory_epoch: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AppendEntriesBulkBody {
    pub entries: Vec<BulkEntryItem>,
}

pub async fn append_entries_bulk(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Identity>,
    Path(id): Path<String>,
    Json(body): Json<AppendEntriesBulkBody>,
) -> Result<Json<Vec<Entry>>> {
    let client_id = actor
        .client_id
        .clone()
        .ok_or_else(|| MemsvcError::BadRequest("bulk append requires an agent-authenticated caller".to_string()))?;

    let requests = body
        .entries
        .into_iter()
        .map(|item| {
            Ok(CreateEntryRequest {
                channel: item.channel.parse::<Channel>().map_err(MemsvcError::BadRequest)?,
                content: item.content,
                memory_epoch: item.memory_epoch,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Json(state.store.append_agent_entries(&actor, &id, requests, &client_id)?))
}

#[derive(Debug, Deserialize)]
pub struct SyncMessageDto {
    pub content: Vec<ContentBlock>,
    #[serde(default, rename = "contentType")]
    pub _content_type: Option<String>,
    #[serde(default)]
    pub _channel: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SyncBody {
    pub messages: Vec<SyncMessageDto>,
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub epoch: i64,
    #[serde(rename = "epochIncremented")]
    pub epoch_incremented: bool,
    #[serde(rename = "noOp")]
    pub no_op: bool,
    pub messages: Vec<Entry>,
}

pub async fn sync_memory(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Identity>,
    Path(id): Path<String>,
    Json(body): Json<SyncBody>,
) -> Result<Json<SyncResponse>> {
    let client_id = actor
        .client_id
        .clone()
        .ok_or_else(|| MemsvcError::BadRequest("memory sync requires an agent-authenticated caller".to_string()))?;

    let incoming = body
        .messages
        .into_iter()
        .map(|m| memsvc_sync::SyncMessage { content: m.content })
        .collect();

    let outcome = state.sync.sync(&actor, &id, &client_id, incoming)?;
    Ok(Json(SyncResponse {
        epoch: outcome.epoch,
        epoch_incremented: outcome.epoch_incremented,
        no_op: outcome.no_op,
        messages: outcome.entries,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ForkBody {
    pub title: Option<String>,
}

pub async fn fork_conversation(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Identity>,
    Path((id, entry_id)): Path<(String, String)>,
    Json(body): Json<ForkBody>,
) -> Result<Json<Conversation>> {
    Ok(Json(
        state
            .store
            .fork_conversation_at_entry(&actor, &id, &entry_id, body.title.as_deref())?,
    ))
}

pub async fn list_forks(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Identity>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ForkSummary>>> {
    Ok(Json(state.store.list_forks(&actor, &id)?))
}

#[derive(Debug, Deserialize)]
pub struct AddSummaryBody {
    pub summary: String,
    pub title: Option<String>,
    #[serde(rename = "untilEntryId")]
    pub until_entry_id: Option<String>,
    /// Accepted for forward compatibility with callers that supply an
    /// explicit summarization timestamp; `addSummary` always stamps
    /// `created_at` at write time (see `memsvc-store::service`), so this is
    /// not threaded through yet.
    #[serde(rename = "summarizedAt")]
    pub _summarized_at: Option<String>,
}

pub async fn add_summary(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Identity>,
    Path(id): Path<String>,
    Json(body): Json<AddSummaryBody>,
) -> Result<Json<Entry>> {
    Ok(Json(state.store.add_summary(
        &actor,
        &id,
        &body.summary,
        body.title.as_deref(),
        body.until_entry_id.as_deref(),
    )?))
}

#[derive(Debug, Deserialize)]
pub struct SearchBody {
    pub query: String,
    pub limit: Option<usize>,
}

pub async fn search_conversations(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Identity>,
    Json(body): Json<SearchBody>,
) -> Result<Json<Vec<Conversation>>> {
    Ok(Json(
        state
            .store
            .search_conversations(&actor, &body.query, body.limit.unwrap_or(DEFAULT_SEARCH_LIMIT))?,
    ))
}
