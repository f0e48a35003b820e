use std::sync::Arc;

use axum::extract::{Extension, Path, State};
use axum::Json;
use serde::Deserialize;

use memsvc_core::error::{MemsvcError, Result};
use memsvc_core::types::Identity;
use memsvc_store::Membership;

use crate::app::AppState;

/// Every route here is `/v1/conversations/{id}/memberships...`, so `id` is a
/// conversation id; memberships live on the conversation's group
/// (spec.md §3: "owned by the group, not the conversation"), so each
/// handler resolves it before delegating to the store.
fn group_id_for(state: &AppState, actor: &Identity, conversation_id: &str) -> Result<String> {
    Ok(state.store.get_conversation(actor, conversation_id)?.conversation_group_id)
}

pub async fn list_memberships(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Identity>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Membership>>> {
    let group_id = group_id_for(&state, &actor, &id)?;
    Ok(Json(state.store.list_memberships(&actor, &group_id)?))
}

#[derive(Debug, Deserialize)]
pub struct ShareConversationBody {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "accessLevel")]
    pub access_level: String,
}

pub async fn share_conversation(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Identity>,
    Path(id): Path<String>,
    Json(body): Json<ShareConversationBody>,
) -> Result<axum::http::StatusCode> {
    let level = body.access_level.parse().map_err(MemsvcError::BadRequest)?;
    let group_id = group_id_for(&state, &actor, &id)?;
    state.store.share_conversation(&actor, &group_id, &body.user_id, level)?;
    Ok(axum::http::StatusCode::CREATED)
}

#[derive(Debug, Deserialize)]
pub struct UpdateMembershipBody {
    #[serde(rename = "accessLevel")]
    pub access_level: String,
}

pub async fn update_membership(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Identity>,
    Path((id, user_id)): Path<(String, String)>,
    Json(body): Json<UpdateMembershipBody>,
) -> Result<axum::http::StatusCode> {
    let level = body.access_level.parse().map_err(MemsvcError::BadRequest)?;
    let group_id = group_id_for(&state, &actor, &id)?;
    state.store.update_membership(&actor, &group_id, &user_id, level)?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub async fn delete_membership(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Identity>,
    Path((id, user_id)): Path<(String, String)>,
) -> Result<axum::http::StatusCode> {
    let group_id = group_id_for(&state, &actor, &id)?;
    state.store.delete_membership(&actor, &group_id, &user_id)?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}
