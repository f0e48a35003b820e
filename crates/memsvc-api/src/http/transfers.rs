use std::sync::Arc;

use axum::extract::{Extension, Path, State};
use axum::Json;
use serde::Deserialize;

use memsvc_core::error::Result;
use memsvc_core::types::Identity;
use memsvc_store::OwnershipTransfer;

use crate::app::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateTransferBody {
    #[serde(rename = "conversationId")]
    pub conversation_id: String,
    #[serde(rename = "newOwnerUserId")]
    pub new_owner_user_id: String,
}

/// spec.md §6 names the body by `conversationId`, but ownership transfers
/// are a group-scoped entity (§4.D `createTransfer(group, to_user)`), so the
/// conversation is resolved to its group before delegating to the store.
pub async fn create_transfer(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Identity>,
    Json(body): Json<CreateTransferBody>,
) -> Result<(axum::http::StatusCode, Json<OwnershipTransfer>)> {
    let conversation = state.store.get_conversation(&actor, &body.conversation_id)?;
    let transfer = state.store.create_transfer(
        &actor,
        &conversation.conversation_group_id,
        &body.new_owner_user_id,
    )?;
    Ok((axum::http::StatusCode::CREATED, Json(transfer)))
}

pub async fn accept_transfer(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Identity>,
    Path(id): Path<String>,
) -> Result<axum::http::StatusCode> {
    state.store.accept_transfer(&actor, &id)?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub async fn decline_or_cancel_transfer(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Identity>,
    Path(id): Path<String>,
) -> Result<axum::http::StatusCode> {
    state.store.decline_or_cancel_transfer(&actor, &id)?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}
