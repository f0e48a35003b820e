use memsvc_core::types::{AccessLevel, Channel};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single typed content block. `{type:"text", text, role?}` is the only
/// shape the core inspects (for title derivation); every other `type` is an
/// opaque pass-through payload.
pub type ContentBlock = Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationGroup {
    pub id: String,
    pub organization_id: Option<String>,
    pub team_id: Option<String>,
    pub created_at: String,
    pub deleted_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub conversation_group_id: String,
    pub owner_user_id: String,
    pub title: Option<String>,
    pub metadata: Option<Value>,
    pub created_at: String,
    pub updated_at: String,
    pub forked_at_conversation_id: Option<String>,
    pub forked_at_entry_id: Option<String>,
    pub vectorized_at: Option<String>,
    pub deleted_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub id: String,
    pub conversation_id: String,
    pub conversation_group_id: String,
    pub user_id: Option<String>,
    pub client_id: Option<String>,
    pub channel: Channel,
    pub memory_epoch: Option<i64>,
    pub content: Vec<ContentBlock>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEntryRequest {
    pub channel: Channel,
    pub content: Vec<ContentBlock>,
    pub memory_epoch: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    pub conversation_group_id: String,
    pub user_id: String,
    pub access_level: AccessLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransferStatus {
    /// The only status a persisted row ever carries: accept/decline both
    /// delete the row rather than transition it to a terminal status.
    Pending,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnershipTransfer {
    pub id: String,
    pub conversation_group_id: String,
    pub from_user_id: String,
    pub to_user_id: String,
    pub status: TransferStatus,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForkSummary {
    pub conversation_id: String,
    pub title: Option<String>,
    pub forked_at_conversation_id: Option<String>,
    pub forked_at_entry_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// One page of a cursor-paginated list, using a stable compound cursor over
/// `(updated_at, id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentRecord {
    pub id: String,
    pub conversation_id: String,
    pub storage_key: String,
    pub sha256: String,
    pub size: i64,
    pub content_type: String,
    pub created_at: String,
    pub expires_at: Option<String>,
}
