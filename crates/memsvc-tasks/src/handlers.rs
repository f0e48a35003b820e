use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::engine::TaskHandler;
use crate::queue::TaskQueue;
use crate::types::NewTask;

pub const VECTOR_STORE_DELETE: &str = "vector_store_delete";
pub const VECTOR_STORE_INDEX_RETRY: &str = "vector_store_index_retry";
const INDEX_RETRY_SINGLETON_NAME: &str = "vector_store_index_retry";

/// External collaborator: whatever system actually holds embeddings for a
/// conversation group. Treated as an out-of-scope dependency — the only
/// thing this crate needs from it is "delete everything for this group."
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn delete_group(&self, conversation_group_id: &str) -> anyhow::Result<()>;
    async fn index_entry(&self, entry_id: &str) -> anyhow::Result<()>;
}

#[derive(Deserialize)]
struct VectorStoreDeleteBody {
    conversation_group_id: String,
}

pub struct VectorStoreDeleteHandler {
    store: Arc<dyn VectorStore>,
}

impl VectorStoreDeleteHandler {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TaskHandler for VectorStoreDeleteHandler {
    fn task_type(&self) -> &'static str {
        VECTOR_STORE_DELETE
    }

    async fn handle(&self, task_body: Value) -> anyhow::Result<()> {
        let body: VectorStoreDeleteBody = serde_json::from_value(task_body)?;
        self.store.delete_group(&body.conversation_group_id).await
    }
}

pub fn enqueue_vector_store_delete(queue: &TaskQueue, conversation_group_id: &str) -> crate::error::Result<()> {
    queue.enqueue(NewTask::new(
        VECTOR_STORE_DELETE,
        json!({ "conversation_group_id": conversation_group_id }),
    ))?;
    Ok(())
}

/// The re-arm seed the wiring layer hands to `TaskEngine::new`'s recurring
/// list, so the next batch is always picked up on the engine's own schedule.
/// Handlers must not re-enqueue their own singleton from inside `handle` —
/// the row being processed hasn't been deleted yet at that point, so the
/// `INSERT OR IGNORE` would silently no-op and the cycle would die the first
/// time a run didn't exhaust its batch.
pub fn vector_store_index_retry_seed() -> NewTask {
    NewTask::singleton(VECTOR_STORE_INDEX_RETRY, json!({}), INDEX_RETRY_SINGLETON_NAME)
}

/// Looks up entries carrying an indexing marker but no recorded indexed
/// timestamp, and hands each to the vector store.
pub trait PendingIndexSource: Send + Sync {
    /// Up to `limit` entry ids awaiting indexing.
    fn pending_entry_ids(&self, limit: usize) -> anyhow::Result<Vec<String>>;
}

pub struct VectorStoreIndexRetryHandler {
    store: Arc<dyn VectorStore>,
    source: Arc<dyn PendingIndexSource>,
    batch_limit: usize,
}

impl VectorStoreIndexRetryHandler {
    pub fn new(store: Arc<dyn VectorStore>, source: Arc<dyn PendingIndexSource>, batch_limit: usize) -> Self {
        Self { store, source, batch_limit }
    }
}

#[async_trait]
impl TaskHandler for VectorStoreIndexRetryHandler {
    fn task_type(&self) -> &'static str {
        VECTOR_STORE_INDEX_RETRY
    }

    async fn handle(&self, _task_body: Value) -> anyhow::Result<()> {
        let pending = self.source.pending_entry_ids(self.batch_limit)?;

        for entry_id in &pending {
            // One entry at a time: a single bad embedding shouldn't fail the
            // whole batch, just leave that entry pending for the next tick.
            if let Err(e) = self.store.index_entry(entry_id).await {
                tracing::warn!(entry_id, error = %e, "retry-index failed for entry, will retry again later");
            }
        }
        Ok(())
    }
}
