use async_trait::async_trait;
use memsvc_tasks::{PendingIndexSource, VectorStore};

/// No embedding index is wired up in this deployment — the vector store
/// itself is an external collaborator (spec.md §1). Both task handlers that
/// depend on `VectorStore` still register and run on schedule; they just
/// have nothing to do against this implementation. Swap in a real client
/// without touching `memsvc-tasks` or `memsvc-eviction`.
pub struct NoopVectorStore;

#[async_trait]
impl VectorStore for NoopVectorStore {
    async fn delete_group(&self, conversation_group_id: &str) -> anyhow::Result<()> {
        tracing::debug!(conversation_group_id, "no vector store configured, skipping delete");
        Ok(())
    }

    async fn index_entry(&self, entry_id: &str) -> anyhow::Result<()> {
        tracing::debug!(entry_id, "no vector store configured, skipping index");
        Ok(())
    }
}

/// Pairs with `NoopVectorStore`: no entries are ever pending indexing
/// because nothing marks them as such without a real vector store attached.
pub struct NoPendingIndexSource;

impl PendingIndexSource for NoPendingIndexSource {
    fn pending_entry_ids(&self, _limit: usize) -> anyhow::Result<Vec<String>> {
        Ok(Vec::new())
    }
}
