use std::sync::Arc;

use async_trait::async_trait;
use memsvc_tasks::{NewTask, TaskHandler};
use serde_json::{json, Value};

use crate::engine::AttachmentService;

pub const TASK_TYPE_ATTACHMENT_CLEANUP: &str = "attachment_cleanup";
pub const ATTACHMENT_CLEANUP_SINGLETON_NAME: &str = "attachment_cleanup";

/// The re-arm seed the wiring layer hands to `TaskEngine`'s recurring list —
/// see `memsvc_tasks::TaskEngine::new`. The engine re-enqueues this singleton
/// at the start of every tick, so the sweep keeps cycling without the handler
/// racing its own still-processing row to re-enqueue itself.
pub fn attachment_cleanup_seed() -> NewTask {
    NewTask::singleton(TASK_TYPE_ATTACHMENT_CLEANUP, json!({}), ATTACHMENT_CLEANUP_SINGLETON_NAME)
}

/// Runs `AttachmentService::cleanup_expired` off the task queue's own
/// schedule rather than a dedicated timer, the same way the conversation
/// sweep rides `memsvc-eviction`'s engine loop instead of inventing a second
/// one. `task_body` carries no fields; the handler just sweeps on every run —
/// the engine re-arms the next run, not the handler.
pub struct AttachmentCleanupHandler {
    service: Arc<AttachmentService>,
}

impl AttachmentCleanupHandler {
    pub fn new(service: Arc<AttachmentService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl TaskHandler for AttachmentCleanupHandler {
    fn task_type(&self) -> &'static str {
        TASK_TYPE_ATTACHMENT_CLEANUP
    }

    async fn handle(&self, _task_body: Value) -> anyhow::Result<()> {
        let cleaned = self.service.cleanup_expired().await?;
        if cleaned > 0 {
            tracing::info!(cleaned, "swept expired attachments");
        }
        Ok(())
    }
}
