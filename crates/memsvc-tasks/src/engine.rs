use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::queue::TaskQueue;
use crate::types::{NewTask, Task};

const MAX_BACKOFF_SECS: u64 = 3600;

/// Per-`task_type` worker. Handlers are free to fail; the engine captures
/// the error as `last_error` and reschedules rather than propagating it.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn task_type(&self) -> &'static str;
    async fn handle(&self, task_body: Value) -> anyhow::Result<()>;
}

pub struct TaskEngineConfig {
    pub batch_size: usize,
    pub retry_delay_secs: u64,
    pub processor_interval_secs: u64,
    pub stale_claim_timeout_secs: u64,
}

impl Default for TaskEngineConfig {
    fn default() -> Self {
        Self {
            batch_size: memsvc_core::config::DEFAULT_TASK_BATCH_SIZE,
            retry_delay_secs: memsvc_core::config::DEFAULT_RETRY_DELAY_SECS,
            processor_interval_secs: memsvc_core::config::DEFAULT_PROCESSOR_INTERVAL_SECS,
            stale_claim_timeout_secs: memsvc_core::config::DEFAULT_STALE_CLAIM_TIMEOUT_SECS,
        }
    }
}

/// Drives the claim-dispatch-reschedule loop. Construct once, register every
/// handler, then hand ownership to `run` on a spawned task.
pub struct TaskEngine {
    queue: Arc<TaskQueue>,
    handlers: HashMap<&'static str, Arc<dyn TaskHandler>>,
    config: TaskEngineConfig,
    /// Singleton tasks re-armed at the top of every tick, so a recurring
    /// sweep (index retry, attachment cleanup) keeps cycling without its
    /// handler re-enqueueing its own still-processing row.
    recurring: Vec<NewTask>,
}

impl TaskEngine {
    pub fn new(
        queue: Arc<TaskQueue>,
        handlers: Vec<Arc<dyn TaskHandler>>,
        config: TaskEngineConfig,
        recurring: Vec<NewTask>,
    ) -> Self {
        let handlers = handlers.into_iter().map(|h| (h.task_type(), h)).collect();
        Self { queue, handlers, config, recurring }
    }

    /// Main loop. Ticks every `processor_interval_secs` until `shutdown`
    /// broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("task engine started");
        let mut interval = tokio::time::interval(Duration::from_secs(self.config.processor_interval_secs));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!("task engine tick error: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("task engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn tick(&self) -> crate::error::Result<()> {
        for seed in &self.recurring {
            let queue = self.queue.clone();
            let seed = seed.clone();
            match tokio::task::spawn_blocking(move || queue.enqueue(seed)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => error!("failed to re-arm recurring task: {e}"),
                Err(e) => error!("re-arm task panicked: {e}"),
            }
        }

        let now = Utc::now();
        let now_str = now.to_rfc3339();
        let stale_cutoff = (now - ChronoDuration::seconds(self.config.stale_claim_timeout_secs as i64)).to_rfc3339();

        let queue = self.queue.clone();
        let batch_size = self.config.batch_size;
        let claimed = tokio::task::spawn_blocking(move || queue.claim(&now_str, &stale_cutoff, batch_size))
            .await
            .map_err(|e| crate::error::TaskError::Internal(e.to_string()))??;

        for task in claimed {
            self.dispatch(task).await;
        }
        Ok(())
    }

    async fn dispatch(&self, task: Task) {
        let Some(handler) = self.handlers.get(task.task_type.as_str()) else {
            warn!(task_id = %task.id, task_type = %task.task_type, "no handler registered for task type");
            let retry_at = self.next_retry_at(task.retry_count);
            let queue = self.queue.clone();
            let id = task.id.clone();
            let _ = tokio::task::spawn_blocking(move || {
                queue.mark_failure(&id, "no handler registered for this task_type", &retry_at)
            })
            .await;
            return;
        };

        let result = handler.handle(task.task_body.clone()).await;
        let queue = self.queue.clone();
        match result {
            Ok(()) => {
                let id = task.id.clone();
                if let Err(e) = tokio::task::spawn_blocking(move || queue.mark_success(&id)).await {
                    error!("failed to mark task {} successful: {e}", task.id);
                }
            }
            Err(e) => {
                warn!(task_id = %task.id, task_type = %task.task_type, error = %e, "task handler failed, rescheduling");
                let retry_at = self.next_retry_at(task.retry_count);
                let id = task.id.clone();
                let message = e.to_string();
                if let Err(spawn_err) = tokio::task::spawn_blocking(move || queue.mark_failure(&id, &message, &retry_at)).await {
                    error!("failed to reschedule task {}: {spawn_err}", task.id);
                }
            }
        }
    }

    fn next_retry_at(&self, retry_count: i64) -> String {
        let backoff = backoff_secs(self.config.retry_delay_secs, retry_count);
        (Utc::now() + ChronoDuration::seconds(backoff as i64)).to_rfc3339()
    }
}

/// `retry_delay * 2^retry_count`, capped at an hour — `retry_count` here is
/// the count *before* this failure increments it, so the first failure
/// reschedules after exactly `retry_delay`.
fn backoff_secs(retry_delay_secs: u64, retry_count: i64) -> u64 {
    // Clamped well below 64: beyond a dozen-or-so doublings the result is
    // already pinned at the cap, and clamping here keeps the shift in range
    // regardless of how large `retry_count` grows.
    let exp = retry_count.clamp(0, 32) as u32;
    retry_delay_secs.saturating_mul(1u64 << exp).min(MAX_BACKOFF_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps_at_an_hour() {
        assert_eq!(backoff_secs(30, 0), 30);
        assert_eq!(backoff_secs(30, 1), 60);
        assert_eq!(backoff_secs(30, 2), 120);
        assert_eq!(backoff_secs(30, 20), MAX_BACKOFF_SECS);
    }
}
