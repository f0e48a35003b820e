use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One unit of durable background work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub task_name: Option<String>,
    pub task_type: String,
    pub task_body: Value,
    pub created_at: String,
    pub retry_at: String,
    pub processing_at: Option<String>,
    pub last_error: Option<String>,
    pub retry_count: i64,
}

/// Caller-supplied shape for enqueuing a task. `task_name` set means
/// singleton: a second enqueue with the same name is a silent no-op.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub task_type: String,
    pub task_body: Value,
    pub task_name: Option<String>,
}

impl NewTask {
    pub fn new(task_type: impl Into<String>, task_body: Value) -> Self {
        Self {
            task_type: task_type.into(),
            task_body,
            task_name: None,
        }
    }

    pub fn singleton(task_type: impl Into<String>, task_body: Value, task_name: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            task_body,
            task_name: Some(task_name.into()),
        }
    }
}
