use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Sql(#[from] rusqlite::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, TaskError>;

impl From<TaskError> for memsvc_core::error::MemsvcError {
    fn from(e: TaskError) -> Self {
        use memsvc_core::error::MemsvcError;
        match e {
            TaskError::Sql(err) => MemsvcError::Internal(err.to_string()),
            TaskError::Json(err) => MemsvcError::Internal(err.to_string()),
            TaskError::BadRequest(msg) => MemsvcError::BadRequest(msg),
            TaskError::NotFound(msg) => MemsvcError::NotFound(msg),
            TaskError::Internal(msg) => MemsvcError::Internal(msg),
        }
    }
}
