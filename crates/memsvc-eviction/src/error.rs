use thiserror::Error;

#[derive(Debug, Error)]
pub enum EvictionError {
    #[error("insufficient access: {0}")]
    AccessDenied(String),

    #[error("a justification is required for this admin write")]
    JustificationRequired,

    #[error("{0}")]
    BadRequest(String),

    #[error("store failure: {0}")]
    Store(#[from] memsvc_store::StoreError),

    #[error("task queue failure: {0}")]
    Task(#[from] memsvc_tasks::TaskError),
}

pub type Result<T> = std::result::Result<T, EvictionError>;

impl From<EvictionError> for memsvc_core::error::MemsvcError {
    fn from(e: EvictionError) -> Self {
        use memsvc_core::error::MemsvcError;
        match e {
            EvictionError::AccessDenied(msg) => MemsvcError::AccessDenied(msg),
            EvictionError::JustificationRequired => MemsvcError::JustificationRequired,
            EvictionError::BadRequest(msg) => MemsvcError::BadRequest(msg),
            EvictionError::Store(err) => err.into(),
            EvictionError::Task(err) => err.into(),
        }
    }
}
