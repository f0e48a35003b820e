use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecorderError {
    /// No live or buffered stream for this conversation — either it never
    /// started, already completed and was reaped, or the process restarted.
    #[error("no recorded stream for conversation {0}")]
    ReplayFailed(String),
}

pub type Result<T> = std::result::Result<T, RecorderError>;

impl From<RecorderError> for memsvc_core::error::MemsvcError {
    fn from(e: RecorderError) -> Self {
        match e {
            RecorderError::ReplayFailed(id) => {
                memsvc_core::error::MemsvcError::NotFound(format!("no in-progress or recent response for conversation {id}"))
            }
        }
    }
}
