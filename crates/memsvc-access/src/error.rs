use thiserror::Error;

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("resource not visible to this actor")]
    NotFound,

    #[error("insufficient access: {0}")]
    AccessDenied(String),

    #[error("a justification is required for this admin write")]
    JustificationRequired,

    #[error("directory lookup failed: {0}")]
    DirectoryUnavailable(String),
}

pub type Result<T> = std::result::Result<T, AccessError>;

impl From<AccessError> for memsvc_core::error::MemsvcError {
    fn from(e: AccessError) -> Self {
        match e {
            AccessError::NotFound => memsvc_core::error::MemsvcError::NotFound(e.to_string()),
            AccessError::AccessDenied(msg) => memsvc_core::error::MemsvcError::AccessDenied(msg),
            AccessError::JustificationRequired => {
                memsvc_core::error::MemsvcError::JustificationRequired
            }
            AccessError::DirectoryUnavailable(msg) => {
                memsvc_core::error::MemsvcError::UpstreamUnavailable(msg)
            }
        }
    }
}
