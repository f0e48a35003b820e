use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("access denied: {0}")]
    Access(#[from] memsvc_access::AccessError),

    #[error("store failure: {0}")]
    Store(#[from] memsvc_store::StoreError),

    #[error("{0}")]
    BadRequest(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl From<SyncError> for memsvc_core::error::MemsvcError {
    fn from(e: SyncError) -> Self {
        use memsvc_core::error::MemsvcError;
        match e {
            SyncError::Access(err) => err.into(),
            SyncError::Store(err) => err.into(),
            SyncError::BadRequest(msg) => MemsvcError::BadRequest(msg),
        }
    }
}
