use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("access denied: {0}")]
    Access(#[from] memsvc_access::AccessError),

    #[error("encryption failure: {0}")]
    Crypto(#[from] memsvc_crypto::CryptoError),

    #[error(transparent)]
    Sql(#[from] rusqlite::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    BadRequest(String),

    #[error("{message}")]
    Conflict {
        message: String,
        code: &'static str,
        details: serde_json::Value,
    },

    #[error("{0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for memsvc_core::error::MemsvcError {
    fn from(e: StoreError) -> Self {
        use memsvc_core::error::MemsvcError;
        match e {
            StoreError::Access(err) => err.into(),
            StoreError::Crypto(err) => err.into(),
            StoreError::Sql(err) => MemsvcError::Internal(err.to_string()),
            StoreError::Json(err) => MemsvcError::Internal(err.to_string()),
            StoreError::BadRequest(msg) => MemsvcError::BadRequest(msg),
            StoreError::Conflict {
                message,
                code,
                details,
            } => MemsvcError::conflict_with_details(code, message, details),
            StoreError::NotFound(msg) => MemsvcError::NotFound(msg),
        }
    }
}
