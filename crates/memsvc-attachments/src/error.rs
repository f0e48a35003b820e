use thiserror::Error;

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("insufficient access: {0}")]
    AccessDenied(String),

    #[error("resource not visible to this actor")]
    NotFound,

    #[error("{0}")]
    BadRequest(String),

    #[error("the signed download link has expired or is invalid")]
    LinkInvalid,

    #[error("blob store failure: {0}")]
    Blob(String),

    #[error("store failure: {0}")]
    Store(#[from] memsvc_store::StoreError),

    #[error("access control failure: {0}")]
    Access(#[from] memsvc_access::AccessError),

    #[error("encryption failure: {0}")]
    Crypto(#[from] memsvc_crypto::CryptoError),

    #[error("task queue failure: {0}")]
    Task(#[from] memsvc_tasks::TaskError),
}

pub type Result<T> = std::result::Result<T, AttachmentError>;

impl From<AttachmentError> for memsvc_core::error::MemsvcError {
    fn from(e: AttachmentError) -> Self {
        use memsvc_core::error::MemsvcError;
        match e {
            AttachmentError::AccessDenied(msg) => MemsvcError::AccessDenied(msg),
            AttachmentError::NotFound => MemsvcError::NotFound(e.to_string()),
            AttachmentError::BadRequest(msg) => MemsvcError::BadRequest(msg),
            AttachmentError::LinkInvalid => MemsvcError::Unauthorized(e.to_string()),
            AttachmentError::Blob(msg) => MemsvcError::UpstreamUnavailable(msg),
            AttachmentError::Store(err) => err.into(),
            AttachmentError::Access(err) => err.into(),
            AttachmentError::Crypto(err) => err.into(),
            AttachmentError::Task(err) => err.into(),
        }
    }
}
