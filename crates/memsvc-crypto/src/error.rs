use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key management provider failed to wrap/unwrap a key: {0}")]
    WrapFailure(String),

    #[error("ciphertext is not a valid MSEH payload")]
    CiphertextMalformed,

    #[error("all data-encryption keys failed to decrypt this payload")]
    AllKeysFailed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CryptoError>;

impl From<CryptoError> for memsvc_core::error::MemsvcError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::WrapFailure(msg) => {
                memsvc_core::error::MemsvcError::UpstreamUnavailable(msg)
            }
            CryptoError::CiphertextMalformed | CryptoError::AllKeysFailed => {
                memsvc_core::error::MemsvcError::Internal(e.to_string())
            }
            CryptoError::Io(_) => memsvc_core::error::MemsvcError::Internal(e.to_string()),
        }
    }
}
