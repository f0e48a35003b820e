pub use memsvc_store::AttachmentRecord;

/// Everything `/v1/attachments/download/{token}/{filename}` needs to build
/// its URL. `token` carries the attachment id and expiry, HMAC-signed so the
/// route itself needs no bearer auth.
#[derive(Debug, Clone)]
pub struct SignedDownload {
    pub token: String,
    pub filename: String,
    pub expires_at: String,
}

/// Decrypted attachment body plus the content type to serve it with.
#[derive(Debug, Clone)]
pub struct AttachmentBody {
    pub bytes: Vec<u8>,
    pub content_type: String,
}
