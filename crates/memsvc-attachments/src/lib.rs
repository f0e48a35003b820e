pub mod blob_store;
pub mod engine;
pub mod error;
pub mod handler;
pub mod types;

pub use blob_store::{BlobStore, FilesystemBlobStore};
pub use engine::{AttachmentService, AttachmentServiceConfig};
pub use error::{AttachmentError, Result};
pub use handler::{attachment_cleanup_seed, AttachmentCleanupHandler, TASK_TYPE_ATTACHMENT_CLEANUP};
pub use types::{AttachmentBody, AttachmentRecord, SignedDownload};
