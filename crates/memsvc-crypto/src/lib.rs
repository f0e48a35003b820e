pub mod dek;
pub mod envelope;
pub mod error;
pub mod kms;
pub mod signing;
pub mod stream;

pub use dek::{DekRecord, DekStore, EncryptionService};
pub use error::{CryptoError, Result};
pub use kms::{KeyManagementProvider, NoopKmsProvider, StaticKmsProvider};
pub use signing::AttachmentSigningKeys;
