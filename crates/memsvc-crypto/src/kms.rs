use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key};
use base64::Engine;

use crate::error::{CryptoError, Result};

/// Wraps/unwraps raw 32-byte data-encryption keys at rest.
///
/// Stands in for an external key-management service (treated as an
/// out-of-scope collaborator) — `StaticKmsProvider` is the one
/// concrete implementation this repo ships, wrapping DEKs with a local
/// AES-256-GCM key so they are never stored in clear even without a real KMS.
pub trait KeyManagementProvider: Send + Sync {
    /// Short id stamped into the MSEH header's `provider` byte.
    fn provider_id(&self) -> u8;

    fn wrap(&self, dek: &[u8; 32]) -> Result<Vec<u8>>;

    fn unwrap(&self, wrapped: &[u8]) -> Result<[u8; 32]>;
}

/// Wraps DEKs with a single local AES-256-GCM key read from configuration
/// (`encryption.key`, base64-encoded 32 bytes). This is the default provider;
/// swap in a real KMS-backed implementation of the same trait in production.
pub struct StaticKmsProvider {
    wrapping_key: Key<Aes256Gcm>,
}

impl StaticKmsProvider {
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| CryptoError::WrapFailure(format!("invalid encryption.key: {e}")))?;
        if bytes.len() != 32 {
            return Err(CryptoError::WrapFailure(
                "encryption.key must decode to exactly 32 bytes".to_string(),
            ));
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes);
        Ok(Self {
            wrapping_key: key.into(),
        })
    }
}

impl KeyManagementProvider for StaticKmsProvider {
    fn provider_id(&self) -> u8 {
        1
    }

    fn wrap(&self, dek: &[u8; 32]) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm::new(&self.wrapping_key);
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = cipher
            .encrypt(&nonce, dek.as_slice())
            .map_err(|e| CryptoError::WrapFailure(e.to_string()))?;
        let mut out = Vec::with_capacity(12 + sealed.len());
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn unwrap(&self, wrapped: &[u8]) -> Result<[u8; 32]> {
        if wrapped.len() < 12 {
            return Err(CryptoError::WrapFailure("wrapped DEK too short".to_string()));
        }
        let (nonce_bytes, ciphertext) = wrapped.split_at(12);
        let cipher = Aes256Gcm::new(&self.wrapping_key);
        let plaintext = cipher
            .decrypt(nonce_bytes.into(), ciphertext)
            .map_err(|e| CryptoError::WrapFailure(e.to_string()))?;
        if plaintext.len() != 32 {
            return Err(CryptoError::WrapFailure("unwrapped DEK has wrong length".to_string()));
        }
        let mut dek = [0u8; 32];
        dek.copy_from_slice(&plaintext);
        Ok(dek)
    }
}

/// Identity "provider" for local development and tests: DEKs are stored
/// unwrapped. Never select this in a real deployment.
pub struct NoopKmsProvider;

impl NoopKmsProvider {
    pub fn new() -> Self {
        tracing::warn!("encryption.kms = \"noop\": data-encryption keys are stored unwrapped");
        Self
    }
}

impl Default for NoopKmsProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyManagementProvider for NoopKmsProvider {
    fn provider_id(&self) -> u8 {
        0
    }

    fn wrap(&self, dek: &[u8; 32]) -> Result<Vec<u8>> {
        Ok(dek.to_vec())
    }

    fn unwrap(&self, wrapped: &[u8]) -> Result<[u8; 32]> {
        wrapped
            .try_into()
            .map_err(|_| CryptoError::WrapFailure("noop-wrapped DEK has wrong length".to_string()))
    }
}
