use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{CryptoError, Result};

const HKDF_INFO: &[u8] = b"memsvc-attachment-sign-v1";

/// Signing keys for download URLs, derived from the live DEK set rather than
/// stored separately — rotating the DEK rotates signing keys for free, and a
/// URL signed before rotation still verifies via the legacy-derived key.
pub struct AttachmentSigningKeys {
    keys: Vec<[u8; 32]>,
}

impl AttachmentSigningKeys {
    /// `live_deks` should be primary-first, exactly as returned by
    /// `EncryptionService::live_deks`.
    pub fn derive(live_deks: &[[u8; 32]]) -> Self {
        let keys = live_deks
            .iter()
            .map(|dek| {
                let hk = Hkdf::<Sha256>::new(None, dek);
                let mut okm = [0u8; 32];
                hk.expand(HKDF_INFO, &mut okm)
                    .expect("32 bytes is a valid HKDF-SHA256 output length");
                okm
            })
            .collect();
        Self { keys }
    }

    /// HMAC-SHA256 of `payload` under the primary signing key, hex-encoded.
    pub fn sign(&self, payload: &[u8]) -> Result<String> {
        let key = self
            .keys
            .first()
            .ok_or_else(|| CryptoError::WrapFailure("no signing keys available".to_string()))?;
        Ok(hex::encode(hmac_sha256(key, payload)))
    }

    /// Accepts a signature produced by any currently-live key, so signed URLs
    /// outstanding at rotation time keep working until they expire.
    pub fn verify(&self, payload: &[u8], signature_hex: &str) -> bool {
        let Ok(expected_any) = hex::decode(signature_hex) else {
            return false;
        };
        self.keys
            .iter()
            .any(|key| hmac_sha256(key, payload) == expected_any.as_slice())
    }
}

fn hmac_sha256(key: &[u8; 32], payload: &[u8]) -> Vec<u8> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_roundtrips() {
        let keys = AttachmentSigningKeys::derive(&[[1u8; 32]]);
        let sig = keys.sign(b"attachment-id:42").unwrap();
        assert!(keys.verify(b"attachment-id:42", &sig));
    }

    #[test]
    fn verify_accepts_legacy_derived_key_after_rotation() {
        let old_dek = [1u8; 32];
        let new_dek = [2u8; 32];

        let before_rotation = AttachmentSigningKeys::derive(&[old_dek]);
        let sig = before_rotation.sign(b"payload").unwrap();

        // primary is now new_dek, old_dek demoted to legacy — still present.
        let after_rotation = AttachmentSigningKeys::derive(&[new_dek, old_dek]);
        assert!(after_rotation.verify(b"payload", &sig));
    }

    #[test]
    fn verify_rejects_tampered_signature() {
        let keys = AttachmentSigningKeys::derive(&[[3u8; 32]]);
        let sig = keys.sign(b"payload").unwrap();
        let mut tampered = sig.clone();
        tampered.replace_range(0..2, "ff");
        assert!(!keys.verify(b"payload", &tampered));
    }
}
