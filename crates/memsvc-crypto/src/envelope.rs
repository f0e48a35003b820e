use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key};

use crate::error::{CryptoError, Result};

/// `b"MSEH"` — Memory-Service Encryption Header magic bytes.
const MAGIC: &[u8; 4] = b"MSEH";
const VERSION: u8 = 1;
const NONCE_LEN: usize = 12;
/// magic(4) + version(1) + provider(1) + nonce(12)
const HEADER_LEN: usize = 4 + 1 + 1 + NONCE_LEN;

/// Seal `plaintext` under `dek`, producing a full MSEH payload:
/// `MSEH | v1 | provider | nonce(12) | ciphertext`.
pub fn seal(plaintext: &[u8], dek: &[u8; 32], provider_id: u8) -> Vec<u8> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(dek));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    // AES-256-GCM encryption only fails on plaintext sizes far beyond what this
    // service ever handles in a single call; treat it as infallible here.
    let sealed = cipher
        .encrypt(&nonce, plaintext)
        .expect("AES-256-GCM encryption of an in-memory buffer cannot fail");

    let mut out = Vec::with_capacity(HEADER_LEN + sealed.len());
    out.extend_from_slice(MAGIC);
    out.push(VERSION);
    out.push(provider_id);
    out.extend_from_slice(nonce.as_slice());
    out.extend_from_slice(&sealed);
    out
}

/// Parsed MSEH header plus a reference to the trailing ciphertext.
struct Header<'a> {
    #[allow(dead_code)]
    provider_id: u8,
    nonce: &'a [u8],
    ciphertext: &'a [u8],
}

fn parse_header(data: &[u8]) -> Result<Header<'_>> {
    if data.len() < HEADER_LEN || &data[0..4] != MAGIC {
        return Err(CryptoError::CiphertextMalformed);
    }
    if data[4] != VERSION {
        return Err(CryptoError::CiphertextMalformed);
    }
    let provider_id = data[5];
    let nonce = &data[6..6 + NONCE_LEN];
    let ciphertext = &data[HEADER_LEN..];
    Ok(Header {
        provider_id,
        nonce,
        ciphertext,
    })
}

/// Try each candidate DEK in order (primary first, then legacy keys) until
/// one successfully opens the payload.
pub fn try_open(ciphertext: &[u8], candidate_deks: &[[u8; 32]]) -> Result<Vec<u8>> {
    let header = parse_header(ciphertext)?;

    for dek in candidate_deks {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(dek));
        if let Ok(plaintext) = cipher.decrypt(header.nonce.into(), header.ciphertext) {
            return Ok(plaintext);
        }
    }

    Err(CryptoError::AllKeysFailed)
}

/// Quick structural check used by callers that want to reject obviously
/// non-MSEH bytes before attempting a decrypt.
pub fn is_mseh(data: &[u8]) -> bool {
    data.len() >= HEADER_LEN && &data[0..4] == MAGIC && data[4] == VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dek(byte: u8) -> [u8; 32] {
        [byte; 32]
    }

    #[test]
    fn seal_then_open_roundtrips() {
        let d = dek(7);
        let sealed = seal(b"hello world", &d, 1);
        assert!(is_mseh(&sealed));
        let opened = try_open(&sealed, &[d]).unwrap();
        assert_eq!(opened, b"hello world");
    }

    #[test]
    fn open_tries_legacy_keys_in_order() {
        let old = dek(1);
        let new = dek(2);
        let sealed = seal(b"legacy payload", &old, 1);
        // primary (new) fails, legacy (old) succeeds
        let opened = try_open(&sealed, &[new, old]).unwrap();
        assert_eq!(opened, b"legacy payload");
    }

    #[test]
    fn open_fails_when_no_key_matches() {
        let sealed = seal(b"secret", &dek(9), 1);
        let err = try_open(&sealed, &[dek(1), dek(2)]).unwrap_err();
        assert!(matches!(err, CryptoError::AllKeysFailed));
    }

    #[test]
    fn rejects_non_mseh_bytes() {
        let err = try_open(b"not an envelope at all", &[dek(1)]).unwrap_err();
        assert!(matches!(err, CryptoError::CiphertextMalformed));
    }

    #[test]
    fn rejects_wrong_version() {
        let mut sealed = seal(b"x", &dek(1), 1);
        sealed[4] = 9;
        let err = try_open(&sealed, &[dek(1)]).unwrap_err();
        assert!(matches!(err, CryptoError::CiphertextMalformed));
    }
}
