use crate::envelope;
use crate::error::{CryptoError, Result};

/// Attachment bodies are sealed in bounded chunks rather than as one giant
/// AEAD call, so a multi-gigabyte upload never needs its whole plaintext (or
/// ciphertext) resident twice over.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Seal `plaintext` as a sequence of independently-encrypted chunks, each
/// framed as `len(4, big-endian) | sealed_chunk`. `sealed_chunk` is itself a
/// full MSEH payload (magic/version/provider/nonce/ciphertext), so any chunk
/// can be opened on its own given the right DEK.
pub fn encrypt_chunks(plaintext: &[u8], dek: &[u8; 32], provider_id: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(plaintext.len() + plaintext.len() / CHUNK_SIZE * 32 + 32);
    for chunk in plaintext.chunks(CHUNK_SIZE) {
        let sealed = envelope::seal(chunk, dek, provider_id);
        out.extend_from_slice(&(sealed.len() as u32).to_be_bytes());
        out.extend_from_slice(&sealed);
    }
    out
}

/// Inverse of [`encrypt_chunks`]. Each frame is opened with
/// [`envelope::try_open`] against `candidate_deks`, so a body sealed before a
/// DEK rotation still decrypts.
pub fn decrypt_chunks(framed: &[u8], candidate_deks: &[[u8; 32]]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(framed.len());
    let mut pos = 0usize;
    while pos < framed.len() {
        if framed.len() - pos < 4 {
            return Err(CryptoError::CiphertextMalformed);
        }
        let len = u32::from_be_bytes(framed[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4;
        if framed.len() - pos < len {
            return Err(CryptoError::CiphertextMalformed);
        }
        let sealed = &framed[pos..pos + len];
        pos += len;
        out.extend_from_slice(&envelope::try_open(sealed, candidate_deks)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dek(byte: u8) -> [u8; 32] {
        [byte; 32]
    }

    #[test]
    fn chunks_roundtrip_across_multiple_frames() {
        let body = vec![0xABu8; CHUNK_SIZE * 3 + 17];
        let d = dek(4);
        let framed = encrypt_chunks(&body, &d, 1);
        let opened = decrypt_chunks(&framed, &[d]).unwrap();
        assert_eq!(opened, body);
    }

    #[test]
    fn empty_body_roundtrips_to_empty() {
        let d = dek(4);
        let framed = encrypt_chunks(&[], &d, 1);
        assert_eq!(decrypt_chunks(&framed, &[d]).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn truncated_frame_is_rejected() {
        let d = dek(4);
        let mut framed = encrypt_chunks(b"some attachment bytes", &d, 1);
        framed.truncate(framed.len() - 1);
        assert!(decrypt_chunks(&framed, &[d]).is_err());
    }
}
