use std::sync::{Arc, RwLock};

use aes_gcm::aead::OsRng as AeadOsRng;
use aes_gcm::aead::rand_core::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::envelope;
use crate::error::{CryptoError, Result};
use crate::kms::KeyManagementProvider;

/// Legacy DEKs are kept around so ciphertext sealed under a previous primary
/// still decrypts after rotation. Bounded so the row can't grow forever
/// across many rotations.
const MAX_LEGACY_KEYS: usize = 8;

/// Persisted, KMS-wrapped key material. The plaintext DEK bytes never touch
/// storage — only `KeyManagementProvider::wrap()` output does.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DekRecord {
    pub provider_id: u8,
    pub primary_wrapped: Vec<u8>,
    pub legacy_wrapped: Vec<Vec<u8>>,
}

/// Persistence hook for the singleton DEK record. Implemented against SQLite
/// by `memsvc-store`; kept as a trait here so `memsvc-crypto` has no
/// dependency on any particular storage driver.
pub trait DekStore: Send + Sync {
    fn load(&self) -> Result<Option<DekRecord>>;

    /// Insert `record` only if no row exists yet; returns whichever record
    /// ended up persisted (the caller's, or a concurrent bootstrap's winner).
    /// Implementations MUST make this atomic so concurrent first-starts
    /// converge on one primary DEK.
    fn insert_if_absent(&self, record: &DekRecord) -> Result<DekRecord>;

    fn save(&self, record: &DekRecord) -> Result<()>;
}

struct UnwrappedKeys {
    primary: [u8; 32],
    legacy: Vec<[u8; 32]>,
}

impl UnwrappedKeys {
    fn candidates(&self) -> Vec<[u8; 32]> {
        let mut all = Vec::with_capacity(1 + self.legacy.len());
        all.push(self.primary);
        all.extend(self.legacy.iter().copied());
        all
    }
}

/// Process-wide encryption service: owns the KMS provider, the DEK store
/// handle, and an in-memory cache of the unwrapped key set (multiple
/// readers, single writer — per DESIGN NOTES' shared-resource policy).
/// Construct once at startup and share behind an `Arc`.
pub struct EncryptionService {
    kms: Arc<dyn KeyManagementProvider>,
    store: Arc<dyn DekStore>,
    cache: RwLock<Option<UnwrappedKeys>>,
}

impl EncryptionService {
    pub fn new(kms: Arc<dyn KeyManagementProvider>, store: Arc<dyn DekStore>) -> Self {
        Self {
            kms,
            store,
            cache: RwLock::new(None),
        }
    }

    /// Load the DEK record, generating and persisting a fresh one if this is
    /// the first start. Safe to call from multiple replicas concurrently.
    pub fn bootstrap(&self) -> Result<()> {
        let record = match self.store.load()? {
            Some(r) => r,
            None => {
                info!("no DEK record found, generating a fresh primary DEK");
                let fresh = self.wrap_new_record(Vec::new())?;
                self.store.insert_if_absent(&fresh)?
            }
        };
        self.load_into_cache(&record)?;
        Ok(())
    }

    /// Rotate: the current primary becomes the newest legacy key, and a
    /// fresh DEK becomes primary. Ciphertext sealed under the old primary
    /// keeps decrypting via the legacy-key fallback.
    pub fn rotate(&self) -> Result<()> {
        let current = self
            .store
            .load()?
            .ok_or_else(|| CryptoError::WrapFailure("no DEK record to rotate".to_string()))?;

        let mut legacy = vec![current.primary_wrapped.clone()];
        legacy.extend(current.legacy_wrapped.iter().cloned());
        legacy.truncate(MAX_LEGACY_KEYS);

        let record = self.wrap_new_record(legacy)?;
        self.store.save(&record)?;
        self.load_into_cache(&record)?;
        info!("DEK rotated; previous primary retained as a legacy key");
        Ok(())
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let cache = self.cache.read().expect("DEK cache poisoned");
        let keys = cache
            .as_ref()
            .ok_or_else(|| CryptoError::WrapFailure("encryption service not bootstrapped".to_string()))?;
        Ok(envelope::seal(plaintext, &keys.primary, self.kms.provider_id()))
    }

    /// Decrypt, trying the primary DEK then each legacy DEK in order. On
    /// total failure the DEK record is re-read from the store and the
    /// decrypt is retried once — this recovers a long-lived process from a
    /// rotation that happened on another replica after it last bootstrapped.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if !envelope::is_mseh(ciphertext) {
            return Err(CryptoError::CiphertextMalformed);
        }

        {
            let cache = self.cache.read().expect("DEK cache poisoned");
            if let Some(keys) = cache.as_ref() {
                if let Ok(plaintext) = envelope::try_open(ciphertext, &keys.candidates()) {
                    return Ok(plaintext);
                }
            }
        }

        warn!("decrypt failed with cached keys; re-reading DEK record and retrying once");
        let record = self
            .store
            .load()?
            .ok_or(CryptoError::AllKeysFailed)?;
        self.load_into_cache(&record)?;

        let cache = self.cache.read().expect("DEK cache poisoned");
        let keys = cache.as_ref().ok_or(CryptoError::AllKeysFailed)?;
        envelope::try_open(ciphertext, &keys.candidates())
    }

    /// All currently-live unwrapped DEKs, primary first — used by
    /// `AttachmentSigningKeys::derive` so signed URLs survive rotation.
    pub fn live_deks(&self) -> Result<Vec<[u8; 32]>> {
        let cache = self.cache.read().expect("DEK cache poisoned");
        let keys = cache
            .as_ref()
            .ok_or_else(|| CryptoError::WrapFailure("encryption service not bootstrapped".to_string()))?;
        Ok(keys.candidates())
    }

    /// Chunked variant of [`Self::encrypt`] for attachment bodies too large
    /// to seal as a single AEAD call. See [`crate::stream`].
    pub fn encrypt_stream(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let cache = self.cache.read().expect("DEK cache poisoned");
        let keys = cache
            .as_ref()
            .ok_or_else(|| CryptoError::WrapFailure("encryption service not bootstrapped".to_string()))?;
        Ok(crate::stream::encrypt_chunks(plaintext, &keys.primary, self.kms.provider_id()))
    }

    /// Chunked variant of [`Self::decrypt`], trying every live DEK per chunk.
    pub fn decrypt_stream(&self, framed: &[u8]) -> Result<Vec<u8>> {
        let candidates = self.live_deks()?;
        crate::stream::decrypt_chunks(framed, &candidates)
    }

    fn wrap_new_record(&self, legacy_wrapped: Vec<Vec<u8>>) -> Result<DekRecord> {
        let mut dek = [0u8; 32];
        AeadOsRng.fill_bytes(&mut dek);
        let primary_wrapped = self.kms.wrap(&dek)?;
        Ok(DekRecord {
            provider_id: self.kms.provider_id(),
            primary_wrapped,
            legacy_wrapped,
        })
    }

    fn load_into_cache(&self, record: &DekRecord) -> Result<()> {
        let primary = self.kms.unwrap(&record.primary_wrapped)?;
        let legacy = record
            .legacy_wrapped
            .iter()
            .map(|w| self.kms.unwrap(w))
            .collect::<Result<Vec<_>>>()?;
        *self.cache.write().expect("DEK cache poisoned") = Some(UnwrappedKeys { primary, legacy });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kms::NoopKmsProvider;
    use std::sync::Mutex;

    struct InMemoryDekStore {
        record: Mutex<Option<DekRecord>>,
    }

    impl InMemoryDekStore {
        fn new() -> Self {
            Self {
                record: Mutex::new(None),
            }
        }
    }

    impl DekStore for InMemoryDekStore {
        fn load(&self) -> Result<Option<DekRecord>> {
            Ok(self.record.lock().unwrap().clone())
        }

        fn insert_if_absent(&self, record: &DekRecord) -> Result<DekRecord> {
            let mut guard = self.record.lock().unwrap();
            if guard.is_none() {
                *guard = Some(record.clone());
            }
            Ok(guard.clone().unwrap())
        }

        fn save(&self, record: &DekRecord) -> Result<()> {
            *self.record.lock().unwrap() = Some(record.clone());
            Ok(())
        }
    }

    fn service() -> EncryptionService {
        EncryptionService::new(Arc::new(NoopKmsProvider::new()), Arc::new(InMemoryDekStore::new()))
    }

    #[test]
    fn bootstrap_then_roundtrip() {
        let svc = service();
        svc.bootstrap().unwrap();
        let sealed = svc.encrypt(b"hello").unwrap();
        let opened = svc.decrypt(&sealed).unwrap();
        assert_eq!(opened, b"hello");
    }

    #[test]
    fn decrypt_after_rotation_still_works() {
        let svc = service();
        svc.bootstrap().unwrap();
        let sealed_before = svc.encrypt(b"before rotation").unwrap();
        svc.rotate().unwrap();
        let opened = svc.decrypt(&sealed_before).unwrap();
        assert_eq!(opened, b"before rotation");

        let sealed_after = svc.encrypt(b"after rotation").unwrap();
        assert_eq!(svc.decrypt(&sealed_after).unwrap(), b"after rotation");
    }

    #[test]
    fn concurrent_bootstrap_converges_on_one_dek() {
        let store = Arc::new(InMemoryDekStore::new());
        let kms: Arc<dyn KeyManagementProvider> = Arc::new(NoopKmsProvider::new());

        let svc_a = EncryptionService::new(kms.clone(), store.clone());
        svc_a.bootstrap().unwrap();
        let sealed = svc_a.encrypt(b"payload").unwrap();

        // A second service instance bootstrapping against the same store
        // must pick up the already-persisted DEK, not overwrite it.
        let svc_b = EncryptionService::new(kms, store);
        svc_b.bootstrap().unwrap();
        assert_eq!(svc_b.decrypt(&sealed).unwrap(), b"payload");
    }
}
