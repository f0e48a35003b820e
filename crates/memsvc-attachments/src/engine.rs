use std::sync::Arc;

use chrono::Utc;
use memsvc_access::AccessControl;
use memsvc_core::types::{new_id, AccessLevel, Identity};
use memsvc_crypto::{AttachmentSigningKeys, EncryptionService};
use memsvc_store::{AttachmentRecord, AttachmentRepository, ConversationRepository, Db};
use sha2::{Digest, Sha256};

use crate::blob_store::BlobStore;
use crate::error::{AttachmentError, Result};
use crate::types::{AttachmentBody, SignedDownload};

pub struct AttachmentServiceConfig {
    pub signed_url_ttl_secs: u64,
    pub cleanup_batch_size: usize,
}

impl Default for AttachmentServiceConfig {
    fn default() -> Self {
        Self {
            signed_url_ttl_secs: memsvc_core::config::DEFAULT_SIGNED_URL_TTL_SECS,
            cleanup_batch_size: memsvc_core::config::DEFAULT_ATTACHMENT_CLEANUP_BATCH_SIZE,
        }
    }
}

/// Composes the store-level attachment records with the blob bytes behind
/// them, the same way `ConversationStore` composes `Db` with
/// `AccessControl` — one entry point, every operation enforcing its own
/// requirement before touching a row or a blob.
pub struct AttachmentService {
    db: Arc<Db>,
    access: Arc<AccessControl>,
    crypto: Arc<EncryptionService>,
    blobs: Arc<dyn BlobStore>,
    signing: AttachmentSigningKeys,
    config: AttachmentServiceConfig,
}

impl AttachmentService {
    pub fn new(
        db: Arc<Db>,
        access: Arc<AccessControl>,
        crypto: Arc<EncryptionService>,
        blobs: Arc<dyn BlobStore>,
        signing: AttachmentSigningKeys,
        config: AttachmentServiceConfig,
    ) -> Self {
        Self {
            db,
            access,
            crypto,
            blobs,
            signing,
            config,
        }
    }

    /// Seals `bytes` with the streaming envelope, writes it to the blob
    /// store under a group-scoped key, and records the attachment. Requires
    /// writer access to the conversation's group.
    pub async fn upload(
        &self,
        actor: &Identity,
        conversation_id: &str,
        content_type: &str,
        bytes: Vec<u8>,
        expires_at: Option<&str>,
    ) -> Result<AttachmentRecord> {
        if bytes.is_empty() {
            return Err(AttachmentError::BadRequest("attachment body must not be empty".to_string()));
        }
        let group_id = self.writable_conversation_group(actor, conversation_id).await?;

        let sha256 = hex::encode(Sha256::digest(&bytes));
        let size = bytes.len() as i64;
        let sealed = self.crypto.encrypt_stream(&bytes)?;

        let id = new_id();
        let storage_key = format!("{group_id}/{id}");
        self.blobs
            .put(&storage_key, sealed)
            .await
            .map_err(|e| AttachmentError::Blob(e.to_string()))?;

        let db = self.db.clone();
        let (id2, conversation_id2, storage_key2, sha2562, content_type2, expires_at2) = (
            id,
            conversation_id.to_string(),
            storage_key,
            sha256,
            content_type.to_string(),
            expires_at.map(str::to_string),
        );
        let record = run_blocking(move || {
            db.insert_attachment(
                &id2,
                &conversation_id2,
                &storage_key2,
                &sha2562,
                size,
                &content_type2,
                expires_at2.as_deref(),
            )
        })
        .await?;
        Ok(record)
    }

    /// Decrypts and returns the full attachment body. Requires reader access.
    pub async fn download_stream(&self, actor: &Identity, attachment_id: &str) -> Result<AttachmentBody> {
        let record = self.readable_record(actor, attachment_id).await?;
        self.fetch_and_decrypt(&record).await
    }

    /// Mints a signed, time-limited download link that needs no bearer auth
    /// to redeem — the HMAC signature over `(id, filename, expires_at)` is
    /// the only credential `resolve_signed_download` checks.
    pub async fn signed_download_url(
        &self,
        actor: &Identity,
        attachment_id: &str,
        filename: &str,
    ) -> Result<SignedDownload> {
        let record = self.readable_record(actor, attachment_id).await?;
        let expires_at = (Utc::now() + chrono::Duration::seconds(self.config.signed_url_ttl_secs as i64)).to_rfc3339();
        let token = self.mint_token(&record.id, filename, &expires_at)?;
        Ok(SignedDownload {
            token,
            filename: filename.to_string(),
            expires_at,
        })
    }

    /// Redeems a token minted by [`Self::signed_download_url`]. No `Identity`
    /// is involved — this is the unauthenticated route spec.md names.
    pub async fn resolve_signed_download(&self, token: &str, filename: &str) -> Result<AttachmentBody> {
        let (id, expires_at) = self.verify_token(token, filename)?;
        if expires_at.as_str() < Utc::now().to_rfc3339().as_str() {
            return Err(AttachmentError::LinkInvalid);
        }
        let db = self.db.clone();
        let record = run_blocking(move || db.get_attachment(&id))
            .await?
            .ok_or(AttachmentError::NotFound)?;
        self.fetch_and_decrypt(&record).await
    }

    /// Finds attachments past their `expires_at`, deletes each blob then its
    /// record. Claim-then-delete, exactly like `memsvc-eviction`'s
    /// conversation sweep, so two concurrent cleanup ticks never race on the
    /// same row. Returns the number of attachments actually removed.
    pub async fn cleanup_expired(&self) -> Result<usize> {
        let marker = new_id();
        let cutoff = Utc::now().to_rfc3339();
        let db = self.db.clone();
        let batch_size = self.config.cleanup_batch_size;
        let claimed = run_blocking(move || db.claim_expired_attachments(&cutoff, batch_size, &marker)).await?;

        let mut cleaned = 0;
        for record in claimed {
            if let Err(e) = self.blobs.delete(&record.storage_key).await {
                tracing::warn!(error = %e, attachment_id = %record.id, "failed to delete attachment blob during cleanup");
                continue;
            }
            let db = self.db.clone();
            let id = record.id.clone();
            match run_blocking(move || db.delete_attachment(&id)).await {
                Ok(()) => cleaned += 1,
                Err(e) => tracing::error!(error = %e, attachment_id = %record.id, "failed to delete attachment record after blob delete"),
            }
        }
        Ok(cleaned)
    }

    async fn fetch_and_decrypt(&self, record: &AttachmentRecord) -> Result<AttachmentBody> {
        let sealed = self
            .blobs
            .get(&record.storage_key)
            .await
            .map_err(|e| AttachmentError::Blob(e.to_string()))?;
        let bytes = self.crypto.decrypt_stream(&sealed)?;
        Ok(AttachmentBody {
            bytes,
            content_type: record.content_type.clone(),
        })
    }

    async fn writable_conversation_group(&self, actor: &Identity, conversation_id: &str) -> Result<String> {
        let db = self.db.clone();
        let conv_id = conversation_id.to_string();
        let conv = run_blocking(move || db.get_conversation(&conv_id))
            .await?
            .ok_or(AttachmentError::NotFound)?;
        self.access.require_at_least(actor, &conv.conversation_group_id, AccessLevel::Writer)?;
        Ok(conv.conversation_group_id)
    }

    async fn readable_record(&self, actor: &Identity, attachment_id: &str) -> Result<AttachmentRecord> {
        let db = self.db.clone();
        let attachment_id = attachment_id.to_string();
        let record = run_blocking(move || db.get_attachment(&attachment_id))
            .await?
            .ok_or(AttachmentError::NotFound)?;

        let db = self.db.clone();
        let conv_id = record.conversation_id.clone();
        let conv = run_blocking(move || db.get_conversation(&conv_id))
            .await?
            .ok_or(AttachmentError::NotFound)?;
        self.access.require_at_least(actor, &conv.conversation_group_id, AccessLevel::Reader)?;
        Ok(record)
    }

    fn mint_token(&self, id: &str, filename: &str, expires_at: &str) -> Result<String> {
        use base64::Engine;
        let sig = self.signing.sign(&token_payload(id, filename, expires_at))?;
        let encoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(format!("{id}|{expires_at}"));
        Ok(format!("{encoded}.{sig}"))
    }

    fn verify_token(&self, token: &str, filename: &str) -> Result<(String, String)> {
        use base64::Engine;
        let (encoded, sig) = token.split_once('.').ok_or(AttachmentError::LinkInvalid)?;
        let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| AttachmentError::LinkInvalid)?;
        let decoded = String::from_utf8(decoded).map_err(|_| AttachmentError::LinkInvalid)?;
        let (id, expires_at) = decoded.split_once('|').ok_or(AttachmentError::LinkInvalid)?;
        if !self.signing.verify(&token_payload(id, filename, expires_at), sig) {
            return Err(AttachmentError::LinkInvalid);
        }
        Ok((id.to_string(), expires_at.to_string()))
    }
}

fn token_payload(id: &str, filename: &str, expires_at: &str) -> Vec<u8> {
    format!("{id}:{filename}:{expires_at}").into_bytes()
}

/// `spawn_blocking` plus the panic->error flattening every blocking SQLite
/// call through this service needs, so call sites just `.await?`.
async fn run_blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> memsvc_store::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AttachmentError::Blob(format!("blocking task panicked: {e}")))?
        .map_err(AttachmentError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use memsvc_access::NoOrgDirectory;
    use memsvc_core::types::new_id as core_new_id;
    use memsvc_store::{ConversationRepository, GroupRepository, MembershipRepository};
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct InMemoryBlobStore(StdMutex<HashMap<String, Vec<u8>>>);

    #[async_trait::async_trait]
    impl BlobStore for InMemoryBlobStore {
        async fn put(&self, key: &str, bytes: Vec<u8>) -> anyhow::Result<()> {
            self.0.lock().unwrap().insert(key.to_string(), bytes);
            Ok(())
        }
        async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>> {
            self.0
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no such blob: {key}"))
        }
        async fn delete(&self, key: &str) -> anyhow::Result<()> {
            self.0.lock().unwrap().remove(key);
            Ok(())
        }
    }

    #[derive(Default)]
    struct InMemoryDekStore(StdMutex<Option<memsvc_crypto::DekRecord>>);

    impl memsvc_crypto::DekStore for InMemoryDekStore {
        fn load(&self) -> std::result::Result<Option<memsvc_crypto::DekRecord>, memsvc_crypto::CryptoError> {
            Ok(self.0.lock().unwrap().clone())
        }
        fn insert_if_absent(
            &self,
            record: &memsvc_crypto::DekRecord,
        ) -> std::result::Result<memsvc_crypto::DekRecord, memsvc_crypto::CryptoError> {
            let mut g = self.0.lock().unwrap();
            if g.is_none() {
                *g = Some(record.clone());
            }
            Ok(g.clone().unwrap())
        }
        fn save(&self, record: &memsvc_crypto::DekRecord) -> std::result::Result<(), memsvc_crypto::CryptoError> {
            *self.0.lock().unwrap() = Some(record.clone());
            Ok(())
        }
    }

    fn crypto() -> Arc<EncryptionService> {
        let svc = EncryptionService::new(
            Arc::new(memsvc_crypto::NoopKmsProvider::new()),
            Arc::new(InMemoryDekStore::default()),
        );
        svc.bootstrap().unwrap();
        Arc::new(svc)
    }

    fn identity(user_id: &str) -> Identity {
        Identity {
            user_id: user_id.to_string(),
            roles: vec![],
            client_id: None,
        }
    }

    /// `db`, `conversation_id`, `owner`.
    fn fixture() -> (AttachmentService, String, Identity) {
        let crypto = crypto();
        let db = Arc::new(Db::open(":memory:", crypto.clone()).unwrap());
        let access = Arc::new(AccessControl::new(db.clone(), Arc::new(NoOrgDirectory)));
        let signing = AttachmentSigningKeys::derive(&crypto.live_deks().unwrap());
        let blobs: Arc<dyn BlobStore> = Arc::new(InMemoryBlobStore::default());

        let group_id = core_new_id();
        let conv_id = core_new_id();
        db.insert_group(&group_id, None, None).unwrap();
        db.insert_conversation(&conv_id, &group_id, "alice", None, None, None, None).unwrap();
        db.insert_membership(&group_id, "alice", AccessLevel::Owner).unwrap();

        let service = AttachmentService::new(db, access, crypto, blobs, signing, AttachmentServiceConfig::default());
        (service, conv_id, identity("alice"))
    }

    #[tokio::test]
    async fn upload_then_download_roundtrips_the_plaintext() {
        let (service, conv_id, alice) = fixture();
        let record = service
            .upload(&alice, &conv_id, "text/plain", b"hello attachment".to_vec(), None)
            .await
            .unwrap();

        let body = service.download_stream(&alice, &record.id).await.unwrap();
        assert_eq!(body.bytes, b"hello attachment");
        assert_eq!(body.content_type, "text/plain");
    }

    #[tokio::test]
    async fn stranger_cannot_upload_or_download() {
        let (service, conv_id, _alice) = fixture();
        let stranger = identity("mallory");
        let err = service.upload(&stranger, &conv_id, "text/plain", b"x".to_vec(), None).await.unwrap_err();
        assert!(matches!(err, AttachmentError::Access(_)));

        let record = service
            .upload(&identity("alice"), &conv_id, "text/plain", b"hi".to_vec(), None)
            .await
            .unwrap();
        let err = service.download_stream(&stranger, &record.id).await.unwrap_err();
        assert!(matches!(err, AttachmentError::Access(_)));
    }

    #[tokio::test]
    async fn signed_url_round_trips_without_an_identity() {
        let (service, conv_id, alice) = fixture();
        let record = service
            .upload(&alice, &conv_id, "image/png", b"binary bytes".to_vec(), None)
            .await
            .unwrap();

        let signed = service.signed_download_url(&alice, &record.id, "photo.png").await.unwrap();
        let body = service.resolve_signed_download(&signed.token, &signed.filename).await.unwrap();
        assert_eq!(body.bytes, b"binary bytes");
    }

    #[tokio::test]
    async fn tampered_token_is_rejected() {
        let (service, conv_id, alice) = fixture();
        let record = service.upload(&alice, &conv_id, "image/png", b"x".to_vec(), None).await.unwrap();
        let signed = service.signed_download_url(&alice, &record.id, "photo.png").await.unwrap();

        let mut tampered = signed.token.clone();
        tampered.push('0');
        let err = service.resolve_signed_download(&tampered, &signed.filename).await.unwrap_err();
        assert!(matches!(err, AttachmentError::LinkInvalid));

        // wrong filename also fails, since the signature covers it.
        let err = service.resolve_signed_download(&signed.token, "other.png").await.unwrap_err();
        assert!(matches!(err, AttachmentError::LinkInvalid));
    }

    #[tokio::test]
    async fn cleanup_deletes_blob_and_record_exactly_once() {
        let (service, conv_id, alice) = fixture();
        let record = service
            .upload(&alice, &conv_id, "text/plain", b"gone soon".to_vec(), Some("2000-01-01T00:00:00Z"))
            .await
            .unwrap();

        let cleaned = service.cleanup_expired().await.unwrap();
        assert_eq!(cleaned, 1);
        let err = service.download_stream(&alice, &record.id).await.unwrap_err();
        assert!(matches!(err, AttachmentError::NotFound));

        // nothing left to claim on a second pass.
        assert_eq!(service.cleanup_expired().await.unwrap(), 0);
    }
}
