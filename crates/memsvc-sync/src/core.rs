use std::sync::Arc;

use memsvc_access::AccessControl;
use memsvc_core::types::{AccessLevel, Channel, Identity};
use memsvc_store::{ContentBlock, CreateEntryRequest, Db, Entry, EntryRepository};

use crate::cache::{CacheKey, CachedEntry, CachedMemoryEntries, MemoryCache};
use crate::error::{Result, SyncError};

/// One message in a sync request — content blocks only; channel is implied
/// (`MEMORY`) and validated by the caller: every incoming entry targets
/// working memory, never `HISTORY` or `SUMMARY`.
#[derive(Debug, Clone)]
pub struct SyncMessage {
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub epoch: i64,
    pub epoch_incremented: bool,
    pub no_op: bool,
    /// Newly created entries: the appended suffix on an extension, all of
    /// `incoming` on divergence, empty on `NoOp`.
    pub entries: Vec<Entry>,
}

/// Reconciles one `(conversation, client)`'s working memory to the caller's
/// supplied snapshot, write-through to the cache on every mutating outcome.
pub struct MemorySyncCore {
    db: Arc<Db>,
    access: Arc<AccessControl>,
    cache: Arc<dyn MemoryCache>,
}

impl MemorySyncCore {
    pub fn new(db: Arc<Db>, access: Arc<AccessControl>, cache: Arc<dyn MemoryCache>) -> Self {
        Self { db, access, cache }
    }

    pub fn sync(
        &self,
        actor: &Identity,
        conversation_id: &str,
        client_id: &str,
        incoming: Vec<SyncMessage>,
    ) -> Result<SyncOutcome> {
        if incoming.is_empty() {
            return Err(SyncError::BadRequest(
                "sync requires at least one message".to_string(),
            ));
        }

        let conv = self
            .db
            .get_conversation(conversation_id)
            .map_err(SyncError::Store)?
            .ok_or_else(|| SyncError::Store(memsvc_store::StoreError::NotFound(format!("conversation {conversation_id}"))))?;
        self.access
            .require_at_least(actor, &conv.conversation_group_id, AccessLevel::Writer)?;

        let latest_epoch = self
            .db
            .latest_memory_epoch(conversation_id, client_id)
            .map_err(SyncError::Store)?;
        let existing = match latest_epoch {
            Some(epoch) => self
                .db
                .entries_for_epoch(conversation_id, client_id, epoch)
                .map_err(SyncError::Store)?,
            None => Vec::new(),
        };

        let existing_keys: Vec<String> = existing.iter().map(|e| canonical(&e.content)).collect();
        let incoming_keys: Vec<String> = incoming.iter().map(|m| canonical(&m.content)).collect();

        let outcome = if !existing.is_empty() && existing_keys == incoming_keys {
            SyncOutcome {
                epoch: latest_epoch.unwrap_or(0),
                epoch_incremented: false,
                no_op: true,
                entries: Vec::new(),
            }
        } else if !existing_keys.is_empty()
            && incoming_keys.len() > existing_keys.len()
            && incoming_keys[..existing_keys.len()] == existing_keys[..]
        {
            let epoch = latest_epoch.unwrap_or(0);
            let suffix = &incoming[existing_keys.len()..];
            let mut appended = Vec::with_capacity(suffix.len());
            for message in suffix {
                appended.push(self.insert(conversation_id, &conv.conversation_group_id, client_id, epoch, &message.content)?);
            }
            SyncOutcome {
                epoch,
                epoch_incremented: false,
                no_op: false,
                entries: appended,
            }
        } else {
            let next_epoch = latest_epoch.unwrap_or(0) + 1;
            let mut appended = Vec::with_capacity(incoming.len());
            for message in &incoming {
                appended.push(self.insert(conversation_id, &conv.conversation_group_id, client_id, next_epoch, &message.content)?);
            }
            SyncOutcome {
                epoch: next_epoch,
                epoch_incremented: true,
                no_op: false,
                entries: appended,
            }
        };

        self.refresh_cache(conversation_id, client_id, outcome.epoch)?;
        Ok(outcome)
    }

    /// Append path for `appendAgentEntries` MEMORY writes: stamps the
    /// caller-supplied epoch directly, no divergence detection. Still
    /// write-through to the cache, same as a sync outcome.
    pub fn record_append(&self, conversation_id: &str, client_id: &str, epoch: i64) -> Result<()> {
        self.refresh_cache(conversation_id, client_id, epoch)
    }

    fn insert(
        &self,
        conversation_id: &str,
        conversation_group_id: &str,
        client_id: &str,
        epoch: i64,
        content: &[ContentBlock],
    ) -> Result<Entry> {
        let request = CreateEntryRequest {
            channel: Channel::Memory,
            content: content.to_vec(),
            memory_epoch: Some(epoch),
        };
        self.db
            .insert_entry(conversation_id, conversation_group_id, None, Some(client_id), &request)
            .map_err(SyncError::Store)
    }

    /// Re-reads the current epoch's full entry list from the datastore and
    /// writes it through to the cache — the write-through contract is about
    /// datastore/cache consistency, not about avoiding a second read.
    fn refresh_cache(&self, conversation_id: &str, client_id: &str, epoch: i64) -> Result<()> {
        let entries = self
            .db
            .entries_for_epoch(conversation_id, client_id, epoch)
            .map_err(SyncError::Store)?;
        let content_type = entries
            .last()
            .and_then(|e| e.content.first())
            .and_then(|b| b.get("type"))
            .and_then(|t| t.as_str())
            .unwrap_or("text")
            .to_string();

        let cached_entries = entries
            .iter()
            .map(|e| -> Result<CachedEntry> {
                Ok(CachedEntry {
                    id: e.id.clone(),
                    user_id: e.user_id.clone(),
                    client_id: e.client_id.clone(),
                    content_ciphertext: self.db.encrypt_content(&e.content).map_err(SyncError::Store)?,
                    created_at: e.created_at.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        self.cache.set(
            &CacheKey {
                conversation_id: conversation_id.to_string(),
                client_id: client_id.to_string(),
            },
            CachedMemoryEntries {
                epoch,
                entries: cached_entries,
                content_type,
            },
        );
        Ok(())
    }
}

/// Canonical content-equality key: re-serialize to JSON with `serde_json`'s
/// stable struct field order, compared byte-for-byte.
fn canonical(content: &[ContentBlock]) -> String {
    serde_json::to_string(content).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InProcessCache;
    use memsvc_access::{NoOrgDirectory, ports::MembershipLookup};
    use memsvc_core::types::PlatformRole;
    use serde_json::json;
    use std::time::Duration;

    fn setup() -> (Arc<Db>, Arc<AccessControl>, MemorySyncCore, Identity) {
        let crypto_store = Arc::new(InMemoryDekStore::default());
        let crypto = Arc::new(memsvc_crypto::EncryptionService::new(
            Arc::new(memsvc_crypto::NoopKmsProvider::new()),
            crypto_store,
        ));
        crypto.bootstrap().unwrap();
        let db = Arc::new(Db::open(":memory:", crypto).unwrap());

        let access = Arc::new(AccessControl::new(db.clone() as Arc<dyn MembershipLookup>, Arc::new(NoOrgDirectory)));
        let cache: Arc<dyn MemoryCache> = Arc::new(InProcessCache::new(Duration::from_secs(60)));
        let core = MemorySyncCore::new(db.clone(), access.clone(), cache);

        let actor = Identity {
            user_id: "alice".to_string(),
            roles: vec![PlatformRole::Admin],
            client_id: Some("agent-a".to_string()),
        };
        (db, access, core, actor)
    }

    fn conversation(db: &Db, owner: &str) -> String {
        use memsvc_core::types::{new_id, AccessLevel};
        use memsvc_store::{ConversationRepository, GroupRepository, MembershipRepository};
        let group_id = new_id();
        let conv_id = new_id();
        db.insert_group(&group_id, None, None).unwrap();
        db.insert_conversation(&conv_id, &group_id, owner, None, None, None, None).unwrap();
        db.insert_membership(&group_id, owner, AccessLevel::Owner).unwrap();
        conv_id
    }

    fn msg(text: &str) -> SyncMessage {
        SyncMessage {
            content: vec![json!({"type": "text", "text": text})],
        }
    }

    #[derive(Default)]
    struct InMemoryDekStore(std::sync::Mutex<Option<memsvc_crypto::DekRecord>>);
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

    #[test]
    fn first_sync_is_a_divergence_from_epoch_zero() {
        let (db, _access, core, actor) = setup();
        let conv_id = conversation(&db, &actor.user_id);
        let out = core.sync(&actor, &conv_id, "agent-a", vec![msg("hello")]).unwrap();
        assert_eq!(out.epoch, 1);
        assert!(out.epoch_incremented);
        assert!(!out.no_op);
        assert_eq!(out.entries.len(), 1);
    }

    #[test]
    fn replaying_identical_request_is_a_noop() {
        let (db, _access, core, actor) = setup();
        let conv_id = conversation(&db, &actor.user_id);
        core.sync(&actor, &conv_id, "agent-a", vec![msg("hello")]).unwrap();
        let second = core.sync(&actor, &conv_id, "agent-a", vec![msg("hello")]).unwrap();
        assert!(second.no_op);
        assert!(!second.epoch_incremented);
        assert_eq!(second.entries.len(), 0);
    }

    #[test]
    fn prefix_extension_appends_without_incrementing_epoch() {
        let (db, _access, core, actor) = setup();
        let conv_id = conversation(&db, &actor.user_id);
        core.sync(&actor, &conv_id, "agent-a", vec![msg("A")]).unwrap();
        let out = core.sync(&actor, &conv_id, "agent-a", vec![msg("A"), msg("B")]).unwrap();
        assert_eq!(out.epoch, 1);
        assert!(!out.epoch_incremented);
        assert_eq!(out.entries.len(), 1);
    }

    #[test]
    fn divergence_increments_epoch_and_leaves_old_epoch_untouched() {
        let (db, _access, core, actor) = setup();
        let conv_id = conversation(&db, &actor.user_id);
        core.sync(&actor, &conv_id, "agent-a", vec![msg("Original")]).unwrap();
        let out = core.sync(&actor, &conv_id, "agent-a", vec![msg("New")]).unwrap();
        assert_eq!(out.epoch, 2);
        assert!(out.epoch_incremented);

        let epoch_one_still_there = db.entries_for_epoch(&conv_id, "agent-a", 1).unwrap();
        assert_eq!(epoch_one_still_there.len(), 1);
    }

    #[test]
    fn memory_is_isolated_per_client() {
        let (db, _access, core, actor) = setup();
        let conv_id = conversation(&db, &actor.user_id);
        core.sync(&actor, &conv_id, "agent-a", vec![msg("Agent A memory")]).unwrap();
        core.sync(&actor, &conv_id, "agent-b", vec![msg("Agent B memory")]).unwrap();

        let a_entries = db.entries_for_epoch(&conv_id, "agent-a", 1).unwrap();
        let b_entries = db.entries_for_epoch(&conv_id, "agent-b", 1).unwrap();
        assert_eq!(a_entries.len(), 1);
        assert_eq!(b_entries.len(), 1);
        assert_ne!(a_entries[0].id, b_entries[0].id);
    }
}
