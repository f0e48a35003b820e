use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Cache key: a conversation plus the agent that owns the working-memory
/// channel being cached.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub conversation_id: String,
    pub client_id: String,
}

/// One cached entry's storage-shaped bytes — never plaintext. Decryption
/// happens in `memsvc-sync`'s core, using the same `EncryptionService` that
/// sealed it on write.
#[derive(Debug, Clone)]
pub struct CachedEntry {
    pub id: String,
    pub user_id: Option<String>,
    pub client_id: Option<String>,
    pub content_ciphertext: Vec<u8>,
    pub created_at: String,
}

/// In-cache value: the current latest epoch for one `(conversation, client)`
/// pair, plus the latest batch's dominant content type.
#[derive(Debug, Clone)]
pub struct CachedMemoryEntries {
    pub epoch: i64,
    pub entries: Vec<CachedEntry>,
    pub content_type: String,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time snapshot of the cache's hit/miss/error counters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CacheMetricsSnapshot {
    pub backend: &'static str,
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
}

/// Write-through cache of the latest memory epoch per `(conversation,
/// client)`. Implementations MUST degrade to a miss (and bump `errors`) on
/// any transient backend failure rather than propagate it — cache
/// unavailability must never surface to a caller.
pub trait MemoryCache: Send + Sync {
    fn get(&self, key: &CacheKey) -> Option<CachedMemoryEntries>;
    fn set(&self, key: &CacheKey, value: CachedMemoryEntries);
    fn remove(&self, key: &CacheKey);
    /// Explicit removal on conversation/group deletion or eviction.
    /// Sweeps every cached client for the conversation.
    fn remove_conversation(&self, conversation_id: &str);
    fn metrics(&self) -> CacheMetricsSnapshot;
}

/// `cache.type = "none"`: always a miss. Correct default for deployments
/// that don't want the hot-path cache at all.
pub struct NoneCache {
    counters: Counters,
}

impl NoneCache {
    pub fn new() -> Self {
        Self {
            counters: Counters::default(),
        }
    }
}

impl Default for NoneCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCache for NoneCache {
    fn get(&self, _key: &CacheKey) -> Option<CachedMemoryEntries> {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn set(&self, _key: &CacheKey, _value: CachedMemoryEntries) {}

    fn remove(&self, _key: &CacheKey) {}

    fn remove_conversation(&self, _conversation_id: &str) {}

    fn metrics(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            backend: "none",
            hits: 0,
            misses: self.counters.misses.load(Ordering::Relaxed),
            errors: 0,
        }
    }
}

struct Entry {
    value: CachedMemoryEntries,
    expires_at: Instant,
}

/// `cache.type = "kv"`: single-process cache backed by `dashmap`, the same
/// fan-out-friendly concurrent map used elsewhere in this workspace for
/// connection/notification registries. TTL slides on every `get`.
pub struct InProcessCache {
    ttl: Duration,
    entries: DashMap<CacheKey, Entry>,
    counters: Counters,
}

impl InProcessCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
            counters: Counters::default(),
        }
    }

    /// Drop entries that expired since the last sweep. Intended to be driven
    /// by a periodic background task (see `memsvc-api`'s wiring layer);
    /// `get` also self-evicts an expired entry on access so correctness
    /// never depends on the reaper actually running.
    pub fn reap_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }
}

impl MemoryCache for InProcessCache {
    fn get(&self, key: &CacheKey) -> Option<CachedMemoryEntries> {
        let now = Instant::now();
        if let Some(mut entry) = self.entries.get_mut(key) {
            if entry.expires_at > now {
                entry.expires_at = now + self.ttl;
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
        }
        self.entries.remove(key);
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn set(&self, key: &CacheKey, value: CachedMemoryEntries) {
        self.entries.insert(
            key.clone(),
            Entry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    fn remove(&self, key: &CacheKey) {
        self.entries.remove(key);
    }

    fn remove_conversation(&self, conversation_id: &str) {
        self.entries.retain(|k, _| k.conversation_id != conversation_id);
    }

    fn metrics(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            backend: "kv",
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
        }
    }
}

impl Clone for CachedMemoryEntries {
    fn clone(&self) -> Self {
        Self {
            epoch: self.epoch,
            entries: self.entries.clone(),
            content_type: self.content_type.clone(),
        }
    }
}

impl Clone for CachedEntry {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            user_id: self.user_id.clone(),
            client_id: self.client_id.clone(),
            content_ciphertext: self.content_ciphertext.clone(),
            created_at: self.created_at.clone(),
        }
    }
}

/// Backend for a shared distributed cache (Redis, memcached, ...). The
/// actual distributed store is treated as an external collaborator; this
/// port is the seam a real client implements.
pub trait CacheClient: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, String>;
    fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), String>;
    fn del(&self, key: &str) -> Result<(), String>;
}

/// `cache.type = "distributed"`: talks to a `CacheClient` with the cached
/// value serialized as bincode-free JSON-over-bytes (kept intentionally
/// simple — ciphertext is already opaque bytes, wrapping it in JSON avoids a
/// second binary-serialization dependency). Any `CacheClient` error is
/// swallowed into a miss, per the degrade-to-miss contract.
pub struct DistributedCacheStub {
    client: Box<dyn CacheClient>,
    ttl: Duration,
    counters: Counters,
}

#[derive(Serialize, Deserialize)]
struct WireEntry {
    id: String,
    user_id: Option<String>,
    client_id: Option<String>,
    content_ciphertext: Vec<u8>,
    created_at: String,
}

#[derive(Serialize, Deserialize)]
struct WireValue {
    epoch: i64,
    entries: Vec<WireEntry>,
    content_type: String,
}

impl DistributedCacheStub {
    pub fn new(client: Box<dyn CacheClient>, ttl: Duration) -> Self {
        Self {
            client,
            ttl,
            counters: Counters::default(),
        }
    }

    fn wire_key(key: &CacheKey) -> String {
        format!("memsvc:memory:{}:{}", key.conversation_id, key.client_id)
    }
}

impl MemoryCache for DistributedCacheStub {
    fn get(&self, key: &CacheKey) -> Option<CachedMemoryEntries> {
        match self.client.get(&Self::wire_key(key)) {
            Ok(Some(bytes)) => match serde_json::from_slice::<WireValue>(&bytes) {
                Ok(wire) => {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    Some(CachedMemoryEntries {
                        epoch: wire.epoch,
                        content_type: wire.content_type,
                        entries: wire
                            .entries
                            .into_iter()
                            .map(|e| CachedEntry {
                                id: e.id,
                                user_id: e.user_id,
                                client_id: e.client_id,
                                content_ciphertext: e.content_ciphertext,
                                created_at: e.created_at,
                            })
                            .collect(),
                    })
                }
                Err(_) => {
                    self.counters.errors.fetch_add(1, Ordering::Relaxed);
                    None
                }
            },
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(_) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn set(&self, key: &CacheKey, value: CachedMemoryEntries) {
        let wire = WireValue {
            epoch: value.epoch,
            content_type: value.content_type,
            entries: value
                .entries
                .into_iter()
                .map(|e| WireEntry {
                    id: e.id,
                    user_id: e.user_id,
                    client_id: e.client_id,
                    content_ciphertext: e.content_ciphertext,
                    created_at: e.created_at,
                })
                .collect(),
        };
        if let Ok(bytes) = serde_json::to_vec(&wire) {
            if self.client.set(&Self::wire_key(key), bytes, self.ttl).is_err() {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn remove(&self, key: &CacheKey) {
        let _ = self.client.del(&Self::wire_key(key));
    }

    fn remove_conversation(&self, _conversation_id: &str) {
        // A real client would need a secondary index (conversation -> client
        // ids) to sweep every key; out of scope for this stub.
    }

    fn metrics(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            backend: "distributed",
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(epoch: i64) -> CachedMemoryEntries {
        CachedMemoryEntries {
            epoch,
            entries: vec![CachedEntry {
                id: "e1".into(),
                user_id: None,
                client_id: Some("agent-a".into()),
                content_ciphertext: vec![1, 2, 3],
                created_at: "2026-01-01T00:00:00Z".into(),
            }],
            content_type: "text".into(),
        }
    }

    #[test]
    fn none_cache_always_misses() {
        let cache = NoneCache::new();
        let key = CacheKey {
            conversation_id: "c1".into(),
            client_id: "agent-a".into(),
        };
        cache.set(&key, entries(1));
        assert!(cache.get(&key).is_none());
        assert_eq!(cache.metrics().misses, 1);
    }

    #[test]
    fn in_process_cache_hits_until_ttl_expires() {
        let cache = InProcessCache::new(Duration::from_millis(20));
        let key = CacheKey {
            conversation_id: "c1".into(),
            client_id: "agent-a".into(),
        };
        cache.set(&key, entries(1));
        assert!(cache.get(&key).is_some());
        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn remove_conversation_sweeps_all_clients() {
        let cache = InProcessCache::new(Duration::from_secs(60));
        let key_a = CacheKey {
            conversation_id: "c1".into(),
            client_id: "agent-a".into(),
        };
        let key_b = CacheKey {
            conversation_id: "c1".into(),
            client_id: "agent-b".into(),
        };
        cache.set(&key_a, entries(1));
        cache.set(&key_b, entries(1));
        cache.remove_conversation("c1");
        assert!(cache.get(&key_a).is_none());
        assert!(cache.get(&key_b).is_none());
    }
}
