pub mod cache;
pub mod core;
pub mod error;

pub use cache::{
    CacheClient, CacheKey, CacheMetricsSnapshot, CachedEntry, CachedMemoryEntries,
    DistributedCacheStub, InProcessCache, MemoryCache, NoneCache,
};
pub use core::{MemorySyncCore, SyncMessage, SyncOutcome};
pub use error::{Result, SyncError};
