use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

mod app;
mod auth;
mod http;
mod vector_store;

use memsvc_access::AccessControl;
use memsvc_attachments::{AttachmentCleanupHandler, AttachmentService, AttachmentServiceConfig, FilesystemBlobStore};
use memsvc_core::config::{CacheKind, KmsProviderKind, MemsvcConfig};
use memsvc_crypto::{AttachmentSigningKeys, KeyManagementProvider, NoopKmsProvider, StaticKmsProvider};
use memsvc_eviction::{EvictionEngine, EvictionEngineConfig};
use memsvc_recorder::ResponseRecorder;
use memsvc_store::{bootstrap_encryption, ConversationStore, Db};
use memsvc_sync::{InProcessCache, MemoryCache, MemorySyncCore, NoneCache};
use memsvc_tasks::{TaskEngine, TaskEngineConfig, TaskHandler, TaskQueue, VectorStoreDeleteHandler, VectorStoreIndexRetryHandler};

use crate::auth::{build_api_key_resolver, OidcResolver, StaticOrgDirectory};
use crate::vector_store::{NoPendingIndexSource, NoopVectorStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "memsvc_api=info,tower_http=debug".into()),
        )
        .init();

    let config_path = std::env::var("MEMSVC_CONFIG").ok();
    let config = MemsvcConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("config load failed ({}), using defaults", e);
        MemsvcConfig::default()
    });

    let kms: Arc<dyn KeyManagementProvider> = match config.encryption.kms {
        KmsProviderKind::Static => {
            let key = config
                .encryption
                .key
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("encryption.kms = \"static\" requires encryption.key"))?;
            Arc::new(StaticKmsProvider::from_base64(key)?)
        }
        KmsProviderKind::Noop => Arc::new(NoopKmsProvider::new()),
    };

    let crypto = bootstrap_encryption(&config.database.path, kms)?;
    let db = Arc::new(Db::open(&config.database.path, crypto.clone())?);

    let directory = Arc::new(StaticOrgDirectory::from_roles(&config.roles));
    let access = Arc::new(AccessControl::new(db.clone(), directory));

    let store = Arc::new(ConversationStore::new(db.clone(), access.clone()));

    let mut in_process_for_reaper: Option<Arc<InProcessCache>> = None;
    let cache: Arc<dyn MemoryCache> = match config.cache.r#type {
        CacheKind::None => Arc::new(NoneCache::new()),
        CacheKind::Kv => {
            let in_process = Arc::new(InProcessCache::new(Duration::from_secs(config.cache.epoch.ttl_secs)));
            in_process_for_reaper = Some(in_process.clone());
            in_process
        }
        CacheKind::Distributed => {
            warn!("cache.type = \"distributed\" has no configured client in this deployment; falling back to \"none\"");
            Arc::new(NoneCache::new())
        }
    };
    if let Some(in_process) = in_process_for_reaper {
        spawn_cache_reaper(in_process);
    }

    let sync = Arc::new(MemorySyncCore::new(db.clone(), access.clone(), cache));
    let recorder = Arc::new(ResponseRecorder::new());

    let tasks = Arc::new(TaskQueue::open(&config.database.path)?);

    let vector_store = Arc::new(NoopVectorStore);
    let pending_index_source = Arc::new(NoPendingIndexSource);

    let blobs: Arc<dyn memsvc_attachments::BlobStore> = Arc::new(FilesystemBlobStore::new(config.attachments.storage_dir.clone()));
    let signing = AttachmentSigningKeys::derive(&crypto.live_deks()?);
    let attachments = Arc::new(AttachmentService::new(
        db.clone(),
        access.clone(),
        crypto.clone(),
        blobs,
        signing,
        AttachmentServiceConfig {
            signed_url_ttl_secs: config.attachments.signed_url_ttl_secs,
            cleanup_batch_size: config.attachments.cleanup_batch_size,
        },
    ));

    let handlers: Vec<Arc<dyn TaskHandler>> = vec![
        Arc::new(VectorStoreDeleteHandler::new(vector_store.clone())),
        Arc::new(VectorStoreIndexRetryHandler::new(vector_store, pending_index_source, config.tasks.batch_size)),
        Arc::new(AttachmentCleanupHandler::new(attachments.clone())),
    ];
    let task_engine = TaskEngine::new(
        tasks.clone(),
        handlers,
        TaskEngineConfig {
            batch_size: config.tasks.batch_size,
            retry_delay_secs: config.tasks.retry_delay_secs,
            processor_interval_secs: config.tasks.processor_interval_secs,
            stale_claim_timeout_secs: config.tasks.stale_claim_timeout_secs,
        },
        vec![memsvc_tasks::vector_store_index_retry_seed(), memsvc_attachments::attachment_cleanup_seed()],
    );
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(task_engine.run(shutdown_rx));

    let eviction = Arc::new(EvictionEngine::new(
        db.clone(),
        tasks.clone(),
        EvictionEngineConfig {
            batch_size: config.eviction.batch_size,
            require_justification: config.eviction.require_justification,
        },
    ));

    let api_key_resolver = build_api_key_resolver(&config);
    let oidc_resolver = config.oidc.as_ref().map(|oidc| OidcResolver::new(oidc.issuer.clone()));

    let bind = config.server.bind.clone();
    let port = config.server.port;

    let state = Arc::new(app::AppState {
        config,
        store,
        access,
        sync,
        recorder,
        tasks,
        eviction,
        attachments,
        api_key_resolver,
        oidc_resolver,
    });
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!("memory service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    let _ = shutdown_tx.send(true);
    Ok(())
}

fn spawn_cache_reaper(cache: Arc<InProcessCache>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            cache.reap_expired();
        }
    });
}
