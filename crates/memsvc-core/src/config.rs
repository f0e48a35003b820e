use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8088;
pub const DEFAULT_BIND: &str = "0.0.0.0";
/// Eviction batch size outside of tests: tens to hundreds per claim in production.
pub const DEFAULT_EVICTION_BATCH_SIZE: usize = 200;
pub const DEFAULT_TASK_BATCH_SIZE: usize = 100;
pub const DEFAULT_PROCESSOR_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 30;
pub const DEFAULT_STALE_CLAIM_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_CACHE_EPOCH_TTL_SECS: u64 = 600;
pub const DEFAULT_ATTACHMENT_CLEANUP_BATCH_SIZE: usize = 200;
pub const DEFAULT_SIGNED_URL_TTL_SECS: u64 = 900;

/// Top-level config (`memsvc.toml` + `MEMSVC_*` env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemsvcConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub encryption: EncryptionConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub eviction: EvictionConfig,
    #[serde(default)]
    pub tasks: TaskQueueConfig,
    #[serde(default)]
    pub attachments: AttachmentsConfig,
    #[serde(default)]
    pub roles: RolesConfig,
    #[serde(default)]
    pub oidc: Option<OidcConfig>,
    #[serde(default)]
    pub api_keys: std::collections::HashMap<String, Vec<String>>,
}

impl Default for MemsvcConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            encryption: EncryptionConfig::default(),
            cache: CacheConfig::default(),
            eviction: EvictionConfig::default(),
            tasks: TaskQueueConfig::default(),
            attachments: AttachmentsConfig::default(),
            roles: RolesConfig::default(),
            oidc: None,
            api_keys: std::collections::HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Honor `X-Client-ID` without validating a bearer token at all.
    /// Only meant for local integration tests.
    #[serde(default)]
    pub testing_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            testing_mode: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Encryption key material. Either a static local key (development / single
/// operator deployments) or an external KMS — the KMS itself is treated as
/// an out-of-scope collaborator, so only the static provider ships a real
/// implementation; `kms` selects which `KeyManagementProvider` the wiring
/// layer constructs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    #[serde(default = "default_kms_provider")]
    pub kms: KmsProviderKind,
    /// Base64 (standard, padded) 32-byte key used by `StaticKmsProvider`.
    /// Required unless `kms = "noop"`.
    pub key: Option<String>,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            kms: default_kms_provider(),
            key: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KmsProviderKind {
    Static,
    Noop,
}

fn default_kms_provider() -> KmsProviderKind {
    KmsProviderKind::Static
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_kind")]
    pub r#type: CacheKind,
    #[serde(default)]
    pub epoch: CacheEpochConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            r#type: default_cache_kind(),
            epoch: CacheEpochConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    None,
    Kv,
    Distributed,
}

fn default_cache_kind() -> CacheKind {
    CacheKind::Kv
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEpochConfig {
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
}

impl Default for CacheEpochConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvictionConfig {
    #[serde(default = "default_eviction_batch_size")]
    pub batch_size: usize,
    /// Whether `POST /v1/admin/evict` rejects a missing `justification` with
    /// `JustificationRequired`. Spec's concrete eviction scenarios omit
    /// `justification` entirely and still succeed, so the policy defaults
    /// to not requiring one; deployments that want an audit trail on every
    /// eviction invocation can turn this on.
    #[serde(default)]
    pub require_justification: bool,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            batch_size: default_eviction_batch_size(),
            require_justification: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskQueueConfig {
    #[serde(default = "default_task_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_processor_interval")]
    pub processor_interval_secs: u64,
    #[serde(default = "default_stale_claim_timeout")]
    pub stale_claim_timeout_secs: u64,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            batch_size: default_task_batch_size(),
            retry_delay_secs: default_retry_delay(),
            processor_interval_secs: default_processor_interval(),
            stale_claim_timeout_secs: default_stale_claim_timeout(),
        }
    }
}

/// The blob store itself is an external collaborator (spec §1); this only
/// configures the local filesystem fallback and the signed-URL lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentsConfig {
    #[serde(default = "default_attachment_storage_dir")]
    pub storage_dir: String,
    #[serde(default = "default_signed_url_ttl")]
    pub signed_url_ttl_secs: u64,
    #[serde(default = "default_attachment_cleanup_batch_size")]
    pub cleanup_batch_size: usize,
}

impl Default for AttachmentsConfig {
    fn default() -> Self {
        Self {
            storage_dir: default_attachment_storage_dir(),
            signed_url_ttl_secs: default_signed_url_ttl(),
            cleanup_batch_size: default_attachment_cleanup_batch_size(),
        }
    }
}

fn default_attachment_storage_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.memsvc/attachments", home)
}
fn default_signed_url_ttl() -> u64 {
    DEFAULT_SIGNED_URL_TTL_SECS
}
fn default_attachment_cleanup_batch_size() -> usize {
    DEFAULT_ATTACHMENT_CLEANUP_BATCH_SIZE
}

/// Maps platform roles to principals. A user or client id listed under
/// `admin` (for example) gets that role's short-circuit resolution in
/// `memsvc-access` regardless of per-group membership.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RolesConfig {
    #[serde(default)]
    pub admin: RoleBinding,
    #[serde(default)]
    pub auditor: RoleBinding,
    #[serde(default)]
    pub indexer: RoleBinding,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleBinding {
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub clients: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcConfig {
    pub issuer: String,
    pub jwks_url: String,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.memsvc/memsvc.db", home)
}
fn default_cache_ttl() -> u64 {
    DEFAULT_CACHE_EPOCH_TTL_SECS
}
fn default_eviction_batch_size() -> usize {
    DEFAULT_EVICTION_BATCH_SIZE
}
fn default_task_batch_size() -> usize {
    DEFAULT_TASK_BATCH_SIZE
}
fn default_retry_delay() -> u64 {
    DEFAULT_RETRY_DELAY_SECS
}
fn default_processor_interval() -> u64 {
    DEFAULT_PROCESSOR_INTERVAL_SECS
}
fn default_stale_claim_timeout() -> u64 {
    DEFAULT_STALE_CLAIM_TIMEOUT_SECS
}

impl MemsvcConfig {
    /// Load config from a TOML file with `MEMSVC_*` env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. `MEMSVC_CONFIG` env var
    ///   3. `~/.memsvc/memsvc.toml`
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("MEMSVC_CONFIG").ok())
            .unwrap_or_else(default_config_path);

        let config: MemsvcConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("MEMSVC_").split("_"))
            .extract()
            .map_err(|e| crate::error::MemsvcError::BadRequest(format!("config error: {e}")))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.memsvc/memsvc.toml", home)
}
