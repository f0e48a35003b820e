use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Generates a new time-sortable primary key. Every entity in this service
/// uses a UUIDv7 id so log correlation and pagination cursors stay sane
/// without a separate sequence column.
pub fn new_id() -> String {
    Uuid::now_v7().to_string()
}

/// The three channels an [`Entry`](crate) can belong to.
///
/// `HISTORY` is user-visible conversation turns, `MEMORY` is agent-scoped
/// working memory keyed additionally by client id, `SUMMARY` is a derived,
/// unscoped summary. Modeled as a tagged enum (not per-channel types) per
/// the "explicit tagged variants, not per-type classes" guidance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Channel {
    History,
    Memory,
    Summary,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::History => write!(f, "HISTORY"),
            Channel::Memory => write!(f, "MEMORY"),
            Channel::Summary => write!(f, "SUMMARY"),
        }
    }
}

impl std::str::FromStr for Channel {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "HISTORY" => Ok(Channel::History),
            "MEMORY" => Ok(Channel::Memory),
            "SUMMARY" => Ok(Channel::Summary),
            other => Err(format!("unknown channel: {other}")),
        }
    }
}

/// Access level ordering: `Reader < Writer < Manager < Owner`.
///
/// Derived `PartialOrd`/`Ord` give the total order directly in field-declaration
/// order — this is a genuine linear scale, with no hand-matched comparison
/// table needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccessLevel {
    Reader,
    Writer,
    Manager,
    Owner,
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessLevel::Reader => write!(f, "READER"),
            AccessLevel::Writer => write!(f, "WRITER"),
            AccessLevel::Manager => write!(f, "MANAGER"),
            AccessLevel::Owner => write!(f, "OWNER"),
        }
    }
}

impl std::str::FromStr for AccessLevel {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "READER" => Ok(AccessLevel::Reader),
            "WRITER" => Ok(AccessLevel::Writer),
            "MANAGER" => Ok(AccessLevel::Manager),
            "OWNER" => Ok(AccessLevel::Owner),
            other => Err(format!("unknown access level: {other}")),
        }
    }
}

/// Platform-wide role, independent of any single group's memberships.
/// Configured via `roles.{admin,auditor,indexer}.*` (see `memsvc_core::config`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformRole {
    Admin,
    Auditor,
    Indexer,
}

/// The caller of a core operation: a resolved user id, zero or more platform
/// roles, and — for agent-authenticated callers — a client id that scopes
/// `MEMORY` channel visibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub roles: Vec<PlatformRole>,
    pub client_id: Option<String>,
}

impl Identity {
    pub fn has_role(&self, role: PlatformRole) -> bool {
        self.roles.contains(&role)
    }
}

/// Listing mode for `listConversations`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListMode {
    All,
    Roots,
    LatestFork,
}

impl std::str::FromStr for ListMode {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "all" => Ok(ListMode::All),
            "roots" => Ok(ListMode::Roots),
            "latest_fork" => Ok(ListMode::LatestFork),
            other => Err(format!("unknown list mode: {other}")),
        }
    }
}

/// `epoch_filter` for `getEntries` on the `MEMORY` channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochFilter {
    All,
    Latest,
    Epoch(i64),
}
