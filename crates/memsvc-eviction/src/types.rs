use serde::Serialize;

/// Closed set of resource types eviction knows how to sweep. `conversations`
/// is the only member today; an unrecognized string is a `BadRequest`, not a
/// silent no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Conversations,
}

impl std::str::FromStr for ResourceType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "conversations" => Ok(ResourceType::Conversations),
            other => Err(format!("unknown resource type: {other}")),
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceType::Conversations => write!(f, "conversations"),
        }
    }
}

/// One progress event emitted after each hard-delete batch, per spec §4.I.4.
#[derive(Debug, Clone, Serialize)]
pub struct EvictionProgress {
    pub phase: String,
    pub done: i64,
    pub total: i64,
    pub percent: f64,
}
