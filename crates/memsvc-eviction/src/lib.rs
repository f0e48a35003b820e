pub mod duration;
pub mod engine;
pub mod error;
pub mod types;

pub use duration::parse_retention_period;
pub use engine::{EvictionEngine, EvictionEngineConfig};
pub use error::{EvictionError, Result};
pub use types::{EvictionProgress, ResourceType};
