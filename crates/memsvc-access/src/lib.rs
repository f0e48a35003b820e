pub mod engine;
pub mod error;
pub mod ports;

pub use engine::{AccessControl, AccessSource, ResolvedAccess};
pub use error::{AccessError, Result};
pub use ports::{GroupScope, MembershipLookup, NoOrgDirectory, OrgDirectory};
