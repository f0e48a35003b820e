use memsvc_core::types::AccessLevel;

use crate::error::Result;

/// The organization/team a conversation group belongs to, if any. Groups
/// created outside an organization context have both fields `None` and
/// never resolve implicit access.
#[derive(Debug, Clone, Default)]
pub struct GroupScope {
    pub organization_id: Option<String>,
    pub team_id: Option<String>,
}

/// What `memsvc-store` exposes to the access engine: the group's org/team
/// scope, and any direct `(group, user)` membership row. Kept narrow and
/// store-agnostic so `memsvc-access` has no dependency on a SQL driver.
pub trait MembershipLookup: Send + Sync {
    fn group_scope(&self, group_id: &str) -> Result<Option<GroupScope>>;
    fn direct_membership(&self, group_id: &str, user_id: &str) -> Result<Option<AccessLevel>>;
}

/// Organization/team roster checks. This is a seam, not a feature: roster
/// data belongs to an identity system outside this repo; this crate never
/// models an org/user directory itself. `memsvc-api` wires a concrete
/// implementation sourced from the same role configuration used for
/// platform roles.
pub trait OrgDirectory: Send + Sync {
    fn is_org_owner_or_admin(&self, user_id: &str, organization_id: &str) -> bool;
    fn is_team_member(&self, user_id: &str, team_id: &str) -> bool;
}

/// An `OrgDirectory` that never grants implicit access. Correct default for
/// deployments that don't model organizations or teams at all.
pub struct NoOrgDirectory;

impl OrgDirectory for NoOrgDirectory {
    fn is_org_owner_or_admin(&self, _user_id: &str, _organization_id: &str) -> bool {
        false
    }

    fn is_team_member(&self, _user_id: &str, _team_id: &str) -> bool {
        false
    }
}
