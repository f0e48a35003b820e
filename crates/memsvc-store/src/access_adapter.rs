use memsvc_access::{GroupScope, MembershipLookup};

use crate::db::Db;
use crate::groups::GroupRepository;
use crate::memberships::MembershipRepository;

/// Wires `Db` into the access engine: the two lookups `AccessControl` needs
/// are exactly `GroupRepository::get_group` and
/// `MembershipRepository::get_membership`, re-expressed in
/// `memsvc-access`'s storage-agnostic vocabulary.
impl MembershipLookup for Db {
    fn group_scope(&self, group_id: &str) -> memsvc_access::Result<Option<GroupScope>> {
        let group = GroupRepository::get_group(self, group_id)
            .map_err(|e| memsvc_access::AccessError::DirectoryUnavailable(e.to_string()))?;
        Ok(group.map(|g| GroupScope {
            organization_id: g.organization_id,
            team_id: g.team_id,
        }))
    }

    fn direct_membership(
        &self,
        group_id: &str,
        user_id: &str,
    ) -> memsvc_access::Result<Option<memsvc_core::types::AccessLevel>> {
        MembershipRepository::get_membership(self, group_id, user_id)
            .map_err(|e| memsvc_access::AccessError::DirectoryUnavailable(e.to_string()))
    }
}
