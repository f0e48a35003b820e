use std::sync::Arc;

use memsvc_core::types::{AccessLevel, Identity, PlatformRole};

use crate::error::{AccessError, Result};
use crate::ports::{MembershipLookup, OrgDirectory};

/// How a resolved access level was obtained. Only `PlatformRole` (admin
/// bypass specifically) triggers the justification requirement on writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessSource {
    PlatformRole(PlatformRole),
    Direct,
    ImplicitOrg,
    ImplicitTeam,
}

#[derive(Debug, Clone, Copy)]
pub struct ResolvedAccess {
    pub level: AccessLevel,
    pub via: AccessSource,
}

/// The single gate every conversation-store operation calls before touching
/// data. Resolution order is fixed: platform role, then direct membership,
/// then implicit org/team membership, else denied.
pub struct AccessControl {
    memberships: Arc<dyn MembershipLookup>,
    directory: Arc<dyn OrgDirectory>,
}

impl AccessControl {
    pub fn new(memberships: Arc<dyn MembershipLookup>, directory: Arc<dyn OrgDirectory>) -> Self {
        Self {
            memberships,
            directory,
        }
    }

    /// Resolve the actor's effective access to `group_id`, or `None` if no
    /// rule grants any access at all.
    pub fn resolve(&self, actor: &Identity, group_id: &str) -> Result<Option<ResolvedAccess>> {
        if actor.has_role(PlatformRole::Admin) {
            return Ok(Some(ResolvedAccess {
                level: AccessLevel::Owner,
                via: AccessSource::PlatformRole(PlatformRole::Admin),
            }));
        }
        if actor.has_role(PlatformRole::Auditor) {
            return Ok(Some(ResolvedAccess {
                level: AccessLevel::Reader,
                via: AccessSource::PlatformRole(PlatformRole::Auditor),
            }));
        }

        if let Some(level) = self.memberships.direct_membership(group_id, &actor.user_id)? {
            return Ok(Some(ResolvedAccess {
                level,
                via: AccessSource::Direct,
            }));
        }

        if let Some(scope) = self.memberships.group_scope(group_id)? {
            if let Some(org_id) = &scope.organization_id {
                if self.directory.is_org_owner_or_admin(&actor.user_id, org_id) {
                    return Ok(Some(ResolvedAccess {
                        level: AccessLevel::Manager,
                        via: AccessSource::ImplicitOrg,
                    }));
                }
            }
            if let Some(team_id) = &scope.team_id {
                if self.directory.is_team_member(&actor.user_id, team_id) {
                    return Ok(Some(ResolvedAccess {
                        level: AccessLevel::Writer,
                        via: AccessSource::ImplicitTeam,
                    }));
                }
            }
        }

        Ok(None)
    }

    /// Visible-but-insufficient access fails with `AccessDenied`; no
    /// resolvable access at all fails with `NotFound` so a private
    /// conversation's existence isn't leaked to
    /// strangers.
    pub fn require_at_least(
        &self,
        actor: &Identity,
        group_id: &str,
        required: AccessLevel,
    ) -> Result<ResolvedAccess> {
        match self.resolve(actor, group_id)? {
            None => Err(AccessError::NotFound),
            Some(resolved) if resolved.level >= required => Ok(resolved),
            Some(_) => Err(AccessError::AccessDenied(format!(
                "{required} access required"
            ))),
        }
    }

    /// Same as `require_at_least`, but admin-bypass writes additionally
    /// require a caller-supplied justification (`JustificationRequired`).
    /// Non-admin and read-level access never need one.
    pub fn require_at_least_justified(
        &self,
        actor: &Identity,
        group_id: &str,
        required: AccessLevel,
        justification: Option<&str>,
    ) -> Result<ResolvedAccess> {
        let resolved = self.require_at_least(actor, group_id, required)?;
        let is_admin_bypass = matches!(resolved.via, AccessSource::PlatformRole(PlatformRole::Admin));
        let is_write = required >= AccessLevel::Writer;
        if is_admin_bypass && is_write && justification.unwrap_or("").trim().is_empty() {
            return Err(AccessError::JustificationRequired);
        }
        Ok(resolved)
    }

    /// Indexer is a narrow platform role: it only grants write access to
    /// index projections, never general group access, so it is checked
    /// separately from `require_at_least`.
    pub fn require_indexer(&self, actor: &Identity) -> Result<()> {
        if actor.has_role(PlatformRole::Indexer) {
            Ok(())
        } else {
            Err(AccessError::AccessDenied(
                "indexer platform role required".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::GroupScope;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeMemberships {
        scopes: HashMap<String, GroupScope>,
        direct: Mutex<HashMap<(String, String), AccessLevel>>,
    }

    impl MembershipLookup for FakeMemberships {
        fn group_scope(&self, group_id: &str) -> Result<Option<GroupScope>> {
            Ok(self.scopes.get(group_id).cloned())
        }

        fn direct_membership(&self, group_id: &str, user_id: &str) -> Result<Option<AccessLevel>> {
            Ok(self
                .direct
                .lock()
                .unwrap()
                .get(&(group_id.to_string(), user_id.to_string()))
                .copied())
        }
    }

    struct FakeDirectory;
    impl OrgDirectory for FakeDirectory {
        fn is_org_owner_or_admin(&self, user_id: &str, organization_id: &str) -> bool {
            user_id == "org-boss" && organization_id == "acme"
        }
        fn is_team_member(&self, user_id: &str, team_id: &str) -> bool {
            user_id == "teammate" && team_id == "eng"
        }
    }

    fn identity(user_id: &str, roles: Vec<PlatformRole>) -> Identity {
        Identity {
            user_id: user_id.to_string(),
            roles,
            client_id: None,
        }
    }

    fn engine(scopes: HashMap<String, GroupScope>, direct: HashMap<(String, String), AccessLevel>) -> AccessControl {
        AccessControl::new(
            Arc::new(FakeMemberships {
                scopes,
                direct: Mutex::new(direct),
            }),
            Arc::new(FakeDirectory),
        )
    }

    #[test]
    fn admin_bypasses_without_membership() {
        let eng = engine(HashMap::new(), HashMap::new());
        let admin = identity("root", vec![PlatformRole::Admin]);
        let resolved = eng.require_at_least(&admin, "g1", AccessLevel::Owner).unwrap();
        assert_eq!(resolved.level, AccessLevel::Owner);
    }

    #[test]
    fn admin_write_without_justification_is_rejected() {
        let eng = engine(HashMap::new(), HashMap::new());
        let admin = identity("root", vec![PlatformRole::Admin]);
        let err = eng
            .require_at_least_justified(&admin, "g1", AccessLevel::Writer, None)
            .unwrap_err();
        assert!(matches!(err, AccessError::JustificationRequired));

        eng.require_at_least_justified(&admin, "g1", AccessLevel::Writer, Some("ticket-42"))
            .unwrap();
    }

    #[test]
    fn auditor_is_read_only() {
        let eng = engine(HashMap::new(), HashMap::new());
        let auditor = identity("eyes", vec![PlatformRole::Auditor]);
        eng.require_at_least(&auditor, "g1", AccessLevel::Reader).unwrap();
        let err = eng
            .require_at_least(&auditor, "g1", AccessLevel::Writer)
            .unwrap_err();
        assert!(matches!(err, AccessError::AccessDenied(_)));
    }

    #[test]
    fn direct_membership_wins_over_no_access() {
        let mut direct = HashMap::new();
        direct.insert(("g1".to_string(), "alice".to_string()), AccessLevel::Writer);
        let eng = engine(HashMap::new(), direct);
        let alice = identity("alice", vec![]);
        let resolved = eng.require_at_least(&alice, "g1", AccessLevel::Writer).unwrap();
        assert_eq!(resolved.level, AccessLevel::Writer);
    }

    #[test]
    fn implicit_org_admin_is_capped_at_manager() {
        let mut scopes = HashMap::new();
        scopes.insert(
            "g1".to_string(),
            GroupScope {
                organization_id: Some("acme".to_string()),
                team_id: None,
            },
        );
        let eng = engine(scopes, HashMap::new());
        let boss = identity("org-boss", vec![]);
        let resolved = eng.require_at_least(&boss, "g1", AccessLevel::Manager).unwrap();
        assert_eq!(resolved.level, AccessLevel::Manager);
        let err = eng.require_at_least(&boss, "g1", AccessLevel::Owner).unwrap_err();
        assert!(matches!(err, AccessError::AccessDenied(_)));
    }

    #[test]
    fn implicit_team_member_gets_writer() {
        let mut scopes = HashMap::new();
        scopes.insert(
            "g1".to_string(),
            GroupScope {
                organization_id: None,
                team_id: Some("eng".to_string()),
            },
        );
        let eng = engine(scopes, HashMap::new());
        let dev = identity("teammate", vec![]);
        let resolved = eng.require_at_least(&dev, "g1", AccessLevel::Writer).unwrap();
        assert_eq!(resolved.level, AccessLevel::Writer);
    }

    #[test]
    fn stranger_gets_not_found_not_access_denied() {
        let eng = engine(HashMap::new(), HashMap::new());
        let stranger = identity("nobody", vec![]);
        let err = eng
            .require_at_least(&stranger, "g1", AccessLevel::Reader)
            .unwrap_err();
        assert!(matches!(err, AccessError::NotFound));
    }
}
