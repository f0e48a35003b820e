use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use memsvc_access::OrgDirectory;
use memsvc_core::config::{MemsvcConfig, RolesConfig};
use memsvc_core::error::{MemsvcError, Result};
use memsvc_core::types::{Identity, PlatformRole};

use crate::app::AppState;

/// Resolves a bearer credential to an [`Identity`]. `ApiKeyResolver` is the
/// one concrete implementation this repo ships (spec.md §6's `<client-id>
/// -> [keys]` mapping); OIDC access-token validation is a genuine external
/// collaborator (issuer/JWKS verification), so [`OidcResolver`] is a seam a
/// real deployment plugs a validator into rather than a working
/// implementation.
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, bearer: &str) -> Result<Identity>;
}

/// Maps a bearer token to the client id whose key list contains it, per
/// `api_keys.<client-id> = [key1, key2, ...]`. Agent clients authenticate as
/// themselves: `user_id` and `client_id` are both the matched client id.
pub struct ApiKeyResolver {
    keys: std::collections::HashMap<String, Vec<String>>,
    roles: RolesConfig,
}

impl ApiKeyResolver {
    pub fn new(keys: std::collections::HashMap<String, Vec<String>>, roles: RolesConfig) -> Self {
        Self { keys, roles }
    }
}

impl IdentityResolver for ApiKeyResolver {
    fn resolve(&self, bearer: &str) -> Result<Identity> {
        let client_id = self
            .keys
            .iter()
            .find(|(_, keys)| keys.iter().any(|k| k == bearer))
            .map(|(client_id, _)| client_id.clone())
            .ok_or_else(|| MemsvcError::Unauthorized("no API key matches this bearer token".to_string()))?;

        let roles = roles_for(&self.roles, &client_id, Some(&client_id));
        Ok(Identity {
            user_id: client_id.clone(),
            roles,
            client_id: Some(client_id),
        })
    }
}

/// OIDC access tokens are validated against a configured issuer + JWKS per
/// spec.md §6 — real signature/issuer/expiry verification is out of this
/// repo's scope (§1 Non-goals: "OIDC/JWT validation internals ... modeled as
/// pluggable traits"). This stub always declines, documenting the seam
/// rather than silently accepting unverified tokens.
pub struct OidcResolver {
    issuer: String,
}

impl OidcResolver {
    pub fn new(issuer: String) -> Self {
        Self { issuer }
    }
}

impl IdentityResolver for OidcResolver {
    fn resolve(&self, _bearer: &str) -> Result<Identity> {
        Err(MemsvcError::UpstreamUnavailable(format!(
            "OIDC validation against issuer {} is not implemented in this deployment; configure api_keys or supply a real IdentityResolver",
            self.issuer
        )))
    }
}

fn roles_for(config: &RolesConfig, user_id: &str, client_id: Option<&str>) -> Vec<PlatformRole> {
    let mut roles = Vec::new();
    for (binding, role) in [
        (&config.admin, PlatformRole::Admin),
        (&config.auditor, PlatformRole::Auditor),
        (&config.indexer, PlatformRole::Indexer),
    ] {
        let matches_user = binding.users.iter().any(|u| u == user_id);
        let matches_client = client_id
            .map(|c| binding.clients.iter().any(|cl| cl == c))
            .unwrap_or(false);
        if matches_user || matches_client {
            roles.push(role);
        }
    }
    roles
}

/// `OrgDirectory` backed by `roles.*` config rather than a real org/team
/// roster (spec.md §1: "no built-in user/org directory"). Admin-role users
/// are treated as owners/admins of every organization; team rosters have no
/// config-driven representation, so `is_team_member` is always `false`
/// until a real directory client is wired in — see DESIGN.md.
pub struct StaticOrgDirectory {
    admin_users: HashSet<String>,
}

impl StaticOrgDirectory {
    pub fn from_roles(roles: &RolesConfig) -> Self {
        Self {
            admin_users: roles.admin.users.iter().cloned().collect(),
        }
    }
}

impl OrgDirectory for StaticOrgDirectory {
    fn is_org_owner_or_admin(&self, user_id: &str, _organization_id: &str) -> bool {
        self.admin_users.contains(user_id)
    }

    fn is_team_member(&self, _user_id: &str, _team_id: &str) -> bool {
        false
    }
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn extract_client_id_header(headers: &HeaderMap) -> Option<&str> {
    headers.get("x-client-id").and_then(|v| v.to_str().ok())
}

/// Resolves the caller's identity from `Authorization: Bearer` (API key or
/// OIDC) or, only in testing mode, a bare `X-Client-ID` header — and inserts
/// it as a request extension every handler consumes via
/// `Extension<Identity>`.
pub async fn resolve_identity(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> std::result::Result<Response, MemsvcError> {
    let headers = request.headers();

    let identity = if state.config.server.testing_mode {
        if let Some(client_id) = extract_client_id_header(headers) {
            Some(Identity {
                user_id: client_id.to_string(),
                roles: roles_for(&state.config.roles, client_id, Some(client_id)),
                client_id: Some(client_id.to_string()),
            })
        } else {
            None
        }
    } else {
        None
    };

    let identity = match identity {
        Some(identity) => identity,
        None => {
            let bearer = extract_bearer(headers)
                .ok_or_else(|| MemsvcError::Unauthorized("missing Authorization header".to_string()))?;
            match state.api_key_resolver.resolve(bearer) {
                Ok(identity) => identity,
                Err(api_key_err) => match &state.oidc_resolver {
                    Some(resolver) => resolver.resolve(bearer)?,
                    None => return Err(api_key_err),
                },
            }
        }
    };

    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

pub fn build_api_key_resolver(config: &MemsvcConfig) -> ApiKeyResolver {
    ApiKeyResolver::new(config.api_keys.clone(), config.roles.clone())
}
