use serde::{Deserialize, Serialize};

use warden_core::{SessionId, SubjectId, TenantId, TokenId};

use crate::{Permission, RoleName, TokenClaims};

/// A role granted to a principal, scoped to the tenant it was assigned in.
///
/// In multi-tenant mode a grant only applies to checks against the same
/// tenant; an unscoped grant (`tenant: None`) applies nowhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleGrant {
    pub role: RoleName,
    pub tenant: Option<TenantId>,
}

impl RoleGrant {
    pub fn new(role: impl Into<RoleName>, tenant: Option<TenantId>) -> Self {
        Self {
            role: role.into(),
            tenant,
        }
    }

    pub fn scoped(role: impl Into<RoleName>, tenant: impl Into<TenantId>) -> Self {
        Self::new(role, Some(tenant.into()))
    }

    pub fn unscoped(role: impl Into<RoleName>) -> Self {
        Self::new(role, None)
    }

    pub fn applies_to(&self, tenant: Option<&TenantId>) -> bool {
        match (&self.tenant, tenant) {
            (Some(granted), Some(requested)) => granted == requested,
            _ => false,
        }
    }
}

/// How the principal proved its identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Bearer,
    ApiKey,
    Password,
}

/// A fully resolved principal for authorization decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub subject: SubjectId,
    pub tenant: Option<TenantId>,
    pub grants: Vec<RoleGrant>,
    /// Permissions granted directly (not through a role), scoped to `tenant`.
    pub permissions: Vec<Permission>,
    pub session_id: Option<SessionId>,
    pub token_id: Option<TokenId>,
    pub method: AuthMethod,
}

impl Principal {
    /// Build a principal from verified claims; every role is scoped to the
    /// token's tenant.
    pub fn from_claims(claims: &TokenClaims) -> Self {
        let grants = claims
            .roles
            .iter()
            .map(|role| RoleGrant::new(role.clone(), claims.tenant_id.clone()))
            .collect();

        Self {
            subject: claims.sub.clone(),
            tenant: claims.tenant_id.clone(),
            grants,
            permissions: claims.permissions.clone(),
            session_id: Some(claims.sid),
            token_id: Some(claims.jti),
            method: AuthMethod::Bearer,
        }
    }

    pub fn role_names(&self) -> impl Iterator<Item = &RoleName> {
        self.grants.iter().map(|g| &g.role)
    }
}
