//! Credential checks that live outside the core: password verification and
//! API keys. Hashing internals belong to the implementor.

use std::collections::HashMap;

use warden_core::{AuthError, AuthResult, SubjectId, TenantId, fingerprint};

use crate::{Permission, Principal, RoleName};

/// Who a credential check resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub subject: SubjectId,
    pub tenant: Option<TenantId>,
    pub roles: Vec<RoleName>,
    pub permissions: Vec<Permission>,
}

impl VerifiedIdentity {
    pub fn new(subject: impl Into<SubjectId>) -> Self {
        Self {
            subject: subject.into(),
            tenant: None,
            roles: Vec::new(),
            permissions: Vec::new(),
        }
    }

    pub fn tenant(mut self, tenant: impl Into<TenantId>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    pub fn roles<R: Into<RoleName>>(mut self, roles: impl IntoIterator<Item = R>) -> Self {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }
}

pub trait CredentialVerifier: Send + Sync {
    /// Check `password` for `account`.
    ///
    /// Unknown accounts and wrong passwords must both yield
    /// [`AuthError::InvalidCredentials`]; anything else is not counted as a
    /// failed attempt.
    fn verify_password(&self, account: &str, password: &str) -> AuthResult<VerifiedIdentity>;
}

pub trait ApiKeyValidator: Send + Sync {
    /// Resolve an API key to its principal, or `InvalidCredentials`.
    fn validate(&self, api_key: &str) -> AuthResult<Principal>;
}

/// API keys held by fingerprint, for small deployments and tests.
#[derive(Debug, Default)]
pub struct StaticApiKeys {
    keys: HashMap<String, Principal>,
}

impl StaticApiKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, api_key: &str, principal: Principal) -> Self {
        self.keys.insert(fingerprint(api_key), principal);
        self
    }
}

impl ApiKeyValidator for StaticApiKeys {
    fn validate(&self, api_key: &str) -> AuthResult<Principal> {
        self.keys
            .get(&fingerprint(api_key))
            .cloned()
            .ok_or(AuthError::InvalidCredentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AuthMethod, RoleGrant};

    #[test]
    fn static_keys_match_by_fingerprint() {
        let principal = Principal {
            subject: SubjectId::new("svc-billing"),
            tenant: Some(TenantId::new("t1")),
            grants: vec![RoleGrant::scoped("user", "t1")],
            permissions: Vec::new(),
            session_id: None,
            token_id: None,
            method: AuthMethod::ApiKey,
        };
        let keys = StaticApiKeys::new().with_key("wk_live_abc", principal.clone());

        assert_eq!(keys.validate("wk_live_abc"), Ok(principal));
        assert_eq!(keys.validate("wk_live_abd"), Err(AuthError::InvalidCredentials));
        assert!(!format!("{keys:?}").contains("wk_live_abc"));
    }
}
