use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tracing::{debug, info};

use warden_core::{AuthError, AuthResult, SubjectId, TenantId};

use crate::permissions::{PermissionMatch, best_match};
use crate::roles::{ADMIN, default_roles};
use crate::{Permission, Principal, Role, RoleGrant, RoleName};

/// A role with its inheritance resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ResolvedRole {
    /// Own permissions plus everything inherited.
    permissions: BTreeSet<Permission>,
    /// The role itself and every role it inherits from.
    ancestors: BTreeSet<RoleName>,
}

/// Immutable snapshot of the registered roles and their closures.
#[derive(Debug, Clone, Default)]
struct RoleRegistry {
    roles: HashMap<RoleName, Role>,
    resolved: HashMap<RoleName, Arc<ResolvedRole>>,
}

impl RoleRegistry {
    fn insert(&mut self, role: Role) -> AuthResult<()> {
        for parent in &role.parents {
            if *parent == role.name {
                return Err(AuthError::configuration(format!(
                    "role '{}' cannot inherit from itself",
                    role.name
                )));
            }
            let Some(resolved) = self.resolved.get(parent) else {
                return Err(AuthError::RoleNotFound(parent.to_string()));
            };
            // `parent` already inherits from `role`: adding the edge closes a loop.
            if resolved.ancestors.contains(&role.name) {
                return Err(AuthError::configuration(format!(
                    "role '{}' inheriting from '{parent}' introduces a cycle",
                    role.name
                )));
            }
        }

        let name = role.name.clone();
        let dependents: Vec<RoleName> = self
            .resolved
            .iter()
            .filter(|(other, resolved)| **other != name && resolved.ancestors.contains(&name))
            .map(|(other, _)| other.clone())
            .collect();

        self.roles.insert(name.clone(), role);
        self.resolved.remove(&name);
        for dependent in &dependents {
            self.resolved.remove(dependent);
        }

        self.resolve(&name)?;
        for dependent in &dependents {
            self.resolve(dependent)?;
        }
        Ok(())
    }

    fn resolve(&mut self, name: &RoleName) -> AuthResult<Arc<ResolvedRole>> {
        if let Some(resolved) = self.resolved.get(name) {
            return Ok(resolved.clone());
        }

        let role = self
            .roles
            .get(name)
            .cloned()
            .ok_or_else(|| AuthError::RoleNotFound(name.to_string()))?;

        let mut permissions = role.permissions.clone();
        let mut ancestors = BTreeSet::from([name.clone()]);
        for parent in &role.parents {
            let inherited = self.resolve(parent)?;
            permissions.extend(inherited.permissions.iter().cloned());
            ancestors.extend(inherited.ancestors.iter().cloned());
        }

        let resolved = Arc::new(ResolvedRole {
            permissions,
            ancestors,
        });
        self.resolved.insert(name.clone(), resolved.clone());
        Ok(resolved)
    }
}

/// Where an allowing rule came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "role")]
pub enum GrantSource {
    Role(RoleName),
    /// A permission carried directly by the principal.
    Direct,
}

/// Outcome of a permission check, with the rule that decided it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "decision")]
pub enum Decision {
    Allowed {
        rule: PermissionMatch,
        source: GrantSource,
    },
    Denied,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }

    fn consider(&mut self, rule: PermissionMatch, source: GrantSource) {
        let better = match self {
            Decision::Allowed { rule: current, .. } => rule > *current,
            Decision::Denied => true,
        };
        if better {
            *self = Decision::Allowed { rule, source };
        }
    }
}

/// Role-based access control over a registry of roles.
///
/// The registry is an immutable snapshot behind an `Arc`; registration builds
/// a new snapshot and swaps it in, so concurrent checks never observe a
/// half-applied change.
pub struct AuthorizationEngine {
    multi_tenant: bool,
    registry: RwLock<Arc<RoleRegistry>>,
}

impl AuthorizationEngine {
    /// Engine with no roles registered.
    pub fn new(multi_tenant: bool) -> Self {
        Self {
            multi_tenant,
            registry: RwLock::new(Arc::new(RoleRegistry::default())),
        }
    }

    /// Engine seeded with roles given parents first.
    pub fn with_roles(multi_tenant: bool, roles: impl IntoIterator<Item = Role>) -> AuthResult<Self> {
        let engine = Self::new(multi_tenant);
        engine.replace_roles(roles)?;
        Ok(engine)
    }

    /// Engine seeded with `viewer ⊂ user ⊂ admin ⊂ super_admin`.
    pub fn with_default_roles(multi_tenant: bool) -> AuthResult<Self> {
        Self::with_roles(multi_tenant, default_roles())
    }

    pub fn is_multi_tenant(&self) -> bool {
        self.multi_tenant
    }

    fn snapshot(&self) -> AuthResult<Arc<RoleRegistry>> {
        self.registry
            .read()
            .map(|guard| guard.clone())
            .map_err(|_| AuthError::infrastructure("role registry lock poisoned"))
    }

    /// Register (or redefine) a role. Parents must already be registered.
    pub fn register_role(&self, role: Role) -> AuthResult<()> {
        let mut guard = self
            .registry
            .write()
            .map_err(|_| AuthError::infrastructure("role registry lock poisoned"))?;

        let mut next = RoleRegistry::clone(&guard);
        let name = role.name.clone();
        next.insert(role)?;
        *guard = Arc::new(next);

        info!(role = %name, "role registered");
        Ok(())
    }

    /// Swap the whole registry for `roles`, given parents first.
    pub fn replace_roles(&self, roles: impl IntoIterator<Item = Role>) -> AuthResult<()> {
        let mut next = RoleRegistry::default();
        for role in roles {
            next.insert(role)?;
        }
        let count = next.roles.len();

        let mut guard = self
            .registry
            .write()
            .map_err(|_| AuthError::infrastructure("role registry lock poisoned"))?;
        *guard = Arc::new(next);

        info!(roles = count, "role registry replaced");
        Ok(())
    }

    pub fn role(&self, name: &RoleName) -> AuthResult<Option<Role>> {
        Ok(self.snapshot()?.roles.get(name).cloned())
    }

    /// Effective (inherited) permissions of a registered role.
    pub fn role_permissions(&self, name: &RoleName) -> AuthResult<BTreeSet<Permission>> {
        self.snapshot()?
            .resolved
            .get(name)
            .map(|resolved| resolved.permissions.clone())
            .ok_or_else(|| AuthError::RoleNotFound(name.to_string()))
    }

    /// Grants that apply when checking against `tenant`.
    fn applicable<'a>(&self, grants: &'a [RoleGrant], tenant: Option<&TenantId>) -> AuthResult<Vec<&'a RoleName>> {
        if !self.multi_tenant {
            return Ok(grants.iter().map(|g| &g.role).collect());
        }
        if tenant.is_none() {
            return Err(AuthError::configuration("multi-tenant mode requires a tenant id"));
        }
        Ok(grants
            .iter()
            .filter(|g| g.applies_to(tenant))
            .map(|g| &g.role)
            .collect())
    }

    pub fn decide(
        &self,
        grants: &[RoleGrant],
        tenant: Option<&TenantId>,
        required: &Permission,
    ) -> AuthResult<Decision> {
        let registry = self.snapshot()?;
        let mut decision = Decision::Denied;

        for role in self.applicable(grants, tenant)? {
            let Some(resolved) = registry.resolved.get(role) else {
                debug!(role = %role, "grant names an unregistered role; ignored");
                continue;
            };
            if let Some(rule) = best_match(&resolved.permissions, required) {
                decision.consider(rule, GrantSource::Role(role.clone()));
            }
        }

        Ok(decision)
    }

    /// Does any applicable grant allow `required`? A grant scoped to another
    /// tenant is simply not a match.
    pub fn check_permission(
        &self,
        grants: &[RoleGrant],
        tenant: Option<&TenantId>,
        required: &Permission,
    ) -> AuthResult<bool> {
        Ok(self.decide(grants, tenant, required)?.is_allowed())
    }

    /// Decide for a principal in its own tenant, including direct permissions.
    pub fn authorize(&self, principal: &Principal, required: &Permission) -> AuthResult<Decision> {
        let mut decision = self.decide(&principal.grants, principal.tenant.as_ref(), required)?;
        if let Some(rule) = best_match(&principal.permissions, required) {
            decision.consider(rule, GrantSource::Direct);
        }
        Ok(decision)
    }

    pub fn require_permission(&self, principal: &Principal, required: &Permission) -> AuthResult<Decision> {
        let decision = self.authorize(principal, required)?;
        if decision.is_allowed() {
            Ok(decision)
        } else {
            Err(AuthError::denied(required.to_string()))
        }
    }

    /// In multi-tenant mode, reject a principal acting outside its tenant.
    pub fn ensure_tenant(&self, principal: &Principal, tenant: &TenantId) -> AuthResult<()> {
        if self.multi_tenant && principal.tenant.as_ref() != Some(tenant) {
            return Err(AuthError::TenantMismatch);
        }
        Ok(())
    }

    /// Directly assigned roles plus everything they inherit from.
    pub fn effective_roles(&self, grants: &[RoleGrant], tenant: Option<&TenantId>) -> AuthResult<BTreeSet<RoleName>> {
        let registry = self.snapshot()?;
        let mut roles = BTreeSet::new();
        for role in self.applicable(grants, tenant)? {
            roles.insert(role.clone());
            if let Some(resolved) = registry.resolved.get(role) {
                roles.extend(resolved.ancestors.iter().cloned());
            }
        }
        Ok(roles)
    }

    pub fn has_role(&self, grants: &[RoleGrant], tenant: Option<&TenantId>, role: &RoleName) -> AuthResult<bool> {
        Ok(self.effective_roles(grants, tenant)?.contains(role))
    }

    pub fn has_any_role(
        &self,
        grants: &[RoleGrant],
        tenant: Option<&TenantId>,
        roles: &[RoleName],
    ) -> AuthResult<bool> {
        let effective = self.effective_roles(grants, tenant)?;
        Ok(roles.iter().any(|r| effective.contains(r)))
    }

    pub fn has_all_roles(
        &self,
        grants: &[RoleGrant],
        tenant: Option<&TenantId>,
        roles: &[RoleName],
    ) -> AuthResult<bool> {
        let effective = self.effective_roles(grants, tenant)?;
        Ok(roles.iter().all(|r| effective.contains(r)))
    }

    pub fn require_role(&self, principal: &Principal, role: &RoleName) -> AuthResult<()> {
        if self.has_role(&principal.grants, principal.tenant.as_ref(), role)? {
            Ok(())
        } else {
            Err(AuthError::denied(format!("role '{role}' required")))
        }
    }

    /// The owner may always act on its own resource; otherwise an admin-tier
    /// role is needed.
    pub fn check_resource_ownership(&self, principal: &Principal, owner: &SubjectId) -> AuthResult<bool> {
        if principal.subject == *owner {
            return Ok(true);
        }
        self.has_role(&principal.grants, principal.tenant.as_ref(), &RoleName::new(ADMIN))
    }

    /// Explain why `principal` is (or is not) allowed `required`.
    pub fn explain(&self, principal: &Principal, required: &Permission) -> AuthResult<AuthorizationExplanation> {
        let registry = self.snapshot()?;
        let tenant = principal.tenant.as_ref();
        let decision = self.authorize(principal, required)?;
        let applicable = self.applicable(&principal.grants, tenant)?;

        let mut effective: BTreeSet<Permission> = principal.permissions.iter().cloned().collect();
        for role in &applicable {
            if let Some(resolved) = registry.resolved.get(*role) {
                effective.extend(resolved.permissions.iter().cloned());
            }
        }

        let state = PrincipalState {
            subject: principal.subject.clone(),
            tenant: principal.tenant.clone(),
            roles: principal.role_names().map(|r| r.to_string()).collect(),
            effective_roles: self
                .effective_roles(&principal.grants, tenant)?
                .iter()
                .map(|r| r.to_string())
                .collect(),
            effective_permissions: effective.iter().map(|p| p.to_string()).collect(),
            has_wildcard: effective.iter().any(Permission::is_full_wildcard),
        };

        let required_permission = required.to_string();
        if let Decision::Allowed { rule, source } = &decision {
            let reason = match source {
                GrantSource::Role(role) => format!("role '{role}' grants '{required}' ({rule:?} rule)"),
                GrantSource::Direct => format!("principal holds '{required}' directly ({rule:?} rule)"),
            };
            return Ok(AuthorizationExplanation {
                required_permission,
                granted: true,
                matched: Some(*rule),
                reason,
                principal: state,
                denial_reason: None,
            });
        }

        let mut granting_roles: Vec<String> = registry
            .resolved
            .iter()
            .filter(|(_, resolved)| best_match(&resolved.permissions, required).is_some())
            .map(|(name, _)| name.to_string())
            .collect();
        granting_roles.sort();

        let out_of_scope = self.multi_tenant && applicable.is_empty() && !principal.grants.is_empty();
        let (kind, message) = if out_of_scope {
            (
                DenialKind::TenantMismatch,
                "none of the principal's role grants are scoped to the active tenant".to_string(),
            )
        } else {
            (
                DenialKind::MissingPermission,
                format!("missing required permission '{required}'"),
            )
        };

        let mut suggestions = vec![format!("grant '{required}' directly to the principal")];
        if !granting_roles.is_empty() {
            suggestions.insert(0, format!("assign one of the roles {granting_roles:?}"));
        }

        Ok(AuthorizationExplanation {
            required_permission,
            granted: false,
            matched: None,
            reason: format!(
                "'{required}' is not covered by {:?}",
                state.effective_permissions
            ),
            principal: state,
            denial_reason: Some(DenialReason {
                kind,
                message,
                suggestions,
            }),
        })
    }
}

/// Detailed explanation of an authorization decision.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationExplanation {
    pub required_permission: String,
    pub granted: bool,
    /// The rule that allowed the request, if any.
    pub matched: Option<PermissionMatch>,
    pub reason: String,
    pub principal: PrincipalState,
    pub denial_reason: Option<DenialReason>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrincipalState {
    pub subject: SubjectId,
    pub tenant: Option<TenantId>,
    pub roles: Vec<String>,
    pub effective_roles: Vec<String>,
    pub effective_permissions: Vec<String>,
    pub has_wildcard: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DenialReason {
    pub kind: DenialKind,
    pub message: String,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    TenantMismatch,
    MissingPermission,
}
