use std::borrow::Cow;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::Permission;

/// Role identifier used for RBAC.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleName(Cow<'static, str>);

impl RoleName {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for RoleName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for RoleName {
    fn from(value: &'static str) -> Self {
        Self(Cow::Borrowed(value))
    }
}

impl From<String> for RoleName {
    fn from(value: String) -> Self {
        Self(Cow::Owned(value))
    }
}

/// Role definition: its own permissions plus the roles it inherits from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub name: RoleName,
    #[serde(default)]
    pub permissions: BTreeSet<Permission>,
    #[serde(default)]
    pub parents: BTreeSet<RoleName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Role {
    pub fn new(name: impl Into<RoleName>) -> Self {
        Self {
            name: name.into(),
            permissions: BTreeSet::new(),
            parents: BTreeSet::new(),
            description: None,
        }
    }

    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permissions.insert(permission);
        self
    }

    pub fn with_parent(mut self, parent: impl Into<RoleName>) -> Self {
        self.parents.insert(parent.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

pub const VIEWER: &str = "viewer";
pub const USER: &str = "user";
pub const ADMIN: &str = "admin";
pub const SUPER_ADMIN: &str = "super_admin";

/// Seed chain `viewer ⊂ user ⊂ admin ⊂ super_admin`, parents first.
pub fn default_roles() -> Vec<Role> {
    vec![
        Role::new(VIEWER)
            .with_permission(Permission::new("*", "read"))
            .with_permission(Permission::new("*", "list"))
            .with_description("Read-only access"),
        Role::new(USER)
            .with_parent(VIEWER)
            .with_permission(Permission::new("*", "create"))
            .with_permission(Permission::new("*", "update"))
            .with_description("Standard user"),
        Role::new(ADMIN)
            .with_parent(USER)
            .with_permission(Permission::new("*", "delete"))
            .with_permission(Permission::new("users", "*"))
            .with_permission(Permission::new("roles", "*"))
            .with_description("Tenant administrator"),
        Role::new(SUPER_ADMIN)
            .with_parent(ADMIN)
            .with_permission(Permission::all())
            .with_description("Unrestricted access"),
    ]
}
