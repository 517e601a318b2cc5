use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use warden_core::{AuthError, AuthResult};

/// Matches any resource type or any action.
pub const WILDCARD: &str = "*";

/// Permission on a resource type, e.g. `users:read`.
///
/// Either half may be the wildcard `*`. On the wire a permission is the string
/// `"resource:action"`; a bare `"*"` is shorthand for `"*:*"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Permission {
    resource: Cow<'static, str>,
    action: Cow<'static, str>,
}

/// How a granted permission covered a required one, most specific last.
///
/// `ResourceWildcard` is a grant scoped to one resource with any action
/// (`users:*`); `ActionWildcard` is one action on any resource (`*:read`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMatch {
    FullWildcard,
    ActionWildcard,
    ResourceWildcard,
    Exact,
}

impl Permission {
    pub fn new(resource: impl Into<Cow<'static, str>>, action: impl Into<Cow<'static, str>>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
        }
    }

    /// `*:*`
    pub fn all() -> Self {
        Self::new(WILDCARD, WILDCARD)
    }

    pub fn parse(value: &str) -> AuthResult<Self> {
        let value = value.trim();
        if value == WILDCARD {
            return Ok(Self::all());
        }

        let (resource, action) = value
            .split_once(':')
            .ok_or_else(|| AuthError::configuration(format!("permission '{value}' is not 'resource:action'")))?;

        if resource.is_empty() || action.is_empty() || action.contains(':') {
            return Err(AuthError::configuration(format!(
                "permission '{value}' is not 'resource:action'"
            )));
        }

        Ok(Self::new(resource.to_string(), action.to_string()))
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn is_full_wildcard(&self) -> bool {
        self.resource == WILDCARD && self.action == WILDCARD
    }

    /// Does this (granted) permission cover `required`?
    ///
    /// A required wildcard is only covered by a grant that is at least as broad,
    /// so `users:read` never satisfies a check for `users:*`.
    pub fn covers(&self, required: &Permission) -> Option<PermissionMatch> {
        let resource_ok = self.resource == WILDCARD || self.resource == required.resource;
        let action_ok = self.action == WILDCARD || self.action == required.action;
        if !(resource_ok && action_ok) {
            return None;
        }

        Some(match (self.resource == WILDCARD, self.action == WILDCARD) {
            (false, false) => PermissionMatch::Exact,
            (false, true) => PermissionMatch::ResourceWildcard,
            (true, false) => PermissionMatch::ActionWildcard,
            (true, true) => PermissionMatch::FullWildcard,
        })
    }
}

/// The most specific rule among `granted` that covers `required`.
pub fn best_match<'a>(
    granted: impl IntoIterator<Item = &'a Permission>,
    required: &Permission,
) -> Option<PermissionMatch> {
    granted.into_iter().filter_map(|p| p.covers(required)).max()
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.resource, self.action)
    }
}

impl From<Permission> for String {
    fn from(value: Permission) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for Permission {
    type Error = AuthError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl core::str::FromStr for Permission {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
