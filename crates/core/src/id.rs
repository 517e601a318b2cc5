//! Strongly-typed identifiers used across the auth core.

use core::str::FromStr;
use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AuthError;

/// Identifier of a tenant (isolation boundary for role grants).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(Cow<'static, str>);

/// Identifier of the principal a token is issued to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(Cow<'static, str>);

/// Unique identifier of one issued token (`jti`).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(Uuid);

/// Identifier shared by the access and refresh token of one session.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

macro_rules! impl_str_newtype {
    ($t:ty) => {
        impl $t {
            pub fn new(value: impl Into<Cow<'static, str>>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&'static str> for $t {
            fn from(value: &'static str) -> Self {
                Self(Cow::Borrowed(value))
            }
        }

        impl From<String> for $t {
            fn from(value: String) -> Self {
                Self(Cow::Owned(value))
            }
        }
    };
}

macro_rules! impl_uuid_newtype {
    ($t:ty, $name:literal, $generate:path) => {
        impl $t {
            /// Create a new identifier.
            pub fn new() -> Self {
                Self($generate())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = AuthError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| AuthError::malformed(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

impl_str_newtype!(TenantId);
impl_str_newtype!(SubjectId);

// Token ids are random so they cannot be predicted from issuance order.
impl_uuid_newtype!(TokenId, "TokenId", Uuid::new_v4);
impl_uuid_newtype!(SessionId, "SessionId", Uuid::now_v7);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_ids_are_unique() {
        let a = TokenId::new();
        let b = TokenId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn token_id_parse_failure_is_malformed() {
        let err = "not-a-uuid".parse::<TokenId>().unwrap_err();
        assert!(matches!(err, AuthError::TokenMalformed(msg) if msg.starts_with("TokenId")));
    }

    #[test]
    fn string_ids_serialize_transparently() {
        let tenant = TenantId::new("t1");
        assert_eq!(serde_json::to_string(&tenant).unwrap(), "\"t1\"");
        let back: TenantId = serde_json::from_str("\"t1\"").unwrap();
        assert_eq!(back, tenant);
    }
}
