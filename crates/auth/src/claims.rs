use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use warden_core::{AuthError, AuthResult, SessionId, SubjectId, TenantId, TokenId};

use crate::config::TokenSettings;
use crate::{Permission, RoleName};

/// Access or refresh. Fixed at issuance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

impl core::fmt::Display for TokenType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signed claims carried by every token.
///
/// Timestamps travel as NumericDate seconds, plus `iat_ms` which repeats the
/// issuance instant in milliseconds for subject cutoffs. Every field without
/// a serde default is required: a token missing one fails to decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub jti: TokenId,
    pub sub: SubjectId,
    #[serde(rename = "tid", default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<TenantId>,
    #[serde(rename = "typ")]
    pub token_type: TokenType,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub iat: DateTime<Utc>,
    #[serde(rename = "iat_ms", with = "chrono::serde::ts_milliseconds")]
    pub issued_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub exp: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub nbf: DateTime<Utc>,
    pub iss: String,
    pub aud: String,
    pub roles: Vec<RoleName>,
    #[serde(rename = "perms")]
    pub permissions: Vec<Permission>,
    pub sid: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(rename = "ua", default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl TokenClaims {
    /// Time left before `exp`, never negative.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.exp - now).max(Duration::zero())
    }

    pub fn is_expired(&self, now: DateTime<Utc>, leeway: Duration) -> bool {
        now >= self.exp + leeway
    }
}

/// Client details bound into a token at issuance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientContext {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientContext {
    pub fn new(ip: Option<&str>, user_agent: Option<&str>) -> Self {
        Self {
            ip: ip.map(str::to_string),
            user_agent: user_agent.map(str::to_string),
        }
    }
}

/// Validate claims that were already signature-checked.
///
/// Expiry is checked here as well as in the pre-signature fast path so this
/// function is complete on its own.
pub fn validate_claims(
    claims: &TokenClaims,
    expected: TokenType,
    settings: &TokenSettings,
    now: DateTime<Utc>,
) -> AuthResult<()> {
    if claims.exp <= claims.iat {
        return Err(AuthError::malformed("invalid time window (exp <= iat)"));
    }

    let leeway = settings.leeway();
    if claims.is_expired(now, leeway) {
        return Err(AuthError::TokenExpired);
    }
    if now + leeway < claims.nbf {
        return Err(AuthError::malformed("token not yet valid"));
    }
    if claims.iss != settings.issuer {
        return Err(AuthError::malformed("unexpected issuer"));
    }
    if claims.aud != settings.audience {
        return Err(AuthError::malformed("unexpected audience"));
    }
    if claims.token_type != expected {
        return Err(AuthError::TokenWrongType {
            expected: expected.to_string(),
            actual: claims.token_type.to_string(),
        });
    }

    Ok(())
}
