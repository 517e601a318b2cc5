//! Error taxonomy shared by every auth component.

use thiserror::Error;

/// Result type used across the auth core.
pub type AuthResult<T> = Result<T, AuthError>;

/// Typed failure of an authentication or authorization step.
///
/// Decisions ("denied", "expired", "locked") and evaluation failures
/// (`Infrastructure`) are distinct variants so callers never treat an
/// unreachable store as a denial or vice versa.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("token has expired")]
    TokenExpired,

    #[error("token signature is invalid")]
    TokenInvalidSignature,

    #[error("token has been revoked")]
    TokenRevoked,

    #[error("wrong token type: expected {expected}, got {actual}")]
    TokenWrongType { expected: String, actual: String },

    #[error("malformed token: {0}")]
    TokenMalformed(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("role not found: {0}")]
    RoleNotFound(String),

    #[error("tenant mismatch")]
    TenantMismatch,

    #[error("rate limit exceeded")]
    RateLimitExceeded,

    #[error("account locked")]
    AccountLocked,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("missing credentials")]
    MissingCredentials,

    #[error("configuration error: {0}")]
    Configuration(String),

    /// A store or key provider could not be reached. Not an authorization decision.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl AuthError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::TokenMalformed(msg.into())
    }

    pub fn denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn infrastructure(msg: impl Into<String>) -> Self {
        Self::Infrastructure(msg.into())
    }

    /// Stable snake_case code, safe to put in audit details.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TokenExpired => "token_expired",
            Self::TokenInvalidSignature => "token_invalid_signature",
            Self::TokenRevoked => "token_revoked",
            Self::TokenWrongType { .. } => "token_wrong_type",
            Self::TokenMalformed(_) => "token_malformed",
            Self::PermissionDenied(_) => "permission_denied",
            Self::RoleNotFound(_) => "role_not_found",
            Self::TenantMismatch => "tenant_mismatch",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::AccountLocked => "account_locked",
            Self::InvalidCredentials => "invalid_credentials",
            Self::MissingCredentials => "missing_credentials",
            Self::Configuration(_) => "configuration_error",
            Self::Infrastructure(_) => "infrastructure_error",
        }
    }

    /// True when the core could not evaluate the request at all.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Infrastructure(_))
    }

    /// True for failures that mean "the presented credential is not valid".
    pub fn is_token_error(&self) -> bool {
        matches!(
            self,
            Self::TokenExpired
                | Self::TokenInvalidSignature
                | Self::TokenRevoked
                | Self::TokenWrongType { .. }
                | Self::TokenMalformed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infrastructure_is_not_a_token_error() {
        let err = AuthError::infrastructure("redis down");
        assert!(err.is_infrastructure());
        assert!(!err.is_token_error());
        assert_eq!(err.kind(), "infrastructure_error");
    }

    #[test]
    fn wrong_type_message_names_both_types() {
        let err = AuthError::TokenWrongType {
            expected: "access".to_string(),
            actual: "refresh".to_string(),
        };
        assert!(err.is_token_error());
        assert_eq!(err.to_string(), "wrong token type: expected access, got refresh");
    }
}
