//! `warden-auth`: token lifecycle, role-based authorization and the guards
//! around them.
//!
//! Nothing here speaks HTTP or owns storage. Shared state goes through a
//! [`RevocationStore`], key material through a [`KeyProvider`], and time
//! through a [`warden_core::Clock`].

pub mod audit;
pub mod authenticator;
pub mod authorize;
pub mod claims;
pub mod config;
pub mod credentials;
pub mod guard;
pub mod keys;
pub mod permissions;
pub mod principal;
pub mod rate_limit;
pub mod roles;
pub mod store;
pub mod token;

pub use audit::{AuditEvent, AuditEventType, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use authenticator::{AuthOutcome, ExemptPaths, InboundRequest, RequestAuthenticator};
pub use authorize::{AuthorizationEngine, AuthorizationExplanation, Decision, DenialKind, GrantSource};
pub use claims::{ClientContext, TokenClaims, TokenType, validate_claims};
pub use config::{AuthConfig, GuardSettings, LockoutPolicy, RateLimitSettings, TokenSettings};
pub use credentials::{ApiKeyValidator, CredentialVerifier, StaticApiKeys, VerifiedIdentity};
pub use guard::{AttemptSource, BruteForceGuard, GuardState, IdentifierScope};
pub use keys::{KeyProvider, KeyRing, KeySpec, SigningKey, VerificationKey};
pub use permissions::{Permission, PermissionMatch};
pub use principal::{AuthMethod, Principal, RoleGrant};
pub use rate_limit::RateLimiter;
pub use roles::{Role, RoleName, default_roles};
pub use store::{InMemoryRevocationStore, RevocationStore};
pub use token::{IssueRequest, TokenManager, TokenPair};
