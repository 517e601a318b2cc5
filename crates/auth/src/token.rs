//! Token lifecycle: issue, verify, refresh (single use), revoke.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{DecodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use warden_core::{fingerprint, AuthError, AuthResult, Clock, SessionId, SubjectId, TenantId, TokenId};

use crate::claims::{validate_claims, ClientContext, TokenClaims, TokenType};
use crate::config::TokenSettings;
use crate::keys::{KeyProvider, SigningKey};
use crate::store::{revoked_token_key, RevocationStore};
use crate::{Permission, RoleName};

/// Everything needed to mint a token pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueRequest {
    pub subject: SubjectId,
    pub tenant: Option<TenantId>,
    pub roles: Vec<RoleName>,
    pub permissions: Vec<Permission>,
    /// Reuse an existing session id (refresh); a new one is minted otherwise.
    pub session_id: Option<SessionId>,
    pub context: ClientContext,
}

impl IssueRequest {
    pub fn new(subject: impl Into<SubjectId>) -> Self {
        Self {
            subject: subject.into(),
            tenant: None,
            roles: Vec::new(),
            permissions: Vec::new(),
            session_id: None,
            context: ClientContext::default(),
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

    pub fn permissions(mut self, permissions: impl IntoIterator<Item = Permission>) -> Self {
        self.permissions = permissions.into_iter().collect();
        self
    }

    pub fn session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn context(mut self, context: ClientContext) -> Self {
        self.context = context;
        self
    }
}

/// Access + refresh token sharing one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
    pub session_id: SessionId,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

/// Issues and checks signed tokens.
///
/// Holds no mutable state of its own: keys come from the [`KeyProvider`],
/// revocations and subject cutoffs from the [`RevocationStore`].
pub struct TokenManager {
    settings: TokenSettings,
    keys: Arc<dyn KeyProvider>,
    store: Arc<dyn RevocationStore>,
    clock: Arc<dyn Clock>,
}

impl TokenManager {
    pub fn new(
        settings: TokenSettings,
        keys: Arc<dyn KeyProvider>,
        store: Arc<dyn RevocationStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            settings,
            keys,
            store,
            clock,
        }
    }

    pub fn settings(&self) -> &TokenSettings {
        &self.settings
    }

    pub fn issue(&self, request: &IssueRequest) -> AuthResult<TokenPair> {
        let key = self.keys.signing_key()?;
        let now = self.clock.now();
        // Claims carry whole seconds; issue on a second boundary so the
        // returned expiries match what verification will see.
        let iat = DateTime::from_timestamp(now.timestamp(), 0).unwrap_or(now);
        let issued_at = truncate_to_millis(now);
        let session_id = request.session_id.unwrap_or_default();

        let access = self.claims_for(request, TokenType::Access, session_id, iat, issued_at, self.settings.access_ttl());
        let refresh =
            self.claims_for(request, TokenType::Refresh, session_id, iat, issued_at, self.settings.refresh_ttl());

        let pair = TokenPair {
            access: sign(&key, &access)?,
            refresh: sign(&key, &refresh)?,
            session_id,
            access_expires_at: access.exp,
            refresh_expires_at: refresh.exp,
        };

        debug!(
            subject = %fingerprint(request.subject.as_str()),
            session = %session_id,
            kid = %key.kid,
            "token pair issued"
        );
        Ok(pair)
    }

    fn claims_for(
        &self,
        request: &IssueRequest,
        token_type: TokenType,
        session_id: SessionId,
        iat: DateTime<Utc>,
        issued_at: DateTime<Utc>,
        ttl: Duration,
    ) -> TokenClaims {
        TokenClaims {
            jti: TokenId::new(),
            sub: request.subject.clone(),
            tenant_id: request.tenant.clone(),
            token_type,
            iat,
            issued_at,
            exp: iat + ttl,
            nbf: iat,
            iss: self.settings.issuer.clone(),
            aud: self.settings.audience.clone(),
            roles: request.roles.clone(),
            permissions: request.permissions.clone(),
            sid: session_id,
            ip: request.context.ip.clone(),
            user_agent: request.context.user_agent.clone(),
        }
    }

    /// Verify a signed token of the `expected` type and return its claims.
    pub fn verify(&self, token: &str, expected: TokenType) -> AuthResult<TokenClaims> {
        self.verify_inner(token, Some(expected))
    }

    fn verify_inner(&self, token: &str, expected: Option<TokenType>) -> AuthResult<TokenClaims> {
        let header = jsonwebtoken::decode_header(token).map_err(|e| AuthError::malformed(e.to_string()))?;
        let kid = header
            .kid
            .as_deref()
            .ok_or_else(|| AuthError::malformed("missing key id"))?;

        // Fast-fail on untrusted claims. Nothing below the signature check
        // relies on them.
        let unverified = decode_unverified(token)?;
        let now = self.clock.now();
        if unverified.is_expired(now, self.settings.leeway()) {
            return Err(AuthError::TokenExpired);
        }
        if self.store.exists(&revoked_token_key(&unverified.jti))? {
            return Err(AuthError::TokenRevoked);
        }

        let keys = self.keys.verification_keys()?;
        let key = keys.get(kid).ok_or(AuthError::TokenInvalidSignature)?;
        if header.alg != key.algorithm {
            return Err(AuthError::TokenInvalidSignature);
        }

        let claims = jsonwebtoken::decode::<TokenClaims>(token, &key.key, &claims_validation(key.algorithm))
            .map_err(map_decode_error)?
            .claims;

        validate_claims(&claims, expected.unwrap_or(claims.token_type), &self.settings, now)?;

        if let Some(cutoff) = self.store.get_invalidation(&claims.sub)? {
            if claims.issued_at <= cutoff {
                return Err(AuthError::TokenRevoked);
            }
        }

        Ok(claims)
    }

    /// Exchange a refresh token for a new pair. Each refresh token works once.
    ///
    /// The consumed token id is claimed with an atomic set-if-absent before the
    /// new pair is signed, so two concurrent refreshes of one token cannot both
    /// succeed. If signing then fails the old token stays consumed.
    pub fn refresh(&self, refresh_token: &str) -> AuthResult<TokenPair> {
        self.refresh_session(refresh_token).map(|(_, pair)| pair)
    }

    /// [`refresh`](Self::refresh), also returning the consumed token's claims.
    pub fn refresh_session(&self, refresh_token: &str) -> AuthResult<(TokenClaims, TokenPair)> {
        let claims = self.verify(refresh_token, TokenType::Refresh)?;
        let now = self.clock.now();
        let ttl = claims.remaining(now).max(Duration::seconds(1));

        if !self.store.set_if_absent(&revoked_token_key(&claims.jti), ttl)? {
            return Err(AuthError::TokenRevoked);
        }

        let request = IssueRequest {
            subject: claims.sub.clone(),
            tenant: claims.tenant_id.clone(),
            roles: claims.roles.clone(),
            permissions: claims.permissions.clone(),
            session_id: Some(claims.sid),
            context: ClientContext {
                ip: claims.ip.clone(),
                user_agent: claims.user_agent.clone(),
            },
        };
        let pair = self.issue(&request)?;
        Ok((claims, pair))
    }

    /// Revoke a token id until `expires_at` (refresh TTL when unknown).
    pub fn revoke(&self, token_id: TokenId, expires_at: Option<DateTime<Utc>>) -> AuthResult<()> {
        let now = self.clock.now();
        let ttl = match expires_at {
            Some(exp) => exp - now,
            None => self.settings.refresh_ttl(),
        };
        if ttl <= Duration::zero() {
            debug!(token = %token_id, "token already expired; nothing to revoke");
            return Ok(());
        }

        self.store.set_with_ttl(&revoked_token_key(&token_id), ttl)?;
        info!(token = %token_id, ttl_secs = ttl.num_seconds(), "token revoked");
        Ok(())
    }

    /// Verify a token of either type and revoke it for its remaining lifetime.
    pub fn revoke_token(&self, token: &str) -> AuthResult<TokenClaims> {
        let claims = self.verify_inner(token, None)?;
        self.revoke(claims.jti, Some(claims.exp))?;
        Ok(claims)
    }

    /// Reject every token of `subject` issued up to now.
    ///
    /// Cutoff and issuance times are compared in milliseconds, the precision
    /// shared stores keep.
    pub fn revoke_all_for_subject(&self, subject: &SubjectId) -> AuthResult<DateTime<Utc>> {
        let cutoff = truncate_to_millis(self.clock.now());
        self.store
            .set_invalidation(subject, cutoff, self.settings.refresh_ttl())?;
        info!(subject = %fingerprint(subject.as_str()), "all sessions revoked");
        Ok(cutoff)
    }

    pub fn is_revoked(&self, token_id: &TokenId) -> AuthResult<bool> {
        self.store.exists(&revoked_token_key(token_id))
    }
}

fn truncate_to_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}

fn sign(key: &SigningKey, claims: &TokenClaims) -> AuthResult<String> {
    let mut header = Header::new(key.algorithm);
    header.kid = Some(key.kid.clone());
    jsonwebtoken::encode(&header, claims, &key.key)
        .map_err(|e| AuthError::configuration(format!("signing with key '{}' failed: {e}", key.kid)))
}

/// Signature/algorithm checks only; time and audience rules live in
/// [`validate_claims`] so they follow the injected clock.
fn claims_validation(algorithm: jsonwebtoken::Algorithm) -> Validation {
    let mut validation = Validation::new(algorithm);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::new();
    validation
}

fn decode_unverified(token: &str) -> AuthResult<TokenClaims> {
    let mut validation = claims_validation(jsonwebtoken::Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    jsonwebtoken::decode::<TokenClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
        .map_err(|e| AuthError::malformed(e.to_string()))
}

fn map_decode_error(err: jsonwebtoken::errors::Error) -> AuthError {
    match err.kind() {
        ErrorKind::InvalidSignature
        | ErrorKind::InvalidAlgorithm
        | ErrorKind::InvalidAlgorithmName
        | ErrorKind::InvalidKeyFormat
        | ErrorKind::InvalidEcdsaKey
        | ErrorKind::InvalidRsaKey(_) => AuthError::TokenInvalidSignature,
        ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        _ => AuthError::malformed(err.to_string()),
    }
}
