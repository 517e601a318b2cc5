//! Per-request orchestration: exempt paths, rate limiting, credential
//! extraction, verification and auditing. Mapping errors to status codes is
//! left to the HTTP layer.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use warden_core::{AuthError, AuthResult, Clock, SubjectId};

use crate::audit::{AuditEvent, AuditEventType, AuditSink, TracingAuditSink};
use crate::claims::{ClientContext, TokenType};
use crate::config::AuthConfig;
use crate::credentials::{ApiKeyValidator, CredentialVerifier};
use crate::guard::{AttemptSource, BruteForceGuard, GuardState};
use crate::rate_limit::RateLimiter;
use crate::store::RevocationStore;
use crate::token::{IssueRequest, TokenManager, TokenPair};
use crate::{AuthMethod, Principal};

/// Paths that skip authentication. An entry ending in `*` matches by prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExemptPaths(Vec<String>);

impl ExemptPaths {
    pub fn new<S: Into<String>>(paths: impl IntoIterator<Item = S>) -> Self {
        Self(paths.into_iter().map(Into::into).collect())
    }

    pub fn is_exempt(&self, path: &str) -> bool {
        self.0.iter().any(|entry| match entry.strip_suffix('*') {
            Some(prefix) => path.starts_with(prefix),
            None => path == entry,
        })
    }
}

/// The parts of an inbound call the authenticator looks at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InboundRequest<'a> {
    pub path: &'a str,
    /// Raw `Authorization` header value.
    pub authorization: Option<&'a str>,
    pub api_key: Option<&'a str>,
    pub ip: Option<&'a str>,
    pub user_agent: Option<&'a str>,
}

impl<'a> InboundRequest<'a> {
    pub fn new(path: &'a str) -> Self {
        Self {
            path,
            ..Self::default()
        }
    }

    pub fn authorization(mut self, value: &'a str) -> Self {
        self.authorization = Some(value);
        self
    }

    pub fn api_key(mut self, value: &'a str) -> Self {
        self.api_key = Some(value);
        self
    }

    pub fn ip(mut self, value: &'a str) -> Self {
        self.ip = Some(value);
        self
    }

    pub fn user_agent(mut self, value: &'a str) -> Self {
        self.user_agent = Some(value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Exempt,
    Authenticated(Principal),
}

enum Credential<'a> {
    Bearer(&'a str),
    ApiKey(&'a str),
}

/// Rate-limit bucket for a request: the client address, or the presented
/// credential when no address is known. `None` means nothing identifies the
/// caller; such requests are not counted and fail credential extraction.
fn rate_limit_client(request: &InboundRequest<'_>) -> Option<String> {
    match (request.ip, request.authorization.or(request.api_key)) {
        (Some(ip), _) => Some(format!("ip:{ip}")),
        (None, Some(credential)) => Some(format!("credential:{}", credential.trim())),
        (None, None) => None,
    }
}

fn extract_credential<'a>(request: &InboundRequest<'a>) -> AuthResult<Credential<'a>> {
    if let Some(header) = request.authorization {
        let (scheme, value) = header
            .trim()
            .split_once(' ')
            .ok_or_else(|| AuthError::malformed("authorization header has no scheme"))?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return Err(AuthError::malformed("unsupported authorization scheme"));
        }
        let token = value.trim();
        if token.is_empty() {
            return Err(AuthError::MissingCredentials);
        }
        return Ok(Credential::Bearer(token));
    }

    match request.api_key {
        Some(key) if !key.is_empty() => Ok(Credential::ApiKey(key)),
        _ => Err(AuthError::MissingCredentials),
    }
}

pub struct RequestAuthenticator {
    tokens: Arc<TokenManager>,
    guard: BruteForceGuard,
    limiter: RateLimiter,
    exempt: ExemptPaths,
    credentials: Option<Arc<dyn CredentialVerifier>>,
    api_keys: Option<Arc<dyn ApiKeyValidator>>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl RequestAuthenticator {
    pub fn new(
        config: &AuthConfig,
        tokens: Arc<TokenManager>,
        store: Arc<dyn RevocationStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tokens,
            guard: BruteForceGuard::new(config.guard.clone(), store.clone()),
            limiter: RateLimiter::new(config.rate_limit.clone(), store),
            exempt: ExemptPaths::new(config.exempt_paths.iter().cloned()),
            credentials: None,
            api_keys: None,
            audit: Arc::new(TracingAuditSink),
            clock,
        }
    }

    pub fn with_credentials(mut self, verifier: Arc<dyn CredentialVerifier>) -> Self {
        self.credentials = Some(verifier);
        self
    }

    pub fn with_api_keys(mut self, validator: Arc<dyn ApiKeyValidator>) -> Self {
        self.api_keys = Some(validator);
        self
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = sink;
        self
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub fn guard(&self) -> &BruteForceGuard {
        &self.guard
    }

    fn event(&self, event_type: AuditEventType, success: bool, ip: Option<&str>, user_agent: Option<&str>) -> AuditEvent {
        AuditEvent::new(event_type, success, self.clock.now())
            .ip(ip)
            .user_agent(user_agent)
    }

    pub fn authenticate(&self, request: &InboundRequest<'_>) -> AuthResult<AuthOutcome> {
        if self.exempt.is_exempt(request.path) {
            debug!(path = request.path, "exempt path");
            return Ok(AuthOutcome::Exempt);
        }

        if let Some(client) = rate_limit_client(request) {
            if let Err(err) = self.limiter.hit(&client) {
                let event_type = if err == AuthError::RateLimitExceeded {
                    AuditEventType::RateLimited
                } else {
                    AuditEventType::TokenVerified
                };
                self.audit.record(
                    self.event(event_type, false, request.ip, request.user_agent)
                        .detail("path", request.path)
                        .detail("error", err.kind()),
                );
                return Err(err);
            }
        }

        let result = extract_credential(request).and_then(|credential| match credential {
            Credential::Bearer(token) => self
                .tokens
                .verify(token, TokenType::Access)
                .map(|claims| Principal::from_claims(&claims)),
            Credential::ApiKey(key) => match &self.api_keys {
                Some(validator) => validator.validate(key),
                None => Err(AuthError::configuration("API key authentication is not configured")),
            },
        });

        let event = self.event(AuditEventType::TokenVerified, result.is_ok(), request.ip, request.user_agent);
        match result {
            Ok(principal) => {
                let method = match principal.method {
                    AuthMethod::Bearer => "bearer",
                    AuthMethod::ApiKey => "api_key",
                    AuthMethod::Password => "password",
                };
                self.audit.record(
                    event
                        .principal(Some(principal.subject.as_str()))
                        .detail("method", method),
                );
                Ok(AuthOutcome::Authenticated(principal))
            }
            Err(err) => {
                self.audit.record(event.detail("error", err.kind()));
                Err(err)
            }
        }
    }

    /// Password login guarded against brute force. A locked account or
    /// address is rejected before the password is looked at.
    pub fn login(&self, account: &str, password: &str, context: &ClientContext) -> AuthResult<TokenPair> {
        let verifier = self
            .credentials
            .as_ref()
            .ok_or_else(|| AuthError::configuration("password login is not configured"))?;
        let ip = context.ip.as_deref();
        let user_agent = context.user_agent.as_deref();
        let source = AttemptSource::new(ip, Some(account));
        let event = self
            .event(AuditEventType::Login, false, ip, user_agent)
            .principal(Some(account));

        if let Err(err) = self.guard.check(&source) {
            let event_type = if err == AuthError::AccountLocked {
                AuditEventType::Lockout
            } else {
                AuditEventType::Login
            };
            self.audit.record(AuditEvent {
                event_type,
                ..event.detail("error", err.kind())
            });
            return Err(err);
        }

        let identity = match verifier.verify_password(account, password) {
            Ok(identity) => identity,
            Err(AuthError::InvalidCredentials) => {
                let state = match self.guard.record_failure(&source) {
                    Ok(state) => state,
                    Err(err) => {
                        self.audit.record(event.detail("error", err.kind()));
                        return Err(err);
                    }
                };
                let event = event.detail("error", AuthError::InvalidCredentials.kind());
                let event = if state == GuardState::Locked {
                    event.detail("guard", "locked")
                } else {
                    event
                };
                self.audit.record(event);
                return Err(AuthError::InvalidCredentials);
            }
            Err(err) => {
                self.audit.record(event.detail("error", err.kind()));
                return Err(err);
            }
        };

        if let Err(err) = self.guard.record_success(&source) {
            self.audit.record(
                event
                    .principal(Some(identity.subject.as_str()))
                    .detail("error", err.kind()),
            );
            return Err(err);
        }

        let mut request = IssueRequest::new(identity.subject.clone())
            .roles(identity.roles)
            .permissions(identity.permissions)
            .context(context.clone());
        request.tenant = identity.tenant;

        let issued = self.tokens.issue(&request);
        let event = AuditEvent {
            success: issued.is_ok(),
            ..event.principal(Some(identity.subject.as_str()))
        };
        match &issued {
            Ok(pair) => self.audit.record(event.detail("session", pair.session_id.to_string())),
            Err(err) => self.audit.record(event.detail("error", err.kind())),
        }
        issued
    }

    pub fn refresh(&self, refresh_token: &str, context: &ClientContext) -> AuthResult<TokenPair> {
        let event = self.event(
            AuditEventType::TokenRefreshed,
            false,
            context.ip.as_deref(),
            context.user_agent.as_deref(),
        );
        match self.tokens.refresh_session(refresh_token) {
            Ok((claims, pair)) => {
                self.audit.record(AuditEvent {
                    success: true,
                    ..event.principal(Some(claims.sub.as_str()))
                });
                Ok(pair)
            }
            Err(err) => {
                self.audit.record(event.detail("error", err.kind()));
                Err(err)
            }
        }
    }

    /// Revoke the given tokens. Tokens that are already revoked or expired
    /// are skipped, so logging out twice succeeds.
    pub fn logout(&self, access: &str, refresh: Option<&str>, context: &ClientContext) -> AuthResult<()> {
        for token in std::iter::once(access).chain(refresh) {
            let event = self.event(
                AuditEventType::TokenRevoked,
                false,
                context.ip.as_deref(),
                context.user_agent.as_deref(),
            );
            match self.tokens.revoke_token(token) {
                Ok(claims) => self.audit.record(AuditEvent {
                    success: true,
                    ..event
                        .principal(Some(claims.sub.as_str()))
                        .detail("type", claims.token_type.as_str())
                }),
                Err(AuthError::TokenRevoked | AuthError::TokenExpired) => {}
                Err(err) => {
                    self.audit.record(event.detail("error", err.kind()));
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Invalidate every outstanding token of `subject`.
    pub fn revoke_all_sessions(&self, subject: &SubjectId, context: &ClientContext) -> AuthResult<DateTime<Utc>> {
        let event = self
            .event(
                AuditEventType::SessionsRevoked,
                false,
                context.ip.as_deref(),
                context.user_agent.as_deref(),
            )
            .principal(Some(subject.as_str()));
        match self.tokens.revoke_all_for_subject(subject) {
            Ok(cutoff) => {
                self.audit.record(AuditEvent { success: true, ..event });
                Ok(cutoff)
            }
            Err(err) => {
                self.audit.record(event.detail("error", err.kind()));
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use chrono::Duration;
    use jsonwebtoken::Algorithm;
    use warden_core::{ManualClock, TenantId};

    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::config::RateLimitSettings;
    use crate::credentials::{StaticApiKeys, VerifiedIdentity};
    use crate::keys::{KeyRing, KeySpec};
    use crate::store::InMemoryRevocationStore;
    use crate::RoleGrant;

    struct Passwords;

    impl CredentialVerifier for Passwords {
        fn verify_password(&self, account: &str, password: &str) -> AuthResult<VerifiedIdentity> {
            match (account, password) {
                ("alice", "correct horse") => Ok(VerifiedIdentity::new("u-alice").tenant("t1").roles(["admin"])),
                ("broken", _) => Err(AuthError::infrastructure("user directory unreachable")),
                _ => Err(AuthError::InvalidCredentials),
            }
        }
    }

    struct Harness {
        clock: Arc<ManualClock>,
        audit: Arc<MemoryAuditSink>,
        auth: RequestAuthenticator,
    }

    fn harness(config: AuthConfig) -> Harness {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(InMemoryRevocationStore::new(clock.clone()));
        harness_on(config, clock, store)
    }

    fn harness_on(config: AuthConfig, clock: Arc<ManualClock>, store: Arc<dyn RevocationStore>) -> Harness {
        let key = KeySpec::hmac("k1", Algorithm::HS256, b"authenticator-test-secret-0123456789").unwrap();
        let ring = Arc::new(KeyRing::for_settings(key, &config.token, clock.clone()).unwrap());
        let tokens = Arc::new(TokenManager::new(config.token.clone(), ring, store.clone(), clock.clone()));
        let audit = Arc::new(MemoryAuditSink::new());

        let api_principal = Principal {
            subject: SubjectId::new("svc-reports"),
            tenant: Some(TenantId::new("t1")),
            grants: vec![RoleGrant::scoped("viewer", "t1")],
            permissions: Vec::new(),
            session_id: None,
            token_id: None,
            method: AuthMethod::ApiKey,
        };

        let auth = RequestAuthenticator::new(&config, tokens, store, clock.clone())
            .with_credentials(Arc::new(Passwords))
            .with_api_keys(Arc::new(StaticApiKeys::new().with_key("key-123", api_principal)))
            .with_audit_sink(audit.clone());

        Harness { clock, audit, auth }
    }

    /// In-memory store whose counters or removals can be made to fail.
    struct FlakyStore {
        inner: InMemoryRevocationStore,
        fail_increment: AtomicBool,
        fail_remove: AtomicBool,
    }

    impl FlakyStore {
        fn new(clock: Arc<ManualClock>) -> Self {
            Self {
                inner: InMemoryRevocationStore::new(clock),
                fail_increment: AtomicBool::new(false),
                fail_remove: AtomicBool::new(false),
            }
        }

        fn outage(flag: &AtomicBool) -> AuthResult<()> {
            if flag.load(Ordering::SeqCst) {
                return Err(AuthError::infrastructure("store unreachable"));
            }
            Ok(())
        }
    }

    impl RevocationStore for FlakyStore {
        fn set_with_ttl(&self, key: &str, ttl: Duration) -> AuthResult<()> {
            self.inner.set_with_ttl(key, ttl)
        }
        fn set_if_absent(&self, key: &str, ttl: Duration) -> AuthResult<bool> {
            self.inner.set_if_absent(key, ttl)
        }
        fn exists(&self, key: &str) -> AuthResult<bool> {
            self.inner.exists(key)
        }
        fn remove(&self, key: &str) -> AuthResult<()> {
            Self::outage(&self.fail_remove)?;
            self.inner.remove(key)
        }
        fn increment(&self, key: &str, window: Duration) -> AuthResult<u64> {
            Self::outage(&self.fail_increment)?;
            self.inner.increment(key, window)
        }
        fn counter(&self, key: &str) -> AuthResult<u64> {
            self.inner.counter(key)
        }
        fn set_invalidation(&self, subject: &SubjectId, cutoff: DateTime<Utc>, retention: Duration) -> AuthResult<()> {
            self.inner.set_invalidation(subject, cutoff, retention)
        }
        fn get_invalidation(&self, subject: &SubjectId) -> AuthResult<Option<DateTime<Utc>>> {
            self.inner.get_invalidation(subject)
        }
        fn is_distributed(&self) -> bool {
            false
        }
    }

    fn flaky_harness() -> (Arc<FlakyStore>, Harness) {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(FlakyStore::new(clock.clone()));
        let h = harness_on(AuthConfig::default(), clock, store.clone());
        (store, h)
    }

    fn only_event(h: &Harness) -> AuditEvent {
        let mut events = h.audit.events();
        assert_eq!(events.len(), 1, "expected exactly one audit event, got {events:?}");
        events.remove(0)
    }

    fn context() -> ClientContext {
        ClientContext::new(Some("203.0.113.7"), Some("curl/8.0"))
    }

    #[test]
    fn exempt_paths_match_exactly_or_by_prefix() {
        let exempt = ExemptPaths::new(["/health", "/public/*"]);
        assert!(exempt.is_exempt("/health"));
        assert!(!exempt.is_exempt("/health/deep"));
        assert!(exempt.is_exempt("/public/logo.png"));
        assert!(!exempt.is_exempt("/private"));
    }

    #[test]
    fn exempt_request_skips_everything() {
        let h = harness(AuthConfig {
            exempt_paths: vec!["/health".to_string()],
            ..AuthConfig::default()
        });
        assert_eq!(h.auth.authenticate(&InboundRequest::new("/health")), Ok(AuthOutcome::Exempt));
        assert!(h.audit.events().is_empty());
    }

    #[test]
    fn login_then_bearer_request() {
        let h = harness(AuthConfig::default());
        let pair = h.auth.login("alice", "correct horse", &context()).unwrap();

        let header = format!("Bearer {}", pair.access);
        let outcome = h
            .auth
            .authenticate(&InboundRequest::new("/api/users").authorization(&header).ip("203.0.113.7"))
            .unwrap();
        let AuthOutcome::Authenticated(principal) = outcome else {
            panic!("expected a principal");
        };
        assert_eq!(principal.subject, SubjectId::new("u-alice"));
        assert_eq!(principal.grants, vec![RoleGrant::scoped("admin", "t1")]);
        assert_eq!(principal.session_id, Some(pair.session_id));

        let verified = h.audit.of_type(AuditEventType::TokenVerified);
        assert_eq!(verified.len(), 1);
        assert!(verified[0].success);
        assert_eq!(verified[0].details.get("method").map(String::as_str), Some("bearer"));
    }

    #[test]
    fn api_key_path() {
        let h = harness(AuthConfig::default());
        let outcome = h.auth.authenticate(&InboundRequest::new("/api").api_key("key-123")).unwrap();
        assert!(matches!(outcome, AuthOutcome::Authenticated(p) if p.method == AuthMethod::ApiKey));

        assert_eq!(
            h.auth.authenticate(&InboundRequest::new("/api").api_key("nope")),
            Err(AuthError::InvalidCredentials)
        );
    }

    #[test]
    fn missing_and_malformed_credentials() {
        let h = harness(AuthConfig::default());
        assert_eq!(
            h.auth.authenticate(&InboundRequest::new("/api")),
            Err(AuthError::MissingCredentials)
        );
        assert!(matches!(
            h.auth.authenticate(&InboundRequest::new("/api").authorization("Basic dXNlcjpwYXNz")),
            Err(AuthError::TokenMalformed(_))
        ));

        let failures = h.audit.of_type(AuditEventType::TokenVerified);
        assert_eq!(failures.len(), 2);
        assert_eq!(
            failures[0].details.get("error").map(String::as_str),
            Some(AuthError::MissingCredentials.kind())
        );
    }

    #[test]
    fn rate_limit_applies_per_client() {
        let h = harness(AuthConfig {
            rate_limit: RateLimitSettings {
                limit: 2,
                window_secs: 60,
            },
            ..AuthConfig::default()
        });
        let request = InboundRequest::new("/api").api_key("key-123").ip("198.51.100.1");
        assert!(h.auth.authenticate(&request).is_ok());
        assert!(h.auth.authenticate(&request).is_ok());
        assert_eq!(h.auth.authenticate(&request), Err(AuthError::RateLimitExceeded));
        assert_eq!(h.audit.of_type(AuditEventType::RateLimited).len(), 1);

        let other = InboundRequest::new("/api").api_key("key-123").ip("198.51.100.2");
        assert!(h.auth.authenticate(&other).is_ok());

        h.clock.advance(Duration::seconds(60));
        assert!(h.auth.authenticate(&request).is_ok());
    }

    #[test]
    fn repeated_bad_passwords_lock_the_account() {
        let h = harness(AuthConfig::default());
        for _ in 0..5 {
            assert_eq!(
                h.auth.login("alice", "guess", &context()),
                Err(AuthError::InvalidCredentials)
            );
        }
        assert_eq!(
            h.auth.login("alice", "correct horse", &context()),
            Err(AuthError::AccountLocked)
        );
        assert_eq!(h.audit.of_type(AuditEventType::Lockout).len(), 1);
        let last_failure = h.audit.of_type(AuditEventType::Login).pop().unwrap();
        assert_eq!(last_failure.details.get("guard").map(String::as_str), Some("locked"));

        h.clock.advance(h.auth.guard().settings().lockout());
        assert!(h.auth.login("alice", "correct horse", &context()).is_ok());
    }

    #[test]
    fn directory_outage_is_not_a_failed_attempt() {
        let h = harness(AuthConfig::default());
        for _ in 0..10 {
            assert!(h.auth.login("broken", "x", &context()).unwrap_err().is_infrastructure());
        }
        assert!(h.auth.guard().check(&AttemptSource::new(Some("203.0.113.7"), Some("broken"))).is_ok());
    }

    #[test]
    fn audit_events_carry_no_raw_identifiers() {
        let h = harness(AuthConfig::default());
        let pair = h.auth.login("alice", "correct horse", &context()).unwrap();
        let _ = h.auth.login("alice", "hunter2", &context());
        h.auth.refresh(&pair.refresh, &context()).unwrap();

        let dump = serde_json::to_string(&h.audit.events()).unwrap();
        for raw in ["alice", "u-alice", "203.0.113.7", "curl/8.0", "hunter2", "correct horse"] {
            assert!(!dump.contains(raw), "audit trail leaked {raw}");
        }
        assert!(!dump.contains(&pair.access));
        assert!(!dump.contains(&pair.refresh));
    }

    #[test]
    fn logout_is_idempotent() {
        let h = harness(AuthConfig::default());
        let pair = h.auth.login("alice", "correct horse", &context()).unwrap();

        h.auth.logout(&pair.access, Some(&pair.refresh), &context()).unwrap();
        h.auth.logout(&pair.access, Some(&pair.refresh), &context()).unwrap();

        assert_eq!(h.audit.of_type(AuditEventType::TokenRevoked).len(), 2);
        assert_eq!(h.auth.refresh(&pair.refresh, &context()), Err(AuthError::TokenRevoked));
        let header = format!("Bearer {}", pair.access);
        assert_eq!(
            h.auth.authenticate(&InboundRequest::new("/api").authorization(&header)),
            Err(AuthError::TokenRevoked)
        );
    }

    #[test]
    fn revoke_all_sessions_ends_every_login() {
        let h = harness(AuthConfig::default());
        let first = h.auth.login("alice", "correct horse", &context()).unwrap();
        let second = h.auth.login("alice", "correct horse", &context()).unwrap();

        h.auth
            .revoke_all_sessions(&SubjectId::new("u-alice"), &context())
            .unwrap();

        for pair in [&first, &second] {
            let header = format!("Bearer {}", pair.access);
            assert_eq!(
                h.auth.authenticate(&InboundRequest::new("/api").authorization(&header)),
                Err(AuthError::TokenRevoked)
            );
        }
        assert_eq!(h.audit.of_type(AuditEventType::SessionsRevoked).len(), 1);
    }

    #[test]
    fn requests_without_an_address_do_not_share_a_bucket() {
        let h = harness(AuthConfig {
            rate_limit: RateLimitSettings {
                limit: 1,
                window_secs: 60,
            },
            ..AuthConfig::default()
        });
        let noisy = InboundRequest::new("/api").api_key("nope");
        assert_eq!(h.auth.authenticate(&noisy), Err(AuthError::InvalidCredentials));
        assert_eq!(h.auth.authenticate(&noisy), Err(AuthError::RateLimitExceeded));

        let quiet = InboundRequest::new("/api").api_key("key-123");
        assert!(h.auth.authenticate(&quiet).is_ok());

        // nothing to key on: never throttled, rejected for the missing credential
        for _ in 0..3 {
            assert_eq!(
                h.auth.authenticate(&InboundRequest::new("/api")),
                Err(AuthError::MissingCredentials)
            );
        }
    }

    #[test]
    fn rate_limiter_outage_is_audited_once() {
        let (store, h) = flaky_harness();
        store.fail_increment.store(true, Ordering::SeqCst);

        let err = h
            .auth
            .authenticate(&InboundRequest::new("/api").api_key("key-123").ip("198.51.100.1"))
            .unwrap_err();
        assert!(err.is_infrastructure());

        let event = only_event(&h);
        assert_eq!(event.event_type, AuditEventType::TokenVerified);
        assert!(!event.success);
        assert_eq!(event.details.get("error").map(String::as_str), Some(err.kind()));
    }

    #[test]
    fn guard_outage_on_bad_password_is_audited_once() {
        let (store, h) = flaky_harness();
        store.fail_increment.store(true, Ordering::SeqCst);

        let err = h.auth.login("alice", "guess", &context()).unwrap_err();
        assert!(err.is_infrastructure());

        let event = only_event(&h);
        assert_eq!(event.event_type, AuditEventType::Login);
        assert!(!event.success);
        assert_eq!(event.details.get("error").map(String::as_str), Some(err.kind()));
    }

    #[test]
    fn guard_outage_on_good_password_is_audited_once() {
        let (store, h) = flaky_harness();
        store.fail_remove.store(true, Ordering::SeqCst);

        let err = h.auth.login("alice", "correct horse", &context()).unwrap_err();
        assert!(err.is_infrastructure());

        let event = only_event(&h);
        assert_eq!(event.event_type, AuditEventType::Login);
        assert!(!event.success);
        assert_eq!(event.details.get("error").map(String::as_str), Some(err.kind()));
    }
}
