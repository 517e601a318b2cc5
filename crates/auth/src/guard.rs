//! Brute-force lockout per identifier.
//!
//! Each identifier (client IP, account) has its own counter and lock, keyed by
//! fingerprint so raw values never reach the store:
//!
//! ```text
//! Clear --failure--> Accumulating(n) --n == max--> Locked --lockout elapses--> Clear
//!                          \--success--> Clear
//! ```

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use warden_core::{AuthError, AuthResult, fingerprint};

use crate::config::{GuardSettings, LockoutPolicy};
use crate::store::RevocationStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierScope {
    Ip,
    Account,
}

impl IdentifierScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierScope::Ip => "ip",
            IdentifierScope::Account => "account",
        }
    }
}

/// The raw identifiers behind one authentication attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttemptSource<'a> {
    pub ip: Option<&'a str>,
    pub account: Option<&'a str>,
}

impl<'a> AttemptSource<'a> {
    pub fn new(ip: Option<&'a str>, account: Option<&'a str>) -> Self {
        Self { ip, account }
    }

    fn tracked(&self) -> impl Iterator<Item = (IdentifierScope, String)> + '_ {
        let ip = self.ip.map(|raw| (IdentifierScope::Ip, fingerprint(raw)));
        let account = self.account.map(|raw| (IdentifierScope::Account, fingerprint(raw)));
        ip.into_iter().chain(account)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "failures")]
pub enum GuardState {
    Clear,
    Accumulating(u64),
    Locked,
}

impl GuardState {
    fn severity(&self) -> u64 {
        match self {
            GuardState::Clear => 0,
            GuardState::Accumulating(n) => *n,
            GuardState::Locked => u64::MAX,
        }
    }

    fn worst(self, other: GuardState) -> GuardState {
        if other.severity() > self.severity() { other } else { self }
    }
}

fn count_key(scope: IdentifierScope, hashed: &str) -> String {
    format!("bf:count:{}:{hashed}", scope.as_str())
}

fn lock_key(scope: IdentifierScope, hashed: &str) -> String {
    format!("bf:lock:{}:{hashed}", scope.as_str())
}

pub struct BruteForceGuard {
    settings: GuardSettings,
    store: Arc<dyn RevocationStore>,
}

impl BruteForceGuard {
    pub fn new(settings: GuardSettings, store: Arc<dyn RevocationStore>) -> Self {
        Self { settings, store }
    }

    pub fn settings(&self) -> &GuardSettings {
        &self.settings
    }

    /// `AccountLocked` if any identifier of the attempt is locked.
    pub fn check(&self, source: &AttemptSource<'_>) -> AuthResult<()> {
        for (scope, hashed) in source.tracked() {
            if self.store.exists(&lock_key(scope, &hashed))? {
                debug!(scope = scope.as_str(), id = %hashed, "attempt rejected while locked");
                return Err(AuthError::AccountLocked);
            }
        }
        Ok(())
    }

    /// Count a failed attempt against every identifier; returns the worst
    /// resulting state. Locked identifiers are not counted further.
    pub fn record_failure(&self, source: &AttemptSource<'_>) -> AuthResult<GuardState> {
        let mut worst = GuardState::Clear;

        for (scope, hashed) in source.tracked() {
            let lock = lock_key(scope, &hashed);
            if self.store.exists(&lock)? {
                if self.settings.policy == LockoutPolicy::Extending {
                    self.store.set_with_ttl(&lock, self.settings.lockout())?;
                }
                worst = worst.worst(GuardState::Locked);
                continue;
            }

            let counter = count_key(scope, &hashed);
            let failures = self.store.increment(&counter, self.settings.window())?;
            if failures >= self.settings.max_attempts {
                self.store.set_with_ttl(&lock, self.settings.lockout())?;
                self.store.remove(&counter)?;
                warn!(
                    scope = scope.as_str(),
                    id = %hashed,
                    failures,
                    lockout_secs = self.settings.lockout_secs,
                    "identifier locked"
                );
                worst = worst.worst(GuardState::Locked);
            } else {
                worst = worst.worst(GuardState::Accumulating(failures));
            }
        }

        Ok(worst)
    }

    /// Reset the failure counters of every identifier.
    pub fn record_success(&self, source: &AttemptSource<'_>) -> AuthResult<()> {
        for (scope, hashed) in source.tracked() {
            self.store.remove(&count_key(scope, &hashed))?;
        }
        Ok(())
    }

    pub fn state(&self, scope: IdentifierScope, raw: &str) -> AuthResult<GuardState> {
        let hashed = fingerprint(raw);
        if self.store.exists(&lock_key(scope, &hashed))? {
            return Ok(GuardState::Locked);
        }
        Ok(match self.store.counter(&count_key(scope, &hashed))? {
            0 => GuardState::Clear,
            n => GuardState::Accumulating(n),
        })
    }

    /// Run `verify` unless the source is locked, recording the outcome.
    ///
    /// Only `InvalidCredentials` counts as a failure; any other error is
    /// returned untouched.
    pub fn attempt<T, F>(&self, source: &AttemptSource<'_>, verify: F) -> AuthResult<T>
    where
        F: FnOnce() -> AuthResult<T>,
    {
        self.check(source)?;
        match verify() {
            Ok(value) => {
                self.record_success(source)?;
                Ok(value)
            }
            Err(AuthError::InvalidCredentials) => {
                self.record_failure(source)?;
                Err(AuthError::InvalidCredentials)
            }
            Err(other) => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use chrono::Duration;
    use warden_core::ManualClock;

    use super::*;
    use crate::store::InMemoryRevocationStore;

    fn guard(policy: LockoutPolicy) -> (Arc<ManualClock>, BruteForceGuard) {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(InMemoryRevocationStore::new(clock.clone()));
        let settings = GuardSettings {
            policy,
            ..GuardSettings::default()
        };
        (clock, BruteForceGuard::new(settings, store))
    }

    fn check_password(password: &str) -> AuthResult<&'static str> {
        if password == "correct horse" {
            Ok("u1")
        } else {
            Err(AuthError::InvalidCredentials)
        }
    }

    #[test]
    fn five_failures_lock_then_lockout_elapses() {
        let (clock, guard) = guard(LockoutPolicy::Fixed);
        let source = AttemptSource::new(Some("203.0.113.7"), Some("X"));

        for _ in 0..5 {
            assert_eq!(
                guard.attempt(&source, || check_password("wrong")),
                Err(AuthError::InvalidCredentials)
            );
        }
        assert_eq!(guard.state(IdentifierScope::Account, "X").unwrap(), GuardState::Locked);

        let consulted = Cell::new(false);
        let sixth = guard.attempt(&source, || {
            consulted.set(true);
            check_password("correct horse")
        });
        assert_eq!(sixth, Err(AuthError::AccountLocked));
        assert!(!consulted.get());

        clock.advance(guard.settings().lockout());
        assert_eq!(guard.attempt(&source, || check_password("correct horse")), Ok("u1"));
        assert_eq!(guard.state(IdentifierScope::Account, "X").unwrap(), GuardState::Clear);
        assert_eq!(guard.state(IdentifierScope::Ip, "203.0.113.7").unwrap(), GuardState::Clear);
    }

    #[test]
    fn success_resets_accumulated_failures() {
        let (_, guard) = guard(LockoutPolicy::Fixed);
        let source = AttemptSource::new(None, Some("X"));

        for _ in 0..3 {
            let _ = guard.attempt(&source, || check_password("wrong"));
        }
        assert_eq!(
            guard.state(IdentifierScope::Account, "X").unwrap(),
            GuardState::Accumulating(3)
        );
        guard.attempt(&source, || check_password("correct horse")).unwrap();
        assert_eq!(guard.state(IdentifierScope::Account, "X").unwrap(), GuardState::Clear);
    }

    #[test]
    fn ip_and_account_are_tracked_independently() {
        let (_, guard) = guard(LockoutPolicy::Fixed);

        // one account attacked from five addresses
        for i in 0..5 {
            let ip = format!("198.51.100.{i}");
            let source = AttemptSource::new(Some(&ip), Some("victim"));
            let _ = guard.attempt(&source, || check_password("wrong"));
        }
        assert_eq!(guard.state(IdentifierScope::Account, "victim").unwrap(), GuardState::Locked);
        assert_eq!(
            guard.state(IdentifierScope::Ip, "198.51.100.0").unwrap(),
            GuardState::Accumulating(1)
        );

        // the same addresses can still try other accounts
        let other = AttemptSource::new(Some("198.51.100.0"), Some("someone-else"));
        assert!(guard.check(&other).is_ok());
    }

    #[test]
    fn failures_while_locked_do_not_count() {
        let (clock, guard) = guard(LockoutPolicy::Fixed);
        let source = AttemptSource::new(None, Some("X"));
        for _ in 0..5 {
            guard.record_failure(&source).unwrap();
        }
        assert_eq!(guard.record_failure(&source).unwrap(), GuardState::Locked);

        clock.advance(guard.settings().lockout());
        assert_eq!(guard.state(IdentifierScope::Account, "X").unwrap(), GuardState::Clear);
    }

    #[test]
    fn extending_policy_pushes_the_lock_out() {
        let (clock, guard) = guard(LockoutPolicy::Extending);
        let source = AttemptSource::new(None, Some("X"));
        for _ in 0..5 {
            guard.record_failure(&source).unwrap();
        }

        clock.advance(Duration::minutes(10));
        guard.record_failure(&source).unwrap();
        clock.advance(Duration::minutes(10));
        assert_eq!(guard.state(IdentifierScope::Account, "X").unwrap(), GuardState::Locked);

        clock.advance(Duration::minutes(5));
        assert_eq!(guard.state(IdentifierScope::Account, "X").unwrap(), GuardState::Clear);
    }

    #[test]
    fn other_errors_are_not_failures() {
        let (_, guard) = guard(LockoutPolicy::Fixed);
        let source = AttemptSource::new(None, Some("X"));
        let result: AuthResult<()> = guard.attempt(&source, || Err(AuthError::infrastructure("db down")));
        assert!(result.unwrap_err().is_infrastructure());
        assert_eq!(guard.state(IdentifierScope::Account, "X").unwrap(), GuardState::Clear);
    }

    #[test]
    fn counters_expire_with_the_window() {
        let (clock, guard) = guard(LockoutPolicy::Fixed);
        let source = AttemptSource::new(None, Some("X"));
        for _ in 0..4 {
            guard.record_failure(&source).unwrap();
        }
        clock.advance(guard.settings().window());
        assert_eq!(guard.record_failure(&source).unwrap(), GuardState::Accumulating(1));
    }

    #[test]
    fn store_keys_never_carry_raw_identifiers() {
        let key = count_key(IdentifierScope::Account, &fingerprint("alice@example.com"));
        assert!(!key.contains("alice"));
        assert!(key.starts_with("bf:count:account:"));
    }
}
