//! Signing and verification keys, with rotation.
//!
//! Verification always uses the algorithm registered with the key, never the
//! one named in a token header.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use tracing::info;

use warden_core::{AuthError, AuthResult, Clock};

use crate::config::TokenSettings;

/// One key: an identifier, its algorithm, and the material to verify (and
/// optionally sign) with it.
#[derive(Clone)]
pub struct KeySpec {
    kid: String,
    algorithm: Algorithm,
    encoding: Option<EncodingKey>,
    decoding: DecodingKey,
}

impl core::fmt::Debug for KeySpec {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KeySpec")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("can_sign", &self.encoding.is_some())
            .finish()
    }
}

impl KeySpec {
    /// Shared-secret key (HS256/HS384/HS512).
    pub fn hmac(kid: impl Into<String>, algorithm: Algorithm, secret: &[u8]) -> AuthResult<Self> {
        if !matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err(AuthError::configuration(format!("{algorithm:?} is not an HMAC algorithm")));
        }
        if secret.len() < 32 {
            return Err(AuthError::configuration("HMAC secret must be at least 32 bytes"));
        }
        Ok(Self {
            kid: kid.into(),
            algorithm,
            encoding: Some(EncodingKey::from_secret(secret)),
            decoding: DecodingKey::from_secret(secret),
        })
    }

    /// Asymmetric key from PEM. Without a private key it can only verify.
    pub fn from_pem(
        kid: impl Into<String>,
        algorithm: Algorithm,
        private_pem: Option<&[u8]>,
        public_pem: &[u8],
    ) -> AuthResult<Self> {
        let bad_key = |e: jsonwebtoken::errors::Error| AuthError::configuration(format!("invalid key: {e}"));

        let (encoding, decoding) = match algorithm {
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => (
                private_pem.map(EncodingKey::from_rsa_pem).transpose().map_err(bad_key)?,
                DecodingKey::from_rsa_pem(public_pem).map_err(bad_key)?,
            ),
            Algorithm::ES256 | Algorithm::ES384 => (
                private_pem.map(EncodingKey::from_ec_pem).transpose().map_err(bad_key)?,
                DecodingKey::from_ec_pem(public_pem).map_err(bad_key)?,
            ),
            Algorithm::EdDSA => (
                private_pem.map(EncodingKey::from_ed_pem).transpose().map_err(bad_key)?,
                DecodingKey::from_ed_pem(public_pem).map_err(bad_key)?,
            ),
            other => {
                return Err(AuthError::configuration(format!("{other:?} keys are not PEM encoded")));
            }
        };

        Ok(Self {
            kid: kid.into(),
            algorithm,
            encoding,
            decoding,
        })
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn can_sign(&self) -> bool {
        self.encoding.is_some()
    }
}

/// The key new tokens are signed with.
#[derive(Clone)]
pub struct SigningKey {
    pub kid: String,
    pub algorithm: Algorithm,
    pub key: EncodingKey,
}

/// A key tokens may still be verified against.
#[derive(Clone)]
pub struct VerificationKey {
    pub kid: String,
    pub algorithm: Algorithm,
    pub key: DecodingKey,
}

/// Source of key material for the token manager.
pub trait KeyProvider: Send + Sync {
    fn signing_key(&self) -> AuthResult<SigningKey>;

    /// Every key currently valid for verification, by key id.
    fn verification_keys(&self) -> AuthResult<HashMap<String, Arc<VerificationKey>>>;
}

#[derive(Clone)]
struct KeyEntry {
    key: Arc<VerificationKey>,
    /// `None` while the key is (or could again be) current.
    retire_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
struct KeyRingState {
    signing: SigningKey,
    verification: HashMap<String, KeyEntry>,
}

/// In-process key set with atomic rotation.
///
/// Readers take a snapshot (`Arc`) so a rotation never tears a verification in
/// half. A rotated-out key keeps verifying until `retire_at`, which is at least
/// the refresh TTL after the rotation.
pub struct KeyRing {
    clock: Arc<dyn Clock>,
    grace: Duration,
    state: RwLock<Arc<KeyRingState>>,
}

impl KeyRing {
    /// Unchecked constructor; `grace` is taken as given. Outside this crate use
    /// [`KeyRing::for_settings`], which enforces grace >= refresh TTL.
    pub(crate) fn new(initial: KeySpec, grace: Duration, clock: Arc<dyn Clock>) -> AuthResult<Self> {
        let signing = signing_key_of(&initial)?;
        let mut verification = HashMap::new();
        verification.insert(
            initial.kid.clone(),
            KeyEntry {
                key: Arc::new(verification_key_of(&initial)),
                retire_at: None,
            },
        );

        Ok(Self {
            clock,
            grace,
            state: RwLock::new(Arc::new(KeyRingState { signing, verification })),
        })
    }

    /// Key ring whose rotation grace is taken from (and checked against) the
    /// token settings.
    pub fn for_settings(initial: KeySpec, settings: &TokenSettings, clock: Arc<dyn Clock>) -> AuthResult<Self> {
        settings.validate()?;
        Self::new(initial, settings.rotation_grace(), clock)
    }

    fn snapshot(&self) -> Arc<KeyRingState> {
        self.state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Publish `next` as the signing key. The previous signing key stays valid
    /// for verification until the grace period has elapsed.
    pub fn rotate(&self, next: KeySpec) -> AuthResult<()> {
        let signing = signing_key_of(&next)?;
        let now = self.clock.now();

        let mut guard = self.state.write().unwrap_or_else(|e| e.into_inner());
        if guard.verification.contains_key(&next.kid) {
            return Err(AuthError::configuration(format!("key id '{}' is already in use", next.kid)));
        }

        let mut state = KeyRingState::clone(&guard);
        let previous = state.signing.kid.clone();
        if let Some(entry) = state.verification.get_mut(&previous) {
            entry.retire_at = Some(now + self.grace);
        }
        state.verification.insert(
            next.kid.clone(),
            KeyEntry {
                key: Arc::new(verification_key_of(&next)),
                retire_at: None,
            },
        );
        state.signing = signing;
        *guard = Arc::new(state);

        info!(new_kid = %next.kid, previous_kid = %previous, "signing key rotated");
        Ok(())
    }

    /// Trust an extra verification-only key (e.g. from a peer issuer).
    pub fn add_verification_key(&self, key: KeySpec, retire_at: Option<DateTime<Utc>>) -> AuthResult<()> {
        let mut guard = self.state.write().unwrap_or_else(|e| e.into_inner());
        if guard.verification.contains_key(&key.kid) {
            return Err(AuthError::configuration(format!("key id '{}' is already in use", key.kid)));
        }
        let mut state = KeyRingState::clone(&guard);
        state.verification.insert(
            key.kid.clone(),
            KeyEntry {
                key: Arc::new(verification_key_of(&key)),
                retire_at,
            },
        );
        *guard = Arc::new(state);
        Ok(())
    }

    /// Drop keys whose grace period has elapsed. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let now = self.clock.now();
        let mut guard = self.state.write().unwrap_or_else(|e| e.into_inner());
        let before = guard.verification.len();

        let mut state = KeyRingState::clone(&guard);
        state
            .verification
            .retain(|_, entry| entry.retire_at.is_none_or(|at| at > now));
        let removed = before - state.verification.len();
        if removed > 0 {
            *guard = Arc::new(state);
            info!(removed, "retired verification keys pruned");
        }
        removed
    }

    pub fn current_kid(&self) -> String {
        self.snapshot().signing.kid.clone()
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }
}

impl KeyProvider for KeyRing {
    fn signing_key(&self) -> AuthResult<SigningKey> {
        Ok(self.snapshot().signing.clone())
    }

    fn verification_keys(&self) -> AuthResult<HashMap<String, Arc<VerificationKey>>> {
        let now = self.clock.now();
        Ok(self
            .snapshot()
            .verification
            .iter()
            .filter(|(_, entry)| entry.retire_at.is_none_or(|at| at > now))
            .map(|(kid, entry)| (kid.clone(), entry.key.clone()))
            .collect())
    }
}

fn signing_key_of(spec: &KeySpec) -> AuthResult<SigningKey> {
    let key = spec
        .encoding
        .clone()
        .ok_or_else(|| AuthError::configuration(format!("key '{}' has no private part", spec.kid)))?;
    Ok(SigningKey {
        kid: spec.kid.clone(),
        algorithm: spec.algorithm,
        key,
    })
}

fn verification_key_of(spec: &KeySpec) -> VerificationKey {
    VerificationKey {
        kid: spec.kid.clone(),
        algorithm: spec.algorithm,
        key: spec.decoding.clone(),
    }
}

#[cfg(test)]
mod tests {
    use warden_core::ManualClock;

    use super::*;

    fn hmac(kid: &str) -> KeySpec {
        KeySpec::hmac(kid.to_string(), Algorithm::HS256, format!("{kid}-0123456789abcdef0123456789abcdef").as_bytes())
            .unwrap()
    }

    #[test]
    fn short_hmac_secret_is_rejected() {
        let err = KeySpec::hmac("k", Algorithm::HS256, b"short").unwrap_err();
        assert!(matches!(err, AuthError::Configuration(_)));
    }

    #[test]
    fn rotation_keeps_old_key_until_grace_elapses() {
        let clock = Arc::new(ManualClock::starting_now());
        let ring = KeyRing::new(hmac("k1"), Duration::days(7), clock.clone()).unwrap();

        ring.rotate(hmac("k2")).unwrap();
        assert_eq!(ring.current_kid(), "k2");

        let keys = ring.verification_keys().unwrap();
        assert!(keys.contains_key("k1"));
        assert!(keys.contains_key("k2"));

        clock.advance(Duration::days(7) - Duration::seconds(1));
        assert_eq!(ring.prune(), 0);
        assert!(ring.verification_keys().unwrap().contains_key("k1"));

        clock.advance(Duration::seconds(1));
        assert!(!ring.verification_keys().unwrap().contains_key("k1"));
        assert_eq!(ring.prune(), 1);
    }

    #[test]
    fn duplicate_kid_rotation_is_rejected() {
        let clock = Arc::new(ManualClock::starting_now());
        let ring = KeyRing::new(hmac("k1"), Duration::days(7), clock).unwrap();
        assert!(matches!(ring.rotate(hmac("k1")), Err(AuthError::Configuration(_))));
    }

    #[test]
    fn for_settings_rejects_grace_shorter_than_refresh_ttl() {
        let clock = Arc::new(ManualClock::starting_now());
        let settings = TokenSettings {
            rotation_grace_secs: 60,
            ..TokenSettings::default()
        };
        assert!(KeyRing::for_settings(hmac("k1"), &settings, clock).is_err());
    }
}
