//! Auth core configuration.
//!
//! Defaults are production-sane; `AuthConfig::from_env` layers `WARDEN_*`
//! variables on top and validates the result.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use warden_core::{AuthError, AuthResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenSettings {
    pub issuer: String,
    pub audience: String,
    pub access_ttl_secs: i64,
    pub refresh_ttl_secs: i64,
    pub leeway_secs: i64,
    /// How long a rotated-out key still verifies. Must cover the refresh TTL.
    pub rotation_grace_secs: i64,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            issuer: "warden".to_string(),
            audience: "warden-api".to_string(),
            access_ttl_secs: 15 * 60,
            refresh_ttl_secs: 7 * 24 * 60 * 60,
            leeway_secs: 0,
            rotation_grace_secs: 7 * 24 * 60 * 60,
        }
    }
}

impl TokenSettings {
    pub fn access_ttl(&self) -> Duration {
        Duration::seconds(self.access_ttl_secs)
    }

    pub fn refresh_ttl(&self) -> Duration {
        Duration::seconds(self.refresh_ttl_secs)
    }

    pub fn leeway(&self) -> Duration {
        Duration::seconds(self.leeway_secs)
    }

    pub fn rotation_grace(&self) -> Duration {
        Duration::seconds(self.rotation_grace_secs)
    }

    pub fn validate(&self) -> AuthResult<()> {
        if self.issuer.trim().is_empty() || self.audience.trim().is_empty() {
            return Err(AuthError::configuration("issuer and audience must be set"));
        }
        if self.access_ttl_secs <= 0 || self.refresh_ttl_secs <= 0 {
            return Err(AuthError::configuration("token TTLs must be positive"));
        }
        if self.refresh_ttl_secs < self.access_ttl_secs {
            return Err(AuthError::configuration("refresh TTL must not be shorter than access TTL"));
        }
        if self.leeway_secs < 0 {
            return Err(AuthError::configuration("leeway must not be negative"));
        }
        if self.rotation_grace_secs < self.refresh_ttl_secs {
            return Err(AuthError::configuration("key rotation grace must cover the refresh TTL"));
        }
        Ok(())
    }
}

/// What a failed attempt does while an identifier is already locked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockoutPolicy {
    /// Lock ends `lockout` after it started, whatever happens meanwhile.
    #[default]
    Fixed,
    /// Every rejected attempt restarts the lockout period.
    Extending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardSettings {
    pub max_attempts: u64,
    pub lockout_secs: i64,
    /// Failures older than this stop counting.
    pub window_secs: i64,
    pub policy: LockoutPolicy,
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            lockout_secs: 15 * 60,
            window_secs: 15 * 60,
            policy: LockoutPolicy::Fixed,
        }
    }
}

impl GuardSettings {
    pub fn lockout(&self) -> Duration {
        Duration::seconds(self.lockout_secs)
    }

    pub fn window(&self) -> Duration {
        Duration::seconds(self.window_secs)
    }

    pub fn validate(&self) -> AuthResult<()> {
        if self.max_attempts == 0 {
            return Err(AuthError::configuration("max_attempts must be at least 1"));
        }
        if self.lockout_secs <= 0 || self.window_secs <= 0 {
            return Err(AuthError::configuration("lockout and window must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub limit: u64,
    pub window_secs: i64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            limit: 100,
            window_secs: 60,
        }
    }
}

impl RateLimitSettings {
    pub fn window(&self) -> Duration {
        Duration::seconds(self.window_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub token: TokenSettings,
    pub guard: GuardSettings,
    pub rate_limit: RateLimitSettings,
    pub multi_tenant: bool,
    pub exempt_paths: Vec<String>,
}

impl AuthConfig {
    pub fn validate(&self) -> AuthResult<()> {
        self.token.validate()?;
        self.guard.validate()?;
        if self.rate_limit.limit == 0 || self.rate_limit.window_secs <= 0 {
            return Err(AuthError::configuration("rate limit and window must be positive"));
        }
        Ok(())
    }

    /// Defaults overridden by `WARDEN_*` environment variables.
    pub fn from_env() -> AuthResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`AuthConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> AuthResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("WARDEN_ISSUER") {
            config.token.issuer = v;
        }
        if let Some(v) = lookup("WARDEN_AUDIENCE") {
            config.token.audience = v;
        }
        set_parsed(&lookup, "WARDEN_ACCESS_TTL_SECS", &mut config.token.access_ttl_secs)?;
        set_parsed(&lookup, "WARDEN_REFRESH_TTL_SECS", &mut config.token.refresh_ttl_secs)?;
        set_parsed(&lookup, "WARDEN_LEEWAY_SECS", &mut config.token.leeway_secs)?;
        match lookup("WARDEN_KEY_ROTATION_GRACE_SECS") {
            Some(v) => config.token.rotation_grace_secs = parse_var("WARDEN_KEY_ROTATION_GRACE_SECS", &v)?,
            // Follow the refresh TTL unless told otherwise.
            None => config.token.rotation_grace_secs = config.token.refresh_ttl_secs,
        }

        set_parsed(&lookup, "WARDEN_MAX_FAILED_ATTEMPTS", &mut config.guard.max_attempts)?;
        set_parsed(&lookup, "WARDEN_LOCKOUT_SECS", &mut config.guard.lockout_secs)?;
        set_parsed(&lookup, "WARDEN_FAILURE_WINDOW_SECS", &mut config.guard.window_secs)?;
        if let Some(v) = lookup("WARDEN_LOCKOUT_POLICY") {
            config.guard.policy = match v.trim().to_ascii_lowercase().as_str() {
                "fixed" => LockoutPolicy::Fixed,
                "extending" => LockoutPolicy::Extending,
                other => {
                    return Err(AuthError::configuration(format!(
                        "WARDEN_LOCKOUT_POLICY: unknown policy '{other}'"
                    )));
                }
            };
        }

        set_parsed(&lookup, "WARDEN_RATE_LIMIT", &mut config.rate_limit.limit)?;
        set_parsed(&lookup, "WARDEN_RATE_LIMIT_WINDOW_SECS", &mut config.rate_limit.window_secs)?;
        set_parsed(&lookup, "WARDEN_MULTI_TENANT", &mut config.multi_tenant)?;
        if let Some(v) = lookup("WARDEN_EXEMPT_PATHS") {
            config.exempt_paths = v
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T: core::str::FromStr>(key: &str, value: &str) -> AuthResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| AuthError::configuration(format!("{key}: cannot parse '{value}'")))
}

fn set_parsed<F, T>(lookup: &F, key: &str, slot: &mut T) -> AuthResult<()>
where
    F: Fn(&str) -> Option<String>,
    T: core::str::FromStr,
{
    if let Some(v) = lookup(key) {
        *slot = parse_var(key, &v)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = AuthConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.guard.max_attempts, 5);
        assert_eq!(config.guard.lockout(), Duration::minutes(15));
        assert!(!config.multi_tenant);
    }

    #[test]
    fn env_overrides_and_grace_follows_refresh_ttl() {
        let config = AuthConfig::from_lookup(lookup(&[
            ("WARDEN_ISSUER", "https://auth.example"),
            ("WARDEN_REFRESH_TTL_SECS", "86400"),
            ("WARDEN_MULTI_TENANT", "true"),
            ("WARDEN_LOCKOUT_POLICY", "Extending"),
            ("WARDEN_EXEMPT_PATHS", "/health, /metrics ,"),
        ]))
        .unwrap();

        assert_eq!(config.token.issuer, "https://auth.example");
        assert_eq!(config.token.rotation_grace_secs, 86400);
        assert!(config.multi_tenant);
        assert_eq!(config.guard.policy, LockoutPolicy::Extending);
        assert_eq!(config.exempt_paths, vec!["/health", "/metrics"]);
    }

    #[test]
    fn unparsable_value_is_a_configuration_error() {
        let err = AuthConfig::from_lookup(lookup(&[("WARDEN_ACCESS_TTL_SECS", "soon")])).unwrap_err();
        assert!(matches!(err, AuthError::Configuration(msg) if msg.contains("WARDEN_ACCESS_TTL_SECS")));
    }

    #[test]
    fn grace_shorter_than_refresh_ttl_is_rejected() {
        let err = AuthConfig::from_lookup(lookup(&[
            ("WARDEN_REFRESH_TTL_SECS", "3600"),
            ("WARDEN_KEY_ROTATION_GRACE_SECS", "60"),
        ]))
        .unwrap_err();
        assert!(matches!(err, AuthError::Configuration(_)));
    }

    #[test]
    fn deserializes_partial_documents() {
        let config: AuthConfig = serde_json::from_str(r#"{"guard": {"max_attempts": 3}}"#).unwrap();
        assert_eq!(config.guard.max_attempts, 3);
        assert_eq!(config.guard.lockout_secs, 15 * 60);
        assert_eq!(config.token, TokenSettings::default());
    }
}
