//! Loading signing/verification keys at startup.
//!
//! Variables (all optional except the key material itself):
//! - `WARDEN_SIGNING_KID` (default `primary`)
//! - `WARDEN_SIGNING_ALG` (default `HS256`)
//! - `WARDEN_HMAC_SECRET` for HS* algorithms
//! - `WARDEN_PRIVATE_KEY_PATH` / `WARDEN_PUBLIC_KEY_PATH` (PEM) otherwise

use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use jsonwebtoken::Algorithm;
use tracing::info;

use warden_auth::{KeyRing, KeySpec, TokenSettings};
use warden_core::{AuthError, AuthResult, Clock};

const DEFAULT_KID: &str = "primary";

fn read_pem(path: &Path) -> AuthResult<Vec<u8>> {
    fs::read(path).map_err(|e| AuthError::configuration(format!("cannot read key file {}: {e}", path.display())))
}

/// Build a key from PEM files. Omit the private key for verify-only keys
/// (e.g. a peer's public key during migration).
pub fn load_pem_key(
    kid: impl Into<String>,
    algorithm: Algorithm,
    private_key: Option<&Path>,
    public_key: &Path,
) -> AuthResult<KeySpec> {
    let private_pem = private_key.map(read_pem).transpose()?;
    let public_pem = read_pem(public_key)?;
    KeySpec::from_pem(kid, algorithm, private_pem.as_deref(), &public_pem)
}

/// The signing key described by `WARDEN_*` variables.
pub fn signing_key_from_env() -> AuthResult<KeySpec> {
    signing_key_from_lookup(|key| std::env::var(key).ok())
}

pub fn signing_key_from_lookup<F>(lookup: F) -> AuthResult<KeySpec>
where
    F: Fn(&str) -> Option<String>,
{
    let kid = lookup("WARDEN_SIGNING_KID").unwrap_or_else(|| DEFAULT_KID.to_string());
    let algorithm = match lookup("WARDEN_SIGNING_ALG") {
        Some(name) => Algorithm::from_str(name.trim())
            .map_err(|_| AuthError::configuration(format!("WARDEN_SIGNING_ALG: unknown algorithm '{name}'")))?,
        None => Algorithm::HS256,
    };

    if matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
        let secret = lookup("WARDEN_HMAC_SECRET")
            .ok_or_else(|| AuthError::configuration(format!("WARDEN_HMAC_SECRET is required for {algorithm:?}")))?;
        return KeySpec::hmac(kid, algorithm, secret.as_bytes());
    }

    let public = lookup("WARDEN_PUBLIC_KEY_PATH")
        .ok_or_else(|| AuthError::configuration(format!("WARDEN_PUBLIC_KEY_PATH is required for {algorithm:?}")))?;
    let private = lookup("WARDEN_PRIVATE_KEY_PATH")
        .ok_or_else(|| AuthError::configuration("WARDEN_PRIVATE_KEY_PATH is required to sign"))?;
    load_pem_key(kid, algorithm, Some(Path::new(&private)), Path::new(&public))
}

/// Key ring seeded from the environment, with the rotation grace from `settings`.
pub fn key_ring_from_env(settings: &TokenSettings, clock: Arc<dyn Clock>) -> AuthResult<KeyRing> {
    let key = signing_key_from_env()?;
    info!(kid = key.kid(), algorithm = ?key.algorithm(), "signing key loaded");
    KeyRing::for_settings(key, settings, clock)
}
