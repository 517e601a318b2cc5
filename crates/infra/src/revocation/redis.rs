//! Redis-backed revocation store (optional).
//!
//! Every primitive maps onto a single atomic Redis command:
//! - `set_with_ttl`: `SET key 1 PX ttl`
//! - `set_if_absent`: `SET key 1 NX PX ttl`
//! - `increment`: `INCR`, with `PEXPIRE` on the first hit (Lua, atomic)
//! - subject cutoffs: `SET` of the cutoff in epoch milliseconds
//!
//! TTLs are enforced by the Redis server clock.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use redis::Commands;
use tracing::debug;

use warden_auth::RevocationStore;
use warden_core::{AuthError, AuthResult, SubjectId, fingerprint};

const DEFAULT_PREFIX: &str = "warden:";
const DEFAULT_CONNECT_TIMEOUT: StdDuration = StdDuration::from_secs(2);

const INCREMENT_SCRIPT: &str = r"
local n = redis.call('INCR', KEYS[1])
if n == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return n
";

fn redis_error(e: redis::RedisError) -> AuthError {
    AuthError::infrastructure(format!("redis: {e}"))
}

/// Milliseconds for a Redis TTL argument; never below 1.
fn ttl_millis(ttl: Duration) -> i64 {
    ttl.num_milliseconds().max(1)
}

#[derive(Debug, Clone)]
pub struct RedisRevocationStore {
    client: redis::Client,
    prefix: String,
    connect_timeout: StdDuration,
}

impl RedisRevocationStore {
    pub fn new(redis_url: impl AsRef<str>) -> AuthResult<Self> {
        let client = redis::Client::open(redis_url.as_ref()).map_err(redis_error)?;
        Ok(Self {
            client,
            prefix: DEFAULT_PREFIX.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        })
    }

    /// Namespace for all keys written by this store.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: StdDuration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn connection(&self) -> AuthResult<redis::Connection> {
        self.client
            .get_connection_with_timeout(self.connect_timeout)
            .map_err(redis_error)
    }

    fn key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    fn invalidation_key(&self, subject: &SubjectId) -> String {
        self.key(&format!("invalidated:{}", fingerprint(subject.as_str())))
    }

    /// Round-trip a `PING`; useful for readiness checks.
    pub fn ping(&self) -> AuthResult<()> {
        let mut conn = self.connection()?;
        redis::cmd("PING").query::<String>(&mut conn).map_err(redis_error)?;
        Ok(())
    }
}

impl RevocationStore for RedisRevocationStore {
    fn set_with_ttl(&self, key: &str, ttl: Duration) -> AuthResult<()> {
        let mut conn = self.connection()?;
        redis::cmd("SET")
            .arg(self.key(key))
            .arg(1)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query::<()>(&mut conn)
            .map_err(redis_error)
    }

    fn set_if_absent(&self, key: &str, ttl: Duration) -> AuthResult<bool> {
        let mut conn = self.connection()?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.key(key))
            .arg(1)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query(&mut conn)
            .map_err(redis_error)?;
        Ok(reply.is_some())
    }

    fn exists(&self, key: &str) -> AuthResult<bool> {
        let mut conn = self.connection()?;
        conn.exists(self.key(key)).map_err(redis_error)
    }

    fn remove(&self, key: &str) -> AuthResult<()> {
        let mut conn = self.connection()?;
        conn.del::<_, ()>(self.key(key)).map_err(redis_error)
    }

    fn increment(&self, key: &str, window: Duration) -> AuthResult<u64> {
        let mut conn = self.connection()?;
        redis::Script::new(INCREMENT_SCRIPT)
            .key(self.key(key))
            .arg(ttl_millis(window))
            .invoke(&mut conn)
            .map_err(redis_error)
    }

    fn counter(&self, key: &str) -> AuthResult<u64> {
        let mut conn = self.connection()?;
        let value: Option<u64> = conn.get(self.key(key)).map_err(redis_error)?;
        Ok(value.unwrap_or(0))
    }

    fn set_invalidation(&self, subject: &SubjectId, cutoff: DateTime<Utc>, retention: Duration) -> AuthResult<()> {
        let mut conn = self.connection()?;
        redis::cmd("SET")
            .arg(self.invalidation_key(subject))
            .arg(cutoff.timestamp_millis())
            .arg("PX")
            .arg(ttl_millis(retention))
            .query::<()>(&mut conn)
            .map_err(redis_error)
    }

    fn get_invalidation(&self, subject: &SubjectId) -> AuthResult<Option<DateTime<Utc>>> {
        let mut conn = self.connection()?;
        let millis: Option<i64> = conn.get(self.invalidation_key(subject)).map_err(redis_error)?;
        match millis {
            None => Ok(None),
            Some(ms) => DateTime::from_timestamp_millis(ms).map(Some).ok_or_else(|| {
                debug!(value = ms, "unreadable subject cutoff");
                AuthError::infrastructure("stored subject cutoff is out of range")
            }),
        }
    }

    fn is_distributed(&self) -> bool {
        true
    }
}
