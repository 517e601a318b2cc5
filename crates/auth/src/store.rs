//! Shared mutable state: revocations, subject cutoffs and counters.
//!
//! Every implementation must make each operation atomic and visible to every
//! process that shares the deployment. [`InMemoryRevocationStore`] only
//! satisfies that inside one process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use warden_core::{AuthError, AuthResult, Clock, SubjectId, TokenId};

/// Key under which a revoked (or consumed) token id is recorded.
pub fn revoked_token_key(id: &TokenId) -> String {
    format!("revoked:{id}")
}

pub trait RevocationStore: Send + Sync {
    /// Set `key` (value irrelevant) so it expires after `ttl`.
    fn set_with_ttl(&self, key: &str, ttl: Duration) -> AuthResult<()>;

    /// Set `key` only if absent. Returns `true` if this call created it.
    fn set_if_absent(&self, key: &str, ttl: Duration) -> AuthResult<bool>;

    fn exists(&self, key: &str) -> AuthResult<bool>;

    fn remove(&self, key: &str) -> AuthResult<()>;

    /// Increment a counter, starting a fixed `window` on first increment.
    fn increment(&self, key: &str, window: Duration) -> AuthResult<u64>;

    /// Current counter value (0 when absent or expired).
    fn counter(&self, key: &str) -> AuthResult<u64>;

    /// Record "reject every token of `subject` issued at or before `cutoff`".
    fn set_invalidation(&self, subject: &SubjectId, cutoff: DateTime<Utc>, retention: Duration) -> AuthResult<()>;

    fn get_invalidation(&self, subject: &SubjectId) -> AuthResult<Option<DateTime<Utc>>>;

    /// Whether state is shared across processes.
    fn is_distributed(&self) -> bool;
}

#[derive(Debug, Clone)]
enum Value {
    Flag,
    Counter(u64),
    Cutoff(DateTime<Utc>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: DateTime<Utc>,
}

/// How often writes sweep out expired entries.
const SWEEP_INTERVAL_SECS: i64 = 60;

struct State {
    entries: HashMap<String, Entry>,
    next_sweep: DateTime<Utc>,
}

impl State {
    fn live(&self, key: &str, now: DateTime<Utc>) -> Option<&Entry> {
        self.entries.get(key).filter(|e| e.expires_at > now)
    }

    fn purge(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        self.next_sweep = now + Duration::seconds(SWEEP_INTERVAL_SECS);
        before - self.entries.len()
    }

    /// Called on every write so the map stays bounded by what is live.
    fn sweep_if_due(&mut self, now: DateTime<Utc>) {
        if now >= self.next_sweep {
            let removed = self.purge(now);
            if removed > 0 {
                debug!(removed, remaining = self.entries.len(), "expired store entries swept");
            }
        }
    }
}

/// Process-local store.
///
/// Intended for tests, dev and single-instance deployments. Revocations and
/// lockouts recorded here are invisible to other instances.
pub struct InMemoryRevocationStore {
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

impl InMemoryRevocationStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        warn!("in-memory revocation store is process-local; do not use it for multi-instance deployments");
        let next_sweep = clock.now() + Duration::seconds(SWEEP_INTERVAL_SECS);
        Self {
            clock,
            state: Mutex::new(State {
                entries: HashMap::new(),
                next_sweep,
            }),
        }
    }

    /// Drop expired entries now. Writes already do this periodically.
    pub fn purge_expired(&self) -> AuthResult<usize> {
        let now = self.clock.now();
        Ok(self.lock()?.purge(now))
    }

    pub fn len(&self) -> AuthResult<usize> {
        Ok(self.lock()?.entries.len())
    }

    pub fn is_empty(&self) -> AuthResult<bool> {
        Ok(self.len()? == 0)
    }

    fn lock(&self) -> AuthResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| AuthError::infrastructure("revocation store lock poisoned"))
    }

    /// Lock for a write at `now`, sweeping first when due.
    fn lock_for_write(&self, now: DateTime<Utc>) -> AuthResult<MutexGuard<'_, State>> {
        let mut state = self.lock()?;
        state.sweep_if_due(now);
        Ok(state)
    }

    fn invalidation_key(subject: &SubjectId) -> String {
        format!("invalidated:{subject}")
    }
}

impl RevocationStore for InMemoryRevocationStore {
    fn set_with_ttl(&self, key: &str, ttl: Duration) -> AuthResult<()> {
        let now = self.clock.now();
        let mut state = self.lock_for_write(now)?;
        state.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Flag,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    fn set_if_absent(&self, key: &str, ttl: Duration) -> AuthResult<bool> {
        let now = self.clock.now();
        let mut state = self.lock_for_write(now)?;
        if state.live(key, now).is_some() {
            return Ok(false);
        }
        state.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Flag,
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    fn exists(&self, key: &str) -> AuthResult<bool> {
        let now = self.clock.now();
        Ok(self.lock()?.live(key, now).is_some())
    }

    fn remove(&self, key: &str) -> AuthResult<()> {
        self.lock()?.entries.remove(key);
        Ok(())
    }

    fn increment(&self, key: &str, window: Duration) -> AuthResult<u64> {
        let now = self.clock.now();
        let mut state = self.lock_for_write(now)?;

        let (count, expires_at) = match state.live(key, now) {
            Some(Entry {
                value: Value::Counter(n),
                expires_at,
            }) => (n + 1, *expires_at),
            _ => (1, now + window),
        };
        state.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Counter(count),
                expires_at,
            },
        );
        Ok(count)
    }

    fn counter(&self, key: &str) -> AuthResult<u64> {
        let now = self.clock.now();
        Ok(match self.lock()?.live(key, now) {
            Some(Entry {
                value: Value::Counter(n),
                ..
            }) => *n,
            _ => 0,
        })
    }

    fn set_invalidation(&self, subject: &SubjectId, cutoff: DateTime<Utc>, retention: Duration) -> AuthResult<()> {
        let now = self.clock.now();
        let mut state = self.lock_for_write(now)?;
        state.entries.insert(
            Self::invalidation_key(subject),
            Entry {
                value: Value::Cutoff(cutoff),
                expires_at: now + retention,
            },
        );
        Ok(())
    }

    fn get_invalidation(&self, subject: &SubjectId) -> AuthResult<Option<DateTime<Utc>>> {
        let now = self.clock.now();
        Ok(match self.lock()?.live(&Self::invalidation_key(subject), now) {
            Some(Entry {
                value: Value::Cutoff(at),
                ..
            }) => Some(*at),
            _ => None,
        })
    }

    fn is_distributed(&self) -> bool {
        false
    }
}
