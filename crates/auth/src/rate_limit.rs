use std::sync::Arc;

use tracing::debug;

use warden_core::{AuthError, AuthResult, fingerprint};

use crate::config::RateLimitSettings;
use crate::store::RevocationStore;

/// Fixed-window request counter over the shared store.
pub struct RateLimiter {
    settings: RateLimitSettings,
    store: Arc<dyn RevocationStore>,
}

impl RateLimiter {
    pub fn new(settings: RateLimitSettings, store: Arc<dyn RevocationStore>) -> Self {
        Self { settings, store }
    }

    pub fn settings(&self) -> &RateLimitSettings {
        &self.settings
    }

    /// Count one request for `client`; returns the requests left in the window.
    pub fn hit(&self, client: &str) -> AuthResult<u64> {
        let hashed = fingerprint(client);
        let count = self
            .store
            .increment(&format!("rl:{hashed}"), self.settings.window())?;

        let limit = self.settings.limit;
        if count > limit {
            debug!(client = %hashed, count, limit, "rate limit exceeded");
            return Err(AuthError::RateLimitExceeded);
        }
        Ok(limit - count)
    }
}

#[cfg(test)]
mod tests {
    use warden_core::ManualClock;

    use super::*;
    use crate::store::InMemoryRevocationStore;

    #[test]
    fn limit_resets_with_the_window() {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(InMemoryRevocationStore::new(clock.clone()));
        let limiter = RateLimiter::new(
            RateLimitSettings {
                limit: 3,
                window_secs: 60,
            },
            store,
        );

        assert_eq!(limiter.hit("10.0.0.1"), Ok(2));
        assert_eq!(limiter.hit("10.0.0.1"), Ok(1));
        assert_eq!(limiter.hit("10.0.0.1"), Ok(0));
        assert_eq!(limiter.hit("10.0.0.1"), Err(AuthError::RateLimitExceeded));
        assert_eq!(limiter.hit("10.0.0.2"), Ok(2));

        clock.advance(limiter.settings().window());
        assert_eq!(limiter.hit("10.0.0.1"), Ok(2));
    }
}
