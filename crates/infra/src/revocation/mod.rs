//! Store implementations shared across instances.
//!
//! The process-local store lives in `warden-auth`; anything here is meant for
//! multi-instance deployments.

#[cfg(feature = "redis")]
pub mod redis;

#[cfg(feature = "redis")]
pub use self::redis::RedisRevocationStore;
