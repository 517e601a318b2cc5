//! `warden-core`: shared building blocks for the auth core.
//!
//! This crate contains **pure** primitives (no IO, no stores, no transport).

pub mod clock;
pub mod error;
pub mod fingerprint;
pub mod id;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{AuthError, AuthResult};
pub use fingerprint::fingerprint;
pub use id::{SessionId, SubjectId, TenantId, TokenId};
