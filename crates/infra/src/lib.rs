//! Infrastructure layer: shared stores and key material loading.

pub mod keys;
pub mod revocation;
