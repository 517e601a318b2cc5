//! Process-wide logging setup shared by services embedding warden.

/// Install the global subscriber: format from `WARDEN_LOG_FORMAT` (JSON
/// unless `pretty`), filter from `RUST_LOG`, default `info`.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init(LogFormat::from_env());
}

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use self::tracing::{LogFormat, init_with};
