//! Log output for binaries and tests.

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber filtered by `RUST_LOG`, defaulting to
/// `lattix_train=info`.
///
/// Does nothing if a global subscriber is already set.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lattix_train=info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
