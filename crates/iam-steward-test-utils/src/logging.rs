//! Tracing setup for tests

use tracing_subscriber::EnvFilter;

/// Install a test subscriber once per process. Honors `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("iam_steward=debug")),
        )
        .with_test_writer()
        .try_init();
}
