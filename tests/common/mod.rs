//! Shared helpers for the integration suites.

pub mod stubs;

use std::sync::Once;

static INIT: Once = Once::new();

/// Installs a test subscriber once so failing runs show the crate's
/// tracing output under `--nocapture`.
#[allow(dead_code)]
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("ringside=debug")),
            )
            .with_test_writer()
            .try_init();
    });
}
