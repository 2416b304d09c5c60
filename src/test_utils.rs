//! Shared helpers for this crate's unit and integration tests.

use std::sync::Once;

static INIT_LOGGING: Once = Once::new();

/// Initialize tracing output for tests.
///
/// Safe to call multiple times; only the first call installs a subscriber.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(true)
            .with_ansi(false)
            .try_init();
    });
}
