//! Shared helpers for unit and integration tests.

use std::sync::Once;

static LOGGING_INIT: Once = Once::new();

/// Initializes a tracing subscriber exactly once per test process.
///
/// Output goes through the test writer so it is captured per test and
/// only shown on failure. Honors `RUST_LOG` when set.
pub fn setup_test_logging() {
    LOGGING_INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Permission-based tests are meaningless for root, which bypasses
/// file modes entirely. Callers skip themselves when this is true.
#[cfg(all(unix, any(test, doctest)))]
pub fn running_as_root() -> bool {
    // Safety: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}
