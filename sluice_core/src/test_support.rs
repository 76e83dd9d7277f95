//! Shared helpers for the crate's unit tests.
//!
//! Rings are global named resources; every test therefore works in a private
//! scratch ring directory (redirected once per test process) and under a
//! name unique to this process and call site.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Once;

static INIT: Once = Once::new();
static COUNTER: AtomicU64 = AtomicU64::new(0);

/// Redirect the ring directory to a fresh temp dir, once per test process.
///
/// Must run before any ring operation in the test binary; every helper in
/// this module calls it first. `std::env` serializes var access internally,
/// and the `Once` guarantees no ring code reads the variable before it is
/// set.
pub(crate) fn init_ring_dir() {
    INIT.call_once(|| {
        let dir = tempfile::Builder::new()
            .prefix("sluice-test-")
            .tempdir()
            .expect("create test ring dir");
        // Leak: the scratch dir must outlive every test in the process.
        let path = dir.keep();
        std::env::set_var(crate::memory::RING_DIR_ENV, &path);
    });
}

/// A ring name unique to this process, test binary, and call.
pub(crate) fn unique_name(prefix: &str) -> String {
    init_ring_dir();
    format!(
        "{}-{}-{}",
        prefix,
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}
