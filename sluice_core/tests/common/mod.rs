//! Shared setup for integration tests.
//!
//! Rings are host-global named resources, so every test binary works in a
//! private scratch ring directory and under names unique to this process.
//! Child processes spawned by cross-process tests inherit the directory
//! through the environment.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Once;

static INIT: Once = Once::new();
static COUNTER: AtomicU64 = AtomicU64::new(0);

pub fn init() {
    INIT.call_once(|| {
        // A child process arrives with the parent's ring dir already set;
        // keep it, otherwise both sides would look in different places.
        if std::env::var(sluice_core::memory::RING_DIR_ENV).is_err() {
            let dir = tempfile::Builder::new()
                .prefix("sluice-it-")
                .tempdir()
                .expect("create scratch ring dir");
            std::env::set_var(sluice_core::memory::RING_DIR_ENV, dir.keep());
        }
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

pub fn unique_name(prefix: &str) -> String {
    init();
    format!(
        "{}-{}-{}",
        prefix,
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}
