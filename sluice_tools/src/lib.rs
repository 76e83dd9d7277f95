//! Shared plumbing for the sluice operational binaries.

use sluice_core::ShutdownToken;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

static SIGNALLED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_sig: libc::c_int) {
    // Only async-signal-safe work here: flip the flag, nothing else.
    SIGNALLED.store(true, Ordering::SeqCst);
}

/// Route SIGINT/SIGTERM into a shutdown token.
///
/// The handler itself only sets a static flag; a watcher thread propagates
/// it into the token, which every blocking loop in sluice polls.
pub fn install_shutdown_handler(token: ShutdownToken) {
    // SAFETY: on_signal is async-signal-safe (single atomic store) and has
    // the signature libc::signal expects.
    unsafe {
        libc::signal(libc::SIGINT, on_signal as libc::sighandler_t);
        libc::signal(libc::SIGTERM, on_signal as libc::sighandler_t);
    }
    std::thread::spawn(move || loop {
        if SIGNALLED.load(Ordering::SeqCst) {
            log::info!("shutdown signal received");
            token.trigger();
            return;
        }
        std::thread::sleep(Duration::from_millis(100));
    });
}

/// Exit with an error message on stderr and in the log.
pub fn die(msg: &str) -> ! {
    log::error!("{}", msg);
    eprintln!("error: {}", msg);
    std::process::exit(1);
}
