//! Small internal helpers shared across modules.

/// Check whether a process is still alive.
///
/// `kill(pid, 0)` performs permission and existence checks without delivering
/// a signal. EPERM means the process exists but belongs to another user, so
/// it still counts as alive. Used by stale-slot reaping to reclaim consumer
/// and producer slots whose owning process crashed without detaching.
#[cfg(unix)]
pub(crate) fn pid_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    // SAFETY: kill with signal 0 only validates the target pid; it never
    // delivers a signal or mutates process state.
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub(crate) fn pid_alive(_pid: u32) -> bool {
    // No cheap liveness probe; treat every recorded owner as alive and rely
    // on explicit detach.
    true
}

/// This process's pid, truncated to the u32 the ring header stores.
pub(crate) fn own_pid() -> u32 {
    std::process::id()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_process_is_alive() {
        assert!(pid_alive(own_pid()));
    }

    #[test]
    fn pid_zero_is_not_alive() {
        assert!(!pid_alive(0));
    }
}
