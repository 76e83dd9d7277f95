//! Bounded waiting and cooperative shutdown.
//!
//! Every blocking point in sluice (`put` waiting for free space, `get`/`peek`
//! waiting for data, the feed adapter waiting on an external source) sits on
//! the same primitive: poll a condition with a spin -> yield -> sleep backoff,
//! bounded by a wall-clock deadline, and bail out early when a shutdown token
//! fires. Cross-process coordination happens through atomics in the mapped
//! ring header, so there is no futex/condvar to park on; a stalled peer is
//! detected by the deadline rather than hanging the caller forever.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cloneable cancellation flag checked by every blocking loop.
///
/// Typically installed from a signal handler in the binaries; clones share
/// the underlying flag.
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    flag: Arc<AtomicBool>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Idempotent; wakes every loop polling this token.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Result of a bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The condition became true before the deadline.
    Satisfied,
    /// The deadline passed with the condition still false.
    TimedOut,
    /// The shutdown token fired while waiting.
    Cancelled,
}

/// Spin -> yield -> sleep polling backoff.
///
/// The first iterations spin (cheap when the peer is actively draining),
/// then yield the timeslice, then sleep in short steps so a long wait does
/// not burn a core.
#[derive(Debug, Clone, Copy)]
pub struct WaitStrategy {
    /// Busy-spin iterations before yielding.
    pub spin_iters: u32,
    /// `yield_now` iterations before sleeping.
    pub yield_iters: u32,
    /// Sleep step once past the spin/yield phases.
    pub sleep_step: Duration,
}

impl Default for WaitStrategy {
    fn default() -> Self {
        Self {
            spin_iters: 64,
            yield_iters: 16,
            sleep_step: Duration::from_micros(200),
        }
    }
}

impl WaitStrategy {
    /// Back off appropriately for the given iteration count.
    #[inline]
    pub fn pause(&self, iter: u32) {
        if iter < self.spin_iters {
            std::hint::spin_loop();
        } else if iter < self.spin_iters + self.yield_iters {
            std::thread::yield_now();
        } else {
            std::thread::sleep(self.sleep_step);
        }
    }

    /// Poll `cond` until it returns true, the deadline passes, or the token
    /// (if any) fires. The condition is always checked at least once, so a
    /// zero timeout acts as a non-blocking probe.
    pub fn wait_until(
        &self,
        deadline: Instant,
        token: Option<&ShutdownToken>,
        mut cond: impl FnMut() -> bool,
    ) -> WaitOutcome {
        let mut iter = 0u32;
        loop {
            if cond() {
                return WaitOutcome::Satisfied;
            }
            if let Some(t) = token {
                if t.is_triggered() {
                    return WaitOutcome::Cancelled;
                }
            }
            if Instant::now() >= deadline {
                return WaitOutcome::TimedOut;
            }
            self.pause(iter);
            iter = iter.saturating_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn satisfied_immediately_with_zero_timeout() {
        let strategy = WaitStrategy::default();
        let outcome = strategy.wait_until(Instant::now(), None, || true);
        assert_eq!(outcome, WaitOutcome::Satisfied);
    }

    #[test]
    fn times_out_when_condition_never_true() {
        let strategy = WaitStrategy::default();
        let deadline = Instant::now() + Duration::from_millis(20);
        let outcome = strategy.wait_until(deadline, None, || false);
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }

    #[test]
    fn cancelled_by_token() {
        let strategy = WaitStrategy::default();
        let token = ShutdownToken::new();
        let t2 = token.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            t2.trigger();
        });
        let deadline = Instant::now() + Duration::from_secs(5);
        let outcome = strategy.wait_until(deadline, Some(&token), || false);
        assert_eq!(outcome, WaitOutcome::Cancelled);
        handle.join().unwrap();
    }

    #[test]
    fn condition_polled_until_satisfied() {
        let strategy = WaitStrategy::default();
        let count = AtomicU32::new(0);
        let deadline = Instant::now() + Duration::from_secs(5);
        let outcome = strategy.wait_until(deadline, None, || {
            count.fetch_add(1, Ordering::Relaxed) >= 10
        });
        assert_eq!(outcome, WaitOutcome::Satisfied);
        assert!(count.load(Ordering::Relaxed) >= 10);
    }
}
