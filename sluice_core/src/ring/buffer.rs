//! Per-process ring handles.
//!
//! A `RingBuffer` is one attachment (producer or consumer role) to a shared
//! ring segment. Producers get `put`; consumers get `get`/`peek`/`skip`.
//! All blocking is bounded: a stalled peer surfaces as `Timeout` (or
//! eviction, on the producer side), never as a hang. Detach is idempotent
//! and runs on drop, so a handle can be abandoned safely even after the
//! peer process has died or the ring was removed.

use crate::error::{Read, SluiceError, SluiceResult};
use crate::ring::segment::RingSegment;
use crate::ring::Role;
use crate::wait::{ShutdownToken, WaitOutcome, WaitStrategy};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default bound on how long `put` waits for consumers to drain before the
/// eviction pass runs.
pub const DEFAULT_PUT_TIMEOUT: Duration = Duration::from_millis(500);

/// One attachment to a ring. Created through [`registry::attach`] or the
/// [`RingBuffer::producer`]/[`RingBuffer::consumer`] conveniences.
///
/// [`registry::attach`]: crate::ring::registry::attach
pub struct RingBuffer {
    segment: Arc<RingSegment>,
    role: Role,
    /// Consumer slot index; unused for producers.
    slot: usize,
    /// Attach token proving slot ownership; 0 for producers.
    token: u64,
    /// Locally mirrored producer cursor, refreshed only when the cached
    /// value cannot satisfy a read. Keeps the fast path off the shared
    /// cache line.
    cached_produced: u64,
    put_timeout: Duration,
    strategy: WaitStrategy,
    shutdown: Option<ShutdownToken>,
    detached: bool,
}

impl RingBuffer {
    pub(crate) fn new_producer(segment: Arc<RingSegment>) -> Self {
        Self {
            segment,
            role: Role::Producer,
            slot: 0,
            token: 0,
            cached_produced: 0,
            put_timeout: DEFAULT_PUT_TIMEOUT,
            strategy: WaitStrategy::default(),
            shutdown: None,
            detached: false,
        }
    }

    pub(crate) fn new_consumer(segment: Arc<RingSegment>, slot: usize, token: u64) -> Self {
        Self {
            segment,
            role: Role::Consumer,
            slot,
            token,
            cached_produced: 0,
            put_timeout: DEFAULT_PUT_TIMEOUT,
            strategy: WaitStrategy::default(),
            shutdown: None,
            detached: false,
        }
    }

    /// Attach to `name` as the single producer. See [`registry::attach`].
    ///
    /// [`registry::attach`]: crate::ring::registry::attach
    pub fn producer(name: &str) -> SluiceResult<Self> {
        crate::ring::registry::attach(name, Role::Producer)
    }

    /// Attach to `name` as an independent consumer.
    pub fn consumer(name: &str) -> SluiceResult<Self> {
        crate::ring::registry::attach(name, Role::Consumer)
    }

    pub fn name(&self) -> &str {
        self.segment.name()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn capacity(&self) -> usize {
        self.segment.capacity()
    }

    /// Bound how long `put` waits for consumers before evicting blockers.
    pub fn set_put_timeout(&mut self, timeout: Duration) {
        self.put_timeout = timeout;
    }

    /// Install a shutdown token; blocking calls return `Timeout` promptly
    /// once it fires.
    pub fn set_shutdown_token(&mut self, token: ShutdownToken) {
        self.shutdown = Some(token);
    }

    /// Free space (producer) or unread backlog (consumer), in bytes.
    /// Producers size batched writes off this.
    pub fn usage(&self) -> u64 {
        match self.role {
            Role::Producer => self.segment.free_space(),
            Role::Consumer => self.segment.available(self.slot),
        }
    }

    fn ensure_attached(&self) -> SluiceResult<()> {
        if self.detached {
            return Err(SluiceError::invalid_input(format!(
                "handle for ring '{}' is detached",
                self.segment.name()
            )));
        }
        Ok(())
    }

    fn ensure_role(&self, role: Role) -> SluiceResult<()> {
        if self.role != role {
            return Err(SluiceError::invalid_input(format!(
                "operation requires {} role on ring '{}'",
                role,
                self.segment.name()
            )));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Producer side
    // ------------------------------------------------------------------

    /// Append `buf` to the ring and publish it atomically: a consumer either
    /// sees none of these bytes or all of them.
    ///
    /// Blocks up to the put timeout for free space. If space is still short
    /// when the timeout expires, every consumer blocking this write is
    /// evicted (its next read fails `Lapped`) and the write proceeds — the
    /// producer is never stalled indefinitely by one slow reader. With no
    /// attached consumers there is no backpressure at all.
    ///
    /// The item-framing layer only calls this with whole encoded items;
    /// byte-level access is the narrowly-scoped path for adapters that
    /// forward already-framed external streams verbatim.
    pub fn put(&mut self, buf: &[u8]) -> SluiceResult<()> {
        self.ensure_attached()?;
        self.ensure_role(Role::Producer)?;
        if buf.is_empty() {
            return Ok(());
        }
        if buf.len() > self.segment.capacity() {
            return Err(SluiceError::invalid_input(format!(
                "item of {} bytes can never fit ring '{}' (capacity {})",
                buf.len(),
                self.segment.name(),
                self.segment.capacity()
            )));
        }

        let seg = &self.segment;
        let n = buf.len() as u64;
        if seg.is_doomed() {
            return Err(SluiceError::PeerGone(format!(
                "ring '{}' was removed",
                seg.name()
            )));
        }

        let deadline = Instant::now() + self.put_timeout;
        let outcome = self.strategy.wait_until(deadline, self.shutdown.as_ref(), || {
            seg.is_doomed() || seg.free_space() >= n
        });
        if seg.is_doomed() {
            return Err(SluiceError::PeerGone(format!(
                "ring '{}' was removed",
                seg.name()
            )));
        }
        if outcome == WaitOutcome::Cancelled {
            return Err(SluiceError::Timeout(format!(
                "put on ring '{}' cancelled by shutdown",
                seg.name()
            )));
        }
        if seg.free_space() < n {
            // Bounded wait expired. Clear slots of dead processes first,
            // then lap whoever is still in the way.
            seg.reap_dead_slots();
            seg.evict_blockers(n);
        }

        let header = seg.header();
        let cursor = header.producer_cursor.load(Ordering::Relaxed);
        seg.write_bytes(cursor, buf);
        // Release-publish: consumers Acquire-load the cursor, so the bytes
        // written above are visible before the new cursor is.
        header.producer_cursor.store(cursor + n, Ordering::Release);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Consumer side
    // ------------------------------------------------------------------

    /// Read exactly `n` bytes, advancing the cursor.
    pub fn get(&mut self, n: usize, timeout: Duration) -> SluiceResult<Read<Vec<u8>>> {
        let mut buf = vec![0u8; n];
        Ok(self.fetch(&mut buf, timeout, true)?.map(|()| buf))
    }

    /// Read exactly `out.len()` bytes into `out`, advancing the cursor.
    pub fn get_into(&mut self, out: &mut [u8], timeout: Duration) -> SluiceResult<Read<()>> {
        self.fetch(out, timeout, true)
    }

    /// Read exactly `out.len()` bytes without advancing the cursor. A later
    /// `get`/`skip` re-covers the same bytes.
    pub fn peek_into(&mut self, out: &mut [u8], timeout: Duration) -> SluiceResult<Read<()>> {
        self.fetch(out, timeout, false)
    }

    /// Advance the cursor by `n` bytes without copying anything. This is how
    /// filtered-out items are discarded for free.
    pub fn skip(&mut self, n: usize, timeout: Duration) -> SluiceResult<Read<()>> {
        self.ensure_attached()?;
        self.ensure_role(Role::Consumer)?;
        match self.wait_for_bytes(n as u64, timeout)? {
            Read::Data(()) => {
                if !self.segment.slot_is_active(self.slot, self.token) {
                    return Err(SluiceError::Lapped(self.segment.name().to_string()));
                }
                self.advance(n as u64);
                Ok(Read::Data(()))
            }
            Read::EndOfStream => Ok(Read::EndOfStream),
        }
    }

    fn fetch(&mut self, out: &mut [u8], timeout: Duration, advance: bool) -> SluiceResult<Read<()>> {
        self.ensure_attached()?;
        self.ensure_role(Role::Consumer)?;
        match self.wait_for_bytes(out.len() as u64, timeout)? {
            Read::Data(()) => {
                let cursor = self.segment.header().slots[self.slot]
                    .cursor
                    .load(Ordering::Relaxed);
                self.segment.read_bytes(cursor, out);
                // Re-validate after the copy: if the producer evicted us
                // while we were reading, the bytes may already be
                // overwritten — surface Lapped, never stale data.
                if !self.segment.slot_is_active(self.slot, self.token) {
                    return Err(SluiceError::Lapped(self.segment.name().to_string()));
                }
                if advance {
                    self.advance(out.len() as u64);
                }
                Ok(Read::Data(()))
            }
            Read::EndOfStream => Ok(Read::EndOfStream),
        }
    }

    /// Block until `n` bytes are published for this consumer, the ring is
    /// destroyed (`EndOfStream`), the consumer is lapped, or the timeout
    /// expires.
    fn wait_for_bytes(&mut self, n: u64, timeout: Duration) -> SluiceResult<Read<()>> {
        if n > self.segment.capacity() as u64 {
            return Err(SluiceError::invalid_input(format!(
                "read of {} bytes can never be satisfied by ring '{}' (capacity {})",
                n,
                self.segment.name(),
                self.segment.capacity()
            )));
        }

        let seg = &self.segment;
        let slot = self.slot;
        let token = self.token;

        // Fast path on the mirrored cursor: no shared-line traffic while the
        // cached producer position still covers the request.
        let read_cursor = seg.header().slots[slot].cursor.load(Ordering::Relaxed);
        if self.cached_produced.saturating_sub(read_cursor) < n {
            self.cached_produced = seg.header().producer_cursor.load(Ordering::Acquire);
        }
        let mut satisfied = self.cached_produced.saturating_sub(read_cursor) >= n
            && seg.slot_is_active(slot, token);

        if !satisfied {
            let deadline = Instant::now() + timeout;
            let outcome = self.strategy.wait_until(deadline, self.shutdown.as_ref(), || {
                !seg.slot_is_active(slot, token) || seg.is_doomed() || seg.available(slot) >= n
            });

            if !seg.slot_is_active(slot, token) {
                return Err(SluiceError::Lapped(seg.name().to_string()));
            }
            satisfied = seg.available(slot) >= n;
            if !satisfied {
                if seg.is_doomed() {
                    return Ok(Read::EndOfStream);
                }
                if seg.producer_died() {
                    return Err(SluiceError::PeerGone(format!(
                        "producer of ring '{}' died with the stream open",
                        seg.name()
                    )));
                }
                return match outcome {
                    WaitOutcome::Cancelled => Err(SluiceError::Timeout(format!(
                        "read on ring '{}' cancelled by shutdown",
                        seg.name()
                    ))),
                    _ => Err(SluiceError::Timeout(format!(
                        "no data on ring '{}' within {:?}",
                        seg.name(),
                        timeout
                    ))),
                };
            }
            self.cached_produced = seg.header().producer_cursor.load(Ordering::Acquire);
        }

        Ok(Read::Data(()))
    }

    fn advance(&mut self, n: u64) {
        // Never touch a slot we no longer own — it may have been reaped and
        // handed to another consumer already.
        if !self.segment.slot_is_active(self.slot, self.token) {
            return;
        }
        let slot = &self.segment.header().slots[self.slot];
        let cursor = slot.cursor.load(Ordering::Relaxed);
        // Release so the producer's free-space check orders against our
        // reads of the consumed bytes.
        slot.cursor.store(cursor + n, Ordering::Release);
        slot.last_active_ns
            .store(crate::ring::header::now_ns(), Ordering::Relaxed);
    }

    /// Detach from the ring. Idempotent; also runs on drop. The last handle
    /// to detach from a removed ring unlinks its backing file.
    pub fn detach(&mut self) {
        if self.detached {
            return;
        }
        self.detached = true;
        match self.role {
            Role::Producer => self.segment.release_producer(),
            Role::Consumer => self.segment.release_slot(self.slot, self.token),
        }
    }
}

impl Drop for RingBuffer {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("ring", &self.segment.name())
            .field("role", &self.role)
            .field("detached", &self.detached)
            .finish()
    }
}
