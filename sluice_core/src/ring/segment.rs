//! A mapped ring segment: header bookkeeping plus the byte ring.
//!
//! `RingSegment` owns the mapping and implements every operation on shared
//! state — slot claiming, producer ownership, eviction, stale-slot reaping,
//! cursor math, and the wrap-around byte copies. `RingBuffer` (one per
//! attached handle) layers role checking and blocking on top.

use crate::error::{SluiceError, SluiceResult};
use crate::memory::shm_region::{validate_name, ShmRegion};
use crate::ring::header::{
    now_ns, CreateOpts, RingHeader, HEADER_SIZE, MAX_CAPACITY, MAX_CONSUMER_SLOTS, MIN_CAPACITY,
    RING_MAGIC, SLOT_ACTIVE, SLOT_CLAIMING, SLOT_FREE, SLOT_LAPPED, SLOT_RECLAIMING,
};
use crate::utils::{own_pid, pid_alive};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

/// How long an opener waits for a creator that has the file on disk but has
/// not yet published the magic word.
const INIT_WAIT: Duration = Duration::from_millis(200);

/// A mapped, validated ring segment shared by every handle in this process.
pub(crate) struct RingSegment {
    region: ShmRegion,
    name: String,
    capacity: usize,
}

impl RingSegment {
    /// Create and initialize a new ring. Fails `AlreadyExists` while a live
    /// ring of that name exists; a dead file (creator crashed before
    /// publishing the magic, or a doomed ring nobody is attached to) is
    /// reclaimed and creation retried once.
    pub(crate) fn create(name: &str, opts: CreateOpts) -> SluiceResult<Self> {
        validate_name(name)?;
        if opts.capacity < MIN_CAPACITY || opts.capacity > MAX_CAPACITY {
            return Err(SluiceError::invalid_input(format!(
                "ring capacity {} outside supported range [{}, {}]",
                opts.capacity, MIN_CAPACITY, MAX_CAPACITY
            )));
        }
        if opts.max_consumers == 0 || opts.max_consumers as usize > MAX_CONSUMER_SLOTS {
            return Err(SluiceError::invalid_input(format!(
                "max_consumers {} outside supported range [1, {}]",
                opts.max_consumers, MAX_CONSUMER_SLOTS
            )));
        }

        let total = HEADER_SIZE + opts.capacity;
        match Self::create_region(name, total, opts) {
            Ok(seg) => Ok(seg),
            Err(SluiceError::AlreadyExists(_)) => {
                if Self::reclaim_if_dead(name)? {
                    log::warn!("reclaimed dead ring '{}' before create", name);
                    Self::create_region(name, total, opts)
                } else {
                    Err(SluiceError::AlreadyExists(name.to_string()))
                }
            }
            Err(e) => Err(e),
        }
    }

    fn create_region(name: &str, total: usize, opts: CreateOpts) -> SluiceResult<Self> {
        // ShmRegion enforces a 4 KiB floor; tiny rings just map a page.
        let region = ShmRegion::create(name, total.max(4096))?;
        let seg = Self {
            region,
            name: name.to_string(),
            capacity: opts.capacity,
        };
        seg.header()
            .init(opts.capacity as u64, opts.max_consumers);
        log::info!(
            "created ring '{}' (capacity {} bytes, {} consumer slots)",
            name,
            opts.capacity,
            opts.max_consumers
        );
        Ok(seg)
    }

    /// Map an existing ring. Fails `NotFound` when the file is absent or the
    /// ring is marked for destruction.
    pub(crate) fn open(name: &str) -> SluiceResult<Self> {
        let region = ShmRegion::open(name)?;
        let seg = Self {
            region,
            name: name.to_string(),
            capacity: 0,
        };

        // Spin on the magic word: the creator publishes it last, so a zero
        // magic means initialization is still in flight.
        let deadline = Instant::now() + INIT_WAIT;
        loop {
            let magic = seg.header().magic.load(Ordering::Acquire);
            if magic == RING_MAGIC {
                break;
            }
            if magic != 0 {
                return Err(SluiceError::memory(format!(
                    "ring '{}' has invalid magic 0x{:016X} (corrupted or incompatible layout)",
                    name, magic
                )));
            }
            if Instant::now() >= deadline {
                return Err(SluiceError::memory(format!(
                    "ring '{}' never finished initializing (creator crashed during setup?)",
                    name
                )));
            }
            std::hint::spin_loop();
        }

        let capacity = seg.header().capacity.load(Ordering::Acquire) as usize;
        if capacity < MIN_CAPACITY || HEADER_SIZE + capacity > seg.region.size() {
            return Err(SluiceError::memory(format!(
                "ring '{}' header capacity {} inconsistent with region size {}",
                name,
                capacity,
                seg.region.size()
            )));
        }
        if seg.header().doomed.load(Ordering::Acquire) != 0 {
            return Err(SluiceError::NotFound(name.to_string()));
        }

        Ok(Self { capacity, ..seg })
    }

    /// True if the named file holds a live (initialized, not doomed) ring.
    pub(crate) fn is_live_ring(name: &str) -> bool {
        if !ShmRegion::exists(name) {
            return false;
        }
        match ShmRegion::open(name) {
            Ok(region) => {
                let seg = Self {
                    region,
                    name: name.to_string(),
                    capacity: 0,
                };
                seg.header().magic.load(Ordering::Acquire) == RING_MAGIC
                    && seg.header().doomed.load(Ordering::Acquire) == 0
            }
            Err(_) => false,
        }
    }

    /// Reclaim a ring file nobody can use: unpublished magic past the init
    /// window, corrupt magic, or doomed with no remaining attachments.
    /// Returns true if the file was removed.
    fn reclaim_if_dead(name: &str) -> SluiceResult<bool> {
        let region = match ShmRegion::open(name) {
            Ok(r) => r,
            // Vanished between our create attempt and now; treat as removed.
            Err(SluiceError::NotFound(_)) => return Ok(true),
            Err(e) => return Err(e),
        };
        let seg = Self {
            region,
            name: name.to_string(),
            capacity: 0,
        };

        let deadline = Instant::now() + INIT_WAIT;
        let dead = loop {
            let magic = seg.header().magic.load(Ordering::Acquire);
            if magic == RING_MAGIC {
                break seg.header().doomed.load(Ordering::Acquire) != 0 && !seg.has_attachments();
            }
            if magic != 0 {
                break true; // corrupt
            }
            if Instant::now() >= deadline {
                break true; // creator never finished
            }
            std::hint::spin_loop();
        };

        if dead {
            match ShmRegion::unlink(name) {
                Ok(()) | Err(SluiceError::NotFound(_)) => Ok(true),
                Err(e) => Err(e),
            }
        } else {
            Ok(false)
        }
    }

    #[inline]
    pub(crate) fn header(&self) -> &RingHeader {
        // SAFETY: the region is at least HEADER_SIZE bytes (enforced at
        // create/open) and the mapping is 128-byte aligned by mmap page
        // alignment; RingHeader is repr(C) with atomic-only mutable fields.
        unsafe { &*(self.region.as_ptr() as *const RingHeader) }
    }

    #[inline]
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub(crate) fn slot_limit(&self) -> usize {
        self.header().slot_limit.load(Ordering::Relaxed) as usize
    }

    #[inline]
    pub(crate) fn is_doomed(&self) -> bool {
        self.header().doomed.load(Ordering::Acquire) != 0
    }

    /// Mark the ring for destruction. Blocked peers observe this through
    /// their polling loops; the backing file goes away at the last detach
    /// (or immediately if nothing is attached).
    pub(crate) fn doom(&self) {
        self.header().doomed.store(1, Ordering::Release);
        log::info!("ring '{}' marked for destruction", self.name);
        self.unlink_if_drained();
    }

    /// Whether any producer or consumer currently holds the segment.
    pub(crate) fn has_attachments(&self) -> bool {
        let h = self.header();
        if h.producer_owner.load(Ordering::Acquire) != 0 {
            return true;
        }
        self.each_slot(|slot| {
            let s = slot.state.load(Ordering::Acquire);
            s != SLOT_FREE
        })
    }

    /// Unlink the backing file of a doomed, fully detached ring. Racing
    /// detachers may both try; the second unlink's NotFound is fine.
    pub(crate) fn unlink_if_drained(&self) {
        if self.is_doomed() && !self.has_attachments() {
            match ShmRegion::unlink(&self.name) {
                Ok(()) => log::info!("ring '{}' destroyed", self.name),
                Err(SluiceError::NotFound(_)) => {}
                Err(e) => log::warn!("ring '{}': unlink failed: {}", self.name, e),
            }
        }
    }

    // ------------------------------------------------------------------
    // Producer ownership
    // ------------------------------------------------------------------

    /// Claim the producer side. The ownership word holds the owner's pid;
    /// a dead owner is reaped with a second CAS so exactly one contender
    /// inherits the ring.
    pub(crate) fn claim_producer(&self) -> SluiceResult<()> {
        let h = self.header();
        let me = own_pid() as u64;
        match h
            .producer_owner
            .compare_exchange(0, me, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(()),
            Err(current) => {
                let holder = current as u32;
                if holder != 0 && !pid_alive(holder) {
                    // Stale owner: swap the dead pid for ours atomically.
                    if h.producer_owner
                        .compare_exchange(current, me, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        log::warn!(
                            "ring '{}': reaped dead producer pid {}",
                            self.name,
                            holder
                        );
                        return Ok(());
                    }
                }
                Err(SluiceError::AlreadyOwned {
                    ring: self.name.clone(),
                    pid: h.producer_owner.load(Ordering::Acquire) as u32,
                })
            }
        }
    }

    /// Release the producer side if this process holds it. Idempotent.
    pub(crate) fn release_producer(&self) {
        let me = own_pid() as u64;
        let _ = self.header().producer_owner.compare_exchange(
            me,
            0,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.unlink_if_drained();
    }

    /// True when the ownership word still names a producer whose process is
    /// gone. Distinguishes "producer died" (PeerGone) from "no producer
    /// right now" (a clean detach zeroes the word) on consumer timeouts.
    /// The stale word itself is reaped by the next producer attach.
    pub(crate) fn producer_died(&self) -> bool {
        let owner = self.header().producer_owner.load(Ordering::Acquire);
        owner != 0 && !pid_alive(owner as u32)
    }

    // ------------------------------------------------------------------
    // Consumer slots
    // ------------------------------------------------------------------

    fn each_slot(&self, mut pred: impl FnMut(&crate::ring::header::ConsumerSlot) -> bool) -> bool {
        let h = self.header();
        let limit = self.slot_limit().min(MAX_CONSUMER_SLOTS);
        h.slots[..limit].iter().any(|s| pred(s))
    }

    /// Free slots owned by dead processes. Called before reporting `Full`
    /// and opportunistically from the producer's space accounting.
    pub(crate) fn reap_dead_slots(&self) {
        let h = self.header();
        let limit = self.slot_limit().min(MAX_CONSUMER_SLOTS);
        for (idx, slot) in h.slots[..limit].iter().enumerate() {
            let state = slot.state.load(Ordering::Acquire);
            if state != SLOT_ACTIVE && state != SLOT_LAPPED {
                continue;
            }
            let pid = slot.pid.load(Ordering::Acquire);
            if pid_alive(pid) {
                continue;
            }
            // RECLAIMING guards the field writes against a concurrent claim.
            if slot
                .state
                .compare_exchange(state, SLOT_RECLAIMING, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                slot.pid.store(0, Ordering::Relaxed);
                slot.token.store(0, Ordering::Relaxed);
                slot.state.store(SLOT_FREE, Ordering::Release);
                log::warn!(
                    "ring '{}': reaped orphaned consumer slot {} (dead pid {})",
                    self.name,
                    idx,
                    pid
                );
            }
        }
    }

    /// Allocate a consumer slot. The new cursor starts at the current
    /// producer cursor: a consumer sees only data produced after it attached.
    pub(crate) fn claim_slot(&self, token: u64) -> SluiceResult<usize> {
        let h = self.header();
        let limit = self.slot_limit().min(MAX_CONSUMER_SLOTS);

        for attempt in 0..2 {
            for (idx, slot) in h.slots[..limit].iter().enumerate() {
                if slot
                    .state
                    .compare_exchange(
                        SLOT_FREE,
                        SLOT_CLAIMING,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    slot.pid.store(own_pid(), Ordering::Relaxed);
                    slot.token.store(token, Ordering::Relaxed);
                    slot.cursor
                        .store(h.producer_cursor.load(Ordering::Acquire), Ordering::Relaxed);
                    slot.last_active_ns.store(now_ns(), Ordering::Relaxed);
                    slot.state.store(SLOT_ACTIVE, Ordering::Release);
                    return Ok(idx);
                }
            }
            if attempt == 0 {
                self.reap_dead_slots();
            }
        }
        Err(SluiceError::Full(self.name.clone()))
    }

    /// Free a consumer slot if `token` still owns it. Idempotent; safe after
    /// eviction or after the slot was reaped and handed to someone else.
    pub(crate) fn release_slot(&self, idx: usize, token: u64) {
        let h = self.header();
        let Some(slot) = h.slots.get(idx) else { return };
        if slot.token.load(Ordering::Acquire) != token {
            return;
        }
        for state in [SLOT_ACTIVE, SLOT_LAPPED] {
            if slot
                .state
                .compare_exchange(state, SLOT_RECLAIMING, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                slot.pid.store(0, Ordering::Relaxed);
                slot.token.store(0, Ordering::Relaxed);
                slot.state.store(SLOT_FREE, Ordering::Release);
                break;
            }
        }
        self.unlink_if_drained();
    }

    /// Does `token` still own an ACTIVE slot at `idx`? Lapped or stolen
    /// slots both answer no.
    pub(crate) fn slot_is_active(&self, idx: usize, token: u64) -> bool {
        let h = self.header();
        match h.slots.get(idx) {
            Some(slot) => {
                slot.state.load(Ordering::Acquire) == SLOT_ACTIVE
                    && slot.token.load(Ordering::Acquire) == token
            }
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Cursor math
    // ------------------------------------------------------------------

    /// Bytes available to the consumer owning slot `idx`.
    pub(crate) fn available(&self, idx: usize) -> u64 {
        let h = self.header();
        let produced = h.producer_cursor.load(Ordering::Acquire);
        let read = h.slots[idx].cursor.load(Ordering::Acquire);
        produced.saturating_sub(read)
    }

    /// Free space from the producer's point of view: distance to the
    /// slowest ACTIVE consumer. With no active consumers the producer is
    /// unconstrained and the whole capacity is free.
    pub(crate) fn free_space(&self) -> u64 {
        let h = self.header();
        let produced = h.producer_cursor.load(Ordering::Acquire);
        let capacity = self.capacity as u64;
        let limit = self.slot_limit().min(MAX_CONSUMER_SLOTS);

        let mut free = capacity;
        for slot in &h.slots[..limit] {
            if slot.state.load(Ordering::Acquire) != SLOT_ACTIVE {
                continue;
            }
            let backlog = produced.saturating_sub(slot.cursor.load(Ordering::Acquire));
            free = free.min(capacity.saturating_sub(backlog));
        }
        free
    }

    /// Evict every ACTIVE consumer whose backlog leaves less than `needed`
    /// bytes of free space. Runs when the producer's bounded wait expired:
    /// producer liveness outranks completeness for any single consumer.
    pub(crate) fn evict_blockers(&self, needed: u64) {
        let h = self.header();
        let produced = h.producer_cursor.load(Ordering::Acquire);
        let capacity = self.capacity as u64;
        let limit = self.slot_limit().min(MAX_CONSUMER_SLOTS);

        for (idx, slot) in h.slots[..limit].iter().enumerate() {
            if slot.state.load(Ordering::Acquire) != SLOT_ACTIVE {
                continue;
            }
            let backlog = produced.saturating_sub(slot.cursor.load(Ordering::Acquire));
            if capacity.saturating_sub(backlog) < needed
                && slot
                    .state
                    .compare_exchange(
                        SLOT_ACTIVE,
                        SLOT_LAPPED,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
            {
                log::warn!(
                    "ring '{}': evicted consumer slot {} (pid {}, backlog {} of {} bytes)",
                    self.name,
                    idx,
                    slot.pid.load(Ordering::Relaxed),
                    backlog,
                    capacity
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // Byte ring
    // ------------------------------------------------------------------

    #[inline]
    fn data_ptr(&self) -> *mut u8 {
        // SAFETY: HEADER_SIZE is within the mapping (enforced at create/open).
        unsafe { self.region.as_mut_ptr().add(HEADER_SIZE) }
    }

    /// Copy `buf` into the ring at absolute offset `cursor`, wrapping at
    /// capacity. Caller guarantees the target range is free (cursor
    /// protocol); publication happens via the producer-cursor store.
    pub(crate) fn write_bytes(&self, cursor: u64, buf: &[u8]) {
        let capacity = self.capacity;
        let off = (cursor % capacity as u64) as usize;
        let first = buf.len().min(capacity - off);
        // SAFETY: off + first <= capacity and the remainder starts at 0;
        // both ranges lie inside the data region. The cursor protocol gives
        // the producer exclusive write access to these bytes.
        unsafe {
            std::ptr::copy_nonoverlapping(buf.as_ptr(), self.data_ptr().add(off), first);
            if first < buf.len() {
                std::ptr::copy_nonoverlapping(
                    buf.as_ptr().add(first),
                    self.data_ptr(),
                    buf.len() - first,
                );
            }
        }
    }

    /// Copy bytes out of the ring at absolute offset `cursor` into `out`.
    /// Caller guarantees the range is published (cursor < producer cursor)
    /// and not yet reclaimed (within capacity of this consumer's cursor).
    pub(crate) fn read_bytes(&self, cursor: u64, out: &mut [u8]) {
        let capacity = self.capacity;
        let off = (cursor % capacity as u64) as usize;
        let first = out.len().min(capacity - off);
        // SAFETY: same bounds argument as write_bytes; published bytes are
        // immutable until the producer wraps past them, which the eviction
        // invariant prevents while this consumer holds an ACTIVE slot.
        unsafe {
            std::ptr::copy_nonoverlapping(self.data_ptr().add(off), out.as_mut_ptr(), first);
            if first < out.len() {
                std::ptr::copy_nonoverlapping(
                    self.data_ptr(),
                    out.as_mut_ptr().add(first),
                    out.len() - first,
                );
            }
        }
    }
}
