//! On-disk/in-memory layout of the ring header.
//!
//! The header is the only mutable state shared between processes. Layout
//! rules:
//! - `#[repr(C)]` throughout; every field is either a plain integer written
//!   once during initialization or an atomic.
//! - The magic word is written LAST with `Release` ordering; openers
//!   spin-wait on it before trusting any other field.
//! - The producer cursor lives on its own 128-byte line so producer stores
//!   do not invalidate the read-mostly block consumers poll.

use std::ops::Deref;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Identifies an initialized sluice ring header, layout version 1.
/// "SLUICE_1" in ASCII. Written last by the creator with Release ordering.
pub(crate) const RING_MAGIC: u64 = 0x534C_5549_4345_5F31;

/// Compile-time size of the consumer slot table. The per-ring limit
/// (`slot_limit`) is chosen at create time and may be smaller.
pub const MAX_CONSUMER_SLOTS: usize = 32;

/// Default per-ring consumer limit when the creator does not choose one.
pub const DEFAULT_MAX_CONSUMERS: u32 = 16;

/// Smallest accepted ring capacity in bytes.
pub(crate) const MIN_CAPACITY: usize = 64;

/// Largest accepted ring capacity in bytes (1 GiB minus header).
pub(crate) const MAX_CAPACITY: usize = (1 << 30) - HEADER_SIZE;

/// Consumer slot states. Transitions:
/// FREE -> CLAIMING -> ACTIVE -> (LAPPED | RECLAIMING -> FREE).
/// CLAIMING/RECLAIMING are transient single-owner states so that slot fields
/// are never written by two processes at once.
pub(crate) const SLOT_FREE: u32 = 0;
pub(crate) const SLOT_CLAIMING: u32 = 1;
pub(crate) const SLOT_ACTIVE: u32 = 2;
pub(crate) const SLOT_LAPPED: u32 = 3;
pub(crate) const SLOT_RECLAIMING: u32 = 4;

/// 128-byte aligned wrapper keeping a hot field on its own prefetch pair.
#[repr(C, align(128))]
pub(crate) struct CachePadded<T> {
    value: T,
}

impl<T> Deref for CachePadded<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

/// One consumer's slot in the shared table. 32 bytes.
#[repr(C)]
pub(crate) struct ConsumerSlot {
    /// SLOT_* state machine word.
    pub state: AtomicU32,
    /// Owning process, for stale-slot reaping.
    pub pid: AtomicU32,
    /// Attach token; lets a handle recognize that its slot was force-freed
    /// and handed to someone else.
    pub token: AtomicU64,
    /// Absolute read cursor.
    pub cursor: AtomicU64,
    /// Wall-clock nanoseconds of the last slot activity.
    pub last_active_ns: AtomicU64,
}

/// Producer ownership word: 0 = no producer, otherwise the owner's pid.
/// Single-word CAS makes attach-exchange atomic across processes.
#[repr(C, align(128))]
pub(crate) struct RingHeader {
    // === Read-mostly block (one prefetch pair) ===
    /// Written last during init with Release; openers spin on it.
    pub magic: AtomicU64,
    /// Ring capacity in bytes. Fixed for the segment's lifetime.
    pub capacity: AtomicU64,
    /// Consumer slots usable on this ring (<= MAX_CONSUMER_SLOTS). Fixed.
    pub slot_limit: AtomicU32,
    /// Set by `remove()`; the segment is torn down when the last handle
    /// detaches. Blocked readers observe it as end-of-stream.
    pub doomed: AtomicU32,
    /// Producer ownership word (0 = free, else owner pid).
    pub producer_owner: AtomicU64,
    _pad0: [u8; 96],

    // === Producer cursor, alone on its own line ===
    /// Absolute write cursor. Published with Release after the bytes of a
    /// put are in place, so a reader that Acquire-loads it never sees a
    /// torn item.
    pub producer_cursor: CachePadded<AtomicU64>,

    // === Consumer slot table ===
    pub slots: [ConsumerSlot; MAX_CONSUMER_SLOTS],
}

/// Header size; the data ring starts at this offset in the region.
pub(crate) const HEADER_SIZE: usize = std::mem::size_of::<RingHeader>();

// Layout guards: the data offset must keep the 128-byte alignment the
// header promises, and a slot must stay within one cache line pair.
const _: () = assert!(HEADER_SIZE % 128 == 0);
const _: () = assert!(std::mem::size_of::<ConsumerSlot>() == 32);

impl RingHeader {
    /// Initialize a freshly zeroed header. Only the region creator calls
    /// this; the magic store is the publication point.
    pub(crate) fn init(&self, capacity: u64, slot_limit: u32) {
        self.capacity.store(capacity, Ordering::Relaxed);
        self.slot_limit.store(slot_limit, Ordering::Relaxed);
        self.doomed.store(0, Ordering::Relaxed);
        self.producer_owner.store(0, Ordering::Relaxed);
        self.producer_cursor.store(0, Ordering::Relaxed);
        for slot in &self.slots {
            slot.state.store(SLOT_FREE, Ordering::Relaxed);
            slot.pid.store(0, Ordering::Relaxed);
            slot.token.store(0, Ordering::Relaxed);
            slot.cursor.store(0, Ordering::Relaxed);
            slot.last_active_ns.store(0, Ordering::Relaxed);
        }
        // All fields above must be visible before the magic says "ready".
        std::sync::atomic::fence(Ordering::Release);
        self.magic.store(RING_MAGIC, Ordering::Release);
    }
}

/// Creation-time parameters of a ring.
#[derive(Debug, Clone, Copy)]
pub struct CreateOpts {
    /// Ring capacity in bytes.
    pub capacity: usize,
    /// Maximum simultaneously attached consumers.
    pub max_consumers: u32,
}

impl CreateOpts {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            max_consumers: DEFAULT_MAX_CONSUMERS,
        }
    }

    pub fn max_consumers(mut self, n: u32) -> Self {
        self.max_consumers = n;
        self
    }
}

/// Wall-clock nanoseconds since the Unix epoch, for slot activity stamps.
pub(crate) fn now_ns() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
