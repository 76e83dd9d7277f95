//! Item-level producers and consumers.
//!
//! These wrap a byte-level ring attachment with the framing protocol:
//! producers emit whole encoded items (so consumers never observe a torn
//! item), consumers peek the fixed prefix, consult their predicate, and
//! either skip the remainder in place or copy the item out. A rejected item
//! never pays a payload copy.

use crate::access::RingIo;
use crate::error::{Read, SluiceError, SluiceResult};
use crate::item::{RingItem, PEEK_PREFIX_BYTES};
use crate::predicate::{Decision, Predicate};
use std::time::Duration;

/// Delivery/copy counters of one consumer. `payload_copies` stays at zero
/// for items the predicate rejects — that is the observable guarantee that
/// filtering is size-only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Items delivered to the caller.
    pub delivered: u64,
    /// Items discarded by predicate skip.
    pub skipped: u64,
    /// Bytes copied out of the ring for delivered items.
    pub bytes_copied: u64,
    /// Number of payload copies performed (one per delivered item).
    pub payload_copies: u64,
}

/// Writes encoder-produced items to a ring.
///
/// This is the only supported way to feed a ring. The byte-level
/// `send_raw` exists solely for adapters relaying an external stream that
/// is already framed — forwarding anything else poisons every consumer,
/// because a malformed size field cannot be resynchronized mid-ring.
pub struct ItemProducer<R: RingIo> {
    ring: R,
}

impl<R: RingIo> ItemProducer<R> {
    pub fn new(ring: R) -> Self {
        Self { ring }
    }

    pub fn ring(&self) -> &R {
        &self.ring
    }

    pub fn ring_mut(&mut self) -> &mut R {
        &mut self.ring
    }

    /// Encode and publish one item atomically.
    pub fn send(&mut self, item: &RingItem) -> SluiceResult<()> {
        self.ring.put(&item.encode())
    }

    /// Forward already-framed bytes verbatim. The chunk does not have to
    /// end on an item boundary — readers block until a full item is in the
    /// ring — but the byte stream as a whole must consist of valid frames.
    pub fn send_raw(&mut self, bytes: &[u8]) -> SluiceResult<()> {
        self.ring.put(bytes)
    }

    /// Free space in the underlying ring, for sizing batched writes.
    pub fn free_space(&mut self) -> SluiceResult<u64> {
        self.ring.usage()
    }

    pub fn detach(&mut self) {
        self.ring.detach()
    }

    pub fn into_inner(self) -> R {
        self.ring
    }
}

/// Reads items from a ring through a selection predicate.
pub struct ItemConsumer<R: RingIo> {
    ring: R,
    predicate: Predicate,
    stats: ConsumerStats,
    /// Set after a malformed size field. The stream cannot be trusted past
    /// that point, so every later call fails fast.
    poisoned: bool,
}

impl<R: RingIo> ItemConsumer<R> {
    pub fn new(ring: R) -> Self {
        Self::with_predicate(ring, Predicate::new())
    }

    pub fn with_predicate(ring: R, predicate: Predicate) -> Self {
        Self {
            ring,
            predicate,
            stats: ConsumerStats::default(),
            poisoned: false,
        }
    }

    pub fn ring(&self) -> &R {
        &self.ring
    }

    pub fn predicate_mut(&mut self) -> &mut Predicate {
        &mut self.predicate
    }

    pub fn stats(&self) -> ConsumerStats {
        self.stats
    }

    /// Deliver the next item the predicate accepts.
    ///
    /// Rejected items are discarded with a size-only skip. `timeout` bounds
    /// each wait for ring data; a stretch of skipped items can make one
    /// call take several timeouts' worth of wall clock, but every
    /// individual wait is bounded.
    pub fn next(&mut self, timeout: Duration) -> SluiceResult<Read<RingItem>> {
        if self.poisoned {
            return Err(SluiceError::malformed(format!(
                "item stream on ring '{}' was poisoned by an earlier framing error",
                self.ring.name()
            )));
        }

        loop {
            // Only the fixed prefix is examined before the keep/skip call.
            let prefix = match self.ring.peek(PEEK_PREFIX_BYTES, timeout)? {
                Read::Data(p) => p,
                Read::EndOfStream => return Ok(Read::EndOfStream),
            };
            let (total, item_type) =
                match RingItem::peek_prefix(&prefix, self.ring.capacity()) {
                    Ok(v) => v,
                    Err(e) => {
                        self.poisoned = true;
                        return Err(e);
                    }
                };

            match self.predicate.decide(item_type) {
                Decision::Skip => {
                    match self.ring.skip(total, timeout)? {
                        Read::Data(()) => {
                            self.stats.skipped += 1;
                            continue;
                        }
                        Read::EndOfStream => return Ok(Read::EndOfStream),
                    }
                }
                Decision::Deliver => {
                    let bytes = match self.ring.get(total, timeout)? {
                        Read::Data(b) => b,
                        Read::EndOfStream => return Ok(Read::EndOfStream),
                    };
                    let item = match RingItem::decode(&bytes) {
                        Ok(item) => item,
                        Err(e) => {
                            self.poisoned = true;
                            return Err(e);
                        }
                    };
                    self.stats.delivered += 1;
                    self.stats.bytes_copied += total as u64;
                    self.stats.payload_copies += 1;
                    return Ok(Read::Data(item));
                }
            }
        }
    }

    /// Unread backlog in bytes.
    pub fn backlog(&mut self) -> SluiceResult<u64> {
        self.ring.usage()
    }

    pub fn detach(&mut self) {
        self.ring.detach()
    }

    pub fn into_inner(self) -> R {
        self.ring
    }
}
