//! Name -> segment directory.
//!
//! The authoritative registry is the ring directory on disk (one backing
//! file per name) plus the header inside each file; this module adds a
//! process-local cache so several handles in one process share a single
//! mapping, and wraps the create / attach / is_ring / remove lifecycle.
//!
//! Single-producer enforcement is NOT process-local state: it is an atomic
//! attach-exchange on the ownership word inside the shared header, so it
//! holds across processes and survives crashed owners (dead pids are
//! reaped on the next attach).

use crate::error::{SluiceError, SluiceResult};
use crate::ring::buffer::RingBuffer;
use crate::ring::header::CreateOpts;
use crate::ring::segment::RingSegment;
use crate::ring::Role;
use crate::utils::own_pid;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static SEGMENTS: Mutex<Option<HashMap<String, Weak<RingSegment>>>> = Mutex::new(None);

/// Attach tokens are unique per process lifetime; combined with the pid
/// they identify a slot owner across the whole host.
static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

fn fresh_token() -> u64 {
    let seq = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
    ((own_pid() as u64) << 32) | (seq & 0xFFFF_FFFF)
}

/// Look up a cached live segment, or map/create one via `make`.
fn cached_or<F>(name: &str, make: F) -> SluiceResult<Arc<RingSegment>>
where
    F: FnOnce() -> SluiceResult<RingSegment>,
{
    let mut guard = SEGMENTS.lock();
    let map = guard.get_or_insert_with(HashMap::new);
    if let Some(weak) = map.get(name) {
        if let Some(seg) = weak.upgrade() {
            if !seg.is_doomed() {
                return Ok(seg);
            }
        }
        map.remove(name);
    }
    let seg = Arc::new(make()?);
    map.insert(name.to_string(), Arc::downgrade(&seg));
    Ok(seg)
}

/// Create a new ring. Fails `AlreadyExists` while a live ring of that name
/// exists. The ring persists until [`remove`] even with nothing attached.
pub fn create(name: &str, opts: CreateOpts) -> SluiceResult<()> {
    let mut guard = SEGMENTS.lock();
    let map = guard.get_or_insert_with(HashMap::new);
    if let Some(seg) = map.get(name).and_then(Weak::upgrade) {
        if !seg.is_doomed() {
            return Err(SluiceError::AlreadyExists(name.to_string()));
        }
        map.remove(name);
    }
    let seg = Arc::new(RingSegment::create(name, opts)?);
    map.insert(name.to_string(), Arc::downgrade(&seg));
    // The Arc drops here; the mapping is re-opened on first attach. The
    // ring itself lives in the file system, not in this process.
    Ok(())
}

/// Create a ring and attach as its producer in one step.
pub fn create_and_produce(name: &str, opts: CreateOpts) -> SluiceResult<RingBuffer> {
    create(name, opts)?;
    attach(name, Role::Producer)
}

/// Attach to an existing ring.
///
/// Producer role fails `AlreadyOwned` while another live producer holds the
/// ring; consumer role fails `Full` when every slot is taken by a live
/// consumer. Both fail `NotFound` if the ring is absent or marked for
/// destruction. Attach errors indicate caller misuse and are never retried
/// internally.
pub fn attach(name: &str, role: Role) -> SluiceResult<RingBuffer> {
    let segment = cached_or(name, || RingSegment::open(name))?;
    if segment.is_doomed() {
        return Err(SluiceError::NotFound(name.to_string()));
    }
    match role {
        Role::Producer => {
            segment.claim_producer()?;
            Ok(RingBuffer::new_producer(segment))
        }
        Role::Consumer => {
            let token = fresh_token();
            let slot = segment.claim_slot(token)?;
            Ok(RingBuffer::new_consumer(segment, slot, token))
        }
    }
}

/// Whether a live ring of the given name exists.
pub fn is_ring(name: &str) -> bool {
    RingSegment::is_live_ring(name)
}

/// Mark a ring for destruction.
///
/// Attached handles drain normally: blocked consumers wake with
/// end-of-stream, a blocked producer fails `PeerGone`, and the backing file
/// disappears when the last handle detaches (immediately if nothing is
/// attached). New attaches fail `NotFound` at once.
pub fn remove(name: &str) -> SluiceResult<()> {
    let segment = cached_or(name, || RingSegment::open(name))?;
    segment.doom();
    if let Some(map) = SEGMENTS.lock().as_mut() {
        map.remove(name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Read;
    use crate::test_support::unique_name;
    use std::time::Duration;

    const TICK: Duration = Duration::from_millis(200);

    fn small_ring(name: &str, capacity: usize) {
        create(name, CreateOpts::new(capacity)).unwrap();
    }

    #[test]
    fn create_then_duplicate_fails() {
        let name = unique_name("reg-dup");
        small_ring(&name, 4096);
        assert!(matches!(
            create(&name, CreateOpts::new(4096)),
            Err(SluiceError::AlreadyExists(_))
        ));
        remove(&name).unwrap();
    }

    #[test]
    fn attach_missing_ring_fails_not_found() {
        let name = unique_name("reg-missing");
        assert!(matches!(
            attach(&name, Role::Consumer),
            Err(SluiceError::NotFound(_))
        ));
    }

    #[test]
    fn single_producer_enforced() {
        let name = unique_name("reg-single-prod");
        small_ring(&name, 4096);
        let _p = attach(&name, Role::Producer).unwrap();
        assert!(matches!(
            attach(&name, Role::Producer),
            Err(SluiceError::AlreadyOwned { .. })
        ));
        remove(&name).unwrap();
    }

    #[test]
    fn producer_slot_freed_on_detach() {
        let name = unique_name("reg-prod-detach");
        small_ring(&name, 4096);
        {
            let _p = attach(&name, Role::Producer).unwrap();
        }
        // Dropped; a second producer may now claim.
        let _p2 = attach(&name, Role::Producer).unwrap();
        remove(&name).unwrap();
    }

    #[test]
    fn consumer_slots_exhaust_to_full() {
        let name = unique_name("reg-full");
        create(&name, CreateOpts::new(4096).max_consumers(2)).unwrap();
        let _c1 = attach(&name, Role::Consumer).unwrap();
        let _c2 = attach(&name, Role::Consumer).unwrap();
        assert!(matches!(
            attach(&name, Role::Consumer),
            Err(SluiceError::Full(_))
        ));
        remove(&name).unwrap();
    }

    #[test]
    fn bytes_reproduced_in_order() {
        let name = unique_name("reg-fifo");
        small_ring(&name, 4096);
        let mut consumer = attach(&name, Role::Consumer).unwrap();
        let mut producer = attach(&name, Role::Producer).unwrap();

        producer.put(b"hello ").unwrap();
        producer.put(b"ring").unwrap();

        let got = consumer.get(10, TICK).unwrap().into_data();
        assert_eq!(&got, b"hello ring");
        remove(&name).unwrap();
    }

    #[test]
    fn wraparound_preserves_bytes() {
        let name = unique_name("reg-wrap");
        small_ring(&name, 256);
        let mut consumer = attach(&name, Role::Consumer).unwrap();
        let mut producer = attach(&name, Role::Producer).unwrap();
        producer.set_put_timeout(Duration::from_millis(50));

        // Many writes larger than half the capacity force repeated wraps.
        for round in 0u32..20 {
            let chunk: Vec<u8> = (0..150).map(|i| (round as u8).wrapping_add(i as u8)).collect();
            producer.put(&chunk).unwrap();
            let got = consumer.get(150, TICK).unwrap().into_data();
            assert_eq!(got, chunk, "round {}", round);
        }
        remove(&name).unwrap();
    }

    #[test]
    fn peek_does_not_advance() {
        let name = unique_name("reg-peek");
        small_ring(&name, 4096);
        let mut consumer = attach(&name, Role::Consumer).unwrap();
        let mut producer = attach(&name, Role::Producer).unwrap();
        producer.put(b"abcdef").unwrap();

        let mut first = [0u8; 3];
        consumer.peek_into(&mut first, TICK).unwrap();
        assert_eq!(&first, b"abc");
        assert_eq!(consumer.usage(), 6);

        let got = consumer.get(6, TICK).unwrap().into_data();
        assert_eq!(&got, b"abcdef");
        assert_eq!(consumer.usage(), 0);
        remove(&name).unwrap();
    }

    #[test]
    fn skip_discards_without_copy() {
        let name = unique_name("reg-skip");
        small_ring(&name, 4096);
        let mut consumer = attach(&name, Role::Consumer).unwrap();
        let mut producer = attach(&name, Role::Producer).unwrap();
        producer.put(b"junkjunk").unwrap();
        producer.put(b"keep").unwrap();

        consumer.skip(8, TICK).unwrap();
        let got = consumer.get(4, TICK).unwrap().into_data();
        assert_eq!(&got, b"keep");
        remove(&name).unwrap();
    }

    #[test]
    fn get_times_out_without_data() {
        let name = unique_name("reg-timeout");
        small_ring(&name, 4096);
        let mut consumer = attach(&name, Role::Consumer).unwrap();
        let err = consumer
            .get(1, Duration::from_millis(30))
            .expect_err("no producer ever wrote");
        assert!(matches!(err, SluiceError::Timeout(_)));
        remove(&name).unwrap();
    }

    #[test]
    fn usage_tracks_both_sides() {
        let name = unique_name("reg-usage");
        small_ring(&name, 1024);
        let mut consumer = attach(&name, Role::Consumer).unwrap();
        let mut producer = attach(&name, Role::Producer).unwrap();

        assert_eq!(producer.usage(), 1024);
        assert_eq!(consumer.usage(), 0);

        producer.put(&[7u8; 100]).unwrap();
        assert_eq!(producer.usage(), 924);
        assert_eq!(consumer.usage(), 100);

        consumer.skip(100, TICK).unwrap();
        assert_eq!(producer.usage(), 1024);
        remove(&name).unwrap();
    }

    #[test]
    fn producer_without_consumers_is_unconstrained() {
        let name = unique_name("reg-free-run");
        small_ring(&name, 256);
        let mut producer = attach(&name, Role::Producer).unwrap();
        producer.set_put_timeout(Duration::from_millis(10));
        // 10x capacity with nobody reading: no backpressure without readers.
        for _ in 0..10 {
            producer.put(&[0u8; 256]).unwrap();
        }
        remove(&name).unwrap();
    }

    #[test]
    fn idle_consumer_is_lapped_not_fed_stale_data() {
        let name = unique_name("reg-lap");
        small_ring(&name, 1000);
        let mut idle = attach(&name, Role::Consumer).unwrap();
        let mut producer = attach(&name, Role::Producer).unwrap();
        producer.set_put_timeout(Duration::from_millis(20));

        // 2000 bytes into a 1000-byte ring with a consumer that never reads:
        // the producer must evict rather than stall.
        for _ in 0..20 {
            producer.put(&[0xEE; 100]).unwrap();
        }

        let err = idle.get(1, TICK).expect_err("consumer must be lapped");
        assert!(matches!(err, SluiceError::Lapped(_)));
        // Every subsequent read keeps failing until reattach.
        let err = idle.get(1, TICK).expect_err("still lapped");
        assert!(matches!(err, SluiceError::Lapped(_)));

        // Reattaching yields a clean slot again.
        idle.detach();
        let mut fresh = attach(&name, Role::Consumer).unwrap();
        producer.put(b"post-lap").unwrap();
        assert_eq!(fresh.get(8, TICK).unwrap().into_data(), b"post-lap");
        remove(&name).unwrap();
    }

    #[test]
    fn slow_consumer_survives_when_producer_waits() {
        let name = unique_name("reg-no-lap");
        small_ring(&name, 1024);
        let mut consumer = attach(&name, Role::Consumer).unwrap();
        let mut producer = attach(&name, Role::Producer).unwrap();
        producer.set_put_timeout(Duration::from_secs(5));

        let writer = std::thread::spawn(move || {
            for i in 0u8..8 {
                producer.put(&vec![i; 300]).unwrap();
            }
            producer
        });

        let mut seen = Vec::new();
        for _ in 0..8 {
            let chunk = consumer.get(300, Duration::from_secs(5)).unwrap().into_data();
            seen.push(chunk[0]);
            assert!(chunk.iter().all(|&b| b == chunk[0]));
        }
        assert_eq!(seen, (0u8..8).collect::<Vec<_>>());
        writer.join().unwrap();
        remove(&name).unwrap();
    }

    #[test]
    fn remove_wakes_blocked_consumer_with_end_of_stream() {
        let name = unique_name("reg-remove-wakes");
        small_ring(&name, 4096);
        let mut consumer = attach(&name, Role::Consumer).unwrap();

        let name2 = name.clone();
        let killer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            remove(&name2).unwrap();
        });

        let read = consumer.get(1, Duration::from_secs(10)).unwrap();
        assert_eq!(read, Read::EndOfStream);
        killer.join().unwrap();
    }

    #[test]
    fn removed_ring_rejects_put_and_new_attach() {
        let name = unique_name("reg-remove-rejects");
        small_ring(&name, 4096);
        let mut producer = attach(&name, Role::Producer).unwrap();
        remove(&name).unwrap();

        assert!(matches!(
            producer.put(b"too late"),
            Err(SluiceError::PeerGone(_))
        ));
        assert!(matches!(
            attach(&name, Role::Consumer),
            Err(SluiceError::NotFound(_))
        ));
        assert!(!is_ring(&name));

        // Last detach destroys the file; the name is then reusable.
        producer.detach();
        assert!(matches!(
            attach(&name, Role::Consumer),
            Err(SluiceError::NotFound(_))
        ));
        small_ring(&name, 4096);
        remove(&name).unwrap();
    }

    #[test]
    fn detach_is_idempotent() {
        let name = unique_name("reg-detach-twice");
        small_ring(&name, 4096);
        let mut consumer = attach(&name, Role::Consumer).unwrap();
        consumer.detach();
        consumer.detach();
        assert!(matches!(
            consumer.get(1, TICK),
            Err(SluiceError::InvalidInput(_))
        ));
        remove(&name).unwrap();
    }

    #[test]
    fn role_misuse_is_rejected() {
        let name = unique_name("reg-roles");
        small_ring(&name, 4096);
        let mut producer = attach(&name, Role::Producer).unwrap();
        let mut consumer = attach(&name, Role::Consumer).unwrap();

        assert!(matches!(
            consumer.put(b"nope"),
            Err(SluiceError::InvalidInput(_))
        ));
        assert!(matches!(
            producer.get(1, TICK),
            Err(SluiceError::InvalidInput(_))
        ));
        remove(&name).unwrap();
    }
}
