//! Bridge acceptance: remote attachment must be indistinguishable from
//! local attachment, error kinds included.
//!
//! Each test spins up an in-process `BridgeServer` on an ephemeral
//! localhost port — the same embeddable service the `ring_bridge` binary
//! runs — and attaches through `tcp://127.0.0.1:port/name`.

mod common;

use common::unique_name;
use sluice_core::{
    item_type, registry, BridgeServer, CreateOpts, ItemConsumer, ItemProducer, Read, RingClient,
    RingIo, RingItem, Role, ShutdownToken, SluiceError,
};
use std::net::SocketAddr;
use std::time::Duration;

const TICK: Duration = Duration::from_secs(5);

/// Start a bridge for this test; returns its address and the token that
/// stops it.
fn start_bridge() -> (SocketAddr, ShutdownToken) {
    common::init();
    let token = ShutdownToken::new();
    let server = BridgeServer::bind("127.0.0.1:0", token.clone()).unwrap();
    let addr = server.local_addr().unwrap();
    std::thread::spawn(move || server.run().unwrap());
    (addr, token)
}

fn remote_uri(addr: SocketAddr, name: &str) -> String {
    format!("tcp://127.0.0.1:{}/{}", addr.port(), name)
}

#[test]
fn local_and_remote_consumers_see_identical_items() {
    let (addr, token) = start_bridge();
    let name = unique_name("bridge-mirror");
    registry::create(&name, CreateOpts::new(128 * 1024)).unwrap();

    let mut local = ItemConsumer::new(RingClient::attach(&name, Role::Consumer).unwrap());
    let mut remote =
        ItemConsumer::new(RingClient::attach(&remote_uri(addr, &name), Role::Consumer).unwrap());
    assert!(remote.ring().is_remote());
    assert_eq!(remote.ring().capacity(), 128 * 1024);

    let mut producer = ItemProducer::new(RingClient::attach(&name, Role::Producer).unwrap());
    for seq in 0u32..50 {
        producer
            .send(&RingItem::new(
                item_type::PHYSICS_EVENT,
                seq.to_le_bytes().to_vec(),
            ))
            .unwrap();
    }

    for seq in 0u32..50 {
        let a = local.next(TICK).unwrap().into_data();
        let b = remote.next(TICK).unwrap().into_data();
        assert_eq!(a, b, "divergence at item {}", seq);
        assert_eq!(a.payload(), seq.to_le_bytes());
    }

    registry::remove(&name).unwrap();
    token.trigger();
}

#[test]
fn remote_producer_feeds_local_consumer() {
    let (addr, token) = start_bridge();
    let name = unique_name("bridge-remote-prod");
    registry::create(&name, CreateOpts::new(64 * 1024)).unwrap();

    let mut consumer = ItemConsumer::new(RingClient::attach(&name, Role::Consumer).unwrap());
    let mut producer = ItemProducer::new(
        RingClient::attach(&remote_uri(addr, &name), Role::Producer).unwrap(),
    );

    producer
        .send(&RingItem::new(item_type::BEGIN_RUN, b"run 42".to_vec()))
        .unwrap();
    let item = consumer.next(TICK).unwrap().into_data();
    assert_eq!(item.item_type(), item_type::BEGIN_RUN);
    assert_eq!(item.payload(), b"run 42");

    // The remote producer really holds the ownership word: a local
    // producer attach must fail AlreadyOwned.
    assert!(matches!(
        registry::attach(&name, Role::Producer),
        Err(SluiceError::AlreadyOwned { .. })
    ));

    producer.detach();
    registry::remove(&name).unwrap();
    token.trigger();
}

#[test]
fn attach_errors_cross_the_wire_intact() {
    let (addr, token) = start_bridge();

    // Missing ring: NotFound, same as locally.
    let missing = unique_name("bridge-missing");
    assert!(matches!(
        RingClient::attach(&remote_uri(addr, &missing), Role::Consumer),
        Err(SluiceError::NotFound(_))
    ));

    // Occupied producer side: AlreadyOwned.
    let name = unique_name("bridge-owned");
    registry::create(&name, CreateOpts::new(4096)).unwrap();
    let _local_producer = registry::attach(&name, Role::Producer).unwrap();
    assert!(matches!(
        RingClient::attach(&remote_uri(addr, &name), Role::Producer),
        Err(SluiceError::AlreadyOwned { .. })
    ));

    // Exhausted slots: Full.
    let tiny = unique_name("bridge-full");
    registry::create(&tiny, CreateOpts::new(4096).max_consumers(1)).unwrap();
    let _only = registry::attach(&tiny, Role::Consumer).unwrap();
    assert!(matches!(
        RingClient::attach(&remote_uri(addr, &tiny), Role::Consumer),
        Err(SluiceError::Full(_))
    ));

    registry::remove(&name).unwrap();
    registry::remove(&tiny).unwrap();
    token.trigger();
}

#[test]
fn predicates_filter_remote_streams_too() {
    let (addr, token) = start_bridge();
    let name = unique_name("bridge-predicate");
    registry::create(&name, CreateOpts::new(64 * 1024)).unwrap();

    let mut remote =
        ItemConsumer::new(RingClient::attach(&remote_uri(addr, &name), Role::Consumer).unwrap());
    remote.predicate_mut().add_exception(5);
    remote.predicate_mut().add_sampled(7, 3);

    let mut producer = ItemProducer::new(RingClient::attach(&name, Role::Producer).unwrap());
    for _ in 0..6 {
        producer.send(&RingItem::new(5, vec![0u8; 256])).unwrap();
    }
    for seq in 0u8..9 {
        producer.send(&RingItem::new(7, vec![seq])).unwrap();
    }
    producer
        .send(&RingItem::new(item_type::END_RUN, Vec::new()))
        .unwrap();

    // ceil(9/3) = 3 sampled items, then the end-run marker; the six
    // excluded items never appear.
    let mut delivered = Vec::new();
    loop {
        let item = remote.next(TICK).unwrap().into_data();
        if item.item_type() == item_type::END_RUN {
            break;
        }
        delivered.push((item.item_type(), item.payload()[0]));
    }
    assert_eq!(delivered, vec![(7, 0), (7, 3), (7, 6)]);

    registry::remove(&name).unwrap();
    token.trigger();
}

#[test]
fn ring_removal_reaches_blocked_remote_consumer_as_end_of_stream() {
    let (addr, token) = start_bridge();
    let name = unique_name("bridge-remove");
    registry::create(&name, CreateOpts::new(4096)).unwrap();

    let mut remote =
        RingClient::attach(&remote_uri(addr, &name), Role::Consumer).unwrap();

    let name2 = name.clone();
    let killer = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        registry::remove(&name2).unwrap();
    });

    // Blocked remote read wakes with end-of-stream, exactly like a local
    // consumer of a destroyed ring.
    let read = remote.get(128, Duration::from_secs(10)).unwrap();
    assert_eq!(read, Read::EndOfStream);
    killer.join().unwrap();
    token.trigger();
}

#[test]
fn bridge_shutdown_surfaces_as_end_of_stream() {
    let (addr, token) = start_bridge();
    let name = unique_name("bridge-shutdown");
    registry::create(&name, CreateOpts::new(4096)).unwrap();

    let mut remote =
        RingClient::attach(&remote_uri(addr, &name), Role::Consumer).unwrap();

    // Stop the whole bridge while the consumer is idle. Its next read must
    // come back as end-of-stream, not hang and not panic.
    token.trigger();
    std::thread::sleep(Duration::from_millis(600));

    let read = remote.get(16, Duration::from_secs(2)).unwrap();
    assert_eq!(read, Read::EndOfStream);

    registry::remove(&name).unwrap();
}
