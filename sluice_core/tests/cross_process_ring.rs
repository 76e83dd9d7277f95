//! Cross-process ring tests.
//!
//! These verify that rings really work across process boundaries, not just
//! between threads sharing one mapping. Each test re-invokes this test
//! binary as a child with env-var flags selecting the child role; the
//! scratch ring directory travels through the inherited environment.

mod common;

use common::unique_name;
use sluice_core::{
    item_type, registry, CreateOpts, ItemConsumer, ItemProducer, Read, RingClient, RingItem, Role,
    SluiceError,
};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// Marks a child invocation and selects its role.
const CHILD_ENV: &str = "SLUICE_TEST_CHILD";
/// Ring name handed to the child.
const RING_ENV: &str = "SLUICE_TEST_RING";
/// File the child touches once it is attached.
const READY_ENV: &str = "SLUICE_TEST_READY";
/// File the child writes its results into.
const RESULT_ENV: &str = "SLUICE_TEST_RESULT";

fn env_path(var: &str) -> PathBuf {
    PathBuf::from(std::env::var(var).expect(var))
}

/// Child role: consume items until END_RUN, report count and checksum.
fn child_consume() {
    let ring = std::env::var(RING_ENV).expect(RING_ENV);
    let mut consumer =
        ItemConsumer::new(RingClient::attach(&ring, Role::Consumer).expect("child attach"));
    std::fs::write(env_path(READY_ENV), b"ready").expect("child ready file");

    let mut count: u64 = 0;
    let mut checksum: u64 = 0;
    loop {
        match consumer.next(Duration::from_secs(10)).expect("child next") {
            Read::Data(item) => {
                if item.item_type() == item_type::END_RUN {
                    break;
                }
                count += 1;
                checksum = checksum.wrapping_add(
                    item.payload().iter().map(|&b| b as u64).sum::<u64>(),
                );
            }
            Read::EndOfStream => break,
        }
    }
    std::fs::write(env_path(RESULT_ENV), format!("{} {}", count, checksum))
        .expect("child result file");
}

/// Child role: claim the producer side, then die without detaching.
fn child_abandon_producer() {
    let ring = std::env::var(RING_ENV).expect(RING_ENV);
    let _producer = registry::attach(&ring, Role::Producer).expect("child producer attach");
    std::fs::write(env_path(READY_ENV), b"ready").expect("child ready file");
    // process::exit skips destructors: the ownership word keeps our pid,
    // exactly like a crashed front-end.
    std::process::exit(0);
}

/// Dispatcher: every test in this binary starts here when re-invoked.
#[test]
fn child_entry() {
    match std::env::var(CHILD_ENV).as_deref() {
        Ok("consume") => child_consume(),
        Ok("abandon-producer") => child_abandon_producer(),
        _ => {} // normal test run, nothing to do
    }
}

fn spawn_child(role: &str, ring: &str, ready: &PathBuf, result: &PathBuf) -> std::process::Child {
    Command::new(std::env::current_exe().expect("current_exe"))
        .args(["--exact", "child_entry", "--nocapture", "--test-threads=1"])
        .env(CHILD_ENV, role)
        .env(RING_ENV, ring)
        .env(READY_ENV, ready)
        .env(RESULT_ENV, result)
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .spawn()
        .expect("spawn child test process")
}

fn wait_for_file(path: &PathBuf, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while !path.exists() {
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {}",
            path.display()
        );
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn items_flow_between_processes() {
    common::init();
    if std::env::var(CHILD_ENV).is_ok() {
        return; // child invocations only run child_entry
    }

    let name = unique_name("xproc-flow");
    registry::create(&name, CreateOpts::new(256 * 1024)).unwrap();

    let dir = PathBuf::from(std::env::var(sluice_core::memory::RING_DIR_ENV).unwrap());
    let ready = dir.join(format!("{}.ready", name));
    let result = dir.join(format!("{}.result", name));
    let mut child = spawn_child("consume", &name, &ready, &result);

    // Produce only after the child consumer is attached: a consumer sees
    // data written after its attach, nothing earlier.
    wait_for_file(&ready, Duration::from_secs(10));

    let n_items: u64 = 100;
    let mut checksum: u64 = 0;
    let mut producer = ItemProducer::new(RingClient::attach(&name, Role::Producer).unwrap());
    for seq in 0..n_items {
        let payload = vec![(seq % 256) as u8; 64];
        checksum = checksum.wrapping_add(payload.iter().map(|&b| b as u64).sum::<u64>());
        producer
            .send(&RingItem::new(item_type::PHYSICS_EVENT, payload))
            .unwrap();
    }
    producer
        .send(&RingItem::new(item_type::END_RUN, Vec::new()))
        .unwrap();

    let status = child.wait().expect("child wait");
    assert!(status.success(), "child failed: {:?}", status);

    let report = std::fs::read_to_string(&result).expect("child result");
    let mut parts = report.split_whitespace();
    let count: u64 = parts.next().unwrap().parse().unwrap();
    let sum: u64 = parts.next().unwrap().parse().unwrap();
    assert_eq!(count, n_items);
    assert_eq!(sum, checksum);

    registry::remove(&name).unwrap();
}

#[test]
fn dead_producer_is_reaped_on_next_attach() {
    common::init();
    if std::env::var(CHILD_ENV).is_ok() {
        return;
    }

    let name = unique_name("xproc-orphan");
    registry::create(&name, CreateOpts::new(4096)).unwrap();

    let dir = PathBuf::from(std::env::var(sluice_core::memory::RING_DIR_ENV).unwrap());
    let ready = dir.join(format!("{}.ready", name));
    let result = dir.join(format!("{}.result", name));
    let mut child = spawn_child("abandon-producer", &name, &ready, &result);

    wait_for_file(&ready, Duration::from_secs(10));
    let status = child.wait().expect("child wait");
    assert!(status.success());

    // The child died holding the producer side. Attaching must reap the
    // stale owner instead of failing AlreadyOwned forever.
    let mut producer = registry::attach(&name, Role::Producer)
        .expect("stale producer slot must be reclaimed");
    producer.put(b"alive again").unwrap();

    registry::remove(&name).unwrap();
}

#[test]
fn attach_from_second_process_fails_cleanly_after_remove() {
    common::init();
    if std::env::var(CHILD_ENV).is_ok() {
        return;
    }

    let name = unique_name("xproc-gone");
    registry::create(&name, CreateOpts::new(4096)).unwrap();
    registry::remove(&name).unwrap();

    // The file is gone; a different process (simulated here by a fresh
    // attach) sees NotFound.
    assert!(matches!(
        registry::attach(&name, Role::Consumer),
        Err(SluiceError::NotFound(_))
    ));
}
