//! # sluice
//!
//! Inter-process data transport for real-time data acquisition: named
//! shared-memory ring buffers carrying self-describing items from one
//! producer to many independent consumers, with network-transparent
//! attachment for off-host readers.
//!
//! The moving parts:
//!
//! - **Rings**: one producer, many consumers, coordinated only through
//!   cursors in a shared header. Consumers never block each other; a
//!   consumer that falls a full ring behind is evicted, not waited for.
//! - **Items**: every record is framed `size | type | body header? |
//!   payload`, so any stage can skip what it does not understand.
//! - **Predicates**: per-consumer type filters and down-samplers that
//!   discard unwanted items without ever copying a payload.
//! - **Bridge**: `tcp://host/name` attaches through a daemon on the ring's
//!   host; the wire carries the same bytes the shared memory does.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use sluice_core::{registry, CreateOpts, ItemConsumer, ItemProducer, RingClient, RingItem, Role};
//! use std::time::Duration;
//!
//! registry::create("rawdata", CreateOpts::new(8 * 1024 * 1024))?;
//!
//! let mut producer = ItemProducer::new(RingClient::attach("rawdata", Role::Producer)?);
//! producer.send(&RingItem::new(30, b"event bytes".to_vec()))?;
//!
//! let mut consumer = ItemConsumer::new(RingClient::attach("rawdata", Role::Consumer)?);
//! consumer.predicate_mut().add_sampled(30, 10); // every 10th physics event
//! let item = consumer.next(Duration::from_secs(1))?;
//! # Ok::<(), sluice_core::SluiceError>(())
//! ```

pub mod access;
pub mod config;
pub mod error;
pub mod item;
pub mod memory;
pub mod net;
pub mod predicate;
pub mod ring;
pub mod stream;
pub mod wait;

pub(crate) mod utils;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export the working set so most users only import from the crate root.
pub use access::{RingClient, RingIo};
pub use config::BridgeConfig;
pub use error::{Read, SluiceError, SluiceResult};
pub use item::{item_type, BodyHeader, RingItem};
pub use net::{BridgeServer, RemoteRing, RingUri, DEFAULT_BRIDGE_PORT};
pub use predicate::{Decision, Predicate, SampleMode};
pub use ring::{registry, CreateOpts, RingBuffer, Role};
pub use stream::{ConsumerStats, ItemConsumer, ItemProducer};
pub use wait::{ShutdownToken, WaitOutcome, WaitStrategy};
