//! Network-transparent ring access.
//!
//! A ring is addressed by URI: a bare name attaches to local shared memory,
//! `tcp://host[:port]/name` attaches through a bridge daemon running on the
//! ring's host. The bridge relays the byte-level primitives (`put`, `get`,
//! `peek`, `skip`, `usage`) as length-prefixed frames, so the item layer on
//! top behaves identically either way. Socket closure is surfaced to a
//! consumer exactly like local ring destruction: end-of-stream.

pub mod client;
pub mod protocol;
pub mod server;
pub mod uri;

pub use client::RemoteRing;
pub use server::BridgeServer;
pub use uri::{RingUri, DEFAULT_BRIDGE_PORT};
