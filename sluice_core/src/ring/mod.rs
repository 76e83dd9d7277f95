//! The shared ring segment and its per-process handles.
//!
//! One named segment carries a byte ring plus a header: producer cursor,
//! producer ownership word, and a fixed table of consumer slots. A single
//! producer appends framed items; each consumer drains independently at its
//! own cursor. The producer is constrained by the slowest *live* consumer —
//! a consumer about to be overwritten is evicted (lapped) instead of being
//! allowed to stall the data flow forever.
//!
//! Cursors are absolute byte offsets that never wrap; the data index is
//! `cursor % capacity`. All cross-process coordination is atomics inside the
//! mapped header — there are no locks shared between processes.

mod buffer;
mod header;
pub mod registry;
mod segment;

pub use buffer::{RingBuffer, DEFAULT_PUT_TIMEOUT};
pub use header::{CreateOpts, DEFAULT_MAX_CONSUMERS, MAX_CONSUMER_SLOTS};

/// Which side of the ring a handle represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The single writer. At most one live producer per ring.
    Producer,
    /// An independent reader with its own cursor slot.
    Consumer,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Producer => write!(f, "producer"),
            Role::Consumer => write!(f, "consumer"),
        }
    }
}
