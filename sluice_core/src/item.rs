//! Self-describing ring items.
//!
//! Every record in a ring is framed so that any reader can skip it without
//! understanding it: the total size comes first, then the type, then an
//! explicit body-header length word (0 when absent), then the optional body
//! header, then the payload. The same byte layout travels through shared
//! memory and over the TCP bridge.
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │ total_size (u32, little-endian, self-inclusive)│
//! ├───────────────────────────────────────────────┤
//! │ item type (u32)                                │
//! ├───────────────────────────────────────────────┤
//! │ body_header_len (u32): 0 or 16                 │
//! ├───────────────────────────────────────────────┤
//! │ timestamp (u64) | source_id (u32) | barrier (u32)  [present iff len=16]
//! ├───────────────────────────────────────────────┤
//! │ payload (total_size - 12 - body_header_len)    │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! All integers are encoded with explicit little-endian byte-slice
//! conversions — no struct casts, no aliasing.

use crate::error::{SluiceError, SluiceResult};

/// Fixed prefix: total_size + type + body_header_len.
pub const ITEM_PREFIX_BYTES: usize = 12;

/// Encoded size of a body header's fields.
pub const BODY_HEADER_BYTES: usize = 16;

/// Sanity bound on a single item. A size field above this is treated as
/// stream corruption regardless of ring capacity.
pub const MAX_ITEM_BYTES: usize = 1 << 28;

/// The first 8 bytes of any item: enough to make a keep/skip decision.
pub const PEEK_PREFIX_BYTES: usize = 8;

/// Well-known item types.
///
/// User-defined types start at [`item_type::FIRST_USER_TYPE`]; everything
/// below is reserved for the framework.
pub mod item_type {
    /// Run state: acquisition started.
    pub const BEGIN_RUN: u32 = 1;
    /// Run state: acquisition ended.
    pub const END_RUN: u32 = 2;
    /// Run state: acquisition paused.
    pub const PAUSE_RUN: u32 = 3;
    /// Run state: acquisition resumed.
    pub const RESUME_RUN: u32 = 4;
    /// Periodic scaler (counter bank) readout.
    pub const PERIODIC_SCALERS: u32 = 20;
    /// One physics trigger's worth of raw event data.
    pub const PHYSICS_EVENT: u32 = 30;
    /// Running count of physics events, for sampling consumers.
    pub const PHYSICS_EVENT_COUNT: u32 = 31;
    /// A time-stamped fragment emitted toward the event builder.
    pub const EVENT_FRAGMENT: u32 = 40;
    /// First type code available to user software.
    pub const FIRST_USER_TYPE: u32 = 0x8000;

    /// Human-readable name for logs and dump tools.
    pub fn name(t: u32) -> &'static str {
        match t {
            BEGIN_RUN => "BEGIN_RUN",
            END_RUN => "END_RUN",
            PAUSE_RUN => "PAUSE_RUN",
            RESUME_RUN => "RESUME_RUN",
            PERIODIC_SCALERS => "PERIODIC_SCALERS",
            PHYSICS_EVENT => "PHYSICS_EVENT",
            PHYSICS_EVENT_COUNT => "PHYSICS_EVENT_COUNT",
            EVENT_FRAGMENT => "EVENT_FRAGMENT",
            t if t >= FIRST_USER_TYPE => "USER",
            _ => "UNKNOWN",
        }
    }
}

/// Timestamp/source/barrier fields carried by items that participate in
/// timestamp-ordered event building.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyHeader {
    pub timestamp: u64,
    pub source_id: u32,
    pub barrier: u32,
}

impl BodyHeader {
    /// Timestamp value meaning "not timestamped".
    pub const NULL_TIMESTAMP: u64 = u64::MAX;

    /// The sentinel body header used when normalizing an item that does not
    /// carry one.
    pub const fn sentinel() -> Self {
        Self {
            timestamp: Self::NULL_TIMESTAMP,
            source_id: 0,
            barrier: 0,
        }
    }
}

/// One self-describing record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingItem {
    item_type: u32,
    body_header: Option<BodyHeader>,
    payload: Vec<u8>,
}

impl RingItem {
    pub fn new(item_type: u32, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            item_type,
            body_header: None,
            payload: payload.into(),
        }
    }

    pub fn with_body_header(
        item_type: u32,
        body_header: BodyHeader,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            item_type,
            body_header: Some(body_header),
            payload: payload.into(),
        }
    }

    pub fn item_type(&self) -> u32 {
        self.item_type
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn body_header(&self) -> Option<&BodyHeader> {
        self.body_header.as_ref()
    }

    pub fn has_body_header(&self) -> bool {
        self.body_header.is_some()
    }

    /// The item's body header, or the sentinel if it carries none. Generic
    /// stages (event builders, mergers) use this to treat every item
    /// uniformly without understanding its payload.
    pub fn normalized_body_header(&self) -> BodyHeader {
        self.body_header.unwrap_or(BodyHeader::sentinel())
    }

    /// Total encoded size, as the size field will state it.
    pub fn encoded_len(&self) -> usize {
        ITEM_PREFIX_BYTES
            + if self.body_header.is_some() {
                BODY_HEADER_BYTES
            } else {
                0
            }
            + self.payload.len()
    }

    /// Encode to the wire layout. The size field comes first so any reader
    /// can skip the item unconditionally.
    pub fn encode(&self) -> Vec<u8> {
        let total = self.encoded_len();
        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(&(total as u32).to_le_bytes());
        out.extend_from_slice(&self.item_type.to_le_bytes());
        match &self.body_header {
            Some(bh) => {
                out.extend_from_slice(&(BODY_HEADER_BYTES as u32).to_le_bytes());
                out.extend_from_slice(&bh.timestamp.to_le_bytes());
                out.extend_from_slice(&bh.source_id.to_le_bytes());
                out.extend_from_slice(&bh.barrier.to_le_bytes());
            }
            None => out.extend_from_slice(&0u32.to_le_bytes()),
        }
        out.extend_from_slice(&self.payload);
        out
    }

    /// Decode one complete item from `buf`. `buf` must hold exactly the
    /// item (size field == buf.len()); anything inconsistent is `Malformed`
    /// and fatal to the stream it came from.
    pub fn decode(buf: &[u8]) -> SluiceResult<Self> {
        if buf.len() < ITEM_PREFIX_BYTES {
            return Err(SluiceError::malformed(format!(
                "item truncated: {} bytes is shorter than the {}-byte prefix",
                buf.len(),
                ITEM_PREFIX_BYTES
            )));
        }
        let total = read_u32(buf, 0) as usize;
        if total != buf.len() {
            return Err(SluiceError::malformed(format!(
                "size field says {} bytes but {} were supplied",
                total,
                buf.len()
            )));
        }
        let item_type = read_u32(buf, 4);
        let bh_len = read_u32(buf, 8) as usize;
        if bh_len != 0 && bh_len != BODY_HEADER_BYTES {
            return Err(SluiceError::malformed(format!(
                "body header length {} is neither 0 nor {}",
                bh_len, BODY_HEADER_BYTES
            )));
        }
        if total < ITEM_PREFIX_BYTES + bh_len {
            return Err(SluiceError::malformed(format!(
                "size field {} cannot hold the declared {}-byte body header",
                total, bh_len
            )));
        }

        let body_header = if bh_len == BODY_HEADER_BYTES {
            Some(BodyHeader {
                timestamp: read_u64(buf, 12),
                source_id: read_u32(buf, 20),
                barrier: read_u32(buf, 24),
            })
        } else {
            None
        };
        let payload = buf[ITEM_PREFIX_BYTES + bh_len..].to_vec();

        Ok(Self {
            item_type,
            body_header,
            payload,
        })
    }

    /// Read size and type from an item's first 8 bytes, validating the size
    /// against the sanity bound and `capacity` (the most a carrying ring
    /// could ever deliver). This is all a filtering stage needs.
    pub fn peek_prefix(prefix: &[u8], capacity: usize) -> SluiceResult<(usize, u32)> {
        if prefix.len() < PEEK_PREFIX_BYTES {
            return Err(SluiceError::malformed(format!(
                "peek prefix needs {} bytes, got {}",
                PEEK_PREFIX_BYTES,
                prefix.len()
            )));
        }
        let total = read_u32(prefix, 0) as usize;
        let item_type = read_u32(prefix, 4);
        if total < ITEM_PREFIX_BYTES {
            return Err(SluiceError::malformed(format!(
                "size field {} is smaller than the item prefix",
                total
            )));
        }
        if total > MAX_ITEM_BYTES || total > capacity {
            return Err(SluiceError::malformed(format!(
                "size field {} exceeds the stream bound ({})",
                total,
                MAX_ITEM_BYTES.min(capacity)
            )));
        }
        Ok((total, item_type))
    }
}

#[inline]
fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(buf[at..at + 4].try_into().expect("bounds checked"))
}

#[inline]
fn read_u64(buf: &[u8], at: usize) -> u64 {
    u64::from_le_bytes(buf[at..at + 8].try_into().expect("bounds checked"))
}
