//! Uniform ring access, local or remote.
//!
//! `RingClient::attach("rawdata", ...)` maps shared memory;
//! `RingClient::attach("tcp://daq01/rawdata", ...)` goes through the bridge.
//! Everything above this line — item framing, predicates, adapters — is
//! written against [`RingIo`] and cannot tell the difference.

use crate::error::{Read, SluiceResult};
use crate::net::{RemoteRing, RingUri};
use crate::ring::{registry, RingBuffer, Role};
use std::time::Duration;

/// The byte-level ring operations, identical for both attachment flavors.
pub trait RingIo {
    fn name(&self) -> &str;

    fn capacity(&self) -> usize;

    /// Append and atomically publish `buf` (producer role).
    fn put(&mut self, buf: &[u8]) -> SluiceResult<()>;

    /// Read exactly `n` bytes, advancing the cursor (consumer role).
    fn get(&mut self, n: usize, timeout: Duration) -> SluiceResult<Read<Vec<u8>>>;

    /// Read exactly `n` bytes without advancing the cursor.
    fn peek(&mut self, n: usize, timeout: Duration) -> SluiceResult<Read<Vec<u8>>>;

    /// Advance the cursor by `n` bytes without copying payload.
    fn skip(&mut self, n: usize, timeout: Duration) -> SluiceResult<Read<()>>;

    /// Free space (producer) or unread backlog (consumer), in bytes.
    fn usage(&mut self) -> SluiceResult<u64>;

    /// Idempotent detach; also runs on drop.
    fn detach(&mut self);
}

impl RingIo for RingBuffer {
    fn name(&self) -> &str {
        RingBuffer::name(self)
    }

    fn capacity(&self) -> usize {
        RingBuffer::capacity(self)
    }

    fn put(&mut self, buf: &[u8]) -> SluiceResult<()> {
        RingBuffer::put(self, buf)
    }

    fn get(&mut self, n: usize, timeout: Duration) -> SluiceResult<Read<Vec<u8>>> {
        RingBuffer::get(self, n, timeout)
    }

    fn peek(&mut self, n: usize, timeout: Duration) -> SluiceResult<Read<Vec<u8>>> {
        let mut buf = vec![0u8; n];
        Ok(RingBuffer::peek_into(self, &mut buf, timeout)?.map(|()| buf))
    }

    fn skip(&mut self, n: usize, timeout: Duration) -> SluiceResult<Read<()>> {
        RingBuffer::skip(self, n, timeout)
    }

    fn usage(&mut self) -> SluiceResult<u64> {
        Ok(RingBuffer::usage(self))
    }

    fn detach(&mut self) {
        RingBuffer::detach(self)
    }
}

impl RingIo for RemoteRing {
    fn name(&self) -> &str {
        RemoteRing::name(self)
    }

    fn capacity(&self) -> usize {
        RemoteRing::capacity(self)
    }

    fn put(&mut self, buf: &[u8]) -> SluiceResult<()> {
        RemoteRing::put(self, buf)
    }

    fn get(&mut self, n: usize, timeout: Duration) -> SluiceResult<Read<Vec<u8>>> {
        RemoteRing::get(self, n, timeout)
    }

    fn peek(&mut self, n: usize, timeout: Duration) -> SluiceResult<Read<Vec<u8>>> {
        RemoteRing::peek(self, n, timeout)
    }

    fn skip(&mut self, n: usize, timeout: Duration) -> SluiceResult<Read<()>> {
        RemoteRing::skip(self, n, timeout)
    }

    fn usage(&mut self) -> SluiceResult<u64> {
        RemoteRing::usage(self)
    }

    fn detach(&mut self) {
        RemoteRing::detach(self)
    }
}

/// One attachment, either flavor.
#[derive(Debug)]
pub enum RingClient {
    Local(RingBuffer),
    Remote(RemoteRing),
}

impl RingClient {
    /// Attach to a ring by URI: bare name -> shared memory, `tcp://...` ->
    /// bridge. Failure kinds are identical either way.
    pub fn attach(uri: &str, role: Role) -> SluiceResult<Self> {
        match RingUri::parse(uri)? {
            RingUri::Local { name } => Ok(RingClient::Local(registry::attach(&name, role)?)),
            RingUri::Remote { host, port, name } => Ok(RingClient::Remote(RemoteRing::connect(
                &host, port, &name, role,
            )?)),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, RingClient::Remote(_))
    }
}

impl RingIo for RingClient {
    fn name(&self) -> &str {
        match self {
            RingClient::Local(r) => RingIo::name(r),
            RingClient::Remote(r) => RingIo::name(r),
        }
    }

    fn capacity(&self) -> usize {
        match self {
            RingClient::Local(r) => RingIo::capacity(r),
            RingClient::Remote(r) => RingIo::capacity(r),
        }
    }

    fn put(&mut self, buf: &[u8]) -> SluiceResult<()> {
        match self {
            RingClient::Local(r) => RingIo::put(r, buf),
            RingClient::Remote(r) => RingIo::put(r, buf),
        }
    }

    fn get(&mut self, n: usize, timeout: Duration) -> SluiceResult<Read<Vec<u8>>> {
        match self {
            RingClient::Local(r) => RingIo::get(r, n, timeout),
            RingClient::Remote(r) => RingIo::get(r, n, timeout),
        }
    }

    fn peek(&mut self, n: usize, timeout: Duration) -> SluiceResult<Read<Vec<u8>>> {
        match self {
            RingClient::Local(r) => RingIo::peek(r, n, timeout),
            RingClient::Remote(r) => RingIo::peek(r, n, timeout),
        }
    }

    fn skip(&mut self, n: usize, timeout: Duration) -> SluiceResult<Read<()>> {
        match self {
            RingClient::Local(r) => RingIo::skip(r, n, timeout),
            RingClient::Remote(r) => RingIo::skip(r, n, timeout),
        }
    }

    fn usage(&mut self) -> SluiceResult<u64> {
        match self {
            RingClient::Local(r) => RingIo::usage(r),
            RingClient::Remote(r) => RingIo::usage(r),
        }
    }

    fn detach(&mut self) {
        match self {
            RingClient::Local(r) => RingIo::detach(r),
            RingClient::Remote(r) => RingIo::detach(r),
        }
    }
}
