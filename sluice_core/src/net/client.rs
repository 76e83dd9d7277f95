//! Remote ring attachment through the bridge daemon.
//!
//! A `RemoteRing` offers the same operation set and error surface as a
//! local `RingBuffer`; callers go through `RingClient` and never care which
//! one they hold. Stream closure is reported to a consumer as end-of-stream
//! — from the caller's side it is indistinguishable from local ring
//! destruction, exactly like a reader of a destroyed local ring.

use crate::error::{Read, SluiceError, SluiceResult};
use crate::net::protocol::{
    decode_nak, decode_u64, encode_attach, encode_read_req, read_frame, write_frame, Frame, Opcode,
};
use crate::ring::Role;
use std::io::ErrorKind;
use std::net::TcpStream;
use std::time::Duration;

/// Handshake and control-frame bound; data waits add the caller's timeout
/// on top.
const IO_GRACE: Duration = Duration::from_secs(5);

/// One attachment to a ring on another host (or through the local bridge).
pub struct RemoteRing {
    stream: TcpStream,
    name: String,
    role: Role,
    capacity: usize,
    /// Set once the stream has ended (socket closed or EndOfStream frame);
    /// later reads keep reporting end-of-stream instead of erroring.
    ended: bool,
    detached: bool,
}

impl RemoteRing {
    /// Connect to the bridge on `host:port` and negotiate an attachment to
    /// `name` with the given role. Attach failures carry the same error
    /// kinds the local registry produces.
    pub fn connect(host: &str, port: u16, name: &str, role: Role) -> SluiceResult<Self> {
        let stream = TcpStream::connect((host, port)).map_err(|e| {
            SluiceError::PeerGone(format!(
                "cannot reach ring bridge at {}:{}: {}",
                host, port, e
            ))
        })?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(IO_GRACE))?;
        stream.set_write_timeout(Some(IO_GRACE))?;

        let mut ring = Self {
            stream,
            name: name.to_string(),
            role,
            capacity: 0,
            ended: false,
            detached: false,
        };

        write_frame(&mut ring.stream, Opcode::Attach, &encode_attach(role, name))?;
        match ring.expect_frame()? {
            Frame {
                opcode: Opcode::Ok,
                payload,
            } => {
                ring.capacity = decode_u64(&payload)? as usize;
                log::debug!(
                    "attached to remote ring '{}' at {}:{} as {} (capacity {})",
                    name,
                    host,
                    port,
                    role,
                    ring.capacity
                );
                Ok(ring)
            }
            Frame {
                opcode: Opcode::Nak,
                payload,
            } => Err(decode_nak(&payload, name)),
            frame => Err(SluiceError::protocol(format!(
                "unexpected {:?} reply to attach",
                frame.opcode
            ))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Capacity of the ring behind the bridge, reported at attach time.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Read one frame, mapping socket failures onto transport errors:
    /// timeouts stay `Timeout`, everything else is `PeerGone`.
    fn expect_frame(&mut self) -> SluiceResult<Frame> {
        match read_frame(&mut self.stream) {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => {
                self.ended = true;
                Err(SluiceError::PeerGone(format!(
                    "bridge connection for ring '{}' closed",
                    self.name
                )))
            }
            Err(SluiceError::Io(e))
                if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut =>
            {
                Err(SluiceError::Timeout(format!(
                    "bridge for ring '{}' did not answer in time",
                    self.name
                )))
            }
            Err(SluiceError::Io(e)) => {
                self.ended = true;
                Err(SluiceError::PeerGone(format!(
                    "bridge connection for ring '{}' failed: {}",
                    self.name, e
                )))
            }
            Err(e) => Err(e),
        }
    }

    fn ensure_attached(&self) -> SluiceResult<()> {
        if self.detached {
            return Err(SluiceError::invalid_input(format!(
                "handle for ring '{}' is detached",
                self.name
            )));
        }
        Ok(())
    }

    /// Relay a put. A dropped connection mid-put is `PeerGone` — the bytes
    /// may or may not have reached the ring.
    pub fn put(&mut self, buf: &[u8]) -> SluiceResult<()> {
        self.ensure_attached()?;
        write_frame(&mut self.stream, Opcode::Put, buf).map_err(|e| self.to_peer_gone(e))?;
        match self.expect_frame()? {
            Frame {
                opcode: Opcode::Ok, ..
            } => Ok(()),
            Frame {
                opcode: Opcode::Nak,
                payload,
            } => Err(decode_nak(&payload, &self.name)),
            frame => Err(SluiceError::protocol(format!(
                "unexpected {:?} reply to put",
                frame.opcode
            ))),
        }
    }

    fn read_op(&mut self, opcode: Opcode, n: usize, timeout: Duration) -> SluiceResult<Read<Vec<u8>>> {
        self.ensure_attached()?;
        if self.ended {
            // The stream is gone; every further read is end-of-stream, the
            // same thing a local consumer sees after ring destruction.
            return Ok(Read::EndOfStream);
        }

        // The bridge runs the bounded wait against the local ring; our
        // socket deadline adds grace on top so a live bridge always answers
        // first.
        let timeout_ms = timeout.as_millis().min(u64::MAX as u128) as u64;
        self.stream
            .set_read_timeout(Some(timeout + IO_GRACE))
            .map_err(SluiceError::from)?;
        if let Err(e) = write_frame(&mut self.stream, opcode, &encode_read_req(n, timeout_ms)) {
            let e = self.to_peer_gone(e);
            // A consumer whose bridge connection died sees end-of-stream,
            // the same as a reader of a destroyed local ring.
            return match (&e, self.role) {
                (SluiceError::PeerGone(_), Role::Consumer) => Ok(Read::EndOfStream),
                _ => Err(e),
            };
        }

        let result = match self.expect_frame() {
            Ok(Frame {
                opcode: Opcode::Data,
                payload,
            }) => {
                if payload.len() != n && opcode != Opcode::Skip {
                    Err(SluiceError::protocol(format!(
                        "bridge returned {} bytes for a {}-byte read",
                        payload.len(),
                        n
                    )))
                } else {
                    Ok(Read::Data(payload))
                }
            }
            Ok(Frame {
                opcode: Opcode::EndOfStream,
                ..
            }) => {
                self.ended = true;
                Ok(Read::EndOfStream)
            }
            Ok(Frame {
                opcode: Opcode::Nak,
                payload,
            }) => Err(decode_nak(&payload, &self.name)),
            Ok(frame) => Err(SluiceError::protocol(format!(
                "unexpected {:?} reply to {:?}",
                frame.opcode, opcode
            ))),
            // Socket EOF while waiting for data: the stream ended.
            Err(SluiceError::PeerGone(_)) if self.role == Role::Consumer => {
                self.ended = true;
                Ok(Read::EndOfStream)
            }
            Err(e) => Err(e),
        };
        let _ = self.stream.set_read_timeout(Some(IO_GRACE));
        result
    }

    /// Read exactly `n` bytes, advancing the remote cursor.
    pub fn get(&mut self, n: usize, timeout: Duration) -> SluiceResult<Read<Vec<u8>>> {
        self.read_op(Opcode::Get, n, timeout)
    }

    /// Read exactly `n` bytes without advancing the remote cursor.
    pub fn peek(&mut self, n: usize, timeout: Duration) -> SluiceResult<Read<Vec<u8>>> {
        self.read_op(Opcode::Peek, n, timeout)
    }

    /// Advance the remote cursor by `n` bytes without transferring them.
    pub fn skip(&mut self, n: usize, timeout: Duration) -> SluiceResult<Read<()>> {
        Ok(self.read_op(Opcode::Skip, n, timeout)?.map(|_| ()))
    }

    /// Free space (producer) or unread backlog (consumer) of the remote
    /// ring, one round-trip away.
    pub fn usage(&mut self) -> SluiceResult<u64> {
        self.ensure_attached()?;
        write_frame(&mut self.stream, Opcode::Usage, &[]).map_err(|e| self.to_peer_gone(e))?;
        match self.expect_frame()? {
            Frame {
                opcode: Opcode::Ok,
                payload,
            } => decode_u64(&payload),
            Frame {
                opcode: Opcode::Nak,
                payload,
            } => Err(decode_nak(&payload, &self.name)),
            frame => Err(SluiceError::protocol(format!(
                "unexpected {:?} reply to usage",
                frame.opcode
            ))),
        }
    }

    fn to_peer_gone(&mut self, err: SluiceError) -> SluiceError {
        self.ended = true;
        match err {
            SluiceError::Io(e) => SluiceError::PeerGone(format!(
                "bridge connection for ring '{}' failed: {}",
                self.name, e
            )),
            other => other,
        }
    }

    /// Detach: tell the bridge (best effort) and drop the connection.
    /// Idempotent, and fine if the bridge is already gone.
    pub fn detach(&mut self) {
        if self.detached {
            return;
        }
        self.detached = true;
        if !self.ended {
            let _ = write_frame(&mut self.stream, Opcode::Detach, &[]);
            let _ = read_frame(&mut self.stream);
        }
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}

impl Drop for RemoteRing {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for RemoteRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteRing")
            .field("ring", &self.name)
            .field("role", &self.role)
            .field("ended", &self.ended)
            .finish()
    }
}
