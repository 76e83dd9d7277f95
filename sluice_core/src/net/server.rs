//! The ring bridge service.
//!
//! Each accepted connection negotiates one attachment (role + ring name),
//! which the bridge performs locally on the client's behalf, then relays
//! operations until the client detaches or disconnects. The bridge is a
//! perfectly ordinary local peer: remote consumers occupy real slots,
//! remote producers hold the real ownership word, and dropping the
//! connection detaches exactly like a dying local process.
//!
//! The service is embeddable (tests run it in-process on an ephemeral
//! port); the `ring_bridge` binary wraps it for deployment.

use crate::error::{Read, SluiceError, SluiceResult};
use crate::net::protocol::{
    decode_attach, decode_read_req, encode_nak, encode_u64, read_frame, write_frame, Frame, Opcode,
};
use crate::ring::{registry, RingBuffer};
use crate::wait::ShutdownToken;
use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How often blocked socket waits wake up to poll the shutdown token.
const POLL_TICK: Duration = Duration::from_millis(250);

/// Default cap on concurrent bridge sessions.
pub const DEFAULT_MAX_CONNECTIONS: usize = 64;

/// TCP service exporting local rings to remote clients.
pub struct BridgeServer {
    listener: TcpListener,
    token: ShutdownToken,
    max_connections: usize,
    active: Arc<AtomicUsize>,
}

impl BridgeServer {
    /// Bind the service. Pass port 0 for an ephemeral port (tests).
    pub fn bind(addr: impl ToSocketAddrs, token: ShutdownToken) -> SluiceResult<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            token,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn with_max_connections(mut self, n: usize) -> Self {
        self.max_connections = n.max(1);
        self
    }

    pub fn local_addr(&self) -> SluiceResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept and serve until the shutdown token fires. Each session runs
    /// on its own thread; sessions also watch the token, so shutdown drains
    /// promptly even with clients blocked in reads.
    pub fn run(self) -> SluiceResult<()> {
        let addr = self.local_addr()?;
        log::info!("ring bridge listening on {}", addr);

        loop {
            if self.token.is_triggered() {
                log::info!("ring bridge on {} shutting down", addr);
                return Ok(());
            }
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if self.active.load(Ordering::Acquire) >= self.max_connections {
                        log::warn!(
                            "refusing bridge session from {}: {} sessions active",
                            peer,
                            self.max_connections
                        );
                        let _ = refuse(stream);
                        continue;
                    }
                    self.active.fetch_add(1, Ordering::AcqRel);
                    let token = self.token.clone();
                    let active = Arc::clone(&self.active);
                    std::thread::spawn(move || {
                        if let Err(e) = serve_session(stream, peer, token) {
                            log::debug!("bridge session from {} ended: {}", peer, e);
                        }
                        active.fetch_sub(1, Ordering::AcqRel);
                    });
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(20));
                }
                Err(e) => {
                    log::warn!("ring bridge accept failed: {}", e);
                    std::thread::sleep(Duration::from_millis(100));
                }
            }
        }
    }
}

fn refuse(mut stream: TcpStream) -> SluiceResult<()> {
    let err = SluiceError::Full("bridge connection limit reached".to_string());
    write_frame(&mut stream, Opcode::Nak, &encode_nak(&err))
}

/// Block until a full frame is available (or EOF/shutdown), then read it.
///
/// The socket carries a short read timeout and we only *peek* while idle,
/// so a poll tick can never consume half a frame header and desynchronize
/// the stream.
fn next_request(stream: &mut TcpStream, token: &ShutdownToken) -> SluiceResult<Option<Frame>> {
    let mut probe = [0u8; 1];
    loop {
        if token.is_triggered() {
            return Ok(None);
        }
        match stream.peek(&mut probe) {
            Ok(0) => return Ok(None), // client closed
            Ok(_) => return read_frame(stream),
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn serve_session(
    mut stream: TcpStream,
    peer: SocketAddr,
    token: ShutdownToken,
) -> SluiceResult<()> {
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(POLL_TICK))?;

    // First frame must be the attach handshake.
    let Some(frame) = next_request(&mut stream, &token)? else {
        return Ok(());
    };
    if frame.opcode != Opcode::Attach {
        let err = SluiceError::protocol(format!("expected attach, got {:?}", frame.opcode));
        write_frame(&mut stream, Opcode::Nak, &encode_nak(&err))?;
        return Err(err);
    }
    let (role, name) = match decode_attach(&frame.payload) {
        Ok(v) => v,
        Err(e) => {
            write_frame(&mut stream, Opcode::Nak, &encode_nak(&e))?;
            return Err(e);
        }
    };

    let mut ring = match registry::attach(&name, role) {
        Ok(mut ring) => {
            ring.set_shutdown_token(token.clone());
            write_frame(&mut stream, Opcode::Ok, &encode_u64(ring.capacity() as u64))?;
            ring
        }
        Err(e) => {
            write_frame(&mut stream, Opcode::Nak, &encode_nak(&e))?;
            return Err(e);
        }
    };
    log::info!(
        "bridge session: {} attached to ring '{}' as {}",
        peer,
        name,
        role
    );

    // Request/response loop until detach, disconnect, or shutdown.
    let result = relay_loop(&mut stream, &token, &mut ring);
    ring.detach();
    log::info!("bridge session: {} detached from ring '{}'", peer, name);
    result
}

fn relay_loop(
    stream: &mut TcpStream,
    token: &ShutdownToken,
    ring: &mut RingBuffer,
) -> SluiceResult<()> {
    loop {
        let Some(frame) = next_request(stream, token)? else {
            return Ok(());
        };
        match frame.opcode {
            Opcode::Put => {
                let reply = ring.put(&frame.payload);
                answer(stream, reply.map(|()| Vec::new()), Opcode::Ok)?;
            }
            Opcode::Get | Opcode::Peek | Opcode::Skip => {
                let (n, timeout_ms) = match decode_read_req(&frame.payload) {
                    Ok(v) => v,
                    Err(e) => {
                        write_frame(stream, Opcode::Nak, &encode_nak(&e))?;
                        continue;
                    }
                };
                let timeout = Duration::from_millis(timeout_ms);
                let outcome = match frame.opcode {
                    Opcode::Get => ring.get(n, timeout),
                    Opcode::Peek => {
                        let mut buf = vec![0u8; n];
                        ring.peek_into(&mut buf, timeout).map(|r| r.map(|()| buf))
                    }
                    // Skip transfers nothing back; an empty Data frame
                    // acknowledges the advance.
                    _ => ring.skip(n, timeout).map(|r| r.map(|()| Vec::new())),
                };
                match outcome {
                    Ok(Read::Data(bytes)) => write_frame(stream, Opcode::Data, &bytes)?,
                    Ok(Read::EndOfStream) => write_frame(stream, Opcode::EndOfStream, &[])?,
                    Err(e) => write_frame(stream, Opcode::Nak, &encode_nak(&e))?,
                }
            }
            Opcode::Usage => {
                let usage = ring.usage();
                write_frame(stream, Opcode::Ok, &encode_u64(usage))?;
            }
            Opcode::Detach => {
                write_frame(stream, Opcode::Ok, &[])?;
                return Ok(());
            }
            other => {
                let err = SluiceError::protocol(format!(
                    "unexpected {:?} frame mid-session",
                    other
                ));
                write_frame(stream, Opcode::Nak, &encode_nak(&err))?;
                return Err(err);
            }
        }
    }
}

fn answer(
    stream: &mut TcpStream,
    reply: SluiceResult<Vec<u8>>,
    ok_opcode: Opcode,
) -> SluiceResult<()> {
    match reply {
        Ok(payload) => write_frame(stream, ok_opcode, &payload),
        Err(e) => write_frame(stream, Opcode::Nak, &encode_nak(&e)),
    }
}
