//! Bridge wire protocol.
//!
//! Fixed 12-byte frame header + payload, all integers little-endian:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ Magic (4 bytes): 0x534C5242 ("SLRB")         │
//! ├──────────────────────────────────────────────┤
//! │ Version (1 byte): 0x01                       │
//! ├──────────────────────────────────────────────┤
//! │ Opcode (1 byte)                              │
//! ├──────────────────────────────────────────────┤
//! │ Reserved (2 bytes): 0                        │
//! ├──────────────────────────────────────────────┤
//! │ Payload length (4 bytes)                     │
//! ├──────────────────────────────────────────────┤
//! │ Payload (variable)                           │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! The session is strictly request/response after the attach handshake.
//! Ring items travel opaquely in `Data` payloads — the item layout on the
//! socket is byte-identical to the one in shared memory.

use crate::error::{SluiceError, SluiceResult};
use crate::item::MAX_ITEM_BYTES;
use crate::ring::Role;
use std::io::{Read as IoRead, Write};

const MAGIC: u32 = 0x534C_5242; // "SLRB"
const VERSION: u8 = 0x01;
const FRAME_HEADER_BYTES: usize = 12;

/// Largest accepted frame payload: one maximal item plus header slack.
const MAX_FRAME_PAYLOAD: usize = MAX_ITEM_BYTES + 64;

/// Frame opcodes. 0x0x = requests, 0x1x = responses.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Attach = 0x01,
    Put = 0x02,
    Get = 0x03,
    Peek = 0x04,
    Skip = 0x05,
    Usage = 0x06,
    Detach = 0x07,
    Ok = 0x10,
    Data = 0x11,
    EndOfStream = 0x12,
    Nak = 0x13,
}

impl Opcode {
    fn from_u8(v: u8) -> SluiceResult<Self> {
        Ok(match v {
            0x01 => Opcode::Attach,
            0x02 => Opcode::Put,
            0x03 => Opcode::Get,
            0x04 => Opcode::Peek,
            0x05 => Opcode::Skip,
            0x06 => Opcode::Usage,
            0x07 => Opcode::Detach,
            0x10 => Opcode::Ok,
            0x11 => Opcode::Data,
            0x12 => Opcode::EndOfStream,
            0x13 => Opcode::Nak,
            other => {
                return Err(SluiceError::protocol(format!(
                    "unknown opcode 0x{:02X}",
                    other
                )))
            }
        })
    }
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

/// Write one frame.
pub fn write_frame(w: &mut impl Write, opcode: Opcode, payload: &[u8]) -> SluiceResult<()> {
    if payload.len() > MAX_FRAME_PAYLOAD {
        return Err(SluiceError::protocol(format!(
            "frame payload of {} bytes exceeds the {} byte bound",
            payload.len(),
            MAX_FRAME_PAYLOAD
        )));
    }
    let mut header = [0u8; FRAME_HEADER_BYTES];
    header[0..4].copy_from_slice(&MAGIC.to_le_bytes());
    header[4] = VERSION;
    header[5] = opcode as u8;
    // bytes 6..8 reserved, zero
    header[8..12].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    w.write_all(&header)?;
    w.write_all(payload)?;
    w.flush()?;
    Ok(())
}

/// Read one frame. `Ok(None)` means the peer closed the stream cleanly
/// before a new frame started; EOF inside a frame is a protocol error.
pub fn read_frame(r: &mut impl IoRead) -> SluiceResult<Option<Frame>> {
    let mut header = [0u8; FRAME_HEADER_BYTES];
    match r.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let magic = u32::from_le_bytes(header[0..4].try_into().expect("fixed slice"));
    if magic != MAGIC {
        return Err(SluiceError::protocol(format!(
            "bad frame magic 0x{:08X}",
            magic
        )));
    }
    if header[4] != VERSION {
        return Err(SluiceError::protocol(format!(
            "unsupported protocol version {}",
            header[4]
        )));
    }
    let opcode = Opcode::from_u8(header[5])?;
    let len = u32::from_le_bytes(header[8..12].try_into().expect("fixed slice")) as usize;
    if len > MAX_FRAME_PAYLOAD {
        return Err(SluiceError::protocol(format!(
            "frame payload of {} bytes exceeds the {} byte bound",
            len, MAX_FRAME_PAYLOAD
        )));
    }

    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)
        .map_err(|e| SluiceError::protocol(format!("stream ended inside a frame: {}", e)))?;
    Ok(Some(Frame { opcode, payload }))
}

// ----------------------------------------------------------------------
// Payload codecs
// ----------------------------------------------------------------------

/// Attach request payload: role byte + ring name.
pub fn encode_attach(role: Role, name: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + name.len());
    out.push(match role {
        Role::Producer => 0u8,
        Role::Consumer => 1u8,
    });
    out.extend_from_slice(name.as_bytes());
    out
}

pub fn decode_attach(payload: &[u8]) -> SluiceResult<(Role, String)> {
    let (&role_byte, name_bytes) = payload
        .split_first()
        .ok_or_else(|| SluiceError::protocol("empty attach payload"))?;
    let role = match role_byte {
        0 => Role::Producer,
        1 => Role::Consumer,
        other => {
            return Err(SluiceError::protocol(format!(
                "unknown role byte {} in attach",
                other
            )))
        }
    };
    let name = std::str::from_utf8(name_bytes)
        .map_err(|_| SluiceError::protocol("attach ring name is not UTF-8"))?
        .to_string();
    Ok((role, name))
}

/// Get/Peek/Skip request payload: byte count + timeout.
pub fn encode_read_req(n: usize, timeout_ms: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(12);
    out.extend_from_slice(&(n as u32).to_le_bytes());
    out.extend_from_slice(&timeout_ms.to_le_bytes());
    out
}

pub fn decode_read_req(payload: &[u8]) -> SluiceResult<(usize, u64)> {
    if payload.len() != 12 {
        return Err(SluiceError::protocol(format!(
            "read request payload is {} bytes, expected 12",
            payload.len()
        )));
    }
    let n = u32::from_le_bytes(payload[0..4].try_into().expect("fixed slice")) as usize;
    let timeout_ms = u64::from_le_bytes(payload[4..12].try_into().expect("fixed slice"));
    Ok((n, timeout_ms))
}

/// Ok payload carrying a u64 (attach capacity, usage reply).
pub fn encode_u64(v: u64) -> Vec<u8> {
    v.to_le_bytes().to_vec()
}

pub fn decode_u64(payload: &[u8]) -> SluiceResult<u64> {
    payload
        .try_into()
        .map(u64::from_le_bytes)
        .map_err(|_| SluiceError::protocol(format!("expected 8-byte payload, got {}", payload.len())))
}

// ----------------------------------------------------------------------
// Error <-> Nak mapping
// ----------------------------------------------------------------------

const NAK_NOT_FOUND: u16 = 1;
const NAK_ALREADY_EXISTS: u16 = 2;
const NAK_ALREADY_OWNED: u16 = 3;
const NAK_FULL: u16 = 4;
const NAK_LAPPED: u16 = 5;
const NAK_PEER_GONE: u16 = 6;
const NAK_TIMEOUT: u16 = 7;
const NAK_MALFORMED: u16 = 8;
const NAK_INVALID: u16 = 9;
const NAK_INTERNAL: u16 = 10;

/// Nak payload: code + human-readable detail.
pub fn encode_nak(err: &SluiceError) -> Vec<u8> {
    let code = match err {
        SluiceError::NotFound(_) => NAK_NOT_FOUND,
        SluiceError::AlreadyExists(_) => NAK_ALREADY_EXISTS,
        SluiceError::AlreadyOwned { .. } => NAK_ALREADY_OWNED,
        SluiceError::Full(_) => NAK_FULL,
        SluiceError::Lapped(_) => NAK_LAPPED,
        SluiceError::PeerGone(_) => NAK_PEER_GONE,
        SluiceError::Timeout(_) => NAK_TIMEOUT,
        SluiceError::Malformed(_) => NAK_MALFORMED,
        SluiceError::InvalidInput(_) => NAK_INVALID,
        _ => NAK_INTERNAL,
    };
    let msg = err.to_string();
    let mut out = Vec::with_capacity(2 + msg.len());
    out.extend_from_slice(&code.to_le_bytes());
    out.extend_from_slice(msg.as_bytes());
    out
}

/// Rebuild a `SluiceError` from a Nak so remote failures are
/// indistinguishable, kind-wise, from local ones.
pub fn decode_nak(payload: &[u8], ring: &str) -> SluiceError {
    if payload.len() < 2 {
        return SluiceError::protocol("truncated NAK payload");
    }
    let code = u16::from_le_bytes(payload[0..2].try_into().expect("fixed slice"));
    let msg = String::from_utf8_lossy(&payload[2..]).into_owned();
    match code {
        NAK_NOT_FOUND => SluiceError::NotFound(ring.to_string()),
        NAK_ALREADY_EXISTS => SluiceError::AlreadyExists(ring.to_string()),
        NAK_ALREADY_OWNED => SluiceError::AlreadyOwned {
            ring: ring.to_string(),
            pid: 0,
        },
        NAK_FULL => SluiceError::Full(ring.to_string()),
        NAK_LAPPED => SluiceError::Lapped(ring.to_string()),
        NAK_PEER_GONE => SluiceError::PeerGone(msg),
        NAK_TIMEOUT => SluiceError::Timeout(msg),
        NAK_MALFORMED => SluiceError::Malformed(msg),
        NAK_INVALID => SluiceError::InvalidInput(msg),
        _ => SluiceError::protocol(format!("bridge reported: {}", msg)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trip() {
        let mut buf = Vec::new();
        write_frame(&mut buf, Opcode::Data, b"payload bytes").unwrap();
        let frame = read_frame(&mut buf.as_slice()).unwrap().unwrap();
        assert_eq!(frame.opcode, Opcode::Data);
        assert_eq!(frame.payload, b"payload bytes");
    }

    #[test]
    fn clean_eof_is_none_mid_frame_is_error() {
        let empty: &[u8] = &[];
        assert_eq!(read_frame(&mut { empty }).unwrap(), None);

        let mut buf = Vec::new();
        write_frame(&mut buf, Opcode::Data, b"0123456789").unwrap();
        buf.truncate(buf.len() - 3);
        assert!(matches!(
            read_frame(&mut buf.as_slice()),
            Err(SluiceError::Protocol(_))
        ));
    }

    #[test]
    fn bad_magic_rejected() {
        let mut buf = Vec::new();
        write_frame(&mut buf, Opcode::Ok, &[]).unwrap();
        buf[0] ^= 0xFF;
        assert!(matches!(
            read_frame(&mut buf.as_slice()),
            Err(SluiceError::Protocol(_))
        ));
    }

    #[test]
    fn attach_round_trip() {
        for role in [Role::Producer, Role::Consumer] {
            let payload = encode_attach(role, "rawdata");
            let (r, name) = decode_attach(&payload).unwrap();
            assert_eq!(r, role);
            assert_eq!(name, "rawdata");
        }
    }

    #[test]
    fn read_req_round_trip() {
        let payload = encode_read_req(8192, 1500);
        assert_eq!(decode_read_req(&payload).unwrap(), (8192, 1500));
    }

    #[test]
    fn nak_preserves_error_kind() {
        let cases: Vec<SluiceError> = vec![
            SluiceError::NotFound("r".into()),
            SluiceError::AlreadyOwned {
                ring: "r".into(),
                pid: 42,
            },
            SluiceError::Full("r".into()),
            SluiceError::Lapped("r".into()),
            SluiceError::Timeout("slow".into()),
            SluiceError::Malformed("bad size".into()),
        ];
        for err in cases {
            let decoded = decode_nak(&encode_nak(&err), "r");
            assert_eq!(
                std::mem::discriminant(&decoded),
                std::mem::discriminant(&err),
                "kind lost for {:?}",
                err
            );
        }
    }
}
