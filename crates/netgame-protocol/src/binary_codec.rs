//! Binary encoding/decoding for envelopes and handshake frames.
//!
//! This module converts between:
//! - raw frame payloads (`&[u8]`)
//! - high-level `netgame_core::Envelope` and the handshake messages
//!
//! Payload layout (one message per buffer):
//!
//! ```text
//! [0]   : msg_type (WireEnvelopeType / WireHandshakeType as u8)
//! [1]   : version  (PROTOCOL_VERSION)
//! [2..4]: reserved = 0
//! [4..] : body (depends on msg_type)
//!
//! Hello (type=0x20):
//!   [4..]     greeting token (UTF-8, rest of buffer)
//!
//! Welcome (type=0x21):
//!   [4..12]   assigned identity (u64 BE)
//!
//! Data (type=0x01):
//!   [4..]     application bytes (rest of buffer)
//!
//! Forwarded (type=0x02):
//!   [4..12]   sender identity (u64 BE)
//!   [12..]    application bytes (rest of buffer)
//!
//! Status (type=0x03):
//!   [4..12]   peer identity (u64 BE)
//!   [12]      connecting (0/1)
//!   [13..17]  count (u32 BE)
//!   [17..]    count × identity (u64 BE)
//!
//! Disconnect (type=0x04):
//!   [4..6]    reason_len (u16 BE)
//!   [6..]     reason (UTF-8)
//! ```
//!
//! NOTE: This module encodes/decodes **one message per buffer**. Stream
//! framing (the u32 BE length prefix) lives in [`crate::framed`].

use std::fmt;

use bytes::Bytes;
use netgame_core::{Envelope, PeerId, StatusUpdate};

use crate::wire_types::{
    HEADER_LEN, MAX_FRAME_LEN, MAX_REASON_LEN, PROTOCOL_VERSION, WireEnvelopeType,
    WireHandshakeType,
};

/// Errors that can arise when encoding/decoding a binary frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer too short for the expected fields.
    Truncated,
    /// Unknown or unsupported message type.
    UnknownMessageType(u8),
    /// A known message type that is not valid here (e.g. Hello after handshake).
    UnexpectedMessageType(u8),
    /// Unsupported or mismatched protocol version.
    VersionMismatch(u8),
    /// Malformed UTF-8 in a text field.
    InvalidUtf8(&'static str),
    /// Out-of-range value or other semantic issue.
    InvalidField(&'static str),
    /// Frame length exceeds `MAX_FRAME_LEN`.
    FrameTooLarge(usize),
    /// Envelope kind that never goes on the wire.
    NotTransmittable(&'static str),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Truncated => write!(f, "Buffer truncated"),
            ProtocolError::UnknownMessageType(t) => write!(f, "Unknown message type: {:#04x}", t),
            ProtocolError::UnexpectedMessageType(t) => {
                write!(f, "Unexpected message type: {:#04x}", t)
            }
            ProtocolError::VersionMismatch(v) => {
                write!(f, "Protocol version mismatch: got {}, expected {}", v, PROTOCOL_VERSION)
            }
            ProtocolError::InvalidUtf8(field) => write!(f, "Invalid UTF-8 in {}", field),
            ProtocolError::InvalidField(field) => write!(f, "Invalid field: {}", field),
            ProtocolError::FrameTooLarge(len) => {
                write!(f, "Frame of {} bytes exceeds limit of {}", len, MAX_FRAME_LEN)
            }
            ProtocolError::NotTransmittable(kind) => {
                write!(f, "{} envelopes are never transmitted", kind)
            }
        }
    }
}

impl std::error::Error for ProtocolError {}

// ============================================================================
// ENVELOPES: steady state, both directions
// ============================================================================

/// Encode a single envelope into a frame payload.
///
/// The encoded bytes are appended to `out`.
pub fn encode_envelope(env: &Envelope, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
    match env {
        Envelope::Data(payload) => {
            write_header(WireEnvelopeType::Data as u8, out);
            out.extend_from_slice(payload);
        }
        Envelope::Forwarded { from, payload } => {
            write_header(WireEnvelopeType::Forwarded as u8, out);
            out.extend_from_slice(&from.0.to_be_bytes());
            out.extend_from_slice(payload);
        }
        Envelope::Status(status) => encode_status(status, out)?,
        Envelope::Disconnect(reason) => encode_disconnect(reason, out)?,
        Envelope::EncoderReset => return Err(ProtocolError::NotTransmittable(env.kind())),
    }

    Ok(())
}

/// Decode a single envelope from a frame payload.
///
/// Handshake types are rejected with `UnexpectedMessageType`.
pub fn decode_envelope(buf: &[u8]) -> Result<Envelope, ProtocolError> {
    let msg_type = read_header(buf)?;

    let wire_type = match WireEnvelopeType::from_u8(msg_type) {
        Some(t) => t,
        None if WireHandshakeType::from_u8(msg_type).is_some() => {
            return Err(ProtocolError::UnexpectedMessageType(msg_type))
        }
        None => return Err(ProtocolError::UnknownMessageType(msg_type)),
    };

    let body = &buf[HEADER_LEN..];
    match wire_type {
        WireEnvelopeType::Data => Ok(Envelope::Data(Bytes::copy_from_slice(body))),
        WireEnvelopeType::Forwarded => {
            if body.len() < 8 {
                return Err(ProtocolError::Truncated);
            }
            Ok(Envelope::Forwarded {
                from: PeerId(read_u64_be(&body[0..8])),
                payload: Bytes::copy_from_slice(&body[8..]),
            })
        }
        WireEnvelopeType::Status => decode_status(body),
        WireEnvelopeType::Disconnect => decode_disconnect(body),
    }
}

fn encode_status(status: &StatusUpdate, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
    let count =
        u32::try_from(status.peers.len()).map_err(|_| ProtocolError::InvalidField("peers"))?;

    write_header(WireEnvelopeType::Status as u8, out);
    out.extend_from_slice(&status.peer.0.to_be_bytes());
    out.push(if status.connecting { 1 } else { 0 });
    out.extend_from_slice(&count.to_be_bytes());
    for p in &status.peers {
        out.extend_from_slice(&p.0.to_be_bytes());
    }

    Ok(())
}

fn decode_status(body: &[u8]) -> Result<Envelope, ProtocolError> {
    if body.len() < 13 {
        return Err(ProtocolError::Truncated);
    }

    let peer = PeerId(read_u64_be(&body[0..8]));
    let connecting = match body[8] {
        0 => false,
        1 => true,
        _ => return Err(ProtocolError::InvalidField("connecting")),
    };
    let count = read_u32_be(&body[9..13]) as usize;

    let list = &body[13..];
    if list.len() / 8 < count {
        return Err(ProtocolError::Truncated);
    }

    let peers = list
        .chunks_exact(8)
        .take(count)
        .map(|chunk| PeerId(read_u64_be(chunk)))
        .collect();

    Ok(Envelope::Status(StatusUpdate {
        peer,
        connecting,
        peers,
    }))
}

fn encode_disconnect(reason: &str, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
    let bytes = reason.as_bytes();
    if bytes.len() > MAX_REASON_LEN {
        return Err(ProtocolError::InvalidField("reason"));
    }

    write_header(WireEnvelopeType::Disconnect as u8, out);
    out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    out.extend_from_slice(bytes);

    Ok(())
}

fn decode_disconnect(body: &[u8]) -> Result<Envelope, ProtocolError> {
    if body.len() < 2 {
        return Err(ProtocolError::Truncated);
    }

    let len = u16::from_be_bytes([body[0], body[1]]) as usize;
    if body.len() < 2 + len {
        return Err(ProtocolError::Truncated);
    }

    let reason = std::str::from_utf8(&body[2..2 + len])
        .map_err(|_| ProtocolError::InvalidUtf8("reason"))?
        .to_string();

    Ok(Envelope::Disconnect(reason))
}

// ============================================================================
// HANDSHAKE: before a connection is live
// ============================================================================

/// Encode the greeting frame the connecting side sends first.
pub fn encode_hello(token: &str, out: &mut Vec<u8>) {
    write_header(WireHandshakeType::Hello as u8, out);
    out.extend_from_slice(token.as_bytes());
}

/// Decode a greeting frame and return its token.
///
/// Does not compare the token against `GREETING`; that is the accepting
/// side's decision.
pub fn decode_hello(buf: &[u8]) -> Result<String, ProtocolError> {
    expect_handshake_type(buf, WireHandshakeType::Hello)?;

    let token = std::str::from_utf8(&buf[HEADER_LEN..])
        .map_err(|_| ProtocolError::InvalidUtf8("greeting"))?;

    Ok(token.to_string())
}

/// Encode the identity assignment the accepting side sends back.
pub fn encode_welcome(id: PeerId, out: &mut Vec<u8>) {
    write_header(WireHandshakeType::Welcome as u8, out);
    out.extend_from_slice(&id.0.to_be_bytes());
}

/// Decode an identity assignment. Identity 0 is invalid.
pub fn decode_welcome(buf: &[u8]) -> Result<PeerId, ProtocolError> {
    expect_handshake_type(buf, WireHandshakeType::Welcome)?;

    if buf.len() < HEADER_LEN + 8 {
        return Err(ProtocolError::Truncated);
    }

    let id = read_u64_be(&buf[HEADER_LEN..HEADER_LEN + 8]);
    if id == 0 {
        return Err(ProtocolError::InvalidField("identity"));
    }

    Ok(PeerId(id))
}

fn expect_handshake_type(buf: &[u8], expected: WireHandshakeType) -> Result<(), ProtocolError> {
    let msg_type = read_header(buf)?;
    if msg_type == expected as u8 {
        return Ok(());
    }

    if WireHandshakeType::from_u8(msg_type).is_some()
        || WireEnvelopeType::from_u8(msg_type).is_some()
    {
        Err(ProtocolError::UnexpectedMessageType(msg_type))
    } else {
        Err(ProtocolError::UnknownMessageType(msg_type))
    }
}

// -----------------------------------------------------------------------------
// Helpers
// -----------------------------------------------------------------------------

fn write_header(msg_type: u8, out: &mut Vec<u8>) {
    out.push(msg_type);
    out.push(PROTOCOL_VERSION);
    out.extend_from_slice(&[0, 0]); // reserved
}

/// Validate the common header and return the message type byte.
fn read_header(buf: &[u8]) -> Result<u8, ProtocolError> {
    if buf.len() < HEADER_LEN {
        return Err(ProtocolError::Truncated);
    }

    let version = buf[1];
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::VersionMismatch(version));
    }

    Ok(buf[0])
}

fn read_u32_be(bytes: &[u8]) -> u32 {
    let mut arr = [0u8; 4];
    arr.copy_from_slice(&bytes[0..4]);
    u32::from_be_bytes(arr)
}

fn read_u64_be(bytes: &[u8]) -> u64 {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(&bytes[0..8]);
    u64::from_be_bytes(arr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire_types::MAX_PAYLOAD_LEN;

    fn encoded(env: &Envelope) -> Vec<u8> {
        let mut out = Vec::new();
        encode_envelope(env, &mut out).expect("encodable");
        out
    }

    #[test]
    fn largest_sendable_payload_still_fits_when_forwarded() {
        let env = Envelope::Forwarded {
            from: PeerId(u64::MAX),
            payload: Bytes::from(vec![1u8; MAX_PAYLOAD_LEN]),
        };
        assert!(env.check_sendable().is_ok());
        assert!(encoded(&env).len() <= MAX_FRAME_LEN);
    }

    #[test]
    fn status_layout() {
        let env = Envelope::Status(StatusUpdate {
            peer: PeerId(2),
            connecting: true,
            peers: vec![PeerId(1), PeerId(2)],
        });
        let buf = encoded(&env);

        assert_eq!(buf[0], WireEnvelopeType::Status as u8);
        assert_eq!(buf[1], PROTOCOL_VERSION);
        assert_eq!(buf.len(), HEADER_LEN + 8 + 1 + 4 + 2 * 8);
        assert_eq!(decode_envelope(&buf), Ok(env));
    }

    #[test]
    fn data_bytes_are_preserved() {
        let payload = Bytes::from(vec![0u8, 255, 10, 13, 0]);
        let buf = encoded(&Envelope::Data(payload.clone()));
        assert_eq!(decode_envelope(&buf), Ok(Envelope::Data(payload)));
    }

    #[test]
    fn forwarded_carries_sender() {
        let env = Envelope::Forwarded {
            from: PeerId(7),
            payload: Bytes::from_static(b"raise 20"),
        };
        assert_eq!(decode_envelope(&encoded(&env)), Ok(env));
    }

    #[test]
    fn encoder_reset_is_not_encodable() {
        let mut out = Vec::new();
        assert_eq!(
            encode_envelope(&Envelope::EncoderReset, &mut out),
            Err(ProtocolError::NotTransmittable("encoder-reset"))
        );
        assert!(out.is_empty());
    }

    #[test]
    fn truncated_status_list() {
        let mut buf = encoded(&Envelope::Status(StatusUpdate {
            peer: PeerId(1),
            connecting: false,
            peers: vec![PeerId(1), PeerId(3)],
        }));
        buf.truncate(buf.len() - 3);
        assert_eq!(decode_envelope(&buf), Err(ProtocolError::Truncated));
    }

    #[test]
    fn disconnect_reason_must_be_utf8() {
        let mut buf = encoded(&Envelope::Disconnect("ab".into()));
        let n = buf.len();
        buf[n - 1] = 0xff;
        assert_eq!(decode_envelope(&buf), Err(ProtocolError::InvalidUtf8("reason")));
    }

    #[test]
    fn version_mismatch() {
        let mut buf = encoded(&Envelope::Disconnect("x".into()));
        buf[1] = PROTOCOL_VERSION + 1;
        assert_eq!(
            decode_envelope(&buf),
            Err(ProtocolError::VersionMismatch(PROTOCOL_VERSION + 1))
        );
    }

    #[test]
    fn handshake_frames_are_not_envelopes() {
        let mut buf = Vec::new();
        encode_hello("Hello Hub", &mut buf);
        assert_eq!(
            decode_envelope(&buf),
            Err(ProtocolError::UnexpectedMessageType(WireHandshakeType::Hello as u8))
        );
        assert_eq!(decode_hello(&buf).as_deref(), Ok("Hello Hub"));
    }

    #[test]
    fn welcome_rejects_zero() {
        let mut buf = Vec::new();
        encode_welcome(PeerId(0), &mut buf);
        assert_eq!(decode_welcome(&buf), Err(ProtocolError::InvalidField("identity")));

        buf.clear();
        encode_welcome(PeerId(42), &mut buf);
        assert_eq!(decode_welcome(&buf), Ok(PeerId(42)));
    }

    #[test]
    fn unknown_type() {
        let buf = [0x7f, PROTOCOL_VERSION, 0, 0];
        assert_eq!(decode_envelope(&buf), Err(ProtocolError::UnknownMessageType(0x7f)));
        assert_eq!(decode_hello(&buf), Err(ProtocolError::UnknownMessageType(0x7f)));
    }
}
