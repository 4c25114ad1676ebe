//! Low-level wire types and constants.
//!
//! This module defines:
//! - Message type IDs for envelopes and handshake frames.
//! - Protocol versioning.
//! - Limits applied while framing and decoding.
//!
//! The actual encode/decode logic lives in `binary_codec`.

/// Current protocol version.
///
/// Bump this if the framing or any body layout changes incompatibly.
pub const PROTOCOL_VERSION: u8 = 1;

/// Every payload starts with `[type, version, reserved, reserved]`.
pub const HEADER_LEN: usize = 4;

/// Literal greeting the connecting side writes first.
pub const GREETING: &str = "Hello Hub";

/// Frame and reason limits. A peer announcing a longer frame is treated
/// as a protocol violation instead of allocating whatever it asked for.
pub use netgame_core::{MAX_FRAME_LEN, MAX_PAYLOAD_LEN, MAX_REASON_LEN};

/// Steady-state envelope types.
///
/// `EncoderReset` has no entry: it never leaves the sending side.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WireEnvelopeType {
    /// Opaque application bytes.
    Data = 0x01,

    /// Application bytes relayed by the hub, tagged with the sender.
    Forwarded = 0x02,

    /// Membership snapshot.
    Status = 0x03,

    /// Graceful teardown with a reason string.
    Disconnect = 0x04,
}

impl WireEnvelopeType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x01 => Some(WireEnvelopeType::Data),
            0x02 => Some(WireEnvelopeType::Forwarded),
            0x03 => Some(WireEnvelopeType::Status),
            0x04 => Some(WireEnvelopeType::Disconnect),
            _ => None,
        }
    }
}

/// Handshake frame types, only valid before a connection is live.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WireHandshakeType {
    /// Connecting side → accepting side: greeting token.
    Hello = 0x20,

    /// Accepting side → connecting side: assigned identity.
    Welcome = 0x21,
}

impl WireHandshakeType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x20 => Some(WireHandshakeType::Hello),
            0x21 => Some(WireHandshakeType::Welcome),
            _ => None,
        }
    }
}
