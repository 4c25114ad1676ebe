//! netgame-protocol
//!
//! Wire-level encoding/decoding for hub connections.
//!
//! This crate turns logical envelopes (`netgame_core::Envelope`) into
//! bytes on a stream and back again, and runs the handshake that comes
//! before them.
//!
//! - [`wire_types`]   : type ids, version, limits
//! - [`binary_codec`] : one message ↔ one payload buffer
//! - [`framed`]       : length-prefixed frames over an async stream
//! - [`handshake`]    : greeting, identity assignment, extra-handshake channel

pub mod wire_types;
pub mod binary_codec;
pub mod framed;
pub mod handshake;

pub use binary_codec::{
    ProtocolError,
    decode_envelope,
    encode_envelope,
};

pub use framed::{EnvelopeEncoder, FrameError, FrameReader, FrameWriter};
pub use handshake::{HandshakeChannel, HandshakeError};
pub use wire_types::{GREETING, MAX_FRAME_LEN, PROTOCOL_VERSION};
