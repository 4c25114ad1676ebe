//! Connection handshake.
//!
//! ```text
//! connecting side                    accepting side
//!   Hello("Hello Hub")      ──────▶   check greeting
//!                           ◀──────   Welcome(identity)
//!   extra handshake         ◀─────▶   extra handshake   (Data frames, app-defined)
//! ```
//!
//! Nothing here applies a timeout; both ends wrap the whole exchange in
//! one.

use std::io;

use bytes::Bytes;
use netgame_core::{Envelope, PeerId};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::binary_codec::{self, ProtocolError};
use crate::framed::{FrameError, FrameReader, FrameWriter};
use crate::wire_types::GREETING;

/// Why a connection never became live.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("incorrect greeting received: {0:?}")]
    BadGreeting(String),

    #[error("malformed handshake frame: {0}")]
    Malformed(#[from] ProtocolError),

    #[error("connection closed during handshake")]
    Closed,

    #[error("handshake timed out")]
    Timeout,

    #[error("unexpected {0} envelope during handshake")]
    ProtocolViolation(&'static str),

    #[error("handshake rejected: {0}")]
    Rejected(String),

    #[error("i/o error during handshake: {0}")]
    Io(#[from] io::Error),
}

impl HandshakeError {
    /// Convenience for extra-handshake implementations refusing a peer.
    pub fn rejected(reason: impl Into<String>) -> Self {
        HandshakeError::Rejected(reason.into())
    }
}

impl From<FrameError> for HandshakeError {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof => HandshakeError::Closed,
            FrameError::Io(e) => HandshakeError::Io(e),
            FrameError::Protocol(e) => HandshakeError::Malformed(e),
        }
    }
}

/// Connecting side: send the greeting and read back the assigned identity.
pub async fn send_hello<R, W>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
) -> Result<PeerId, HandshakeError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut payload = Vec::with_capacity(16);
    binary_codec::encode_hello(GREETING, &mut payload);
    writer.write_payload(&payload).await?;

    let frame = reader.read_frame().await?.ok_or(HandshakeError::Closed)?;
    Ok(binary_codec::decode_welcome(&frame)?)
}

/// Accepting side: read the greeting and check it.
pub async fn expect_hello<R>(reader: &mut FrameReader<R>) -> Result<(), HandshakeError>
where
    R: AsyncRead + Unpin,
{
    let frame = reader.read_frame().await?.ok_or(HandshakeError::Closed)?;
    let token = binary_codec::decode_hello(&frame)?;
    if token != GREETING {
        return Err(HandshakeError::BadGreeting(token));
    }
    Ok(())
}

/// Accepting side: hand the identity to the connecting side.
pub async fn send_welcome<W>(writer: &mut FrameWriter<W>, id: PeerId) -> Result<(), HandshakeError>
where
    W: AsyncWrite + Unpin,
{
    let mut payload = Vec::with_capacity(12);
    binary_codec::encode_welcome(id, &mut payload);
    writer.write_payload(&payload).await?;
    Ok(())
}

/// Both directions of a connection during its extra handshake.
///
/// Only Data envelopes travel here. A Disconnect from the other side
/// surfaces as [`HandshakeError::Rejected`].
pub struct HandshakeChannel<'a, R = OwnedReadHalf, W = OwnedWriteHalf> {
    peer: PeerId,
    reader: &'a mut FrameReader<R>,
    writer: &'a mut FrameWriter<W>,
}

impl<'a, R, W> HandshakeChannel<'a, R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(peer: PeerId, reader: &'a mut FrameReader<R>, writer: &'a mut FrameWriter<W>) -> Self {
        HandshakeChannel { peer, reader, writer }
    }

    /// Identity assigned to this connection.
    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub async fn send(&mut self, payload: Bytes) -> Result<(), HandshakeError> {
        self.writer.write_envelope(&Envelope::Data(payload)).await?;
        Ok(())
    }

    pub async fn recv(&mut self) -> Result<Bytes, HandshakeError> {
        match self.reader.read_envelope().await? {
            Some(Envelope::Data(payload)) => Ok(payload),
            Some(Envelope::Disconnect(reason)) => Err(HandshakeError::Rejected(reason)),
            Some(other) => Err(HandshakeError::ProtocolViolation(other.kind())),
            None => Err(HandshakeError::Closed),
        }
    }

    /// Tell the other side why the handshake is being abandoned.
    pub async fn reject(&mut self, reason: &str) -> Result<(), HandshakeError> {
        self.writer
            .write_envelope(&Envelope::Disconnect(reason.to_string()))
            .await?;
        Ok(())
    }
}
