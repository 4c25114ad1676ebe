//! Length-prefixed framing over an async byte stream.
//!
//! Each frame on the wire is:
//!
//! ```text
//! [0..4] : payload length (u32 BE)
//! [4..]  : payload (see `binary_codec`)
//! ```
//!
//! A zero-length frame is the terminal marker: written once, best-effort,
//! to acknowledge a remote Disconnect. Readers skip it.

use std::io;

use netgame_core::Envelope;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::binary_codec::{self, ProtocolError};
use crate::wire_types::MAX_FRAME_LEN;

/// Starting size of the encoder's scratch buffer, and the size it goes
/// back to on reset.
const INITIAL_SCRATCH: usize = 256;

/// Failure while reading or writing one frame.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Reads frames from the receiving half of a connection.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        FrameReader { inner }
    }

    /// Read the next non-empty frame payload.
    ///
    /// Returns `Ok(None)` on a clean EOF between frames. EOF in the middle
    /// of a frame is an `UnexpectedEof` I/O error.
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        loop {
            let mut len_buf = [0u8; 4];
            let n = self.inner.read(&mut len_buf).await?;
            if n == 0 {
                return Ok(None);
            }
            self.inner.read_exact(&mut len_buf[n..]).await?;

            let frame_len = u32::from_be_bytes(len_buf) as usize;
            if frame_len == 0 {
                trace!("skipping terminal marker");
                continue;
            }
            if frame_len > MAX_FRAME_LEN {
                return Err(ProtocolError::FrameTooLarge(frame_len).into());
            }

            let mut frame = vec![0u8; frame_len];
            self.inner.read_exact(&mut frame).await?;
            return Ok(Some(frame));
        }
    }

    /// Read and decode the next envelope.
    pub async fn read_envelope(&mut self) -> Result<Option<Envelope>, FrameError> {
        match self.read_frame().await? {
            Some(frame) => Ok(Some(binary_codec::decode_envelope(&frame)?)),
            None => Ok(None),
        }
    }
}

/// Turns envelopes into length-prefixed frames.
///
/// Keeps one scratch buffer across frames; it grows to the largest frame
/// sent so far. [`reset`](Self::reset) gives that memory back, which is
/// what an encoder-reset directive asks for.
#[derive(Debug)]
pub struct EnvelopeEncoder {
    scratch: Vec<u8>,
    frames_since_reset: u64,
}

impl Default for EnvelopeEncoder {
    fn default() -> Self {
        EnvelopeEncoder {
            scratch: Vec::with_capacity(INITIAL_SCRATCH),
            frames_since_reset: 0,
        }
    }
}

impl EnvelopeEncoder {
    pub fn new() -> Self {
        EnvelopeEncoder::default()
    }

    /// Encode `env` as a complete frame (length prefix included).
    pub fn encode(&mut self, env: &Envelope) -> Result<&[u8], ProtocolError> {
        self.scratch.clear();
        self.scratch.extend_from_slice(&[0u8; 4]);
        binary_codec::encode_envelope(env, &mut self.scratch)?;

        let payload_len = self.scratch.len() - 4;
        if payload_len > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge(payload_len));
        }
        self.scratch[0..4].copy_from_slice(&(payload_len as u32).to_be_bytes());
        self.frames_since_reset += 1;

        Ok(&self.scratch)
    }

    /// Drop accumulated state.
    pub fn reset(&mut self) {
        trace!(
            frames = self.frames_since_reset,
            capacity = self.scratch.capacity(),
            "encoder reset"
        );
        self.scratch = Vec::with_capacity(INITIAL_SCRATCH);
        self.frames_since_reset = 0;
    }

    pub fn frames_since_reset(&self) -> u64 {
        self.frames_since_reset
    }

    pub fn retained_capacity(&self) -> usize {
        self.scratch.capacity()
    }
}

/// Writes frames to the sending half of a connection.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
    encoder: EnvelopeEncoder,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        FrameWriter {
            inner,
            encoder: EnvelopeEncoder::new(),
        }
    }

    /// Encode, write and flush one envelope.
    pub async fn write_envelope(&mut self, env: &Envelope) -> Result<(), FrameError> {
        let frame = self.encoder.encode(env)?;
        self.inner.write_all(frame).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Write and flush a raw payload (handshake frames).
    pub async fn write_payload(&mut self, payload: &[u8]) -> Result<(), FrameError> {
        if payload.len() > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge(payload.len()).into());
        }
        self.inner.write_all(&(payload.len() as u32).to_be_bytes()).await?;
        self.inner.write_all(payload).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Write the zero-length terminal marker.
    pub async fn write_terminal_marker(&mut self) -> io::Result<()> {
        self.inner.write_all(&[0u8; 4]).await?;
        self.inner.flush().await
    }

    pub fn reset_encoder(&mut self) {
        self.encoder.reset();
    }
}
