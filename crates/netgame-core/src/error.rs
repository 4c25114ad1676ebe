//! Error types for the application-facing send path.
//!
//! Sending never touches the socket directly: these errors are decided
//! locally, before anything is queued, so a failed send never reaches
//! the wire.

use thiserror::Error;

/// Rejected send.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// Empty application payloads carry nothing and are refused.
    #[error("cannot send an empty payload")]
    EmptyPayload,

    /// The connection is closing or already closed.
    #[error("message cannot be sent because the connection is closed")]
    ConnectionClosed,

    /// Payload or reason longer than a frame can carry.
    #[error("{len} bytes exceeds the limit of {max}")]
    TooLarge { len: usize, max: usize },

    /// The envelope kind is reserved (e.g. `status`, which only the hub builds).
    #[error("{0} envelopes cannot be sent by an application")]
    NotSendable(&'static str),
}
