//! Envelope types exchanged over a peer connection.
//!
//! These are **transport-agnostic** logical messages:
//! - [`Envelope`]: everything a connection can queue for sending.
//! - [`StatusUpdate`]: the membership snapshot carried by `Envelope::Status`.
//!
//! Note: the binary encoder lives in the `netgame-protocol` crate;
//! this module is purely logical.

use bytes::Bytes;

use crate::error::SendError;
use crate::peer_id::PeerId;

/// Reason string carried by the Disconnect the hub sends while shutting down.
pub const SHUTDOWN_REASON: &str = "shutdown";

/// Reason string a client attaches when it disconnects on its own.
pub const GOODBYE_REASON: &str = "goodbye";

/// Upper bound on a single frame's payload, on both ends of a connection.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Disconnect reasons are length-prefixed with a u16.
pub const MAX_REASON_LEN: usize = u16::MAX as usize;

/// Largest application payload that may be queued.
///
/// Leaves room for the frame header and the sender id a relay adds, so
/// anything a peer may send can be forwarded unchanged.
pub const MAX_PAYLOAD_LEN: usize = MAX_FRAME_LEN - 16;

/// A unit of transmission on a connection.
///
/// The set is closed; every dispatch point matches on it exhaustively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// Opaque application payload.
    Data(Bytes),

    /// Application payload relayed by the hub on behalf of another peer.
    Forwarded { from: PeerId, payload: Bytes },

    /// Membership change, broadcast whenever a peer joins or leaves.
    Status(StatusUpdate),

    /// Graceful teardown, in either direction.
    Disconnect(String),

    /// Directive for the sending side's own encoder.
    ///
    /// Consumed by the send loop; never written to the wire and never
    /// delivered to an application.
    EncoderReset,
}

impl Envelope {
    /// Short, stable name of the variant, for logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Data(_) => "data",
            Envelope::Forwarded { .. } => "forwarded",
            Envelope::Status(_) => "status",
            Envelope::Disconnect(_) => "disconnect",
            Envelope::EncoderReset => "encoder-reset",
        }
    }

    pub fn is_disconnect(&self) -> bool {
        matches!(self, Envelope::Disconnect(_))
    }

    /// Validate an envelope handed in by an application before queueing it.
    ///
    /// Anything that could not be encoded is refused here, so a bad send
    /// never reaches a send loop. Status envelopes are built by the hub
    /// from its own membership table and are refused too.
    pub fn check_sendable(&self) -> Result<(), SendError> {
        match self {
            Envelope::Data(payload) | Envelope::Forwarded { payload, .. } => {
                if payload.is_empty() {
                    Err(SendError::EmptyPayload)
                } else if payload.len() > MAX_PAYLOAD_LEN {
                    Err(SendError::TooLarge {
                        len: payload.len(),
                        max: MAX_PAYLOAD_LEN,
                    })
                } else {
                    Ok(())
                }
            }
            Envelope::Disconnect(reason) if reason.len() > MAX_REASON_LEN => {
                Err(SendError::TooLarge {
                    len: reason.len(),
                    max: MAX_REASON_LEN,
                })
            }
            Envelope::Status(_) => Err(SendError::NotSendable(self.kind())),
            Envelope::Disconnect(_) | Envelope::EncoderReset => Ok(()),
        }
    }
}

/// Point-in-time membership snapshot.
///
/// `peers` is the full list of live identities *after* the change to
/// `peer` was applied, in ascending order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    /// The peer that connected or disconnected.
    pub peer: PeerId,

    /// `true` if `peer` just joined, `false` if it just left.
    pub connecting: bool,

    /// Live identities after the change.
    pub peers: Vec<PeerId>,
}

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The remote side sent a Disconnect with this reason.
    Remote(String),

    /// This side asked for the close (for example `disconnect_peer`).
    Local(String),

    /// I/O failure, protocol violation or internal task failure.
    Error(String),
}

impl CloseReason {
    pub fn is_error(&self) -> bool {
        matches!(self, CloseReason::Error(_))
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::Remote(r) => write!(f, "remote disconnect: {}", r),
            CloseReason::Local(r) => write!(f, "local disconnect: {}", r),
            CloseReason::Error(e) => write!(f, "error: {}", e),
        }
    }
}
