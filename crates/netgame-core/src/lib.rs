//! netgame-core
//!
//! Pure broker logic, shared by the hub and the client:
//! - envelopes (the unit of transmission) and membership snapshots
//! - peer identities
//! - the live-peer table with its identity counter
//! - per-connection outbound queues
//! - the connection lifecycle state machine

pub mod peer_id;
pub mod envelope;
pub mod membership;
pub mod outbound;
pub mod lifecycle;
pub mod error;

pub use peer_id::PeerId;

pub use envelope::{
    CloseReason,
    Envelope,
    StatusUpdate,
    GOODBYE_REASON,
    MAX_FRAME_LEN,
    MAX_PAYLOAD_LEN,
    MAX_REASON_LEN,
    SHUTDOWN_REASON,
};

pub use membership::Membership;
pub use outbound::{OutboundQueue, Outgoing};
pub use lifecycle::{ConnectionState, Lifecycle};
pub use error::SendError;
