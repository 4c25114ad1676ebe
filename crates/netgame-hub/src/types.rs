//! Shared types for the hub.
//!
//! This module defines:
//! - `DispatchEvent`: everything the application callback is told about
//! - channel aliases between connection tasks and the dispatch task
//! - `PeerRegistry`: the live-peer table behind its lock
//! - `ListenerStatus`: what the accept loop is doing

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use netgame_core::{CloseReason, Membership, PeerId};
use tokio::sync::{mpsc, RwLock};

use crate::connection::Connection;

/// Cheap, cloneable reference to a live connection.
pub(crate) type ConnectionHandle = Arc<Connection>;

/// Registry of admitted peers and the identity counter.
///
/// The lock is the serialization boundary for every membership change:
/// admit and remove take it for writing, broadcasts and lookups for
/// reading.
pub(crate) type PeerRegistry = RwLock<Membership<ConnectionHandle>>;

/// Event flowing from connection tasks into the dispatch task.
///
/// Membership events are queued while the registry write lock is held,
/// so their order on the queue matches the order of the mutations.
#[derive(Debug)]
pub enum DispatchEvent {
    PeerConnected(PeerId),
    PeerDisconnected(PeerId, CloseReason),
    Message { from: PeerId, payload: Bytes },
}

impl DispatchEvent {
    pub fn peer(&self) -> PeerId {
        match self {
            DispatchEvent::PeerConnected(p) | DispatchEvent::PeerDisconnected(p, _) => *p,
            DispatchEvent::Message { from, .. } => *from,
        }
    }
}

/// Channel from connection tasks → dispatch task.
pub type DispatchTx = mpsc::UnboundedSender<DispatchEvent>;
pub type DispatchRx = mpsc::UnboundedReceiver<DispatchEvent>;

/// State of the accept loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerStatus {
    Listening(SocketAddr),
    Stopped,
    /// Accept failed while the hub still wanted to listen.
    Failed(String),
}
