//! Application hooks on the client side.
//!
//! Hooks run directly on the connection's receive task, one at a time,
//! in the order the hub sent the corresponding envelopes.

use async_trait::async_trait;
use bytes::Bytes;
use netgame_core::PeerId;
use netgame_protocol::{HandshakeChannel, HandshakeError};
use tokio::sync::mpsc;

use crate::connection::PeerConnection;

#[async_trait]
pub trait ClientHandler: Send + Sync + 'static {
    /// Application payload from the hub. `from` is set when the hub
    /// relayed another peer's message.
    async fn message_received(&self, conn: &PeerConnection, from: Option<PeerId>, payload: Bytes);

    /// Someone joined. `conn.peers()` already reflects the change.
    async fn peer_connected(&self, _conn: &PeerConnection, _peer: PeerId) {}

    /// Someone left. `conn.peers()` already reflects the change.
    async fn peer_disconnected(&self, _conn: &PeerConnection, _peer: PeerId) {}

    /// The connection died from an I/O or protocol error. Called at most once.
    async fn connection_closed_by_error(&self, _conn: &PeerConnection, _message: &str) {}

    /// The hub sent a Disconnect. `reason` is `"shutdown"` when the hub is
    /// shutting down normally.
    async fn server_shutdown(&self, _conn: &PeerConnection, _reason: &str) {}

    /// Extra checks or setup after the identity is assigned. An error
    /// aborts `connect`.
    async fn extra_handshake(&self, _channel: &mut HandshakeChannel<'_>) -> Result<(), HandshakeError> {
        Ok(())
    }
}

/// Everything a [`ChannelHandler`] forwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Message { from: Option<PeerId>, payload: Bytes },
    PeerConnected { peer: PeerId, peers: Vec<PeerId> },
    PeerDisconnected { peer: PeerId, peers: Vec<PeerId> },
    ClosedByError(String),
    ServerShutdown(String),
}

/// Handler that turns every hook into a [`ClientEvent`] on a channel.
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl ChannelHandler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelHandler { tx }, rx)
    }

    fn emit(&self, event: ClientEvent) {
        // Receiver gone means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}

#[async_trait]
impl ClientHandler for ChannelHandler {
    async fn message_received(&self, _conn: &PeerConnection, from: Option<PeerId>, payload: Bytes) {
        self.emit(ClientEvent::Message { from, payload });
    }

    async fn peer_connected(&self, conn: &PeerConnection, peer: PeerId) {
        self.emit(ClientEvent::PeerConnected {
            peer,
            peers: conn.peers(),
        });
    }

    async fn peer_disconnected(&self, conn: &PeerConnection, peer: PeerId) {
        self.emit(ClientEvent::PeerDisconnected {
            peer,
            peers: conn.peers(),
        });
    }

    async fn connection_closed_by_error(&self, _conn: &PeerConnection, message: &str) {
        self.emit(ClientEvent::ClosedByError(message.to_string()));
    }

    async fn server_shutdown(&self, _conn: &PeerConnection, reason: &str) {
        self.emit(ClientEvent::ServerShutdown(reason.to_string()));
    }
}
