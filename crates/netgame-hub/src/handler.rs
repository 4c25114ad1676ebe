//! Application hooks.
//!
//! The hub itself only knows about identities and envelopes. Whatever
//! sits on top (a card table, a chat room) implements [`HubHandler`].
//!
//! `message_received`, `peer_connected` and `peer_disconnected` all run
//! on the single dispatch task: at most one of them is executing at any
//! time, and they see events in one total order. `extra_handshake` runs
//! on the connecting peer's own task, before the peer is admitted.

use async_trait::async_trait;
use bytes::Bytes;
use netgame_core::{CloseReason, Envelope, PeerId};
use netgame_protocol::{HandshakeChannel, HandshakeError};

use crate::server::Hub;

#[async_trait]
pub trait HubHandler: Send + Sync + 'static {
    /// A Data envelope arrived from `from`.
    ///
    /// The default relays it to every live peer as a Forwarded envelope.
    /// Errors are logged; they never stop the dispatch task.
    async fn message_received(&self, hub: &Hub, from: PeerId, payload: Bytes) -> anyhow::Result<()> {
        hub.send_to_all(Envelope::Forwarded { from, payload }).await?;
        Ok(())
    }

    /// `peer` was admitted. Every live peer (including `peer`) has already
    /// been sent the Status envelope for it.
    async fn peer_connected(&self, _hub: &Hub, _peer: PeerId) {}

    /// `peer` left, gracefully or with an error.
    async fn peer_disconnected(&self, _hub: &Hub, _peer: PeerId, _reason: &CloseReason) {}

    /// Extra checks or setup before admission. An error aborts the
    /// connection: no Status broadcast, no `peer_connected`.
    async fn extra_handshake(&self, _channel: &mut HandshakeChannel<'_>) -> Result<(), HandshakeError> {
        Ok(())
    }
}

/// Relays every message to everyone. All hooks use the defaults.
#[derive(Debug, Default, Clone, Copy)]
pub struct RelayHandler;

impl HubHandler for RelayHandler {}
