// crates/netgame-hub/tests/common/mod.rs
#![allow(dead_code)]

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use netgame_client::{ChannelHandler, ClientConfig, ClientEvent, PeerConnection};
use netgame_core::{CloseReason, Envelope, PeerId};
use netgame_hub::{Config, Hub, HubHandler};
use netgame_protocol::handshake;
use netgame_protocol::{FrameReader, FrameWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::timeout;

pub const WAIT: Duration = Duration::from_secs(5);

pub fn test_config() -> Config {
    Config {
        bind_addr: "127.0.0.1".to_string(),
        port: 0,
        handshake_timeout: Duration::from_secs(2),
        shutdown_grace: Duration::from_millis(500),
        ..Config::default()
    }
}

pub async fn start_hub<H: HubHandler>(handler: H) -> (Hub, String) {
    start_hub_with(test_config(), handler).await
}

pub async fn start_hub_with<H: HubHandler>(config: Config, handler: H) -> (Hub, String) {
    let hub = Hub::start(config, handler).await.expect("hub should start");
    let addr = hub.local_addr().expect("hub should be listening").to_string();
    (hub, addr)
}

pub async fn join(addr: &str) -> (PeerConnection, UnboundedReceiver<ClientEvent>) {
    let (handler, rx) = ChannelHandler::new();
    let conn = PeerConnection::connect(&ClientConfig::new(addr), handler)
        .await
        .expect("peer should connect");
    (conn, rx)
}

pub async fn next_event(rx: &mut UnboundedReceiver<ClientEvent>) -> ClientEvent {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for client event")
        .expect("client handler dropped")
}

/// Wait until `peer` shows up as joined, skipping earlier joins.
pub async fn expect_joined(rx: &mut UnboundedReceiver<ClientEvent>, peer: PeerId) -> Vec<PeerId> {
    loop {
        match next_event(rx).await {
            ClientEvent::PeerConnected { peer: p, peers } if p == peer => return peers,
            ClientEvent::PeerConnected { .. } => continue,
            other => panic!("expected {} to join, got {:?}", peer, other),
        }
    }
}

/// Give in-flight traffic a moment, then assert nothing arrived.
pub async fn expect_quiet(rx: &mut UnboundedReceiver<ClientEvent>) {
    tokio::time::sleep(Duration::from_millis(200)).await;
    if let Ok(event) = rx.try_recv() {
        panic!("unexpected client event {:?}", event);
    }
}

/// Poll the hub until its peer list matches.
pub async fn wait_for_peers(hub: &Hub, expected: &[PeerId]) {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let peers = hub.peer_list().await;
        if peers == expected {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("hub peers {:?}, expected {:?}", peers, expected);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// A peer driven frame by frame, without the client library.
pub struct RawPeer {
    pub reader: FrameReader<OwnedReadHalf>,
    pub writer: FrameWriter<OwnedWriteHalf>,
}

impl RawPeer {
    pub async fn open(addr: &str) -> RawPeer {
        let stream = TcpStream::connect(addr).await.expect("raw connect");
        let (r, w) = stream.into_split();
        RawPeer {
            reader: FrameReader::new(r),
            writer: FrameWriter::new(w),
        }
    }

    pub async fn handshake(addr: &str) -> (RawPeer, PeerId) {
        let mut peer = RawPeer::open(addr).await;
        let id = handshake::send_hello(&mut peer.reader, &mut peer.writer)
            .await
            .expect("raw handshake");
        (peer, id)
    }

    pub async fn next(&mut self) -> Option<Envelope> {
        timeout(WAIT, self.reader.read_envelope())
            .await
            .expect("timed out waiting for envelope")
            .ok()
            .flatten()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    Connected(PeerId),
    Disconnected(PeerId, CloseReason),
    Message(PeerId, Bytes),
}

/// Records every hook call and relays messages like the default handler.
pub struct RecordingHandler {
    tx: UnboundedSender<HubEvent>,
}

impl RecordingHandler {
    pub fn new() -> (Self, UnboundedReceiver<HubEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (RecordingHandler { tx }, rx)
    }
}

#[async_trait]
impl HubHandler for RecordingHandler {
    async fn message_received(&self, hub: &Hub, from: PeerId, payload: Bytes) -> anyhow::Result<()> {
        let _ = self.tx.send(HubEvent::Message(from, payload.clone()));
        hub.send_to_all(Envelope::Forwarded { from, payload }).await?;
        Ok(())
    }

    async fn peer_connected(&self, _hub: &Hub, peer: PeerId) {
        let _ = self.tx.send(HubEvent::Connected(peer));
    }

    async fn peer_disconnected(&self, _hub: &Hub, peer: PeerId, reason: &CloseReason) {
        let _ = self.tx.send(HubEvent::Disconnected(peer, reason.clone()));
    }
}

pub async fn next_hub_event(rx: &mut UnboundedReceiver<HubEvent>) -> HubEvent {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for hub event")
        .expect("hub handler dropped")
}
