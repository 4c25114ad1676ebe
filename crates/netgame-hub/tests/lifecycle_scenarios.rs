// crates/netgame-hub/tests/lifecycle_scenarios.rs
mod common;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use common::*;
use netgame_client::{
    ChannelHandler, ClientConfig, ClientEvent, ClientHandler, ConnectError, PeerConnection,
};
use netgame_core::{PeerId, SHUTDOWN_REASON};
use netgame_hub::{Config, HubError, HubHandler, ListenerStatus, RelayHandler};
use netgame_protocol::{HandshakeChannel, HandshakeError};
use tokio::net::TcpStream;

#[tokio::test]
async fn shutdown_disconnects_everyone_and_stops_listening() {
    let (hub, addr) = start_hub(RelayHandler).await;
    let (a, mut a_rx) = join(&addr).await;
    let (b, mut b_rx) = join(&addr).await;
    expect_joined(&mut a_rx, b.id()).await;
    expect_joined(&mut b_rx, b.id()).await;

    hub.shutdown().await;

    assert_eq!(
        next_event(&mut a_rx).await,
        ClientEvent::ServerShutdown(SHUTDOWN_REASON.to_string())
    );
    assert_eq!(
        next_event(&mut b_rx).await,
        ClientEvent::ServerShutdown(SHUTDOWN_REASON.to_string())
    );
    a.closed().await;
    b.closed().await;

    assert!(TcpStream::connect(&addr).await.is_err());
    assert_eq!(hub.peer_count().await, 0);
    assert!(hub.is_shutting_down());

    // Second call is a no-op.
    hub.shutdown().await;
    assert!(matches!(
        hub.restart_listening("127.0.0.1:0").await,
        Err(HubError::ShutDown)
    ));
}

#[tokio::test]
async fn stop_and_restart_listening() {
    let (hub, addr) = start_hub(RelayHandler).await;
    let (a, mut a_rx) = join(&addr).await;
    expect_joined(&mut a_rx, a.id()).await;

    hub.stop_listening().await;
    assert!(matches!(hub.listener_status(), ListenerStatus::Stopped));
    assert!(TcpStream::connect(&addr).await.is_err());

    // Live peers are untouched.
    a.send(&b"still here"[..]).unwrap();
    assert_eq!(
        next_event(&mut a_rx).await,
        ClientEvent::Message {
            from: Some(a.id()),
            payload: Bytes::from_static(b"still here"),
        }
    );

    let new_addr = hub.restart_listening("127.0.0.1:0").await.unwrap();
    assert_eq!(hub.local_addr(), Some(new_addr));
    assert!(matches!(
        hub.restart_listening("127.0.0.1:0").await,
        Err(HubError::AlreadyListening(_))
    ));

    let (b, _b_rx) = join(&new_addr.to_string()).await;
    assert_eq!(b.id(), PeerId(2));
    assert_eq!(expect_joined(&mut a_rx, b.id()).await, vec![a.id(), b.id()]);
}

#[tokio::test]
async fn max_peers_turns_away_extra_connections() {
    let config = Config {
        max_peers: 1,
        ..test_config()
    };
    let (hub, addr) = start_hub_with(config, RelayHandler).await;

    let (a, mut a_rx) = join(&addr).await;
    expect_joined(&mut a_rx, a.id()).await;

    let (handler, _rx) = ChannelHandler::new();
    let err = PeerConnection::connect(&ClientConfig::new(addr.clone()), handler)
        .await
        .unwrap_err();
    assert!(err.handshake_error().is_some(), "got {:?}", err);

    a.disconnect();
    a.closed().await;
    wait_for_peers(&hub, &[]).await;

    let (b, _b_rx) = join(&addr).await;
    assert_eq!(b.id(), PeerId(2));
}

#[tokio::test]
async fn silent_socket_is_dropped_after_handshake_timeout() {
    let config = Config {
        handshake_timeout: Duration::from_millis(200),
        ..test_config()
    };
    let (_hub, addr) = start_hub_with(config, RelayHandler).await;

    let mut raw = RawPeer::open(&addr).await;
    assert_eq!(raw.next().await, None);

    let (a, _a_rx) = join(&addr).await;
    assert_eq!(a.id(), PeerId(1));
}

/// Hub side of a two-step seat assignment.
struct SeatHub;

#[async_trait]
impl HubHandler for SeatHub {
    async fn extra_handshake(&self, channel: &mut HandshakeChannel<'_>) -> Result<(), HandshakeError> {
        channel.send(Bytes::from(format!("seat {}", channel.peer().get()))).await?;
        let reply = channel.recv().await?;
        if reply.as_ref() != b"sit" {
            channel.reject("bad reply").await?;
            return Err(HandshakeError::rejected("bad reply"));
        }
        Ok(())
    }
}

/// Hub that turns everyone away after assigning an identity.
struct FullTable;

#[async_trait]
impl HubHandler for FullTable {
    async fn extra_handshake(&self, channel: &mut HandshakeChannel<'_>) -> Result<(), HandshakeError> {
        channel.reject("table full").await?;
        Err(HandshakeError::rejected("table full"))
    }
}

struct SeatClient {
    reply: &'static str,
}

#[async_trait]
impl ClientHandler for SeatClient {
    async fn message_received(&self, _conn: &PeerConnection, _from: Option<PeerId>, _payload: Bytes) {}

    async fn extra_handshake(&self, channel: &mut HandshakeChannel<'_>) -> Result<(), HandshakeError> {
        let offer = channel.recv().await?;
        assert_eq!(offer, Bytes::from(format!("seat {}", channel.peer().get())));
        channel.send(Bytes::from_static(self.reply.as_bytes())).await
    }
}

#[tokio::test]
async fn extra_handshake_exchange_admits_peer() {
    let (hub, addr) = start_hub(SeatHub).await;

    let conn = PeerConnection::connect(&ClientConfig::new(addr.clone()), SeatClient { reply: "sit" })
        .await
        .unwrap();
    wait_for_peers(&hub, &[conn.id()]).await;
}

#[tokio::test]
async fn failed_extra_handshake_is_never_admitted() {
    let (hub, addr) = start_hub(SeatHub).await;

    // The client finishes its side and returns, then the hub rejects it.
    let conn = PeerConnection::connect(&ClientConfig::new(addr.clone()), SeatClient { reply: "stand" })
        .await
        .unwrap();
    conn.closed().await;
    assert_eq!(hub.peer_count().await, 0);

    // The burned identity is not handed out again.
    let good = PeerConnection::connect(&ClientConfig::new(addr), SeatClient { reply: "sit" })
        .await
        .unwrap();
    assert_eq!(good.id(), PeerId(2));
}

#[tokio::test]
async fn rejection_surfaces_in_client_handshake() {
    let (hub, addr) = start_hub(FullTable).await;

    struct WaitForWord;

    #[async_trait]
    impl ClientHandler for WaitForWord {
        async fn message_received(&self, _conn: &PeerConnection, _from: Option<PeerId>, _payload: Bytes) {}

        async fn extra_handshake(&self, channel: &mut HandshakeChannel<'_>) -> Result<(), HandshakeError> {
            channel.recv().await.map(|_| ())
        }
    }

    let err = PeerConnection::connect(&ClientConfig::new(addr), WaitForWord)
        .await
        .unwrap_err();
    match err {
        ConnectError::Handshake { source: HandshakeError::Rejected(reason), .. } => {
            assert_eq!(reason, "table full");
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(hub.peer_count().await, 0);
}

#[tokio::test]
async fn output_resets_do_not_disturb_traffic() {
    let (hub, addr) = start_hub(RelayHandler).await;
    let (a, mut a_rx) = join(&addr).await;
    expect_joined(&mut a_rx, a.id()).await;

    for round in 0..3u8 {
        match round {
            0 => {
                hub.reset_output().await;
                a.reset_output();
            }
            1 => {
                hub.set_autoreset(true);
                a.set_autoreset(true);
            }
            _ => {
                hub.set_autoreset(false);
                a.set_autoreset(false);
            }
        }
        a.send(vec![b'r', b'0' + round]).unwrap();
        assert_eq!(
            next_event(&mut a_rx).await,
            ClientEvent::Message {
                from: Some(a.id()),
                payload: Bytes::from(vec![b'r', b'0' + round]),
            }
        );
    }
    assert!(!hub.autoreset());
}
