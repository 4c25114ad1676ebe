// crates/netgame-hub/tests/concurrency_scenarios.rs
mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use common::*;
use netgame_client::ClientEvent;
use netgame_core::{Envelope, PeerId, SHUTDOWN_REASON};
use netgame_hub::{Config, Hub, HubHandler, RelayHandler};
use netgame_protocol::{HandshakeChannel, HandshakeError};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use tokio::time::timeout;

const MIB: usize = 1 << 20;

#[tokio::test]
async fn broadcasts_do_not_wait_on_a_stalled_peer() {
    let (hub, addr) = start_hub(RelayHandler).await;

    // Handshakes, then never reads again.
    let (_stalled, stalled_id) = RawPeer::handshake(&addr).await;
    wait_for_peers(&hub, &[stalled_id]).await;

    let payload = Bytes::from(vec![7u8; MIB]);
    let queued = timeout(Duration::from_secs(2), async {
        for _ in 0..64 {
            hub.send_to_all(Envelope::Data(payload.clone())).await.unwrap();
            assert_eq!(
                hub.send_to_one(stalled_id, Envelope::Data(payload.clone())).await,
                Ok(true)
            );
        }
    })
    .await;
    assert!(queued.is_ok(), "queueing for a stalled peer blocked the caller");

    // The hub keeps serving everyone else.
    let (a, mut a_rx) = join(&addr).await;
    expect_joined(&mut a_rx, a.id()).await;
    a.send(&b"ping"[..]).unwrap();
    assert_eq!(
        next_event(&mut a_rx).await,
        ClientEvent::Message {
            from: Some(a.id()),
            payload: Bytes::from_static(b"ping"),
        }
    );
    assert_eq!(hub.peer_list().await, vec![stalled_id, a.id()]);
}

/// Holds one chosen peer in extra handshake for a while after its Welcome.
struct SlowSeat {
    slow: PeerId,
    hold: Duration,
    entered: Arc<Notify>,
    admitted: UnboundedSender<PeerId>,
}

impl SlowSeat {
    fn new(slow: PeerId, hold: Duration) -> (Self, Arc<Notify>, UnboundedReceiver<PeerId>) {
        let entered = Arc::new(Notify::new());
        let (admitted, rx) = mpsc::unbounded_channel();
        let handler = SlowSeat {
            slow,
            hold,
            entered: entered.clone(),
            admitted,
        };
        (handler, entered, rx)
    }
}

#[async_trait]
impl HubHandler for SlowSeat {
    async fn peer_connected(&self, _hub: &Hub, peer: PeerId) {
        let _ = self.admitted.send(peer);
    }

    async fn extra_handshake(&self, channel: &mut HandshakeChannel<'_>) -> Result<(), HandshakeError> {
        if channel.peer() == self.slow {
            self.entered.notify_one();
            tokio::time::sleep(self.hold).await;
        }
        Ok(())
    }
}

fn drain(rx: &mut UnboundedReceiver<PeerId>) -> Vec<PeerId> {
    let mut seen = Vec::new();
    while let Ok(peer) = rx.try_recv() {
        seen.push(peer);
    }
    seen
}

#[tokio::test]
async fn shutdown_cancelling_extra_handshake_tells_the_peer() {
    let (handler, entered, mut admitted) = SlowSeat::new(PeerId(1), Duration::from_millis(500));
    let (hub, addr) = start_hub(handler).await;

    // The client side returns once it has its identity.
    let (conn, mut rx) = join(&addr).await;
    assert_eq!(conn.id(), PeerId(1));
    entered.notified().await;

    hub.shutdown().await;

    assert_eq!(
        next_event(&mut rx).await,
        ClientEvent::ServerShutdown(SHUTDOWN_REASON.to_string())
    );
    timeout(WAIT, conn.closed()).await.unwrap();
    assert_eq!(hub.peer_list().await, Vec::<PeerId>::new());

    // Give a straggling admit every chance to show up.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(hub.peer_count().await, 0);
    assert!(drain(&mut admitted).is_empty());
}

#[tokio::test]
async fn handshake_finishing_during_shutdown_grace_is_refused() {
    let config = Config {
        shutdown_grace: Duration::from_millis(1500),
        ..test_config()
    };
    let (handler, entered, mut admitted) = SlowSeat::new(PeerId(2), Duration::from_millis(300));
    let (hub, addr) = start_hub_with(config, handler).await;

    // A live peer with a backed-up socket keeps shutdown in its grace period.
    let (_stalled, stalled_id) = RawPeer::handshake(&addr).await;
    wait_for_peers(&hub, &[stalled_id]).await;
    for _ in 0..32 {
        hub.send_to_one(stalled_id, Envelope::Data(Bytes::from(vec![9u8; MIB])))
            .await
            .unwrap();
    }

    let (conn, mut rx) = join(&addr).await;
    assert_eq!(conn.id(), PeerId(2));
    entered.notified().await;

    hub.shutdown().await;

    assert_eq!(
        next_event(&mut rx).await,
        ClientEvent::ServerShutdown(SHUTDOWN_REASON.to_string())
    );
    timeout(WAIT, conn.closed()).await.unwrap();
    assert_eq!(hub.peer_count().await, 0);
    assert_eq!(drain(&mut admitted), vec![stalled_id]);
}

/// Flags any message callback that starts while another is still running.
struct OneAtATime {
    busy: AtomicBool,
    overlaps: Arc<AtomicUsize>,
    done: UnboundedSender<()>,
}

#[async_trait]
impl HubHandler for OneAtATime {
    async fn message_received(&self, _hub: &Hub, _from: PeerId, _payload: Bytes) -> anyhow::Result<()> {
        if self.busy.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.busy.store(false, Ordering::SeqCst);
        let _ = self.done.send(());
        Ok(())
    }
}

#[tokio::test]
async fn message_callbacks_never_overlap() {
    let overlaps = Arc::new(AtomicUsize::new(0));
    let (done, mut done_rx) = mpsc::unbounded_channel();
    let handler = OneAtATime {
        busy: AtomicBool::new(false),
        overlaps: overlaps.clone(),
        done,
    };
    let (_hub, addr) = start_hub(handler).await;

    let mut peers = Vec::new();
    for _ in 0..3 {
        peers.push(join(&addr).await);
    }
    for round in 0..10u8 {
        for (conn, _rx) in &peers {
            conn.send(vec![round + 1]).unwrap();
        }
    }

    for _ in 0..30 {
        timeout(WAIT, done_rx.recv())
            .await
            .expect("timed out waiting for a callback")
            .expect("handler dropped");
    }
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
}
