// crates/netgame-client/src/connection.rs

use std::fmt;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::FutureExt;
use netgame_core::{
    ConnectionState, Envelope, Lifecycle, OutboundQueue, Outgoing, PeerId, SendError, StatusUpdate,
    GOODBYE_REASON,
};
use netgame_protocol::handshake::{self, HandshakeChannel, HandshakeError};
use netgame_protocol::{FrameReader, FrameWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::error::ConnectError;
use crate::handler::ClientHandler;

struct Shared {
    id: PeerId,
    server_addr: SocketAddr,
    outbound: OutboundQueue,
    lifecycle: Lifecycle,
    cancel: CancellationToken,
    finished: CancellationToken,
    autoreset: AtomicBool,
    peers: watch::Sender<Vec<PeerId>>,
    handler: Arc<dyn ClientHandler>,
}

impl Shared {
    fn close(&self) {
        self.outbound.close();
        self.cancel.cancel();
    }
}

/// A live connection to a hub.
///
/// Cheap to clone; every clone drives the same connection.
#[derive(Clone)]
pub struct PeerConnection {
    shared: Arc<Shared>,
}

impl fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerConnection")
            .field("id", &self.shared.id)
            .field("server_addr", &self.shared.server_addr)
            .field("state", &self.shared.lifecycle.state())
            .finish()
    }
}

impl PeerConnection {
    /// Open a connection and run the handshake.
    ///
    /// Returns once the hub has assigned an identity and the handler's
    /// extra handshake succeeded.
    pub async fn connect<H>(config: &ClientConfig, handler: H) -> Result<PeerConnection, ConnectError>
    where
        H: ClientHandler,
    {
        let handler: Arc<dyn ClientHandler> = Arc::new(handler);
        let addr = config.server_addr.clone();

        info!(%addr, "connecting to hub");
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| ConnectError::Io { addr: addr.clone(), source })?;
        stream
            .set_nodelay(true)
            .map_err(|source| ConnectError::Io { addr: addr.clone(), source })?;
        let server_addr = stream
            .peer_addr()
            .map_err(|source| ConnectError::Io { addr: addr.clone(), source })?;

        let (read_stream, write_stream) = stream.into_split();
        let mut reader = FrameReader::new(read_stream);
        let mut writer = FrameWriter::new(write_stream);

        let lifecycle = Lifecycle::new();
        lifecycle.begin_handshake();

        let id = tokio::time::timeout(
            config.handshake_timeout(),
            run_handshake(handler.as_ref(), &mut reader, &mut writer),
        )
        .await
        .unwrap_or(Err(HandshakeError::Timeout))
        .map_err(|source| ConnectError::Handshake { addr: addr.clone(), source })?;

        lifecycle.go_live();
        info!(peer = %id, %server_addr, "connected to hub");

        let (peers, _) = watch::channel(Vec::new());
        let conn = PeerConnection {
            shared: Arc::new(Shared {
                id,
                server_addr,
                outbound: OutboundQueue::new(),
                lifecycle,
                cancel: CancellationToken::new(),
                finished: CancellationToken::new(),
                autoreset: AtomicBool::new(config.autoreset),
                peers,
                handler,
            }),
        };

        tokio::spawn(run_connection(conn.clone(), reader, writer));
        Ok(conn)
    }

    /// Identity the hub assigned to this connection.
    pub fn id(&self) -> PeerId {
        self.shared.id
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.shared.server_addr
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lifecycle.state()
    }

    /// Live peers as of the last status update, ascending.
    pub fn peers(&self) -> Vec<PeerId> {
        self.shared.peers.borrow().clone()
    }

    /// Watch the peer list change.
    pub fn subscribe_peers(&self) -> watch::Receiver<Vec<PeerId>> {
        self.shared.peers.subscribe()
    }

    /// Queue an application payload for the hub.
    pub fn send(&self, payload: impl Into<Bytes>) -> Result<(), SendError> {
        let envelope = Envelope::Data(payload.into());
        envelope.check_sendable()?;
        if self.shared.lifecycle.is_closing() || !self.shared.outbound.push(envelope) {
            return Err(SendError::ConnectionClosed);
        }
        Ok(())
    }

    /// Leave the hub. Anything still queued is dropped.
    pub fn disconnect(&self) {
        if self.shared.lifecycle.is_closing() {
            return;
        }
        debug!(peer = %self.shared.id, "disconnecting");
        self.shared
            .outbound
            .push(Envelope::Disconnect(GOODBYE_REASON.to_string()));
    }

    /// Drop the encoder's retained state before the next frame.
    pub fn reset_output(&self) {
        self.shared.outbound.push(Envelope::EncoderReset);
    }

    pub fn set_autoreset(&self, enabled: bool) {
        self.shared.autoreset.store(enabled, Ordering::Relaxed);
    }

    pub fn autoreset(&self) -> bool {
        self.shared.autoreset.load(Ordering::Relaxed)
    }

    /// Tear the connection down without telling the hub.
    pub fn close(&self) {
        self.shared.lifecycle.begin_close();
        self.shared.close();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lifecycle.is_closing()
    }

    /// Resolves once both worker tasks have exited.
    pub async fn closed(&self) {
        self.shared.finished.cancelled().await;
    }
}

async fn run_handshake(
    handler: &dyn ClientHandler,
    reader: &mut FrameReader<OwnedReadHalf>,
    writer: &mut FrameWriter<OwnedWriteHalf>,
) -> Result<PeerId, HandshakeError> {
    let id = handshake::send_hello(reader, writer).await?;
    let mut channel = HandshakeChannel::new(id, reader, writer);
    handler.extra_handshake(&mut channel).await?;
    Ok(id)
}

async fn run_connection(
    conn: PeerConnection,
    reader: FrameReader<OwnedReadHalf>,
    mut writer: FrameWriter<OwnedWriteHalf>,
) {
    let receiver = tokio::spawn(receive_task(conn.clone(), reader));

    let sent = AssertUnwindSafe(send_loop(&conn, &mut writer))
        .catch_unwind()
        .await;
    if sent.is_err() {
        close_with_error(&conn, "internal error: send task panicked".to_string()).await;
    }

    conn.shared.close();
    drop(writer);
    if let Err(e) = receiver.await {
        debug!(peer = %conn.shared.id, error = %e, "receive task did not exit cleanly");
    }
    conn.shared.lifecycle.finish_close();
    conn.shared.finished.cancel();
    debug!(peer = %conn.shared.id, "connection finished");
}

/// Mark the connection closed and tell the handler, once.
async fn close_with_error(conn: &PeerConnection, message: String) {
    let first = conn.shared.lifecycle.begin_close();
    conn.shared.close();
    if first {
        warn!(peer = %conn.shared.id, %message, "connection closed by error");
        conn.shared
            .handler
            .connection_closed_by_error(conn, &message)
            .await;
    }
}

async fn send_loop(conn: &PeerConnection, writer: &mut FrameWriter<OwnedWriteHalf>) {
    let shared = &conn.shared;
    loop {
        let next = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => return,
            next = shared.outbound.pop() => next,
        };

        let envelope = match next {
            None => return,
            Some(Outgoing::Goodbye) => {
                if let Err(e) = writer.write_terminal_marker().await {
                    debug!(peer = %shared.id, error = %e, "could not acknowledge disconnect");
                }
                return;
            }
            Some(Outgoing::Envelope(Envelope::EncoderReset)) => {
                writer.reset_encoder();
                continue;
            }
            Some(Outgoing::Envelope(envelope)) => envelope,
        };

        if conn.autoreset() {
            writer.reset_encoder();
        }

        let written = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => return,
            written = writer.write_envelope(&envelope) => written,
        };

        if let Err(e) = written {
            if !shared.lifecycle.is_closing() {
                close_with_error(conn, format!("error while sending data to hub: {}", e)).await;
            }
            return;
        }

        if envelope.is_disconnect() {
            shared.lifecycle.begin_close();
            return;
        }
    }
}

async fn receive_task(conn: PeerConnection, reader: FrameReader<OwnedReadHalf>) {
    let received = AssertUnwindSafe(receive_loop(&conn, reader))
        .catch_unwind()
        .await;
    if received.is_err() {
        close_with_error(&conn, "internal error: receive task panicked".to_string()).await;
    }
}

async fn receive_loop(conn: &PeerConnection, mut reader: FrameReader<OwnedReadHalf>) {
    let shared = &conn.shared;
    loop {
        let next = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => return,
            next = reader.read_envelope() => next,
        };

        let envelope = match next {
            Ok(Some(envelope)) => envelope,
            Ok(None) => {
                if !shared.lifecycle.is_closing() {
                    close_with_error(conn, "connection closed by hub without disconnect".to_string())
                        .await;
                }
                return;
            }
            Err(e) => {
                if !shared.lifecycle.is_closing() {
                    close_with_error(conn, format!("error while reading data from hub: {}", e)).await;
                }
                return;
            }
        };

        match envelope {
            Envelope::Data(payload) => {
                deliver(conn, shared.handler.message_received(conn, None, payload)).await;
            }
            Envelope::Forwarded { from, payload } => {
                deliver(conn, shared.handler.message_received(conn, Some(from), payload)).await;
            }
            Envelope::Status(update) => apply_status(conn, update).await,
            Envelope::Disconnect(reason) => {
                if shared.lifecycle.begin_close() {
                    shared.outbound.push_goodbye();
                    info!(peer = %shared.id, %reason, "hub closed the connection");
                    deliver(conn, shared.handler.server_shutdown(conn, &reason)).await;
                }
                return;
            }
            Envelope::EncoderReset => {
                close_with_error(conn, "protocol violation: hub sent an encoder-reset envelope".to_string())
                    .await;
                return;
            }
        }
    }
}

async fn apply_status(conn: &PeerConnection, update: StatusUpdate) {
    let StatusUpdate { peer, connecting, peers } = update;
    debug!(peer = %conn.shared.id, subject = %peer, connecting, count = peers.len(), "status update");
    conn.shared.peers.send_replace(peers);

    let handler = &conn.shared.handler;
    if connecting {
        deliver(conn, handler.peer_connected(conn, peer)).await;
    } else {
        deliver(conn, handler.peer_disconnected(conn, peer)).await;
    }
}

/// Run one handler hook. A panicking hook is logged and the connection carries on.
async fn deliver<F>(conn: &PeerConnection, hook: F)
where
    F: std::future::Future<Output = ()>,
{
    if AssertUnwindSafe(hook).catch_unwind().await.is_err() {
        error!(peer = %conn.shared.id, "handler panicked while handling received message");
    }
}
