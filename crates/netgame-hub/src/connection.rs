// crates/netgame-hub/src/connection.rs

//! Broker side of one peer connection.
//!
//! The task spawned per accepted socket:
//! 1. runs the handshake (greeting, identity, extra handshake),
//! 2. gets the connection admitted to the registry,
//! 3. spawns the receive task,
//! 4. becomes the send task until the connection closes.

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use netgame_core::{
    CloseReason, Envelope, Lifecycle, OutboundQueue, Outgoing, PeerId, SHUTDOWN_REASON,
};
use netgame_protocol::handshake::{self, HandshakeChannel, HandshakeError};
use netgame_protocol::{FrameReader, FrameWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, info, warn};

use crate::server::Hub;
use crate::types::{ConnectionHandle, DispatchEvent};

/// One admitted peer, as the registry sees it.
#[derive(Debug)]
pub struct Connection {
    id: PeerId,
    addr: SocketAddr,
    outbound: OutboundQueue,
    lifecycle: Lifecycle,
    cancel: CancellationToken,
}

impl Connection {
    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub(crate) fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Queue an envelope. `false` if the connection is already closing.
    pub(crate) fn send(&self, envelope: Envelope) -> bool {
        if self.lifecycle.is_closing() {
            return false;
        }
        self.outbound.push(envelope)
    }

    /// Stop both worker tasks. Idempotent.
    pub(crate) fn close(&self) {
        self.outbound.close();
        self.cancel.cancel();
    }

    /// Resolves once `close` has been called.
    pub(crate) fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }
}

/// Run a freshly accepted socket from handshake to close.
pub(crate) async fn run_connection(hub: Hub, stream: TcpStream, addr: SocketAddr) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%addr, error = %e, "could not set TCP_NODELAY");
    }

    let (read_stream, write_stream) = stream.into_split();
    let mut reader = FrameReader::new(read_stream);
    let mut writer = FrameWriter::new(write_stream);

    let lifecycle = Lifecycle::new();
    lifecycle.begin_handshake();
    let cancel = hub.shutdown_token().child_token();

    let timeout = hub.config().handshake_timeout;
    let mut welcomed = false;
    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        outcome = tokio::time::timeout(
            timeout,
            run_handshake(&hub, &mut reader, &mut writer, &mut welcomed),
        ) => Some(outcome.unwrap_or(Err(HandshakeError::Timeout))),
    };

    let id = match outcome {
        None => {
            debug!(%addr, welcomed, "hub shut down during handshake");
            // The peer already holds an identity and may think it is live.
            if welcomed {
                refuse_after_shutdown(&hub, &mut writer).await;
            }
            return;
        }
        Some(Ok(id)) => id,
        Some(Err(e)) => {
            // Never admitted: no identity is live, nobody is told.
            warn!(%addr, error = %e, "error while setting up connection");
            return;
        }
    };

    lifecycle.go_live();
    let conn: ConnectionHandle = std::sync::Arc::new(Connection {
        id,
        addr,
        outbound: OutboundQueue::new(),
        lifecycle,
        cancel,
    });

    if !hub.admit(conn.clone()).await {
        // Shutdown started while this peer was handshaking.
        refuse_after_shutdown(&hub, &mut writer).await;
        conn.lifecycle.begin_close();
        conn.close();
        conn.lifecycle.finish_close();
        return;
    }

    let receiver = tokio::spawn(receive_task(hub.clone(), conn.clone(), reader));

    let sent = AssertUnwindSafe(send_loop(&hub, &conn, &mut writer))
        .catch_unwind()
        .await;
    if sent.is_err() {
        hub.close_with_error(&conn, "internal error: send task panicked".to_string())
            .await;
    }

    conn.close();
    drop(writer);
    if let Err(e) = receiver.await {
        debug!(peer = %conn.id, error = %e, "receive task did not exit cleanly");
    }
    conn.lifecycle.finish_close();
    debug!(peer = %conn.id, "connection finished");
}

/// Greeting, identity assignment, then the application's extra step.
///
/// `welcomed` is set once the identity has gone out.
async fn run_handshake(
    hub: &Hub,
    reader: &mut FrameReader<OwnedReadHalf>,
    writer: &mut FrameWriter<OwnedWriteHalf>,
    welcomed: &mut bool,
) -> Result<PeerId, HandshakeError> {
    handshake::expect_hello(reader).await?;

    let id = hub.allocate_id().await;
    handshake::send_welcome(writer, id).await?;
    *welcomed = true;

    let mut channel = HandshakeChannel::new(id, reader, writer);
    hub.handler().extra_handshake(&mut channel).await?;

    Ok(id)
}

/// Tell a peer that never made it into the registry that the hub is going away.
async fn refuse_after_shutdown(hub: &Hub, writer: &mut FrameWriter<OwnedWriteHalf>) {
    let disconnect = Envelope::Disconnect(SHUTDOWN_REASON.to_string());
    let grace = hub.config().shutdown_grace;
    match tokio::time::timeout(grace, writer.write_envelope(&disconnect)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "could not send shutdown disconnect"),
        Err(_) => debug!("timed out sending shutdown disconnect"),
    }
}

/// Drain the outbound queue onto the socket.
async fn send_loop(hub: &Hub, conn: &ConnectionHandle, writer: &mut FrameWriter<OwnedWriteHalf>) {
    loop {
        let next = tokio::select! {
            biased;
            _ = conn.cancel.cancelled() => return,
            next = conn.outbound.pop() => next,
        };

        let envelope = match next {
            None => return,
            Some(Outgoing::Goodbye) => {
                if let Err(e) = writer.write_terminal_marker().await {
                    debug!(peer = %conn.id, error = %e, "could not acknowledge disconnect");
                }
                return;
            }
            Some(Outgoing::Envelope(Envelope::EncoderReset)) => {
                writer.reset_encoder();
                continue;
            }
            Some(Outgoing::Envelope(envelope)) => envelope,
        };

        if hub.autoreset() {
            writer.reset_encoder();
        }

        let written = tokio::select! {
            biased;
            _ = conn.cancel.cancelled() => return,
            written = writer.write_envelope(&envelope) => written,
        };

        if let Err(e) = written {
            if !conn.lifecycle.is_closing() {
                hub.close_with_error(conn, format!("error while sending data to peer: {}", e))
                    .await;
            }
            return;
        }

        if let Envelope::Disconnect(reason) = envelope {
            if conn.lifecycle.begin_close() && !hub.is_shutting_down() {
                hub.remove(conn.id, CloseReason::Local(reason)).await;
            }
            return;
        }
    }
}

async fn receive_task(hub: Hub, conn: ConnectionHandle, reader: FrameReader<OwnedReadHalf>) {
    let received = AssertUnwindSafe(receive_loop(&hub, &conn, reader))
        .catch_unwind()
        .await;
    if received.is_err() {
        hub.close_with_error(&conn, "internal error: receive task panicked".to_string())
            .await;
    }
}

/// Read envelopes until the connection closes.
async fn receive_loop(hub: &Hub, conn: &ConnectionHandle, mut reader: FrameReader<OwnedReadHalf>) {
    loop {
        let next = tokio::select! {
            biased;
            _ = conn.cancel.cancelled() => return,
            next = reader.read_envelope() => next,
        };

        match next {
            Ok(Some(Envelope::Data(_))) if conn.lifecycle.is_closing() => {
                // Already removed; the application must not hear from it again.
                return;
            }
            Ok(Some(Envelope::Data(payload))) => {
                hub.dispatch(DispatchEvent::Message {
                    from: conn.id,
                    payload,
                });
            }
            Ok(Some(Envelope::Disconnect(reason))) => {
                if conn.lifecycle.begin_close() {
                    conn.outbound.push_goodbye();
                    info!(peer = %conn.id, %reason, "peer sent disconnect");
                    hub.remove(conn.id, CloseReason::Remote(reason)).await;
                }
                return;
            }
            Ok(Some(other)) => {
                // Status and Forwarded only ever flow hub → peer.
                hub.close_with_error(
                    conn,
                    format!("protocol violation: peer sent a {} envelope", other.kind()),
                )
                .await;
                return;
            }
            Ok(None) => {
                if !conn.lifecycle.is_closing() {
                    hub.close_with_error(conn, "connection closed by peer without disconnect".to_string())
                        .await;
                }
                return;
            }
            Err(e) => {
                if !conn.lifecycle.is_closing() {
                    hub.close_with_error(conn, format!("error while reading data from peer: {}", e))
                        .await;
                }
                return;
            }
        }
    }
}
