//! TCP listener and top-level hub wiring.
//!
//! This module:
//! - Listens on the configured address/port.
//! - Accepts new TCP connections and hands each to its own task.
//! - Owns the registry of live peers and is the only code that changes it.
//! - Fans envelopes out to one peer or all of them.
//! - Runs a single dispatch task that feeds the application handler.
//!
//! The per-connection logic and the dispatch loop live in `connection`
//! and `dispatch_task` respectively.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use netgame_core::{CloseReason, Envelope, Membership, PeerId, SendError, SHUTDOWN_REASON};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::connection;
use crate::dispatch_task;
use crate::error::HubError;
use crate::handler::HubHandler;
use crate::types::{
    ConnectionHandle, DispatchEvent, DispatchRx, DispatchTx, ListenerStatus, PeerRegistry,
};

/// Handle to a running hub. Cloning is cheap; all clones drive the same hub.
#[derive(Clone)]
pub struct Hub {
    shared: Arc<HubShared>,
}

struct HubShared {
    config: Config,
    registry: PeerRegistry,
    handler: Arc<dyn HubHandler>,
    dispatch_tx: DispatchTx,
    autoreset: AtomicBool,

    /// Set (under the registry write lock) once `shutdown` starts.
    shutting_down: AtomicBool,

    /// Parent of every connection's token; cancelled last in `shutdown`.
    shutdown_token: CancellationToken,

    listener: Mutex<Option<ListenerTask>>,
    listener_status: watch::Sender<ListenerStatus>,
}

struct ListenerTask {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl Hub {
    /// Bind the configured address and start accepting peers.
    pub async fn start<H: HubHandler>(config: Config, handler: H) -> Result<Hub, HubError> {
        let (dispatch_tx, dispatch_rx): (DispatchTx, DispatchRx) = mpsc::unbounded_channel();
        let (listener_status, _) = watch::channel(ListenerStatus::Stopped);

        let hub = Hub {
            shared: Arc::new(HubShared {
                autoreset: AtomicBool::new(config.autoreset),
                config,
                registry: PeerRegistry::new(Membership::new()),
                handler: Arc::new(handler),
                dispatch_tx,
                shutting_down: AtomicBool::new(false),
                shutdown_token: CancellationToken::new(),
                listener: Mutex::new(None),
                listener_status,
            }),
        };

        let addr = hub.shared.config.socket_addr_string();
        hub.restart_listening(&addr).await?;

        // Spawn the central dispatch task.
        {
            let hub_clone = hub.clone();
            let shutdown = hub.shared.shutdown_token.clone();
            tokio::spawn(async move {
                dispatch_task::run_dispatch_loop(hub_clone, dispatch_rx, shutdown).await;
            });
        }

        Ok(hub)
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Address the listener is bound to, if it is listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.shared.listener_status.borrow() {
            ListenerStatus::Listening(addr) => Some(*addr),
            _ => None,
        }
    }

    pub fn listener_status(&self) -> ListenerStatus {
        self.shared.listener_status.borrow().clone()
    }

    /// Resolves if the accept loop dies with an error.
    pub async fn listener_failed(&self) -> HubError {
        let mut rx = self.shared.listener_status.subscribe();
        loop {
            if let ListenerStatus::Failed(msg) = &*rx.borrow_and_update() {
                return HubError::Listener(msg.clone());
            }
            if rx.changed().await.is_err() {
                // Sender lives in `HubShared`, which `self` keeps alive.
                std::future::pending::<()>().await;
            }
        }
    }

    // -------------------------------------------------------------------------
    // Fan-out
    // -------------------------------------------------------------------------

    /// Queue `envelope` for one peer.
    ///
    /// `Ok(false)` if no live peer has that identity. Never waits on the
    /// peer's socket.
    pub async fn send_to_one(&self, peer: PeerId, envelope: Envelope) -> Result<bool, SendError> {
        envelope.check_sendable()?;
        let registry = self.shared.registry.read().await;
        Ok(match registry.get(peer) {
            Some(conn) => conn.send(envelope),
            None => false,
        })
    }

    /// Queue `envelope` for every peer live at the time of the call.
    pub async fn send_to_all(&self, envelope: Envelope) -> Result<(), SendError> {
        envelope.check_sendable()?;
        let registry = self.shared.registry.read().await;
        for conn in registry.values() {
            conn.send(envelope.clone());
        }
        Ok(())
    }

    /// Identities of the live peers, ascending.
    pub async fn peer_list(&self) -> Vec<PeerId> {
        self.shared.registry.read().await.peer_list()
    }

    pub async fn peer_count(&self) -> usize {
        self.shared.registry.read().await.len()
    }

    /// Gracefully close one peer: it is sent a Disconnect with `reason`,
    /// then removed like any other departing peer.
    ///
    /// `Ok(false)` if no live peer has that identity.
    pub async fn disconnect_peer(&self, peer: PeerId, reason: &str) -> Result<bool, SendError> {
        let envelope = Envelope::Disconnect(reason.to_string());
        envelope.check_sendable()?;
        let registry = self.shared.registry.read().await;
        Ok(match registry.get(peer) {
            Some(conn) => conn.send(envelope),
            None => false,
        })
    }

    /// Ask every connection's send loop to reset its encoder.
    pub async fn reset_output(&self) {
        let registry = self.shared.registry.read().await;
        for conn in registry.values() {
            conn.send(Envelope::EncoderReset);
        }
    }

    pub fn set_autoreset(&self, auto: bool) {
        self.shared.autoreset.store(auto, Ordering::Relaxed);
    }

    pub fn autoreset(&self) -> bool {
        self.shared.autoreset.load(Ordering::Relaxed)
    }

    // -------------------------------------------------------------------------
    // Listener control
    // -------------------------------------------------------------------------

    /// Stop accepting new connections. Live peers are not affected.
    ///
    /// Returns once the listening socket is closed.
    pub async fn stop_listening(&self) {
        let current = self.shared.listener.lock().await.take();
        if let Some(ListenerTask { stop, task }) = current {
            stop.cancel();
            if let Err(e) = task.await {
                error!(error = %e, "listener task did not exit cleanly");
            }
        }
    }

    /// Start listening again, on `addr`.
    ///
    /// Fails if the hub is still listening or has been shut down.
    pub async fn restart_listening(&self, addr: &str) -> Result<SocketAddr, HubError> {
        if self.is_shutting_down() {
            return Err(HubError::ShutDown);
        }

        let mut slot = self.shared.listener.lock().await;
        if let Some(current) = slot.as_ref() {
            if !current.task.is_finished() {
                if let ListenerStatus::Listening(addr) = self.listener_status() {
                    return Err(HubError::AlreadyListening(addr));
                }
            }
        }

        let listener = TcpListener::bind(addr).await.map_err(|source| HubError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        let local = listener.local_addr().map_err(|source| HubError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        info!(addr = %local, "listening for peer connections");

        let stop = CancellationToken::new();
        self.shared
            .listener_status
            .send_replace(ListenerStatus::Listening(local));
        let task = tokio::spawn(run_listener(self.clone(), listener, stop.clone()));
        *slot = Some(ListenerTask { stop, task });

        Ok(local)
    }

    // -------------------------------------------------------------------------
    // Shutdown
    // -------------------------------------------------------------------------

    pub fn is_shutting_down(&self) -> bool {
        self.shared.shutting_down.load(Ordering::Acquire)
    }

    /// Stop listening, send Disconnect("shutdown") to every live peer, wait
    /// up to the grace period for those to go out, then force-close
    /// whatever is left.
    ///
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) {
        self.stop_listening().await;

        let pending: Vec<ConnectionHandle> = {
            let registry = self.shared.registry.write().await;
            if self.shared.shutting_down.swap(true, Ordering::AcqRel) {
                return;
            }
            let disconnect = Envelope::Disconnect(SHUTDOWN_REASON.to_string());
            registry
                .values()
                .filter(|conn| conn.send(disconnect.clone()))
                .cloned()
                .collect()
        };
        info!(peers = pending.len(), "hub shutting down");

        let flushed = join_all(pending.iter().map(|conn| conn.closed()));
        if tokio::time::timeout(self.shared.config.shutdown_grace, flushed)
            .await
            .is_err()
        {
            warn!("shutdown grace period elapsed; force-closing remaining connections");
        }

        let remaining = self.shared.registry.write().await.drain();
        for (peer, conn) in remaining {
            debug!(%peer, "force-closing connection");
            conn.lifecycle().begin_close();
            conn.close();
        }

        // Reaches connections still handshaking and the dispatch task.
        self.shared.shutdown_token.cancel();
        info!("hub shut down");
    }

    // -------------------------------------------------------------------------
    // Registry mutations (crate-internal)
    // -------------------------------------------------------------------------

    pub(crate) fn handler(&self) -> &dyn HubHandler {
        self.shared.handler.as_ref()
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.shared.shutdown_token
    }

    /// Reserve the next identity. Happens before extra handshake, so an
    /// identity may be burned by a peer that is never admitted.
    pub(crate) async fn allocate_id(&self) -> PeerId {
        self.shared.registry.write().await.allocate_id()
    }

    /// Make a handshaken connection live and tell everyone, itself included.
    ///
    /// Returns `false` if shutdown has already begun; the caller must then
    /// close the connection itself.
    pub(crate) async fn admit(&self, conn: ConnectionHandle) -> bool {
        let mut registry = self.shared.registry.write().await;
        if self.is_shutting_down() {
            return false;
        }

        let peer = conn.id();
        let addr = conn.addr();
        let status = Envelope::Status(registry.admit(peer, conn));
        for live in registry.values() {
            live.send(status.clone());
        }
        let _ = self.shared.dispatch_tx.send(DispatchEvent::PeerConnected(peer));

        info!(%peer, %addr, peers = registry.len(), "connection accepted");
        true
    }

    /// Take a peer out of the live set, broadcast the change and notify
    /// the application. A peer that is already gone is ignored.
    pub(crate) async fn remove(&self, peer: PeerId, reason: CloseReason) -> bool {
        let mut registry = self.shared.registry.write().await;
        let Some((_, status)) = registry.remove(peer) else {
            return false;
        };

        let status = Envelope::Status(status);
        for live in registry.values() {
            live.send(status.clone());
        }

        info!(%peer, %reason, peers = registry.len(), "connection closed");
        let _ = self
            .shared
            .dispatch_tx
            .send(DispatchEvent::PeerDisconnected(peer, reason));
        true
    }

    /// Queue an inbound application message for the dispatch task.
    pub(crate) fn dispatch(&self, event: DispatchEvent) {
        if self.shared.dispatch_tx.send(event).is_err() {
            debug!("dispatch queue closed; dropping inbound message");
        }
    }

    /// Error-close path: runs at most once per connection.
    pub(crate) async fn close_with_error(&self, conn: &ConnectionHandle, message: String) {
        if conn.lifecycle().begin_close() {
            warn!(peer = %conn.id(), error = %message, "connection closed by error");
            self.remove(conn.id(), CloseReason::Error(message)).await;
        }
        conn.close();
    }
}

/// Accept loop. Exits quietly when `stop` fires; any accept error before
/// that is fatal for the listener.
async fn run_listener(hub: Hub, listener: TcpListener, stop: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = stop.cancelled() => {
                info!("listener socket has shut down");
                hub.shared.listener_status.send_replace(ListenerStatus::Stopped);
                return;
            }
            accepted = listener.accept() => accepted,
        };

        let (stream, peer_addr) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "listener socket has been shut down by error");
                hub.shared
                    .listener_status
                    .send_replace(ListenerStatus::Failed(e.to_string()));
                return;
            }
        };

        let live = hub.peer_count().await;
        if live >= hub.shared.config.max_peers {
            warn!(
                addr = %peer_addr,
                max_peers = hub.shared.config.max_peers,
                "rejecting connection: max_peers reached"
            );
            // Just drop the stream; the peer sees the connection closed.
            continue;
        }

        debug!(addr = %peer_addr, "accepted socket");
        tokio::spawn(connection::run_connection(hub.clone(), stream, peer_addr));
    }
}
