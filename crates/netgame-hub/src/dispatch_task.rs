//! Central dispatch loop.
//!
//! This task owns the only path into the application handler. Every
//! connection's receive task, and every membership change, feeds the same
//! queue; the handler sees one event at a time, in queue order.
//!
//! A failing or panicking handler call is logged and the loop moves on to
//! the next event.

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, trace, warn};

use crate::server::Hub;
use crate::types::{DispatchEvent, DispatchRx};

/// Run the dispatch loop until `shutdown` fires or every sender is gone.
pub(crate) async fn run_dispatch_loop(hub: Hub, mut dispatch_rx: DispatchRx, shutdown: CancellationToken) {
    loop {
        let event = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            event = dispatch_rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let peer = event.peer();
        trace!(%peer, ?event, "dispatching");

        match AssertUnwindSafe(deliver(&hub, event)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(%peer, error = %e, "exception while handling received message");
            }
            Err(_) => {
                error!(%peer, "handler panicked while handling received message");
            }
        }
    }

    trace!("dispatch loop shutting down");
}

/// Route a single event to the matching handler hook.
async fn deliver(hub: &Hub, event: DispatchEvent) -> anyhow::Result<()> {
    let handler = hub.handler();
    match event {
        DispatchEvent::Message { from, payload } => {
            handler.message_received(hub, from, payload).await?;
        }
        DispatchEvent::PeerConnected(peer) => {
            handler.peer_connected(hub, peer).await;
        }
        DispatchEvent::PeerDisconnected(peer, reason) => {
            handler.peer_disconnected(hub, peer, &reason).await;
        }
    }
    Ok(())
}
