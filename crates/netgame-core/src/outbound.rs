//! Per-connection outgoing queue.
//!
//! Many producers (the hub's fan-out, the application, the receive task)
//! push; exactly one consumer (the connection's send loop) pops. Pushing
//! never waits on the socket.
//!
//! The queue is unbounded. A stalled peer grows its own queue.
//!
//! Two things make this more than a plain channel:
//! - queueing a Disconnect drops everything still waiting, so the
//!   Disconnect is the next frame out;
//! - the receive task can swap the whole queue for a terminal marker
//!   when the remote side disconnects first.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::envelope::Envelope;

/// What the send loop takes off the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Envelope(Envelope),

    /// Best-effort acknowledgement of a remote Disconnect. Always the last item.
    Goodbye,
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<Outgoing>,
    closed: bool,
}

/// Multiple-producer, single-consumer outgoing queue.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl OutboundQueue {
    pub fn new() -> Self {
        OutboundQueue::default()
    }

    /// Queue an envelope.
    ///
    /// Returns `false` (and queues nothing) once the queue is closed.
    pub fn push(&self, envelope: Envelope) -> bool {
        {
            let mut state = self.lock();
            if state.closed {
                return false;
            }
            if envelope.is_disconnect() {
                state.items.clear();
            }
            state.items.push_back(Outgoing::Envelope(envelope));
        }
        self.notify.notify_one();
        true
    }

    /// Replace whatever is pending with the terminal marker and refuse
    /// further pushes. The consumer still receives the marker.
    pub fn push_goodbye(&self) {
        {
            let mut state = self.lock();
            state.items.clear();
            state.items.push_back(Outgoing::Goodbye);
            state.closed = true;
        }
        self.notify.notify_one();
    }

    /// Drop everything pending and refuse further pushes.
    pub fn close(&self) {
        {
            let mut state = self.lock();
            state.items.clear();
            state.closed = true;
        }
        self.notify.notify_one();
    }

    /// Wait for the next item. `None` once the queue is closed and empty.
    pub async fn pop(&self) -> Option<Outgoing> {
        loop {
            {
                let mut state = self.lock();
                if let Some(item) = state.items.pop_front() {
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }
            // A push between the unlock above and this await leaves a
            // permit behind, so the wakeup is not lost.
            self.notify.notified().await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // No critical section can panic mid-mutation.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
