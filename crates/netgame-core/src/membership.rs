//! Live-peer table.
//!
//! Owns the two pieces of shared state every hub has to serialize:
//! - the next-identity counter,
//! - the map of live peers, keyed by identity.
//!
//! The table itself is plain data; callers put it behind whatever lock
//! forms their serialization boundary. Every mutation returns the
//! [`StatusUpdate`] snapshot to broadcast, built while the table is in
//! exactly the state the snapshot describes.

use std::collections::BTreeMap;

use crate::envelope::StatusUpdate;
use crate::peer_id::PeerId;

/// Identity counter plus the set of admitted peers.
///
/// `T` is whatever the caller keeps per peer (on the hub, a handle to
/// the connection's outbound queue).
#[derive(Debug)]
pub struct Membership<T> {
    live: BTreeMap<PeerId, T>,

    /// Next identity to hand out. Only ever grows.
    next_id: u64,
}

impl<T> Default for Membership<T> {
    fn default() -> Self {
        Membership {
            live: BTreeMap::new(),
            next_id: PeerId::FIRST.0,
        }
    }
}

impl<T> Membership<T> {
    pub fn new() -> Self {
        Membership::default()
    }

    /// Reserve the next identity.
    ///
    /// Reserved identities are consumed even if the peer never gets
    /// admitted (e.g. its extra handshake fails).
    pub fn allocate_id(&mut self) -> PeerId {
        let id = PeerId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Insert an admitted peer and return the `connecting = true` snapshot.
    ///
    /// `id` must come from [`allocate_id`](Self::allocate_id) and must not
    /// be live already; a duplicate replaces the old entry.
    pub fn admit(&mut self, id: PeerId, value: T) -> StatusUpdate {
        debug_assert!(id.0 < self.next_id, "identity {} was never allocated", id);
        self.live.insert(id, value);
        StatusUpdate {
            peer: id,
            connecting: true,
            peers: self.peer_list(),
        }
    }

    /// Remove a live peer.
    ///
    /// Returns `None` if `id` is not live, which makes a second removal of
    /// the same peer a no-op.
    pub fn remove(&mut self, id: PeerId) -> Option<(T, StatusUpdate)> {
        let value = self.live.remove(&id)?;
        let status = StatusUpdate {
            peer: id,
            connecting: false,
            peers: self.peer_list(),
        };
        Some((value, status))
    }

    pub fn get(&self, id: PeerId) -> Option<&T> {
        self.live.get(&id)
    }

    /// Live identities in ascending order.
    pub fn peer_list(&self) -> Vec<PeerId> {
        self.live.keys().copied().collect()
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.live.values()
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Take every live peer out of the table without producing snapshots.
    ///
    /// Used on shutdown, when nobody is left to tell. The counter is kept.
    pub fn drain(&mut self) -> Vec<(PeerId, T)> {
        std::mem::take(&mut self.live).into_iter().collect()
    }
}
