use std::fmt;

/// Identity of a connected peer.
///
/// Assigned by the hub at handshake time, starting at 1 and counting up.
/// An identity is never handed out twice by the same hub process, even
/// after the peer that held it has gone away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(pub u64);

impl PeerId {
    /// The first identity a fresh hub hands out.
    pub const FIRST: PeerId = PeerId(1);

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for PeerId {
    fn from(v: u64) -> Self {
        PeerId(v)
    }
}
