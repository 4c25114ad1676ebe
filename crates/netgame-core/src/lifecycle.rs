//! Connection state machine shared by both ends.
//!
//! `Connecting → Handshaking → Live → Closing → Closed`
//!
//! Every close trigger (local request, remote Disconnect, I/O error,
//! shutdown) goes through [`Lifecycle::begin_close`]; only the first one
//! wins, later ones see `false` and do nothing.

use std::sync::atomic::{AtomicU8, Ordering};

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    Connecting = 0,
    Handshaking = 1,
    Live = 2,
    Closing = 3,
    Closed = 4,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Handshaking,
            2 => ConnectionState::Live,
            3 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// Atomic holder for a [`ConnectionState`].
#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Lifecycle {
            state: AtomicU8::new(ConnectionState::Connecting as u8),
        }
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Lifecycle::default()
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn begin_handshake(&self) -> bool {
        self.transition(ConnectionState::Connecting, ConnectionState::Handshaking)
    }

    pub fn go_live(&self) -> bool {
        self.transition(ConnectionState::Handshaking, ConnectionState::Live)
    }

    /// Enter `Closing`. Returns `true` for the one caller that made the move.
    pub fn begin_close(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current >= ConnectionState::Closing as u8 {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                ConnectionState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Terminal. Both worker tasks have exited.
    pub fn finish_close(&self) {
        self.state
            .store(ConnectionState::Closed as u8, Ordering::Release);
    }

    pub fn is_live(&self) -> bool {
        self.state() == ConnectionState::Live
    }

    /// `true` once any close trigger has fired.
    pub fn is_closing(&self) -> bool {
        self.state() >= ConnectionState::Closing
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path() {
        let l = Lifecycle::new();
        assert!(l.begin_handshake());
        assert!(l.go_live());
        assert!(l.is_live());
        assert!(l.begin_close());
        l.finish_close();
        assert_eq!(l.state(), ConnectionState::Closed);
    }

    #[test]
    fn only_first_close_wins() {
        let l = Lifecycle::new();
        l.begin_handshake();
        l.go_live();
        assert!(l.begin_close());
        assert!(!l.begin_close());
        l.finish_close();
        assert!(!l.begin_close());
    }

    #[test]
    fn cannot_go_live_after_close() {
        let l = Lifecycle::new();
        l.begin_handshake();
        assert!(l.begin_close());
        assert!(!l.go_live());
        assert!(l.is_closing());
    }
}
