// crates/netgame-client/src/error.rs

use std::io;

use netgame_protocol::HandshakeError;
use thiserror::Error;

/// Why `connect` failed. No connection exists afterwards.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("could not connect to {addr}: {source}")]
    Io {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("handshake with {addr} failed: {source}")]
    Handshake {
        addr: String,
        #[source]
        source: HandshakeError,
    },
}

impl ConnectError {
    pub fn handshake_error(&self) -> Option<&HandshakeError> {
        match self {
            ConnectError::Handshake { source, .. } => Some(source),
            ConnectError::Io { .. } => None,
        }
    }
}
