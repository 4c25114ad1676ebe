use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Errors surfaced by hub control operations.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("server is already listening for connections on {0}")]
    AlreadyListening(SocketAddr),

    /// The accept loop died while it was supposed to be listening.
    #[error("listener failed: {0}")]
    Listener(String),

    #[error("hub has been shut down")]
    ShutDown,
}
