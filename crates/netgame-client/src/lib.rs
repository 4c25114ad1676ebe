//! netgame-client
//!
//! Peer side of a hub connection. [`PeerConnection::connect`] performs the
//! handshake and returns once the hub has assigned an identity; from then
//! on a send task and a receive task run in the background and report to
//! a [`ClientHandler`].

pub mod config;
pub mod connection;
pub mod error;
pub mod handler;

pub use config::{ClientConfig, ConfigError};
pub use connection::PeerConnection;
pub use error::ConnectError;
pub use handler::{ChannelHandler, ClientEvent, ClientHandler};

pub use netgame_core::{PeerId, SendError};
