//! netgame-hub
//!
//! Multi-peer async TCP message hub.
//!
//! Peers connect, say hello, get a numeric identity and then exchange
//! envelopes through the hub. The hub keeps the membership list, tells
//! every peer whenever someone joins or leaves, and hands inbound
//! messages to an application [`HubHandler`] one at a time.

pub mod config;
pub mod error;
pub mod handler;
pub mod server;
pub mod types;

// these are internal modules, not re-exported
mod connection;
mod dispatch_task;

pub use config::{Config, ConfigError};
pub use error::HubError;
pub use handler::{HubHandler, RelayHandler};
pub use server::Hub;
pub use types::{DispatchEvent, ListenerStatus};
