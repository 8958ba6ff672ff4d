//! TCP chat relay.
//!
//! Every client that connects is asked for a display name, added to a shared
//! registry, and from then on anything it sends is rebroadcast to everyone
//! else as `[name] text`. There is no framing: each read on the server is one
//! message.
//!
//! - [`registry`] owns the set of connected clients behind a single lock.
//! - [`broadcast`] fans a payload out to every member but the sender,
//!   skipping targets whose write fails.
//! - [`session`] drives one connection through handshake, relay and leave.
//! - [`server`] accepts connections and spawns a session task for each.
//! - [`client`] is the terminal client; [`cli`] parses both modes.
//! - [`message`] builds the text lines seen on the wire.

pub mod broadcast;
pub mod cli;
pub mod client;
pub mod config;
pub mod message;
pub mod registry;
pub mod server;
pub mod session;

pub use broadcast::{Broadcaster, Delivery};
pub use config::RelayConfig;
pub use registry::{ConnectionHandle, ConnectionId, Registry, RegistryError};
pub use server::Server;
