//! Front-end WebSocket layer
//!
//! - `protocol`: inbound/outbound envelopes
//! - `registry`: connection → held backend link (writer leases)
//! - `broadcast`: commit fan-out to every connection
//! - `session`: per-connection dispatch
//! - `handler`: the socket loop tying them together

mod broadcast;
mod handler;
pub mod protocol;
mod registry;
mod session;

pub use broadcast::Broadcaster;
pub use handler::handle_connection;
pub use protocol::{Notification, ServerMessage};
pub use registry::SessionRegistry;
#[cfg(test)]
pub use registry::SessionId;
