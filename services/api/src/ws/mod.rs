//! WebSocket Session Management
//!
//! - `protocol`: the JSON message format between browser and server.
//! - `session`: the connection lifecycle, from `init` handshake to close.

pub mod protocol;
pub mod session;

pub use session::ws_handler;
