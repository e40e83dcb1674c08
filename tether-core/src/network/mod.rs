//! Framed Unix-socket channel: one server, one client, token handshake.

pub mod client;
pub mod handshake;
pub mod server;

pub use client::{ClientEvent, ClientEvents, SocketClient};
pub use handshake::{HandshakeToken, TOKEN_LENGTH};
pub use server::{ServerEvent, ServerEvents, SocketServer};
