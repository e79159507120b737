//! Signaling sockets
//!
//! Every viewer keeps one websocket open for the lifetime of its session.
//! It carries the `{event, payload}` protocol of [`crate::events`]: WebRTC
//! negotiation, control and clipboard requests, and the broadcasts that keep
//! all viewers in sync.

mod connection;
mod handler;
mod manager;

pub use connection::{ConnectionError, WebSocketConnection};
pub use handler::MessageHandler;
pub use manager::{HandlerFn, WebSocketManager};
