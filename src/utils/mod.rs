//! Shared helpers

pub mod listeners;
pub mod net;
pub mod throttle;

pub use listeners::{ListenerId, Listeners};
pub use net::{bind_tcp_listener, bind_udp_socket};
pub use throttle::{LogThrottler, SEND_WARN_INTERVAL};
