//! Signaling protocol
//!
//! Every message in either direction is a `{event, payload}` envelope. The
//! event names below are shared by the signaling socket and the data channel.

pub mod types;

pub use types::*;

use std::sync::Arc;

use async_trait::async_trait;

use crate::session::Session;

pub const SYSTEM_INIT: &str = "system/init";
pub const SYSTEM_ADMIN: &str = "system/admin";
pub const SYSTEM_SETTINGS: &str = "system/settings";
pub const SYSTEM_LOGS: &str = "system/logs";
pub const SYSTEM_DISCONNECT: &str = "system/disconnect";
pub const SYSTEM_HEARTBEAT: &str = "system/heartbeat";

pub const CLIENT_HEARTBEAT: &str = "client/heartbeat";

pub const SIGNAL_REQUEST: &str = "signal/request";
pub const SIGNAL_RESTART: &str = "signal/restart";
pub const SIGNAL_OFFER: &str = "signal/offer";
pub const SIGNAL_ANSWER: &str = "signal/answer";
pub const SIGNAL_PROVIDE: &str = "signal/provide";
pub const SIGNAL_CANDIDATE: &str = "signal/candidate";
pub const SIGNAL_VIDEO: &str = "signal/video";

pub const SESSION_CREATED: &str = "session/created";
pub const SESSION_DELETED: &str = "session/deleted";
pub const SESSION_PROFILE: &str = "session/profile";
pub const SESSION_STATE: &str = "session/state";
pub const SESSION_CURSORS: &str = "session/cursors";

pub const CONTROL_HOST: &str = "control/host";
pub const CONTROL_REQUEST: &str = "control/request";
pub const CONTROL_RELEASE: &str = "control/release";

pub const CLIPBOARD_SET: &str = "clipboard/set";
pub const CLIPBOARD_UPDATED: &str = "clipboard/updated";

/// Events too chatty to log on every receipt
pub const NOLOG_EVENTS: &[&str] = &[SYSTEM_LOGS, SYSTEM_HEARTBEAT, CLIENT_HEARTBEAT, SESSION_CURSORS];

/// Dispatch target for inbound messages
///
/// Implemented by the signaling manager; the data channel routes its text
/// messages through the same path.
#[async_trait]
pub trait MessageRouter: Send + Sync {
    /// Returns false if no handler accepted the event
    async fn route(&self, session: &Arc<Session>, message: WebSocketMessage) -> bool;
}
