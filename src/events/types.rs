//! Message payloads

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::capture::BroadcastStatus;
use crate::config::IceServer;
use crate::desktop::ScreenSize;
use crate::session::{Cursor, MemberProfile, SessionState, Settings};

/// `{event, payload}` envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketMessage {
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl WebSocketMessage {
    pub fn new(event: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }

    /// Decode the payload into a typed message
    pub fn parse<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(self.payload.clone())
    }
}

// ============================================================================
// System
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInit {
    pub session_id: String,
    pub control_host: ControlHost,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screen_size: Option<ScreenSize>,
    pub sessions: BTreeMap<String, SessionData>,
    pub settings: Settings,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemAdmin {
    pub screen_sizes_list: Vec<ScreenSize>,
    pub broadcast_status: BroadcastStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemDisconnect {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSettingsUpdate {
    /// Session that changed the settings
    pub id: String,
    pub settings: Settings,
}

/// A log line forwarded by a client
#[derive(Debug, Clone, Deserialize)]
pub struct SystemLog {
    #[serde(default)]
    pub level: String,
    pub message: String,
    #[serde(default)]
    pub fields: Option<serde_json::Value>,
}

// ============================================================================
// Sessions
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionId {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionData {
    pub id: String,
    pub profile: MemberProfile,
    pub state: SessionState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionProfile {
    pub id: String,
    pub profile: MemberProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStateUpdate {
    pub id: String,
    pub state: SessionState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCursors {
    pub id: String,
    pub cursors: Vec<Cursor>,
}

// ============================================================================
// Control & clipboard
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlHost {
    /// Session that caused the change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub has_host: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipboardData {
    pub text: String,
}

// ============================================================================
// Signaling
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SignalRequest {
    pub video: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalProvide {
    pub sdp: String,
    pub iceservers: Vec<IceServer>,
    pub video: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalDescription {
    pub sdp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalVideo {
    pub video: String,
}
