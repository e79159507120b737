use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Capability profile of a member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemberProfile {
    pub name: String,
    pub is_admin: bool,
    pub can_login: bool,
    pub can_connect: bool,
    pub can_watch: bool,
    pub can_host: bool,
    pub can_share_media: bool,
    pub can_access_clipboard: bool,
    pub sends_inactive_cursor: bool,
    pub can_see_inactive_cursors: bool,
}

impl Default for MemberProfile {
    fn default() -> Self {
        Self {
            name: String::new(),
            is_admin: false,
            can_login: true,
            can_connect: true,
            can_watch: true,
            can_host: true,
            can_share_media: true,
            can_access_clipboard: true,
            sends_inactive_cursor: true,
            can_see_inactive_cursors: true,
        }
    }
}

/// Connection state of a session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub is_connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_since: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_connected_since: Option<DateTime<Utc>>,
    pub is_watching: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watching_since: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_watching_since: Option<DateTime<Utc>>,
}

/// Room-wide runtime settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Broadcast cursor positions of members that are not in control
    pub inactive_cursors: bool,
    /// Let a new signaling socket replace an already connected one
    pub merciful_reconnect: bool,
    /// Only admins may take control
    pub locked_controls: bool,
}

/// Partial settings update; absent fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SettingsUpdate {
    pub inactive_cursors: Option<bool>,
    pub merciful_reconnect: Option<bool>,
    pub locked_controls: Option<bool>,
}

impl SettingsUpdate {
    pub fn apply(&self, settings: &Settings) -> Settings {
        Settings {
            inactive_cursors: self.inactive_cursors.unwrap_or(settings.inactive_cursors),
            merciful_reconnect: self.merciful_reconnect.unwrap_or(settings.merciful_reconnect),
            locked_controls: self.locked_controls.unwrap_or(settings.locked_controls),
        }
    }
}

/// A single recorded cursor point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub x: i32,
    pub y: i32,
}

/// Credentials and metadata presented when a signaling socket is opened
#[derive(Debug, Clone, Default)]
pub struct AuthRequest {
    pub token: Option<String>,
    pub address: String,
    pub user_agent: String,
}
