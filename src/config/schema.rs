use serde::{Deserialize, Serialize};

use crate::session::{MemberProfile, Settings};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Web server settings
    pub server: ServerConfig,
    /// Peer connection settings
    pub webrtc: WebRtcConfig,
    /// Signaling socket settings
    pub websocket: WebSocketConfig,
    /// Session registry settings
    pub session: SessionConfig,
    /// Desktop settings
    pub desktop: DesktopConfig,
    /// Capture pipeline layout
    pub capture: CaptureConfig,
}

/// Web server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub bind_address: String,
    /// HTTP port
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// WebRTC configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebRtcConfig {
    /// Run the ICE agent in lite mode
    pub ice_lite: bool,
    /// Send local candidates as they are gathered instead of waiting for gathering to complete
    pub ice_trickle: bool,
    /// ICE servers handed to both the local agent and the clients
    pub ice_servers: Vec<IceServer>,
    /// Public IPs announced as host candidates (1:1 NAT)
    pub nat1to1: Vec<String>,
    /// Lower bound of the ephemeral UDP port range (0 = any)
    pub ephemeral_min: u16,
    /// Upper bound of the ephemeral UDP port range (0 = any)
    pub ephemeral_max: u16,
    /// Shared ICE TCP listener port (0 disables)
    pub tcp_mux: u16,
    /// Shared ICE UDP socket port (0 disables)
    pub udp_mux: u16,
    /// Address the mux listeners bind to
    pub mux_address: String,
    /// mDNS mode: disabled, query_only or query_and_gather
    pub mdns_mode: String,
    /// Interval between picture loss indications on inbound video, in milliseconds
    pub pli_interval_ms: u64,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            ice_lite: false,
            ice_trickle: true,
            ice_servers: vec![IceServer {
                urls: vec!["stun:stun.l.google.com:19302".to_string()],
                username: String::new(),
                credential: String::new(),
            }],
            nat1to1: vec![],
            ephemeral_min: 0,
            ephemeral_max: 0,
            tcp_mux: 0,
            udp_mux: 0,
            mux_address: "0.0.0.0".to_string(),
            mdns_mode: "query_only".to_string(),
            pli_interval_ms: 3000,
        }
    }
}

/// ICE server entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    /// Server URLs (e.g. ["turn:turn.example.com:3478?transport=udp"])
    pub urls: Vec<String>,
    /// Username for TURN authentication
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    /// Credential for TURN authentication
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub credential: String,
}

/// Signaling socket configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Keepalive ping period in seconds
    pub ping_period_secs: u64,
    /// Inactive cursor broadcast period in milliseconds
    pub inactive_cursors_period_ms: u64,
    /// Payloads longer than this are logged as truncated
    pub max_payload_log_length: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            ping_period_secs: 10,
            inactive_cursors_period_ms: 750,
            max_payload_log_length: 10_000,
        }
    }
}

/// Session registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Grace period before a dropped signaling socket is treated as a disconnect
    pub reconnect_grace_secs: u64,
    /// Initial room settings
    pub settings: Settings,
    /// Statically configured members
    pub members: Vec<MemberConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_grace_secs: 5,
            settings: Settings::default(),
            members: vec![],
        }
    }
}

/// A configured member and its capability profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberConfig {
    pub id: String,
    pub token: String,
    #[serde(default)]
    pub profile: MemberProfile,
}

/// Desktop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DesktopConfig {
    /// Pause between the synthetic drag steps of a file drop, in milliseconds
    pub drop_delay_ms: u64,
    /// Screen width reported by the headless desktop
    pub width: u32,
    /// Screen height reported by the headless desktop
    pub height: u32,
    /// Screen rate reported by the headless desktop
    pub rate: u16,
}

impl Default for DesktopConfig {
    fn default() -> Self {
        Self {
            drop_delay_ms: 100,
            width: 1280,
            height: 720,
            rate: 30,
        }
    }
}

/// Capture pipeline layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Audio codec name (opus, g722, pcmu, pcma)
    pub audio_codec: String,
    /// Video codec name shared by every video stream (vp8, vp9, h264, av1)
    pub video_codec: String,
    /// Available video stream ids, first one is the default
    pub video_ids: Vec<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            audio_codec: "opus".to_string(),
            video_codec: "vp8".to_string(),
            video_ids: vec!["main".to_string()],
        }
    }
}
