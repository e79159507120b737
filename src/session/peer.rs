//! Transport handles a session holds on to
//!
//! The session registry only needs to send, replace and tear down these
//! handles, so it talks to them through traits. The concrete types live in
//! the `websocket` and `webrtc` modules.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::webrtc::signaling::IceCandidate;

/// Signaling socket of one viewer
pub trait WebSocketPeer: Send + Sync {
    fn id(&self) -> Uuid;

    /// Queue a `{event, payload}` message
    fn send(&self, event: &str, payload: serde_json::Value) -> Result<()>;

    /// Send a final disconnect message carrying `reason`, then close
    fn destroy(&self, reason: &str);
}

/// Media connection of one viewer
#[async_trait]
pub trait WebRtcPeer: Send + Sync {
    fn id(&self) -> Uuid;

    /// Create and apply a local offer, returning its SDP
    async fn create_offer(&self, ice_restart: bool) -> Result<String>;

    /// Create and apply a local answer, returning its SDP
    async fn create_answer(&self) -> Result<String>;

    async fn set_offer(&self, sdp: String) -> Result<()>;

    async fn set_answer(&self, sdp: String) -> Result<()>;

    async fn set_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Switch the outbound video track to another stream
    fn set_video_id(&self, video_id: &str) -> Result<()>;

    fn video_id(&self) -> String;

    /// Close the connection. Safe to call more than once.
    fn destroy(&self);
}
