use std::sync::Arc;

use crate::config::AppConfig;
use crate::session::SessionManager;
use crate::webrtc::WebRtcManager;
use crate::websocket::WebSocketManager;

/// Application-wide state shared across handlers
pub struct AppState {
    /// Configuration the process was started with
    pub config: AppConfig,
    /// Session registry
    pub sessions: Arc<SessionManager>,
    /// Peer connection manager
    pub webrtc: Arc<WebRtcManager>,
    /// Signaling socket manager
    pub websocket: Arc<WebSocketManager>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        sessions: Arc<SessionManager>,
        webrtc: Arc<WebRtcManager>,
        websocket: Arc<WebSocketManager>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            sessions,
            webrtc,
            websocket,
        })
    }

    /// Stop the managers, signaling first so no new peer is created while
    /// the media side winds down
    pub async fn shutdown(&self) {
        self.websocket.shutdown().await;
        self.webrtc.shutdown().await;
    }
}
