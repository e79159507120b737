//! Inbound message dispatch and session event reactions
//!
//! Handlers are grouped by event family. A handler error is logged against
//! the session and the event still counts as handled; only unknown events
//! fall through to the externally registered handlers.

mod clipboard;
mod control;
mod session;
mod signal;
mod system;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::warn;

use crate::capture::CaptureManager;
use crate::desktop::DesktopManager;
use crate::error::{AppError, Result};
use crate::events::*;
use crate::session::{Session, SessionManager};
use crate::webrtc::WebRtcManager;

pub struct MessageHandler {
    sessions: Arc<SessionManager>,
    desktop: Arc<dyn DesktopManager>,
    capture: Arc<dyn CaptureManager>,
    webrtc: Arc<WebRtcManager>,
}

impl MessageHandler {
    pub fn new(
        sessions: Arc<SessionManager>,
        desktop: Arc<dyn DesktopManager>,
        capture: Arc<dyn CaptureManager>,
        webrtc: Arc<WebRtcManager>,
    ) -> Self {
        Self {
            sessions,
            desktop,
            capture,
            webrtc,
        }
    }

    /// Handle one inbound message. Returns false for events this handler
    /// does not know.
    pub async fn message(&self, session: &Arc<Session>, message: &WebSocketMessage) -> bool {
        let result = match message.event.as_str() {
            // System
            CLIENT_HEARTBEAT => Ok(()),
            SYSTEM_LOGS => payload(message).map(|log| self.system_logs(session, log)),
            SYSTEM_SETTINGS => match payload(message) {
                Ok(update) => self.system_settings(session, update),
                Err(e) => Err(e),
            },

            // Signal
            SIGNAL_REQUEST => {
                let request = payload(message).unwrap_or_default();
                self.signal_request(session, request).await
            }
            SIGNAL_RESTART => self.signal_restart(session).await,
            SIGNAL_OFFER => match payload(message) {
                Ok(offer) => self.signal_offer(session, offer).await,
                Err(e) => Err(e),
            },
            SIGNAL_ANSWER => match payload(message) {
                Ok(answer) => self.signal_answer(session, answer).await,
                Err(e) => Err(e),
            },
            SIGNAL_CANDIDATE => match payload(message) {
                Ok(candidate) => self.signal_candidate(session, candidate).await,
                Err(e) => Err(e),
            },
            SIGNAL_VIDEO => match payload(message) {
                Ok(video) => self.signal_video(session, video),
                Err(e) => Err(e),
            },

            // Control
            CONTROL_REQUEST => self.control_request(session),
            CONTROL_RELEASE => self.control_release(session),

            // Clipboard
            CLIPBOARD_SET => match payload(message) {
                Ok(data) => self.clipboard_set(session, data),
                Err(e) => Err(e),
            },

            _ => return false,
        };

        if let Err(e) = result {
            warn!(
                session_id = %session.id(),
                event = %message.event,
                "Message handler failed: {}",
                e
            );
        }
        true
    }
}

fn payload<T: DeserializeOwned>(message: &WebSocketMessage) -> Result<T> {
    message
        .parse()
        .map_err(|e| AppError::BadRequest(format!("invalid {} payload: {}", message.event, e)))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::capture::BroadcastCapture;
    use crate::config::{CaptureConfig, MemberConfig, SessionConfig, WebRtcConfig};
    use crate::desktop::testing::FakeDesktop;
    use crate::session::testing::FakeWebSocketPeer;
    use crate::session::MemberProfile;

    pub(crate) struct Fixture {
        pub(crate) handler: MessageHandler,
        pub(crate) sessions: Arc<SessionManager>,
        pub(crate) desktop: Arc<FakeDesktop>,
        pub(crate) webrtc: Arc<WebRtcManager>,
    }

    impl Fixture {
        /// Members `admin` (admin), `alice` and `bob`
        pub(crate) fn new() -> Self {
            let profile = |name: &str, is_admin: bool| MemberProfile {
                name: name.to_string(),
                is_admin,
                ..Default::default()
            };
            let sessions = SessionManager::new(&SessionConfig {
                members: vec![
                    MemberConfig {
                        id: "admin".to_string(),
                        token: "admin-token".to_string(),
                        profile: profile("Admin", true),
                    },
                    MemberConfig {
                        id: "alice".to_string(),
                        token: "alice-token".to_string(),
                        profile: profile("Alice", false),
                    },
                    MemberConfig {
                        id: "bob".to_string(),
                        token: "bob-token".to_string(),
                        profile: profile("Bob", false),
                    },
                ],
                ..Default::default()
            });

            let desktop = FakeDesktop::new();
            let capture: Arc<dyn CaptureManager> = Arc::new(
                BroadcastCapture::new(&CaptureConfig {
                    video_ids: vec!["main".to_string(), "low".to_string()],
                    ..Default::default()
                })
                .unwrap(),
            );
            let webrtc = WebRtcManager::new(
                WebRtcConfig {
                    ice_servers: vec![],
                    mdns_mode: "disabled".to_string(),
                    ..Default::default()
                },
                desktop.clone(),
                capture.clone(),
            );

            Self {
                handler: MessageHandler::new(
                    sessions.clone(),
                    desktop.clone(),
                    capture,
                    webrtc.clone(),
                ),
                sessions,
                desktop,
                webrtc,
            }
        }

        /// Attach a fake socket to `id` and return it
        pub(crate) fn connect(&self, id: &str) -> (Arc<Session>, Arc<FakeWebSocketPeer>) {
            let session = self.sessions.get(id).unwrap();
            let socket = FakeWebSocketPeer::new();
            session.connect_websocket_peer(socket.clone());
            (session, socket)
        }

        pub(crate) async fn send(
            &self,
            session: &Arc<Session>,
            event: &str,
            payload: serde_json::Value,
        ) -> bool {
            self.handler
                .message(session, &WebSocketMessage::new(event, payload))
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::Fixture;
    use serde_json::json;

    #[tokio::test]
    async fn test_unknown_event_is_not_handled() {
        let fx = Fixture::new();
        let (alice, _) = fx.connect("alice");
        assert!(!fx.send(&alice, "custom/event", json!({})).await);
        assert!(fx.send(&alice, "client/heartbeat", json!(null)).await);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_still_handled() {
        let fx = Fixture::new();
        let (alice, socket) = fx.connect("alice");
        socket.clear();

        assert!(fx.send(&alice, "signal/offer", json!({ "nope": 1 })).await);
        assert!(socket.events().is_empty());
    }
}
