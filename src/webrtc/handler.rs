//! Data channel message handling
//!
//! Binary frames carry input events (see [`super::payload`]). Only the host
//! drives the desktop; a move from anyone else is recorded as an inactive
//! cursor point. Text frames are JSON envelopes handed to the signaling
//! dispatch path.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::cursor::CursorPositionFeed;
use super::payload::{parse_input, InputEvent};
use crate::desktop::DesktopManager;
use crate::error::Result;
use crate::events::{MessageRouter, WebSocketMessage};
use crate::session::{Cursor, Session};

pub struct DataChannelHandler {
    desktop: Arc<dyn DesktopManager>,
    position: Arc<CursorPositionFeed>,
    router: RwLock<Option<Weak<dyn MessageRouter>>>,
}

impl DataChannelHandler {
    pub fn new(desktop: Arc<dyn DesktopManager>, position: Arc<CursorPositionFeed>) -> Self {
        Self {
            desktop,
            position,
            router: RwLock::new(None),
        }
    }

    pub fn set_router(&self, router: Weak<dyn MessageRouter>) {
        *self.router.write() = Some(router);
    }

    /// Handle one binary frame. Returns true if it was applied.
    pub fn handle_binary(&self, session: &Session, data: &[u8]) -> bool {
        let Some(event) = parse_input(data) else {
            return false;
        };

        if !session.is_host() {
            if let InputEvent::Move { x, y } = event {
                session.set_cursor(Cursor {
                    x: x as i32,
                    y: y as i32,
                });
            }
            return false;
        }

        match self.apply(event) {
            Ok(()) => true,
            Err(e) => {
                warn!(session_id = %session.id(), "Failed to apply input {:?}: {}", event, e);
                false
            }
        }
    }

    fn apply(&self, event: InputEvent) -> Result<()> {
        match event {
            InputEvent::Move { x, y } => {
                let (x, y) = (x as i32, y as i32);
                self.desktop.move_to(x, y);
                self.position.set(x, y);
            }
            InputEvent::Scroll { dx, dy } => self.desktop.scroll(dx as i32, dy as i32),
            InputEvent::KeyDown(key) => self.desktop.key_down(key)?,
            InputEvent::KeyUp(key) => self.desktop.key_up(key)?,
            InputEvent::ButtonDown(button) => self.desktop.button_down(button)?,
            InputEvent::ButtonUp(button) => self.desktop.button_up(button)?,
        }
        Ok(())
    }

    /// Handle one text frame through the signaling dispatch path
    pub async fn handle_text(&self, session: &Arc<Session>, data: &[u8]) -> bool {
        let message: WebSocketMessage = match serde_json::from_slice(data) {
            Ok(message) => message,
            Err(e) => {
                warn!(session_id = %session.id(), "Invalid data channel message: {}", e);
                return false;
            }
        };

        let router = self.router.read().as_ref().and_then(Weak::upgrade);
        match router {
            Some(router) => router.route(session, message).await,
            None => {
                debug!(session_id = %session.id(), event = %message.event, "No router for data channel message");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MemberConfig, SessionConfig};
    use crate::desktop::testing::FakeDesktop;
    use crate::session::{MemberProfile, SessionManager, Settings};
    use crate::webrtc::payload::{OP_BTN_DOWN, OP_KEY_DOWN, OP_MOVE};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    fn setup() -> (Arc<FakeDesktop>, DataChannelHandler, Arc<SessionManager>) {
        let desktop = FakeDesktop::new();
        let position = Arc::new(CursorPositionFeed::new(desktop.clone()));
        let handler = DataChannelHandler::new(desktop.clone(), position);
        let config = SessionConfig {
            settings: Settings {
                inactive_cursors: true,
                ..Default::default()
            },
            members: ["alice", "bob"]
                .iter()
                .map(|id| MemberConfig {
                    id: id.to_string(),
                    token: format!("{}-token", id),
                    profile: MemberProfile::default(),
                })
                .collect(),
            ..Default::default()
        };
        (desktop, handler, SessionManager::new(&config))
    }

    #[test]
    fn test_host_input_reaches_desktop() {
        let (desktop, handler, manager) = setup();
        let alice = manager.get("alice").unwrap();
        manager.set_host(&alice, Some(&alice));

        assert!(handler.handle_binary(&alice, &[OP_MOVE, 0, 4, 0, 10, 0, 20]));
        assert!(handler.handle_binary(&alice, &[OP_KEY_DOWN, 0, 4, 0, 0, 0, 65]));
        assert!(handler.handle_binary(&alice, &[OP_BTN_DOWN, 0, 4, 0, 0, 0, 1]));
        assert_eq!(
            desktop.calls(),
            vec!["move:10,20", "key_down:65", "button_down:1"]
        );
        assert_eq!(handler.position.current(), (10, 20));
    }

    #[test]
    fn test_non_host_move_records_cursor() {
        let (desktop, handler, manager) = setup();
        let bob = manager.get("bob").unwrap();

        assert!(!handler.handle_binary(&bob, &[OP_MOVE, 0, 4, 0, 5, 0, 6]));
        assert!(!handler.handle_binary(&bob, &[OP_KEY_DOWN, 0, 4, 0, 0, 0, 65]));
        assert!(desktop.calls().is_empty());

        let cursors = manager.pop_cursors();
        assert_eq!(cursors["bob"], vec![Cursor { x: 5, y: 6 }]);
    }

    struct RecordingRouter {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MessageRouter for RecordingRouter {
        async fn route(&self, session: &Arc<Session>, message: WebSocketMessage) -> bool {
            self.seen
                .lock()
                .push(format!("{}:{}", session.id(), message.event));
            true
        }
    }

    #[tokio::test]
    async fn test_text_frames_are_routed() {
        let (_, handler, manager) = setup();
        let alice = manager.get("alice").unwrap();

        // no router yet
        assert!(!handler.handle_text(&alice, br#"{"event":"control/request"}"#).await);

        let router = Arc::new(RecordingRouter {
            seen: Mutex::new(Vec::new()),
        });
        let as_router: Arc<dyn MessageRouter> = router.clone();
        handler.set_router(Arc::downgrade(&as_router));

        assert!(handler.handle_text(&alice, br#"{"event":"control/request"}"#).await);
        assert!(!handler.handle_text(&alice, b"not json").await);
        assert_eq!(*router.seen.lock(), vec!["alice:control/request"]);
    }
}
