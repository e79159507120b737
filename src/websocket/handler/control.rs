use std::sync::Arc;

use tracing::info;

use super::MessageHandler;
use crate::error::{AppError, Result};
use crate::events::{SessionId, CONTROL_REQUEST};
use crate::session::Session;

impl MessageHandler {
    /// Take control if nobody holds it, otherwise ask the current host
    pub(super) fn control_request(&self, session: &Arc<Session>) -> Result<()> {
        let profile = session.profile();
        if !profile.can_host {
            return Err(AppError::Forbidden("not allowed to host".to_string()));
        }
        if session.is_host() {
            return Err(AppError::BadRequest("already the host".to_string()));
        }
        if self.sessions.settings().locked_controls && !profile.is_admin {
            return Err(AppError::Forbidden("controls are locked".to_string()));
        }

        match self.sessions.host() {
            Some(host) => {
                host.send(
                    CONTROL_REQUEST,
                    &SessionId {
                        id: session.id().to_string(),
                    },
                );
            }
            None => {
                info!(session_id = %session.id(), "Taking control");
                self.sessions.set_host(session, Some(session));
            }
        }
        Ok(())
    }

    pub(super) fn control_release(&self, session: &Arc<Session>) -> Result<()> {
        if !session.profile().can_host {
            return Err(AppError::Forbidden("not allowed to host".to_string()));
        }
        if !session.is_host() {
            return Err(AppError::BadRequest("not the host".to_string()));
        }

        info!(session_id = %session.id(), "Releasing control");
        self.sessions.set_host(session, None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::Fixture;
    use crate::session::Settings;
    use serde_json::json;

    #[tokio::test]
    async fn test_request_and_release() {
        let fx = Fixture::new();
        let (alice, _) = fx.connect("alice");
        let (bob, bob_socket) = fx.connect("bob");

        fx.send(&alice, "control/request", json!(null)).await;
        assert!(alice.is_host());

        // a second request is forwarded to the host instead
        fx.send(&bob, "control/request", json!(null)).await;
        assert!(alice.is_host());

        fx.send(&bob, "control/release", json!(null)).await;
        assert!(alice.is_host());

        fx.send(&alice, "control/release", json!(null)).await;
        assert!(fx.sessions.host().is_none());
        assert!(bob_socket.messages("control/request").is_empty());
    }

    #[tokio::test]
    async fn test_request_forwarded_to_host() {
        let fx = Fixture::new();
        let (alice, alice_socket) = fx.connect("alice");
        let (bob, _) = fx.connect("bob");
        fx.sessions.set_host(&alice, Some(&alice));
        alice_socket.clear();

        fx.send(&bob, "control/request", json!(null)).await;
        assert_eq!(
            alice_socket.messages("control/request"),
            vec![json!({ "id": "bob" })]
        );
    }

    #[tokio::test]
    async fn test_locked_controls_admit_admins_only() {
        let fx = Fixture::new();
        let (alice, _) = fx.connect("alice");
        let (admin, _) = fx.connect("admin");
        fx.sessions.update_settings(
            &admin,
            Settings {
                locked_controls: true,
                ..Default::default()
            },
        );

        fx.send(&alice, "control/request", json!(null)).await;
        assert!(fx.sessions.host().is_none());

        fx.send(&admin, "control/request", json!(null)).await;
        assert!(admin.is_host());
    }
}
