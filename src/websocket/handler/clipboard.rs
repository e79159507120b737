use std::sync::Arc;

use super::MessageHandler;
use crate::error::{AppError, Result};
use crate::events::{ClipboardData, CLIPBOARD_UPDATED};
use crate::session::Session;

impl MessageHandler {
    pub(super) fn clipboard_set(&self, session: &Arc<Session>, data: ClipboardData) -> Result<()> {
        if !session.profile().can_access_clipboard {
            return Err(AppError::Forbidden("not allowed to access clipboard".to_string()));
        }
        if !session.is_host() {
            return Err(AppError::Forbidden("not the host".to_string()));
        }
        self.desktop.set_clipboard_text(&data.text)
    }

    /// Push the desktop clipboard to the host, if it may read it
    pub fn clipboard_updated(&self) -> Result<()> {
        let Some(host) = self.sessions.host() else {
            return Ok(());
        };
        if !host.profile().can_access_clipboard {
            return Ok(());
        }

        let text = self.desktop.clipboard_text()?;
        host.send(CLIPBOARD_UPDATED, &ClipboardData { text });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::Fixture;
    use crate::session::MemberProfile;
    use serde_json::json;

    #[tokio::test]
    async fn test_only_host_sets_clipboard() {
        let fx = Fixture::new();
        let (alice, _) = fx.connect("alice");
        let (bob, _) = fx.connect("bob");
        fx.sessions.set_host(&alice, Some(&alice));

        fx.send(&bob, "clipboard/set", json!({ "text": "from bob" })).await;
        fx.send(&alice, "clipboard/set", json!({ "text": "from alice" }))
            .await;
        assert_eq!(fx.desktop.calls(), vec!["clipboard:from alice"]);
    }

    #[tokio::test]
    async fn test_clipboard_updates_reach_host() {
        let fx = Fixture::new();
        let (alice, alice_socket) = fx.connect("alice");
        let (_, bob_socket) = fx.connect("bob");

        // no host, nothing to do
        fx.desktop.change_clipboard("one");
        fx.handler.clipboard_updated().unwrap();

        fx.sessions.set_host(&alice, Some(&alice));
        fx.desktop.change_clipboard("two");
        fx.handler.clipboard_updated().unwrap();

        assert_eq!(
            alice_socket.messages("clipboard/updated"),
            vec![json!({ "text": "two" })]
        );
        assert!(bob_socket.messages("clipboard/updated").is_empty());

        fx.sessions
            .update_profile(
                "alice",
                MemberProfile {
                    can_access_clipboard: false,
                    ..Default::default()
                },
            )
            .unwrap();
        fx.handler.clipboard_updated().unwrap();
        assert_eq!(alice_socket.messages("clipboard/updated").len(), 1);
    }
}
