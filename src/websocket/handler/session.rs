use std::sync::Arc;

use super::MessageHandler;
use crate::error::Result;
use crate::events::{
    SessionData, SessionId, SessionProfile, SessionStateUpdate, SESSION_CREATED, SESSION_DELETED,
    SESSION_PROFILE, SESSION_STATE,
};
use crate::session::{MemberProfile, Session};

impl MessageHandler {
    pub fn session_created(&self, session: &Arc<Session>) -> Result<()> {
        self.sessions.broadcast(
            SESSION_CREATED,
            &SessionData {
                id: session.id().to_string(),
                profile: session.profile(),
                state: session.state(),
            },
        );
        Ok(())
    }

    pub fn session_deleted(&self, session: &Arc<Session>) -> Result<()> {
        self.sessions.broadcast(
            SESSION_DELETED,
            &SessionId {
                id: session.id().to_string(),
            },
        );
        Ok(())
    }

    pub fn session_connected(&self, session: &Arc<Session>) -> Result<()> {
        self.system_init(session);
        if session.profile().is_admin {
            self.system_admin(session);
        }
        self.session_state_changed(session)
    }

    pub fn session_disconnected(&self, session: &Arc<Session>) -> Result<()> {
        if session.is_host() {
            self.sessions.set_host(session, None);
        }
        self.session_state_changed(session)
    }

    pub fn session_profile_changed(
        &self,
        session: &Arc<Session>,
        new: &MemberProfile,
        old: &MemberProfile,
    ) -> Result<()> {
        // newly promoted admins need the admin snapshot
        if new.is_admin && !old.is_admin {
            self.system_admin(session);
        }

        self.sessions.broadcast(
            SESSION_PROFILE,
            &SessionProfile {
                id: session.id().to_string(),
                profile: new.clone(),
            },
        );
        Ok(())
    }

    pub fn session_state_changed(&self, session: &Arc<Session>) -> Result<()> {
        self.sessions.broadcast(
            SESSION_STATE,
            &SessionStateUpdate {
                id: session.id().to_string(),
                state: session.state(),
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::Fixture;
    use crate::session::MemberProfile;

    #[tokio::test]
    async fn test_connected_session_gets_init_and_state_is_broadcast() {
        let fx = Fixture::new();
        let (_, alice_socket) = fx.connect("alice");
        let (admin, admin_socket) = fx.connect("admin");
        alice_socket.clear();
        admin_socket.clear();

        fx.handler.session_connected(&admin).unwrap();
        assert_eq!(
            admin_socket.events(),
            vec!["system/init", "system/admin", "session/state"]
        );
        assert_eq!(alice_socket.events(), vec!["session/state"]);
        assert_eq!(alice_socket.messages("session/state")[0]["id"], "admin");
    }

    #[tokio::test]
    async fn test_disconnect_releases_host() {
        let fx = Fixture::new();
        let (alice, _) = fx.connect("alice");
        fx.sessions.set_host(&alice, Some(&alice));

        fx.handler.session_disconnected(&alice).unwrap();
        assert!(fx.sessions.host().is_none());
    }

    #[tokio::test]
    async fn test_promotion_sends_admin_snapshot() {
        let fx = Fixture::new();
        let (bob, bob_socket) = fx.connect("bob");
        bob_socket.clear();

        let old = bob.profile();
        let new = MemberProfile {
            is_admin: true,
            ..old.clone()
        };
        fx.handler.session_profile_changed(&bob, &new, &old).unwrap();
        assert_eq!(bob_socket.events(), vec!["system/admin", "session/profile"]);
        assert_eq!(bob_socket.messages("session/profile")[0]["profile"]["is_admin"], true);
    }
}
