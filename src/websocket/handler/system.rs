use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, error, info, trace, warn};

use super::MessageHandler;
use crate::error::{AppError, Result};
use crate::events::{
    ControlHost, SessionData, SystemAdmin, SystemInit, SystemLog, SYSTEM_ADMIN, SYSTEM_INIT,
};
use crate::session::{Session, SettingsUpdate};

impl MessageHandler {
    /// Room snapshot sent to a freshly connected session
    ///
    /// Still sent when the desktop cannot report its screen size; the field
    /// is left out and the client keeps its last known size.
    pub(super) fn system_init(&self, session: &Arc<Session>) {
        let host = self.sessions.host();
        let control_host = ControlHost {
            id: None,
            has_host: host.is_some(),
            host_id: host.map(|h| h.id().to_string()),
        };

        let screen_size = self.desktop.screen_size();
        if screen_size.is_none() {
            debug!(session_id = %session.id(), "Could not get screen size");
        }

        let sessions: BTreeMap<String, SessionData> = self
            .sessions
            .list()
            .into_iter()
            .map(|s| {
                let data = SessionData {
                    id: s.id().to_string(),
                    profile: s.profile(),
                    state: s.state(),
                };
                (data.id.clone(), data)
            })
            .collect();

        session.send(
            SYSTEM_INIT,
            &SystemInit {
                session_id: session.id().to_string(),
                control_host,
                screen_size,
                sessions,
                settings: self.sessions.settings(),
            },
        );
    }

    /// Screen modes and broadcast status, for admins only
    pub(super) fn system_admin(&self, session: &Arc<Session>) {
        session.send(
            SYSTEM_ADMIN,
            &SystemAdmin {
                screen_sizes_list: self.desktop.screen_configurations(),
                broadcast_status: self.capture.broadcast_status(),
            },
        );
    }

    pub(super) fn system_settings(&self, session: &Arc<Session>, update: SettingsUpdate) -> Result<()> {
        if !session.profile().is_admin {
            return Err(AppError::Forbidden("only admins can change settings".to_string()));
        }
        let settings = update.apply(&self.sessions.settings());
        self.sessions.update_settings(session, settings);
        Ok(())
    }

    /// Forward a client log line to our own log
    pub(super) fn system_logs(&self, session: &Arc<Session>, log: SystemLog) {
        let fields = log.fields.map(|f| f.to_string()).unwrap_or_default();
        let session_id = session.id();
        match log.level.as_str() {
            "trace" => trace!(session_id, fields, "[client] {}", log.message),
            "debug" => debug!(session_id, fields, "[client] {}", log.message),
            "warn" => warn!(session_id, fields, "[client] {}", log.message),
            "error" => error!(session_id, fields, "[client] {}", log.message),
            _ => info!(session_id, fields, "[client] {}", log.message),
        }
    }
}
