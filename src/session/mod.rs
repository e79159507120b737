//! Session registry
//!
//! A session is one member of the room. It owns at most one signaling socket
//! and at most one media connection at a time; attaching a new one supersedes
//! (and tears down) the previous one. The registry elects the host, keeps the
//! room settings, buffers inactive cursor points and fans session events out to
//! subscribers through an observer registry.

mod peer;
#[cfg(test)]
pub(crate) mod testing;
mod types;

pub use peer::{WebRtcPeer, WebSocketPeer};
pub use types::*;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::error::{AppError, Result};
use crate::utils::{ListenerId, Listeners};

/// Event emitted by the registry
#[derive(Clone)]
pub enum SessionEvent {
    Created(Arc<Session>),
    Deleted(Arc<Session>),
    Connected(Arc<Session>),
    Disconnected(Arc<Session>),
    ProfileChanged {
        session: Arc<Session>,
        new: MemberProfile,
        old: MemberProfile,
    },
    StateChanged(Arc<Session>),
    HostChanged {
        /// Session that caused the change
        session: Arc<Session>,
        host: Option<Arc<Session>>,
    },
    SettingsChanged {
        session: Arc<Session>,
        new: Settings,
        old: Settings,
    },
}

struct Shared {
    events: Listeners<SessionEvent>,
    host_id: RwLock<Option<String>>,
    settings: ArcSwap<Settings>,
    cursors: Mutex<HashMap<String, Vec<Cursor>>>,
    reconnect_grace: Duration,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Shared {
    fn emit(&self, event: SessionEvent) {
        self.events.notify(&event);
    }
}

/// One member of the room
pub struct Session {
    id: String,
    profile: RwLock<MemberProfile>,
    state: RwLock<SessionState>,
    websocket_peer: Mutex<Option<Arc<dyn WebSocketPeer>>>,
    webrtc_peer: Mutex<Option<Arc<dyn WebRtcPeer>>>,
    pending_disconnect: Mutex<Option<CancellationToken>>,
    shared: Arc<Shared>,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> String {
        self.profile.read().name.clone()
    }

    pub fn profile(&self) -> MemberProfile {
        self.profile.read().clone()
    }

    pub fn state(&self) -> SessionState {
        self.state.read().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state.read().is_connected
    }

    pub fn is_host(&self) -> bool {
        self.shared.host_id.read().as_deref() == Some(self.id.as_str())
    }

    /// Record a cursor point for the inactive cursor broadcast
    ///
    /// Dropped unless the room has inactive cursors enabled and the profile
    /// allows sending them.
    pub fn set_cursor(&self, cursor: Cursor) {
        if !self.shared.settings.load().inactive_cursors || !self.profile.read().sends_inactive_cursor
        {
            return;
        }
        self.shared
            .cursors
            .lock()
            .entry(self.id.clone())
            .or_default()
            .push(cursor);
    }

    /// Serialize `payload` and queue it on the signaling socket, if any
    pub fn send<T: Serialize + ?Sized>(&self, event: &str, payload: &T) {
        match serde_json::to_value(payload) {
            Ok(value) => self.send_value(event, value),
            Err(e) => warn!(session_id = %self.id, event, "Failed to serialize payload: {}", e),
        }
    }

    pub(crate) fn send_value(&self, event: &str, payload: serde_json::Value) {
        let peer = self.websocket_peer.lock().clone();
        let Some(peer) = peer else {
            return;
        };
        if let Err(e) = peer.send(event, payload) {
            debug!(session_id = %self.id, event, "Failed to send message: {}", e);
        }
    }

    /// Attach a freshly authenticated signaling socket
    ///
    /// A pending delayed disconnect is cancelled and a different socket that
    /// was still attached is destroyed.
    pub fn connect_websocket_peer(self: &Arc<Self>, peer: Arc<dyn WebSocketPeer>) {
        if let Some(timer) = self.pending_disconnect.lock().take() {
            timer.cancel();
        }

        let previous = self.websocket_peer.lock().replace(peer.clone());
        if let Some(previous) = previous {
            if previous.id() != peer.id() {
                info!(session_id = %self.id, "Replacing websocket peer");
                previous.destroy("connection replaced");
            }
        }

        {
            let mut state = self.state.write();
            state.is_connected = true;
            state.connected_since = Some(Utc::now());
            state.not_connected_since = None;
        }

        self.shared.emit(SessionEvent::Connected(self.clone()));
    }

    /// Detach a signaling socket
    ///
    /// Ignored if `peer_id` is no longer the attached socket. With `delayed`
    /// the disconnect only takes effect once the reconnect grace period
    /// elapses without a new socket being attached.
    pub fn disconnect_websocket_peer(self: &Arc<Self>, peer_id: Uuid, delayed: bool) {
        if !self.has_websocket_peer(peer_id) {
            debug!(session_id = %self.id, "Ignoring disconnect of a replaced websocket peer");
            return;
        }

        if delayed {
            let timer = CancellationToken::new();
            if let Some(previous) = self.pending_disconnect.lock().replace(timer.clone()) {
                previous.cancel();
            }

            let session = self.clone();
            let grace = self.shared.reconnect_grace;
            let shutdown = self.shared.shutdown.clone();
            self.shared.tracker.spawn(async move {
                tokio::select! {
                    biased;
                    _ = timer.cancelled() => {}
                    // pending disconnects complete right away on shutdown
                    _ = shutdown.cancelled() => {
                        session.disconnect_websocket_peer(peer_id, false);
                    }
                    _ = tokio::time::sleep(grace) => {
                        session.disconnect_websocket_peer(peer_id, false);
                    }
                }
            });
            return;
        }

        if let Some(timer) = self.pending_disconnect.lock().take() {
            timer.cancel();
        }

        {
            let mut current = self.websocket_peer.lock();
            match current.as_ref() {
                Some(peer) if peer.id() == peer_id => {
                    current.take();
                }
                _ => return,
            }
        }

        if let Some(webrtc) = self.webrtc_peer.lock().take() {
            webrtc.destroy();
        }

        {
            let mut state = self.state.write();
            let now = Utc::now();
            state.is_connected = false;
            state.connected_since = None;
            state.not_connected_since = Some(now);
            if state.is_watching {
                state.is_watching = false;
                state.watching_since = None;
                state.not_watching_since = Some(now);
            }
        }

        self.shared.emit(SessionEvent::Disconnected(self.clone()));
    }

    /// Whether the socket is gone and the reconnect grace period is running
    pub fn is_disconnect_pending(&self) -> bool {
        self.pending_disconnect.lock().is_some()
    }

    fn has_websocket_peer(&self, peer_id: Uuid) -> bool {
        self.websocket_peer
            .lock()
            .as_ref()
            .is_some_and(|peer| peer.id() == peer_id)
    }

    pub fn webrtc_peer(&self) -> Option<Arc<dyn WebRtcPeer>> {
        self.webrtc_peer.lock().clone()
    }

    /// Install a new media connection, destroying the one it supersedes
    pub fn set_webrtc_peer(&self, peer: Arc<dyn WebRtcPeer>) {
        let previous = self.webrtc_peer.lock().replace(peer.clone());
        if let Some(previous) = previous {
            if previous.id() != peer.id() {
                debug!(session_id = %self.id, "Superseding webrtc peer {}", previous.id());
                previous.destroy();
            }
        }
    }

    /// Update the watching flag on behalf of media connection `peer_id`
    ///
    /// Reports from a connection that has already been superseded are ignored.
    pub fn set_webrtc_connected(self: &Arc<Self>, peer_id: Uuid, connected: bool) {
        {
            let mut current = self.webrtc_peer.lock();
            match current.as_ref() {
                Some(peer) if peer.id() == peer_id => {
                    if !connected {
                        current.take();
                    }
                }
                _ => return,
            }
        }

        {
            let mut state = self.state.write();
            let now = Utc::now();
            state.is_watching = connected;
            if connected {
                state.watching_since = Some(now);
                state.not_watching_since = None;
            } else {
                state.watching_since = None;
                state.not_watching_since = Some(now);
            }
        }

        self.shared.emit(SessionEvent::StateChanged(self.clone()));
    }

    fn destroy(&self, reason: &str) {
        if let Some(timer) = self.pending_disconnect.lock().take() {
            timer.cancel();
        }
        if let Some(peer) = self.websocket_peer.lock().take() {
            peer.destroy(reason);
        }
        if let Some(peer) = self.webrtc_peer.lock().take() {
            peer.destroy();
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("profile", &*self.profile.read())
            .field("state", &*self.state.read())
            .finish_non_exhaustive()
    }
}

/// Registry of all sessions
pub struct SessionManager {
    shared: Arc<Shared>,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    /// token -> session id
    tokens: RwLock<HashMap<String, String>>,
}

impl SessionManager {
    /// Create a registry populated with the configured members
    pub fn new(config: &SessionConfig) -> Arc<Self> {
        let manager = Arc::new(Self {
            shared: Arc::new(Shared {
                events: Listeners::new(),
                host_id: RwLock::new(None),
                settings: ArcSwap::from_pointee(config.settings.clone()),
                cursors: Mutex::new(HashMap::new()),
                reconnect_grace: Duration::from_secs(config.reconnect_grace_secs),
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
            sessions: RwLock::new(HashMap::new()),
            tokens: RwLock::new(HashMap::new()),
        });

        for member in &config.members {
            if let Err(e) = manager.create(&member.id, &member.token, member.profile.clone()) {
                warn!("Skipping member {}: {}", member.id, e);
            }
        }

        manager
    }

    pub fn create(&self, id: &str, token: &str, profile: MemberProfile) -> Result<Arc<Session>> {
        if id.is_empty() || token.is_empty() {
            return Err(AppError::BadRequest("id and token are required".to_string()));
        }

        let session = {
            let mut sessions = self.sessions.write();
            let mut tokens = self.tokens.write();
            if sessions.contains_key(id) {
                return Err(AppError::BadRequest(format!("session {} already exists", id)));
            }
            if tokens.contains_key(token) {
                return Err(AppError::BadRequest("token already in use".to_string()));
            }

            let session = Arc::new(Session {
                id: id.to_string(),
                profile: RwLock::new(profile),
                state: RwLock::new(SessionState::default()),
                websocket_peer: Mutex::new(None),
                webrtc_peer: Mutex::new(None),
                pending_disconnect: Mutex::new(None),
                shared: self.shared.clone(),
            });
            sessions.insert(id.to_string(), session.clone());
            tokens.insert(token.to_string(), id.to_string());
            session
        };

        debug!(session_id = %id, "Session created");
        self.shared.emit(SessionEvent::Created(session.clone()));
        Ok(session)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let session = {
            let mut sessions = self.sessions.write();
            let session = sessions
                .remove(id)
                .ok_or_else(|| AppError::NotFound(format!("session {}", id)))?;
            self.tokens.write().retain(|_, session_id| session_id != id);
            session
        };

        if session.is_host() {
            self.set_host(&session, None);
        }
        self.shared.cursors.lock().remove(id);
        session.destroy("session deleted");

        debug!(session_id = %id, "Session deleted");
        self.shared.emit(SessionEvent::Deleted(session));
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    /// All sessions, ordered by id
    pub fn list(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<_> = self.sessions.read().values().cloned().collect();
        sessions.sort_by(|a, b| a.id.cmp(&b.id));
        sessions
    }

    /// Resolve the session a signaling socket belongs to
    pub fn authenticate(&self, request: &AuthRequest) -> Result<Arc<Session>> {
        let token = request
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::AuthError("missing token".to_string()))?;

        let session = self
            .tokens
            .read()
            .get(token)
            .and_then(|id| self.get(id))
            .ok_or_else(|| AppError::AuthError("invalid token".to_string()))?;

        if !session.profile.read().can_login {
            return Err(AppError::AuthError("login disabled".to_string()));
        }

        Ok(session)
    }

    pub fn host(&self) -> Option<Arc<Session>> {
        let host_id = self.shared.host_id.read().clone()?;
        self.get(&host_id)
    }

    /// Hand control to `host`, or release it with `None`
    pub fn set_host(&self, by: &Arc<Session>, host: Option<&Arc<Session>>) {
        let new_id = host.map(|s| s.id.clone());
        {
            let mut host_id = self.shared.host_id.write();
            if *host_id == new_id {
                return;
            }
            *host_id = new_id;
        }

        self.shared.emit(SessionEvent::HostChanged {
            session: by.clone(),
            host: host.cloned(),
        });
    }

    pub fn update_profile(&self, id: &str, profile: MemberProfile) -> Result<()> {
        let session = self
            .get(id)
            .ok_or_else(|| AppError::NotFound(format!("session {}", id)))?;

        let old = std::mem::replace(&mut *session.profile.write(), profile.clone());
        if session.is_host() && !profile.can_host {
            self.set_host(&session, None);
        }

        self.shared.emit(SessionEvent::ProfileChanged {
            session,
            new: profile,
            old,
        });
        Ok(())
    }

    pub fn settings(&self) -> Settings {
        self.shared.settings.load().as_ref().clone()
    }

    pub fn update_settings(&self, by: &Arc<Session>, settings: Settings) {
        let old = self.shared.settings.swap(Arc::new(settings.clone()));
        self.shared.emit(SessionEvent::SettingsChanged {
            session: by.clone(),
            new: settings,
            old: old.as_ref().clone(),
        });
    }

    /// Send to every connected session
    pub fn broadcast<T: Serialize + ?Sized>(&self, event: &str, payload: &T) {
        self.broadcast_filtered(event, payload, |_| true);
    }

    /// Send to every connected admin
    pub fn admin_broadcast<T: Serialize + ?Sized>(&self, event: &str, payload: &T) {
        self.broadcast_filtered(event, payload, |s| s.profile.read().is_admin);
    }

    /// Send to every connected session allowed to see inactive cursors
    pub fn inactive_cursors_broadcast<T: Serialize + ?Sized>(&self, event: &str, payload: &T) {
        self.broadcast_filtered(event, payload, |s| {
            s.profile.read().can_see_inactive_cursors
        });
    }

    fn broadcast_filtered<T, F>(&self, event: &str, payload: &T, filter: F)
    where
        T: Serialize + ?Sized,
        F: Fn(&Session) -> bool,
    {
        let value = match serde_json::to_value(payload) {
            Ok(value) => value,
            Err(e) => {
                warn!(event, "Failed to serialize broadcast payload: {}", e);
                return;
            }
        };

        for session in self.list() {
            if session.is_connected() && filter(&session) {
                session.send_value(event, value.clone());
            }
        }
    }

    /// Take and clear the buffered inactive cursor points
    pub fn pop_cursors(&self) -> HashMap<String, Vec<Cursor>> {
        std::mem::take(&mut *self.shared.cursors.lock())
    }

    /// Register for session events
    ///
    /// Callbacks run synchronously on the thread that caused the event.
    pub fn subscribe<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.shared.events.subscribe(callback).0
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.shared.events.unsubscribe(id)
    }

    /// Complete pending delayed disconnects and wait for their timers
    pub async fn shutdown(&self) {
        self.shared.shutdown.cancel();
        self.shared.tracker.close();
        self.shared.tracker.wait().await;
        debug!("Session registry stopped");
    }
}
