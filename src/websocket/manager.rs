//! Signaling manager
//!
//! Owns every viewer's signaling socket. It turns session events into
//! broadcasts, runs the inactive cursor aggregation loop and dispatches
//! inbound messages: the built-in [`MessageHandler`] first, then any
//! externally registered handler until one accepts the message.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::Message;
use futures::{Sink, Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::connection::{ConnectionError, WebSocketConnection};
use super::handler::MessageHandler;
use crate::capture::CaptureManager;
use crate::config::WebSocketConfig;
use crate::desktop::DesktopManager;
use crate::events::{
    ControlHost, MessageRouter, SessionCursors, SystemSettingsUpdate, WebSocketMessage,
    CONTROL_HOST, NOLOG_EVENTS, SESSION_CURSORS, SYSTEM_SETTINGS,
};
use crate::session::{AuthRequest, Session, SessionEvent, SessionManager, WebSocketPeer};
use crate::utils::ListenerId;
use crate::webrtc::WebRtcManager;

/// Inbound message hook registered by other components
pub type HandlerFn = Arc<dyn Fn(&Arc<Session>, &WebSocketMessage) -> bool + Send + Sync>;

pub struct WebSocketManager {
    config: WebSocketConfig,
    sessions: Arc<SessionManager>,
    desktop: Arc<dyn DesktopManager>,
    webrtc: Arc<WebRtcManager>,
    handler: MessageHandler,
    handlers: RwLock<Vec<HandlerFn>>,
    subscription: Mutex<Option<ListenerId>>,
    /// Stop signal of the running inactive cursor loop
    inactive_cursors: Mutex<Option<CancellationToken>>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl WebSocketManager {
    pub fn new(
        sessions: Arc<SessionManager>,
        desktop: Arc<dyn DesktopManager>,
        capture: Arc<dyn CaptureManager>,
        webrtc: Arc<WebRtcManager>,
        config: WebSocketConfig,
    ) -> Arc<Self> {
        let handler = MessageHandler::new(
            sessions.clone(),
            desktop.clone(),
            capture,
            webrtc.clone(),
        );
        Arc::new(Self {
            config,
            sessions,
            desktop,
            webrtc,
            handler,
            handlers: RwLock::new(Vec::new()),
            subscription: Mutex::new(None),
            inactive_cursors: Mutex::new(None),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        })
    }

    /// Start reacting to session events and desktop clipboard changes
    pub fn start(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let id = self.sessions.subscribe(move |event| {
            if let Some(manager) = weak.upgrade() {
                manager.on_session_event(event);
            }
        });
        if let Some(previous) = self.subscription.lock().replace(id) {
            self.sessions.unsubscribe(previous);
        }

        self.spawn_clipboard_watcher();

        if self.sessions.settings().inactive_cursors {
            self.start_inactive_cursors();
        }

        let router: Arc<dyn MessageRouter> = self.clone();
        self.webrtc.set_router(Arc::downgrade(&router));

        info!(
            ping_period = self.config.ping_period_secs,
            inactive_cursors_period = self.config.inactive_cursors_period_ms,
            "WebSocket manager started"
        );
    }

    /// Close every connection and wait for all tasks to exit
    pub async fn shutdown(&self) {
        info!("Shutting down WebSocket manager");
        if let Some(id) = self.subscription.lock().take() {
            self.sessions.unsubscribe(id);
        }
        self.stop_inactive_cursors();
        self.shutdown.cancel();

        self.tracker.close();
        self.tracker.wait().await;

        // connections that dropped without a close frame may still be in
        // their reconnect grace period
        self.sessions.shutdown().await;
        info!("WebSocket manager stopped");
    }

    /// Register a fallback handler for events the built-in one ignores
    pub fn add_handler(&self, handler: HandlerFn) {
        self.handlers.write().push(handler);
    }

    fn on_session_event(&self, event: &SessionEvent) {
        let (session, result) = match event {
            SessionEvent::Created(session) => (session, self.handler.session_created(session)),
            SessionEvent::Deleted(session) => (session, self.handler.session_deleted(session)),
            SessionEvent::Connected(session) => (session, self.handler.session_connected(session)),
            SessionEvent::Disconnected(session) => {
                (session, self.handler.session_disconnected(session))
            }
            SessionEvent::ProfileChanged { session, new, old } => (
                session,
                self.handler.session_profile_changed(session, new, old),
            ),
            SessionEvent::StateChanged(session) => {
                (session, self.handler.session_state_changed(session))
            }
            SessionEvent::HostChanged { session, host } => {
                self.sessions.broadcast(
                    CONTROL_HOST,
                    &ControlHost {
                        id: Some(session.id().to_string()),
                        has_host: host.is_some(),
                        host_id: host.as_ref().map(|h| h.id().to_string()),
                    },
                );
                return;
            }
            SessionEvent::SettingsChanged { session, new, old } => {
                if new.inactive_cursors && !old.inactive_cursors {
                    self.start_inactive_cursors();
                } else if !new.inactive_cursors && old.inactive_cursors {
                    self.stop_inactive_cursors();
                }

                self.sessions.broadcast(
                    SYSTEM_SETTINGS,
                    &SystemSettingsUpdate {
                        id: session.id().to_string(),
                        settings: new.clone(),
                    },
                );
                return;
            }
        };

        if let Err(e) = result {
            warn!(session_id = %session.id(), "Session event handler failed: {}", e);
        }
    }

    fn spawn_clipboard_watcher(self: &Arc<Self>) {
        let mut changes = self.desktop.subscribe_clipboard();
        let shutdown = self.shutdown.clone();
        let weak = Arc::downgrade(self);

        self.tracker.spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    change = changes.recv() => {
                        if let Err(tokio::sync::broadcast::error::RecvError::Closed) = change {
                            break;
                        }
                        let Some(manager) = weak.upgrade() else {
                            break;
                        };
                        if let Err(e) = manager.handler.clipboard_updated() {
                            warn!("Failed to forward clipboard update: {}", e);
                        }
                    }
                }
            }
            debug!("Clipboard watcher stopped");
        });
    }

    // ========================================================================
    // Connections
    // ========================================================================

    /// Authenticate a freshly upgraded socket and serve it until it ends
    ///
    /// Manager shutdown waits for this to return.
    pub async fn connect<W, R, E>(&self, sink: W, stream: R, request: AuthRequest)
    where
        W: Sink<Message> + Send + Unpin + 'static,
        W::Error: std::fmt::Display,
        R: Stream<Item = std::result::Result<Message, E>> + Send + Unpin + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        self.tracker
            .track_future(self.accept(sink, stream, request))
            .await
    }

    async fn accept<W, R, E>(&self, sink: W, stream: R, request: AuthRequest)
    where
        W: Sink<Message> + Send + Unpin + 'static,
        W::Error: std::fmt::Display,
        R: Stream<Item = std::result::Result<Message, E>> + Send + Unpin + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        // ends the connection's own tasks once every final frame is queued
        let cancel = CancellationToken::new();
        let connection = WebSocketConnection::spawn(sink, cancel.clone(), &self.tracker);

        let session = match self.sessions.authenticate(&request) {
            Ok(session) => session,
            Err(e) => {
                warn!(address = %request.address, "Authentication failed: {}", e);
                connection.destroy(&e.to_string());
                cancel.cancel();
                return;
            }
        };

        let profile = session.profile();
        if !profile.can_connect {
            warn!(session_id = %session.id(), "Connection disabled");
            connection.destroy("connection disabled");
            cancel.cancel();
            return;
        }

        // a session in its reconnect grace period has no live socket left
        if session.is_connected() && !session.is_disconnect_pending() {
            if !self.sessions.settings().merciful_reconnect {
                warn!(session_id = %session.id(), "Already connected");
                connection.destroy("already connected");
                cancel.cancel();
                return;
            }
            info!(session_id = %session.id(), "Replacing existing connection");
        }

        info!(
            session_id = %session.id(),
            address = %request.address,
            agent = %request.user_agent,
            "Connection started"
        );

        session.connect_websocket_peer(connection.clone());
        let result = self.serve(&session, &connection, stream, &cancel).await;

        match result {
            Ok(()) => {
                info!(session_id = %session.id(), "Connection ended");
                session.disconnect_websocket_peer(connection.id(), false);
            }
            Err(e) => {
                let delayed = e.is_delayed_disconnect();
                if delayed {
                    warn!(session_id = %session.id(), "Connection lost: {}", e);
                } else {
                    info!(session_id = %session.id(), "Connection closed: {}", e);
                }
                connection.destroy(&e.to_string());
                session.disconnect_websocket_peer(connection.id(), delayed);
            }
        }
        cancel.cancel();
    }

    /// Connection loop. `Ok` means the manager is shutting down.
    async fn serve<R, E>(
        &self,
        session: &Arc<Session>,
        connection: &Arc<WebSocketConnection>,
        stream: R,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), ConnectionError>
    where
        R: Stream<Item = std::result::Result<Message, E>> + Send + Unpin + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let (message_tx, mut messages) = mpsc::channel::<Vec<u8>>(64);
        let (error_tx, mut reader_error) = oneshot::channel::<ConnectionError>();
        self.tracker
            .spawn(read_loop(stream, message_tx, error_tx, cancel.clone()));

        let period = Duration::from_secs(self.config.ping_period_secs);
        let mut ping = interval_at(Instant::now() + period, period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    connection.destroy("connection shutdown");
                    return Ok(());
                }
                message = messages.recv() => match message {
                    Some(raw) => self.process(session, &raw).await,
                    None => {
                        // reader is gone; its error explains why
                        return Err(reader_error
                            .try_recv()
                            .unwrap_or_else(|_| ConnectionError::abnormal()));
                    }
                },
                error = &mut reader_error => {
                    return Err(error.unwrap_or_else(|_| ConnectionError::abnormal()));
                }
                _ = ping.tick() => {
                    connection.ping()?;
                }
            }
        }
    }

    async fn process(&self, session: &Arc<Session>, raw: &[u8]) {
        let message: WebSocketMessage = match serde_json::from_slice(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!(session_id = %session.id(), "Failed to parse message: {}", e);
                return;
            }
        };

        if !NOLOG_EVENTS.contains(&message.event.as_str()) {
            let payload = message.payload.to_string();
            let payload = if payload.len() > self.config.max_payload_log_length {
                "<truncated>"
            } else {
                payload.as_str()
            };
            debug!(
                session_id = %session.id(),
                event = %message.event,
                payload = %payload,
                "Received message"
            );
        }

        self.route(session, message).await;
    }

    // ========================================================================
    // Inactive cursors
    // ========================================================================

    pub fn inactive_cursors_running(&self) -> bool {
        self.inactive_cursors.lock().is_some()
    }

    fn start_inactive_cursors(&self) {
        let stop = {
            let mut running = self.inactive_cursors.lock();
            if running.is_some() {
                warn!("Inactive cursors loop is already running");
                return;
            }
            let stop = self.shutdown.child_token();
            *running = Some(stop.clone());
            stop
        };

        info!("Starting inactive cursors loop");
        let sessions = self.sessions.clone();
        let period = Duration::from_millis(self.config.inactive_cursors_period_ms);

        self.tracker.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last_empty = false;

            loop {
                tokio::select! {
                    _ = stop.cancelled() => {
                        let _ = sessions.pop_cursors();
                        sessions.inactive_cursors_broadcast(SESSION_CURSORS, &Vec::<SessionCursors>::new());
                        break;
                    }
                    _ = ticker.tick() => {
                        let cursors = collect_cursors(&sessions);
                        let empty = cursors.is_empty();
                        if !(empty && last_empty) {
                            sessions.inactive_cursors_broadcast(SESSION_CURSORS, &cursors);
                        }
                        last_empty = empty;
                    }
                }
            }
            info!("Inactive cursors loop stopped");
        });
    }

    fn stop_inactive_cursors(&self) {
        if let Some(stop) = self.inactive_cursors.lock().take() {
            stop.cancel();
        }
    }
}

/// Drain the cursor buffers into a broadcast payload, ordered by session id
fn collect_cursors(sessions: &SessionManager) -> Vec<SessionCursors> {
    let mut cursors: Vec<SessionCursors> = sessions
        .pop_cursors()
        .into_iter()
        .filter(|(_, points)| !points.is_empty())
        .map(|(id, cursors)| SessionCursors { id, cursors })
        .collect();
    cursors.sort_by(|a, b| a.id.cmp(&b.id));
    cursors
}

async fn read_loop<R, E>(
    mut stream: R,
    messages: mpsc::Sender<Vec<u8>>,
    error: oneshot::Sender<ConnectionError>,
    cancel: CancellationToken,
) where
    R: Stream<Item = std::result::Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    let reason = loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return,
            next = stream.next() => next,
        };

        let raw = match next {
            Some(Ok(Message::Text(text))) => text.into_bytes(),
            Some(Ok(Message::Binary(data))) => data,
            Some(Ok(Message::Close(frame))) => {
                break match frame {
                    Some(frame) => ConnectionError::Closed {
                        code: frame.code,
                        reason: frame.reason.into_owned(),
                    },
                    None => ConnectionError::Closed {
                        code: axum::extract::ws::close_code::STATUS,
                        reason: String::new(),
                    },
                };
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => break ConnectionError::Read(e.to_string()),
            None => break ConnectionError::abnormal(),
        };

        tokio::select! {
            _ = cancel.cancelled() => return,
            sent = messages.send(raw) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    };

    let _ = error.send(reason);
}

#[async_trait]
impl MessageRouter for WebSocketManager {
    async fn route(&self, session: &Arc<Session>, message: WebSocketMessage) -> bool {
        if self.handler.message(session, &message).await {
            return true;
        }

        let handlers = self.handlers.read().clone();
        if handlers.iter().any(|handler| handler(session, &message)) {
            return true;
        }

        warn!(session_id = %session.id(), event = %message.event, "Unhandled message");
        false
    }
}
