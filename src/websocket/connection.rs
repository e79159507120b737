//! One viewer's signaling socket
//!
//! Outbound messages are queued on an unbounded channel and written by a
//! dedicated writer task, so sending never blocks the caller. Reading is
//! driven by the manager's connection loop.

use std::borrow::Cow;
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message};
use futures::{Sink, SinkExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::events::{SystemDisconnect, WebSocketMessage, SYSTEM_DISCONNECT};
use crate::session::WebSocketPeer;

/// Why a connection loop ended
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection closed ({code}): {reason}")]
    Closed { code: u16, reason: String },

    #[error("read error: {0}")]
    Read(String),

    #[error("ping error: {0}")]
    Ping(String),
}

impl ConnectionError {
    /// A stream that ended without a close frame
    pub fn abnormal() -> Self {
        Self::Closed {
            code: close_code::ABNORMAL,
            reason: "stream ended".to_string(),
        }
    }

    /// Whether the viewer is expected to come back
    ///
    /// Only a normal or going-away close is a deliberate goodbye; anything
    /// else keeps the session alive for the reconnect grace period.
    pub fn is_delayed_disconnect(&self) -> bool {
        match self {
            Self::Closed { code, .. } => !matches!(*code, close_code::NORMAL | close_code::AWAY),
            Self::Read(_) | Self::Ping(_) => true,
        }
    }
}

pub struct WebSocketConnection {
    id: Uuid,
    outbox: mpsc::UnboundedSender<Message>,
    destroyed: AtomicBool,
}

impl WebSocketConnection {
    /// Wrap the write half of a socket and start its writer task
    ///
    /// The writer stops after a close frame, when every handle is dropped or
    /// when `cancel` fires. Messages already queued at cancellation are still
    /// written.
    pub fn spawn<S>(sink: S, cancel: CancellationToken, tracker: &TaskTracker) -> Arc<Self>
    where
        S: Sink<Message> + Send + Unpin + 'static,
        S::Error: Display,
    {
        let id = Uuid::new_v4();
        let (outbox, mut rx) = mpsc::unbounded_channel::<Message>();

        tracker.spawn(async move {
            let mut sink = sink;
            loop {
                let message = tokio::select! {
                    biased;
                    message = rx.recv() => message,
                    _ = cancel.cancelled() => {
                        // flush whatever was queued before the loop ended
                        while let Ok(message) = rx.try_recv() {
                            let closing = matches!(message, Message::Close(_));
                            if sink.send(message).await.is_err() || closing {
                                break;
                            }
                        }
                        break;
                    }
                };

                let Some(message) = message else {
                    break;
                };
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = sink.send(message).await {
                    debug!("Failed to write to websocket {}: {}", id, e);
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = sink.close().await;
            debug!("Websocket {} writer stopped", id);
        });

        Arc::new(Self {
            id,
            outbox,
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Queue a keepalive ping
    pub fn ping(&self) -> std::result::Result<(), ConnectionError> {
        if self.is_destroyed() {
            return Err(ConnectionError::Ping("connection destroyed".to_string()));
        }
        self.outbox
            .send(Message::Ping(Vec::new()))
            .map_err(|_| ConnectionError::Ping("writer stopped".to_string()))
    }

    fn queue(&self, event: &str, payload: serde_json::Value) -> Result<()> {
        let text = serde_json::to_string(&WebSocketMessage::new(event, payload))?;
        self.outbox
            .send(Message::Text(text))
            .map_err(|_| AppError::PeerNotConnected)
    }
}

impl WebSocketPeer for WebSocketConnection {
    fn id(&self) -> Uuid {
        self.id
    }

    fn send(&self, event: &str, payload: serde_json::Value) -> Result<()> {
        if self.is_destroyed() {
            return Err(AppError::PeerDestroyed);
        }
        self.queue(event, payload)
    }

    fn destroy(&self, reason: &str) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("Destroying websocket {}: {}", self.id, reason);

        let payload = SystemDisconnect {
            message: reason.to_string(),
        };
        match serde_json::to_value(&payload) {
            Ok(value) => {
                if let Err(e) = self.queue(SYSTEM_DISCONNECT, value) {
                    debug!("Failed to send disconnect message: {}", e);
                }
            }
            Err(e) => debug!("Failed to serialize disconnect message: {}", e),
        }

        let _ = self.outbox.send(Message::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: Cow::Owned(reason.to_string()),
        })));
    }
}
