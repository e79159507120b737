//! In-memory peers for tests

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use super::{WebRtcPeer, WebSocketPeer};
use crate::error::{AppError, Result};
use crate::webrtc::signaling::IceCandidate;

pub(crate) struct FakeWebSocketPeer {
    id: Uuid,
    sent: Mutex<Vec<(String, serde_json::Value)>>,
    destroyed: Mutex<Option<String>>,
}

impl FakeWebSocketPeer {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            sent: Mutex::new(Vec::new()),
            destroyed: Mutex::new(None),
        })
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(e, _)| e.clone()).collect()
    }

    pub(crate) fn messages(&self, event: &str) -> Vec<serde_json::Value> {
        self.sent
            .lock()
            .iter()
            .filter(|(e, _)| e == event)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub(crate) fn clear(&self) {
        self.sent.lock().clear();
    }

    pub(crate) fn destroyed_reason(&self) -> Option<String> {
        self.destroyed.lock().clone()
    }
}

impl WebSocketPeer for FakeWebSocketPeer {
    fn id(&self) -> Uuid {
        self.id
    }

    fn send(&self, event: &str, payload: serde_json::Value) -> Result<()> {
        if self.destroyed.lock().is_some() {
            return Err(AppError::PeerDestroyed);
        }
        self.sent.lock().push((event.to_string(), payload));
        Ok(())
    }

    fn destroy(&self, reason: &str) {
        let mut destroyed = self.destroyed.lock();
        if destroyed.is_none() {
            *destroyed = Some(reason.to_string());
        }
    }
}

pub(crate) struct FakeWebRtcPeer {
    id: Uuid,
    video_id: Mutex<String>,
    destroyed: AtomicBool,
    calls: Mutex<Vec<String>>,
}

impl FakeWebRtcPeer {
    pub(crate) fn new(video_id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            video_id: Mutex::new(video_id.to_string()),
            destroyed: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl WebRtcPeer for FakeWebRtcPeer {
    fn id(&self) -> Uuid {
        self.id
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<String> {
        self.calls.lock().push(format!("offer:{}", ice_restart));
        Ok("v=0 offer".to_string())
    }

    async fn create_answer(&self) -> Result<String> {
        self.calls.lock().push("answer".to_string());
        Ok("v=0 answer".to_string())
    }

    async fn set_offer(&self, sdp: String) -> Result<()> {
        self.calls.lock().push(format!("set_offer:{}", sdp));
        Ok(())
    }

    async fn set_answer(&self, sdp: String) -> Result<()> {
        self.calls.lock().push(format!("set_answer:{}", sdp));
        Ok(())
    }

    async fn set_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.calls.lock().push(format!("candidate:{}", candidate.candidate));
        Ok(())
    }

    fn set_video_id(&self, video_id: &str) -> Result<()> {
        if video_id.is_empty() {
            return Err(AppError::StreamNotFound(video_id.to_string()));
        }
        *self.video_id.lock() = video_id.to_string();
        Ok(())
    }

    fn video_id(&self) -> String {
        self.video_id.lock().clone()
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }
}
