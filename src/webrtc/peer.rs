//! One viewer's media connection

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};
use uuid::Uuid;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;

use super::cursor::{stream_cursor, CursorBridge, CursorSink};
use super::payload::{encode_cursor_image, encode_cursor_position};
use super::signaling::IceCandidate;
use super::track::StreamTrack;
use crate::capture::CaptureManager;
use crate::desktop::CursorImage;
use crate::error::{AppError, Result};
use crate::session::{Session, WebRtcPeer};
use crate::utils::{LogThrottler, SEND_WARN_INTERVAL};
use crate::warn_throttled;

/// Everything a peer is assembled from
pub struct PeerParts {
    pub pc: Arc<RTCPeerConnection>,
    pub data_channel: Arc<RTCDataChannel>,
    pub audio: StreamTrack,
    pub video: StreamTrack,
    pub video_id: String,
    pub ice_trickle: bool,
    /// Ends the peer's background tasks
    pub cancel: CancellationToken,
}

pub struct PeerConnection {
    id: Uuid,
    session_id: String,
    session: Weak<Session>,
    pc: Arc<RTCPeerConnection>,
    data_channel: Arc<RTCDataChannel>,
    audio: StreamTrack,
    video: StreamTrack,
    video_id: RwLock<String>,
    ice_trickle: bool,
    capture: Arc<dyn CaptureManager>,
    cursor: CursorBridge,
    throttler: LogThrottler,
    tracker: TaskTracker,
    cancel: CancellationToken,
    destroyed: AtomicBool,
}

impl PeerConnection {
    pub fn new(
        parts: PeerParts,
        session: &Arc<Session>,
        capture: Arc<dyn CaptureManager>,
        cursor: CursorBridge,
        tracker: TaskTracker,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session.id().to_string(),
            session: Arc::downgrade(session),
            pc: parts.pc,
            data_channel: parts.data_channel,
            audio: parts.audio,
            video: parts.video,
            video_id: RwLock::new(parts.video_id),
            ice_trickle: parts.ice_trickle,
            capture,
            cursor,
            throttler: LogThrottler::new(SEND_WARN_INTERVAL),
            tracker,
            cancel: parts.cancel,
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn signaling_state(&self) -> RTCSignalingState {
        self.pc.signaling_state()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Data channel opened: attach to the cursor feeds and start streaming
    pub fn data_channel_opened(self: &Arc<Self>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let Some(snapshot) = self.cursor.attach(tx) else {
            debug!(session_id = %self.session_id, "Cursor feeds already attached");
            return;
        };
        info!(session_id = %self.session_id, "Data channel opened");

        let peer = self.clone();
        let cancel = self.cancel.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = stream_cursor(peer.as_ref(), snapshot, rx) => {}
            }
        });
    }

    /// Data channel closed: detach from the cursor feeds
    pub fn data_channel_closed(&self) {
        if self.cursor.detach() {
            info!(session_id = %self.session_id, "Data channel closed");
        }
    }

    /// Unbind both outbound streams
    pub fn release_tracks(&self) {
        self.video.remove_stream();
        self.audio.remove_stream();
    }

    async fn send_data(&self, data: bytes::Bytes) -> Result<()> {
        if self.data_channel.ready_state() != RTCDataChannelState::Open {
            return Err(AppError::PeerNotConnected);
        }
        self.data_channel
            .send(&data)
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to send data: {}", e)))?;
        Ok(())
    }

    /// Apply `desc` locally and return the resulting SDP
    ///
    /// Without trickle ICE this waits until candidate gathering completes so
    /// the SDP carries every candidate.
    async fn set_local(&self, desc: RTCSessionDescription) -> Result<String> {
        if self.ice_trickle {
            self.pc.set_local_description(desc).await.map_err(|e| {
                AppError::WebRtcError(format!("Failed to set local description: {}", e))
            })?;
        } else {
            let mut gathered = self.pc.gathering_complete_promise().await;
            self.pc.set_local_description(desc).await.map_err(|e| {
                AppError::WebRtcError(format!("Failed to set local description: {}", e))
            })?;
            let _ = gathered.recv().await;
        }

        self.pc
            .local_description()
            .await
            .map(|desc| desc.sdp)
            .ok_or_else(|| AppError::WebRtcError("No local description".to_string()))
    }

    fn check_alive(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(AppError::PeerDestroyed);
        }
        Ok(())
    }
}

#[async_trait]
impl WebRtcPeer for PeerConnection {
    fn id(&self) -> Uuid {
        self.id
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<String> {
        self.check_alive()?;
        let options = RTCOfferOptions {
            ice_restart,
            ..Default::default()
        };
        let offer = self
            .pc
            .create_offer(Some(options))
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to create offer: {}", e)))?;
        self.set_local(offer).await
    }

    async fn create_answer(&self) -> Result<String> {
        self.check_alive()?;
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to create answer: {}", e)))?;
        self.set_local(answer).await
    }

    async fn set_offer(&self, sdp: String) -> Result<()> {
        self.check_alive()?;
        let offer = RTCSessionDescription::offer(sdp)
            .map_err(|e| AppError::BadRequest(format!("Invalid SDP offer: {}", e)))?;
        self.pc.set_remote_description(offer).await.map_err(|e| {
            AppError::WebRtcError(format!("Failed to set remote description: {}", e))
        })
    }

    async fn set_answer(&self, sdp: String) -> Result<()> {
        self.check_alive()?;
        let answer = RTCSessionDescription::answer(sdp)
            .map_err(|e| AppError::BadRequest(format!("Invalid SDP answer: {}", e)))?;
        self.pc.set_remote_description(answer).await.map_err(|e| {
            AppError::WebRtcError(format!("Failed to set remote description: {}", e))
        })
    }

    async fn set_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.check_alive()?;
        self.pc
            .add_ice_candidate(candidate.into())
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to add ICE candidate: {}", e)))
    }

    fn set_video_id(&self, video_id: &str) -> Result<()> {
        let stream = self
            .capture
            .video(video_id)
            .ok_or_else(|| AppError::StreamNotFound(video_id.to_string()))?;
        self.video.set_stream(stream)?;
        *self.video_id.write() = video_id.to_string();
        info!(session_id = %self.session_id, "Switched video to {}", video_id);
        Ok(())
    }

    fn video_id(&self) -> String {
        self.video_id.read().clone()
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(session_id = %self.session_id, "Destroying webrtc peer {}", self.id);

        self.cursor.detach();
        self.video.stop();
        self.audio.stop();
        self.cancel.cancel();

        let pc = self.pc.clone();
        self.tracker.spawn(async move {
            if let Err(e) = pc.close().await {
                debug!("Failed to close peer connection: {}", e);
            }
        });
    }
}

#[async_trait]
impl CursorSink for PeerConnection {
    async fn send_cursor_image(&self, image: &CursorImage) -> Result<()> {
        let result = self.send_data(encode_cursor_image(image)).await;
        if let Err(ref e) = result {
            warn_throttled!(
                self.throttler,
                "cursor_image",
                "Failed to send cursor image to {}: {}",
                self.session_id,
                e
            );
        }
        result
    }

    async fn send_cursor_position(&self, x: i32, y: i32) -> Result<()> {
        // the host moves the cursor itself
        if self.session.upgrade().is_some_and(|s| s.is_host()) {
            return Ok(());
        }
        let result = self.send_data(encode_cursor_position(x, y)).await;
        if let Err(ref e) = result {
            warn_throttled!(
                self.throttler,
                "cursor_position",
                "Failed to send cursor position to {}: {}",
                self.session_id,
                e
            );
        }
        result
    }
}
