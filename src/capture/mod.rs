//! Capture pipeline seam
//!
//! Encoding happens outside this crate. Outbound streams are exposed as
//! [`StreamSink`]s that hand out sample receivers; inbound media (a viewer's
//! webcam or microphone) is pushed into [`StreamSrc`]s as raw RTP packets.

mod broadcast;

pub use self::broadcast::{BroadcastCapture, BroadcastStreamSink, RelayStreamSrc};

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::broadcast as channel;

use crate::error::Result;
use crate::webrtc::RtpCodec;

/// An encoded media sample ready to be packetized
#[derive(Debug, Clone)]
pub struct EncodedSample {
    pub data: Bytes,
    pub duration: Duration,
}

/// Outbound encoded stream (desktop audio or one video variant)
pub trait StreamSink: Send + Sync {
    /// Codec of every sample this stream produces
    fn codec(&self) -> RtpCodec;

    /// Start receiving samples. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> Result<channel::Receiver<EncodedSample>>;
}

/// Inbound stream fed from a viewer's remote track
pub trait StreamSrc: Send + Sync {
    fn start(&self, codec: RtpCodec) -> Result<()>;

    /// Push one marshalled RTP packet
    fn write(&self, packet: &[u8]);

    fn stop(&self);

    fn is_running(&self) -> bool;
}

/// Broadcast (e.g. RTMP restream) status reported to admins
#[derive(Debug, Clone, Default, Serialize)]
pub struct BroadcastStatus {
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Capture pipeline entry point
pub trait CaptureManager: Send + Sync {
    /// The single shared desktop audio stream
    fn audio(&self) -> Arc<dyn StreamSink>;

    /// A desktop video stream by id
    fn video(&self, id: &str) -> Option<Arc<dyn StreamSink>>;

    /// Available video stream ids, default first
    fn video_ids(&self) -> Vec<String>;

    fn webcam(&self) -> Arc<dyn StreamSrc>;

    fn microphone(&self) -> Arc<dyn StreamSrc>;

    fn broadcast_status(&self) -> BroadcastStatus {
        BroadcastStatus::default()
    }
}
