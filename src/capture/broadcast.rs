//! Channel-backed capture implementation
//!
//! The encoder side publishes samples into a [`BroadcastStreamSink`]; inbound
//! webcam/microphone packets are relayed to whoever subscribes to a
//! [`RelayStreamSrc`].

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::{CaptureManager, EncodedSample, StreamSink, StreamSrc};
use crate::config::CaptureConfig;
use crate::error::{AppError, Result};
use crate::webrtc::{MediaKind, RtpCodec};

const SAMPLE_CHANNEL_CAPACITY: usize = 64;

/// Outbound stream backed by a broadcast channel
pub struct BroadcastStreamSink {
    codec: RtpCodec,
    tx: broadcast::Sender<EncodedSample>,
}

impl BroadcastStreamSink {
    pub fn new(codec: RtpCodec) -> Self {
        let (tx, _) = broadcast::channel(SAMPLE_CHANNEL_CAPACITY);
        Self { codec, tx }
    }

    /// Publish a sample to every subscriber; dropped if nobody listens
    pub fn publish(&self, sample: EncodedSample) {
        let _ = self.tx.send(sample);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl StreamSink for BroadcastStreamSink {
    fn codec(&self) -> RtpCodec {
        self.codec.clone()
    }

    fn subscribe(&self) -> Result<broadcast::Receiver<EncodedSample>> {
        Ok(self.tx.subscribe())
    }
}

/// Inbound stream that relays packets to subscribers while running
pub struct RelayStreamSrc {
    kind: MediaKind,
    codec: Mutex<Option<RtpCodec>>,
    tx: broadcast::Sender<Bytes>,
}

impl RelayStreamSrc {
    pub fn new(kind: MediaKind) -> Self {
        let (tx, _) = broadcast::channel(SAMPLE_CHANNEL_CAPACITY);
        Self {
            kind,
            codec: Mutex::new(None),
            tx,
        }
    }

    pub fn codec(&self) -> Option<RtpCodec> {
        self.codec.lock().clone()
    }

    pub fn packets(&self) -> broadcast::Receiver<Bytes> {
        self.tx.subscribe()
    }
}

impl StreamSrc for RelayStreamSrc {
    fn start(&self, codec: RtpCodec) -> Result<()> {
        if codec.kind != self.kind {
            return Err(AppError::UnsupportedCodec(format!(
                "{} cannot feed a {} source",
                codec, self.kind
            )));
        }
        info!("Starting {} source with {}", self.kind, codec);
        *self.codec.lock() = Some(codec);
        Ok(())
    }

    fn write(&self, packet: &[u8]) {
        if self.codec.lock().is_none() {
            return;
        }
        let _ = self.tx.send(Bytes::copy_from_slice(packet));
    }

    fn stop(&self) {
        if self.codec.lock().take().is_some() {
            debug!("Stopped {} source", self.kind);
        }
    }

    fn is_running(&self) -> bool {
        self.codec.lock().is_some()
    }
}

/// Capture manager built from configuration
pub struct BroadcastCapture {
    audio: Arc<BroadcastStreamSink>,
    videos: HashMap<String, Arc<BroadcastStreamSink>>,
    video_ids: Vec<String>,
    webcam: Arc<RelayStreamSrc>,
    microphone: Arc<RelayStreamSrc>,
}

impl BroadcastCapture {
    pub fn new(config: &CaptureConfig) -> Result<Self> {
        let audio_codec = RtpCodec::from_name(&config.audio_codec)
            .filter(|c| c.kind == MediaKind::Audio)
            .ok_or_else(|| AppError::UnsupportedCodec(config.audio_codec.clone()))?;
        let video_codec = RtpCodec::from_name(&config.video_codec)
            .filter(|c| c.kind == MediaKind::Video)
            .ok_or_else(|| AppError::UnsupportedCodec(config.video_codec.clone()))?;

        let videos = config
            .video_ids
            .iter()
            .map(|id| (id.clone(), Arc::new(BroadcastStreamSink::new(video_codec.clone()))))
            .collect();

        Ok(Self {
            audio: Arc::new(BroadcastStreamSink::new(audio_codec)),
            videos,
            video_ids: config.video_ids.clone(),
            webcam: Arc::new(RelayStreamSrc::new(MediaKind::Video)),
            microphone: Arc::new(RelayStreamSrc::new(MediaKind::Audio)),
        })
    }

    /// Concrete audio sink, for the encoder to publish into
    pub fn audio_sink(&self) -> Arc<BroadcastStreamSink> {
        self.audio.clone()
    }

    /// Concrete video sink, for the encoder to publish into
    pub fn video_sink(&self, id: &str) -> Option<Arc<BroadcastStreamSink>> {
        self.videos.get(id).cloned()
    }

    pub fn webcam_src(&self) -> Arc<RelayStreamSrc> {
        self.webcam.clone()
    }

    pub fn microphone_src(&self) -> Arc<RelayStreamSrc> {
        self.microphone.clone()
    }
}

impl CaptureManager for BroadcastCapture {
    fn audio(&self) -> Arc<dyn StreamSink> {
        self.audio.clone()
    }

    fn video(&self, id: &str) -> Option<Arc<dyn StreamSink>> {
        self.videos
            .get(id)
            .map(|sink| sink.clone() as Arc<dyn StreamSink>)
    }

    fn video_ids(&self) -> Vec<String> {
        self.video_ids.clone()
    }

    fn webcam(&self) -> Arc<dyn StreamSrc> {
        self.webcam.clone()
    }

    fn microphone(&self) -> Arc<dyn StreamSrc> {
        self.microphone.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(ids: &[&str]) -> CaptureConfig {
        CaptureConfig {
            video_ids: ids.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_build_from_config() {
        let capture = BroadcastCapture::new(&config(&["main", "low"])).unwrap();
        assert_eq!(capture.video_ids(), vec!["main".to_string(), "low".to_string()]);
        assert_eq!(capture.audio().codec(), RtpCodec::OPUS);
        assert_eq!(capture.video("low").unwrap().codec(), RtpCodec::VP8);
        assert!(capture.video("cam99").is_none());
    }

    #[test]
    fn test_rejects_wrong_kind_codec() {
        let cfg = CaptureConfig {
            audio_codec: "vp8".to_string(),
            ..Default::default()
        };
        assert!(BroadcastCapture::new(&cfg).is_err());
    }

    #[tokio::test]
    async fn test_sink_delivers_to_subscribers() {
        let sink = BroadcastStreamSink::new(RtpCodec::VP8);
        let mut rx = sink.subscribe().unwrap();
        assert_eq!(sink.subscriber_count(), 1);

        sink.publish(EncodedSample {
            data: Bytes::from_static(b"frame"),
            duration: Duration::from_millis(33),
        });
        let sample = rx.recv().await.unwrap();
        assert_eq!(&sample.data[..], b"frame");

        drop(rx);
        assert_eq!(sink.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_relay_only_forwards_while_running() {
        let src = RelayStreamSrc::new(MediaKind::Video);
        let mut rx = src.packets();

        src.write(b"dropped");
        src.start(RtpCodec::VP8).unwrap();
        src.write(b"kept");
        assert_eq!(&rx.recv().await.unwrap()[..], b"kept");

        src.stop();
        assert!(!src.is_running());
        assert!(src.start(RtpCodec::OPUS).is_err());
    }
}
