//! Outbound media tracks
//!
//! A [`StreamTrack`] owns one local sample track and forwards samples from
//! whichever capture stream is currently bound to it. Binding a different
//! stream swaps the subscription without renegotiating, so the new stream
//! must produce the same codec.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use webrtc::media::Sample;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use super::codec::{MediaKind, RtpCodec};
use crate::capture::{EncodedSample, StreamSink};
use crate::error::{AppError, Result};
use crate::utils::{LogThrottler, SEND_WARN_INTERVAL};
use crate::warn_throttled;

pub struct StreamTrack {
    codec: RtpCodec,
    track: Arc<TrackLocalStaticSample>,
    stream: watch::Sender<Option<Arc<dyn StreamSink>>>,
    cancel: CancellationToken,
}

impl StreamTrack {
    /// Create a track whose tasks end when `cancel` fires or the track stops
    pub fn new(codec: RtpCodec, stream_id: &str, cancel: CancellationToken) -> Self {
        let track = Arc::new(TrackLocalStaticSample::new(
            codec.capability(),
            codec.kind.to_string(),
            stream_id.to_string(),
        ));
        let (stream, _) = watch::channel(None);

        Self {
            codec,
            track,
            stream,
            cancel,
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.codec.kind
    }

    pub fn codec(&self) -> &RtpCodec {
        &self.codec
    }

    /// Bind a capture stream, replacing the current one
    pub fn set_stream(&self, sink: Arc<dyn StreamSink>) -> Result<()> {
        let codec = sink.codec();
        if codec.name != self.codec.name || codec.kind != self.codec.kind {
            return Err(AppError::UnsupportedCodec(format!(
                "stream produces {} but the track carries {}",
                codec, self.codec
            )));
        }
        self.stream.send_replace(Some(sink));
        Ok(())
    }

    /// Unbind the current stream; the track goes silent
    pub fn remove_stream(&self) {
        self.stream.send_replace(None);
    }

    pub fn has_stream(&self) -> bool {
        self.stream.borrow().is_some()
    }

    /// Add the track to `pc` and start forwarding samples
    pub async fn add_to(&self, pc: &RTCPeerConnection, tracker: &TaskTracker) -> Result<()> {
        let track: Arc<dyn TrackLocal + Send + Sync> = self.track.clone();
        let sender = pc.add_track(track).await.map_err(|e| {
            AppError::WebRtcError(format!("Failed to add {} track: {}", self.kind(), e))
        })?;

        // Incoming RTCP has to be read for the interceptors to work
        let cancel = self.cancel.clone();
        tracker.spawn(async move {
            let mut buf = vec![0u8; 1500];
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = sender.read(&mut buf) => {
                        if result.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        self.spawn_forwarder(tracker);
        Ok(())
    }

    fn spawn_forwarder(&self, tracker: &TaskTracker) {
        let track = self.track.clone();
        let kind = self.kind();
        let cancel = self.cancel.clone();
        let mut stream_rx = self.stream.subscribe();

        tracker.spawn(async move {
            let throttler = LogThrottler::new(SEND_WARN_INTERVAL);
            'outer: loop {
                let sink = stream_rx.borrow_and_update().clone();
                let mut samples = match sink {
                    Some(sink) => match sink.subscribe() {
                        Ok(rx) => Some(rx),
                        Err(e) => {
                            warn!("Failed to subscribe to {} stream: {}", kind, e);
                            None
                        }
                    },
                    None => None,
                };

                loop {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break 'outer,
                        changed = stream_rx.changed() => {
                            if changed.is_err() {
                                break 'outer;
                            }
                            debug!("Switching {} track stream", kind);
                            continue 'outer;
                        }
                        sample = next_sample(&mut samples) => match sample {
                            Ok(sample) => {
                                let sample = Sample {
                                    data: sample.data,
                                    duration: sample.duration,
                                    ..Default::default()
                                };
                                if let Err(e) = track.write_sample(&sample).await {
                                    warn_throttled!(
                                        throttler,
                                        "write_sample",
                                        "Failed to write {} sample: {}",
                                        kind,
                                        e
                                    );
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                debug!("{} track lagged by {} samples", kind, n);
                            }
                            Err(broadcast::error::RecvError::Closed) => {
                                info!("{} stream ended", kind);
                                samples = None;
                            }
                        }
                    }
                }
            }
            debug!("{} track forwarder stopped", kind);
        });
    }

    /// Stop forwarding and drop the stream binding
    pub fn stop(&self) {
        self.remove_stream();
        self.cancel.cancel();
    }
}

async fn next_sample(
    samples: &mut Option<broadcast::Receiver<EncodedSample>>,
) -> std::result::Result<EncodedSample, broadcast::error::RecvError> {
    match samples {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
