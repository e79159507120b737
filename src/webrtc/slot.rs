//! Inbound passthrough slots
//!
//! The system forwards at most one remote webcam and one remote microphone at
//! a time. Each kind has one [`InboundSlot`]; a new remote track evicts and
//! stops the previous occupant before its own source is started.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecParameters, RTPCodecType};

use super::codec::{MediaKind, RtpCodec};
use crate::capture::StreamSrc;
use crate::error::{AppError, Result};
use crate::session::MemberProfile;

/// Stop handle of one inbound track
///
/// Stopping cancels the track's read loop and stops its source once; later
/// calls do nothing, so an evicted track cannot stop its successor's source.
pub struct TrackStopper {
    id: Uuid,
    kind: MediaKind,
    stopped: AtomicBool,
    cancel: CancellationToken,
    src: Arc<dyn StreamSrc>,
}

impl TrackStopper {
    pub fn new(kind: MediaKind, src: Arc<dyn StreamSrc>) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            kind,
            stopped: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            src,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Cancelled once the track is stopped
    pub fn cancelled(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn write(&self, packet: &[u8]) {
        if !self.is_stopped() {
            self.src.write(packet);
        }
    }

    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        self.src.stop();
        debug!("Stopped inbound {} track {}", self.kind, self.id);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Single occupancy slot for one inbound media kind
pub struct InboundSlot {
    kind: MediaKind,
    occupant: Mutex<Option<Arc<TrackStopper>>>,
}

impl InboundSlot {
    pub fn new(kind: MediaKind) -> Self {
        Self {
            kind,
            occupant: Mutex::new(None),
        }
    }

    /// Evict the current occupant, then start `stopper`'s source with `codec`
    ///
    /// Returns the id of the evicted track, if any. If the source fails to
    /// start the slot is left empty.
    pub fn acquire(&self, stopper: Arc<TrackStopper>, codec: RtpCodec) -> Result<Option<Uuid>> {
        let mut occupant = self.occupant.lock();

        let evicted = occupant.take().map(|previous| {
            info!("Evicting inbound {} track {}", self.kind, previous.id());
            previous.stop();
            previous.id()
        });

        stopper.src.start(codec)?;
        *occupant = Some(stopper);
        Ok(evicted)
    }

    /// Stop `stopper` and free the slot if it is still the occupant
    pub fn release(&self, stopper: &TrackStopper) -> bool {
        let released = {
            let mut occupant = self.occupant.lock();
            match occupant.as_ref() {
                Some(current) if current.id() == stopper.id() => {
                    occupant.take();
                    true
                }
                _ => false,
            }
        };
        stopper.stop();
        released
    }

    pub fn is_occupied(&self) -> bool {
        self.occupant.lock().is_some()
    }

    pub fn occupant_id(&self) -> Option<Uuid> {
        self.occupant.lock().as_ref().map(|s| s.id())
    }
}

/// Decide whether a remote track may be forwarded
pub fn admit_remote_track(
    profile: &MemberProfile,
    kind: RTPCodecType,
    params: &RTCRtpCodecParameters,
) -> Result<(MediaKind, RtpCodec)> {
    if !profile.can_share_media {
        return Err(AppError::Forbidden("media sharing is disabled".to_string()));
    }

    let kind = MediaKind::from_codec_type(kind)
        .ok_or_else(|| AppError::UnsupportedCodec(format!("unsupported track kind {}", kind)))?;

    let codec = RtpCodec::from_parameters(params)
        .filter(|c| c.kind == kind)
        .ok_or_else(|| AppError::UnsupportedCodec(params.capability.mime_type.clone()))?;

    Ok((kind, codec))
}
