//! Peer connection factory
//!
//! The manager owns what every peer shares: the ICE mux listeners, the cursor
//! feeds, and the two inbound passthrough slots. [`WebRtcManager::create_peer`]
//! assembles one viewer's connection and returns its initial offer.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice::mdns::MulticastDnsMode;
use webrtc::ice::udp_network::{EphemeralUDP, UDPNetwork};
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_candidate_type::RTCIceCandidateType;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::packet::Packet;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecParameters, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;
use webrtc::util::Marshal;

use super::codec::{MediaKind, RtpCodec};
use super::cursor::{CursorBridge, CursorImageFeed, CursorPositionFeed};
use super::handler::DataChannelHandler;
use super::mdns::{mdns_host_name, mdns_mode_label, parse_mdns_mode};
use super::mux::IceMux;
use super::peer::{PeerConnection, PeerParts};
use super::signaling::{ConnectionState, IceCandidate, Renegotiation};
use super::slot::{admit_remote_track, InboundSlot, TrackStopper};
use super::track::StreamTrack;
use crate::capture::{CaptureManager, StreamSink};
use crate::config::{IceServer, WebRtcConfig};
use crate::desktop::DesktopManager;
use crate::error::{AppError, Result};
use crate::events::{MessageRouter, SignalDescription, SIGNAL_CANDIDATE, SIGNAL_OFFER};
use crate::session::{Session, WebRtcPeer};

/// Time without network activity before the ICE agent reports disconnected
const DISCONNECTED_TIMEOUT: Duration = Duration::from_secs(4);
/// Time after disconnected before the ICE agent reports failed
const FAILED_TIMEOUT: Duration = Duration::from_secs(6);
/// Keepalive traffic interval when no media flows
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(2);

const STREAM_ID: &str = "stream";
const DATA_CHANNEL_LABEL: &str = "data";

pub struct WebRtcManager {
    config: WebRtcConfig,
    capture: Arc<dyn CaptureManager>,
    cursor_image: Arc<CursorImageFeed>,
    cursor_position: Arc<CursorPositionFeed>,
    data: Arc<DataChannelHandler>,
    webcam: InboundSlot,
    microphone: InboundSlot,
    mux: RwLock<Option<Arc<IceMux>>>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl WebRtcManager {
    pub fn new(
        config: WebRtcConfig,
        desktop: Arc<dyn DesktopManager>,
        capture: Arc<dyn CaptureManager>,
    ) -> Arc<Self> {
        let cursor_image = Arc::new(CursorImageFeed::new(desktop.clone()));
        let cursor_position = Arc::new(CursorPositionFeed::new(desktop.clone()));
        let data = Arc::new(DataChannelHandler::new(desktop, cursor_position.clone()));

        Arc::new(Self {
            config,
            capture,
            cursor_image,
            cursor_position,
            data,
            webcam: InboundSlot::new(MediaKind::Video),
            microphone: InboundSlot::new(MediaKind::Audio),
            mux: RwLock::new(None),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        })
    }

    /// Bind the mux listeners and start following the cursor
    ///
    /// A configured mux port that cannot be bound is a fatal error.
    pub async fn start(&self) -> Result<()> {
        let mux = IceMux::bind(&self.config).await?;
        *self.mux.write() = Some(Arc::new(mux));

        self.cursor_image.start(&self.tracker);

        info!(
            ice_lite = self.config.ice_lite,
            ice_trickle = self.config.ice_trickle,
            ice_servers = self.config.ice_servers.len(),
            nat1to1 = %self.config.nat1to1.join(","),
            epr = %format!("{}-{}", self.config.ephemeral_min, self.config.ephemeral_max),
            tcp_mux = self.config.tcp_mux,
            udp_mux = self.config.udp_mux,
            "WebRTC manager started"
        );
        Ok(())
    }

    /// Stop every background task and wait for them to exit
    pub async fn shutdown(&self) {
        info!("Shutting down WebRTC manager");
        self.shutdown.cancel();
        self.cursor_image.shutdown();

        let mux = self.mux.write().take();
        if let Some(mux) = mux {
            mux.close().await;
        }

        self.tracker.close();
        self.tracker.wait().await;
        info!("WebRTC manager stopped");
    }

    pub fn ice_servers(&self) -> Vec<IceServer> {
        self.config.ice_servers.clone()
    }

    /// Where data channel text messages are dispatched
    pub fn set_router(&self, router: Weak<dyn MessageRouter>) {
        self.data.set_router(router);
    }

    pub fn cursor_position(&self) -> &Arc<CursorPositionFeed> {
        &self.cursor_position
    }

    pub fn webcam_slot(&self) -> &InboundSlot {
        &self.webcam
    }

    pub fn microphone_slot(&self) -> &InboundSlot {
        &self.microphone
    }

    /// Build a peer connection for `session` and return its initial offer
    ///
    /// The new peer supersedes any previous one of the session.
    pub async fn create_peer(self: &Arc<Self>, session: &Arc<Session>, video_id: &str) -> Result<String> {
        let (peer, offer) = self.build_peer(session, video_id).await?;
        session.set_webrtc_peer(peer);
        Ok(offer)
    }

    async fn build_peer(
        self: &Arc<Self>,
        session: &Arc<Session>,
        video_id: &str,
    ) -> Result<(Arc<PeerConnection>, String)> {
        info!(session_id = %session.id(), "Creating webrtc peer");

        // every peer carries the same audio and video codecs
        let audio_stream = self.capture.audio();
        let video_stream = self
            .capture
            .video(video_id)
            .ok_or_else(|| AppError::StreamNotFound(video_id.to_string()))?;

        let codecs = [audio_stream.codec(), video_stream.codec()];
        let pc = Arc::new(self.new_connection(&codecs, session.id()).await?);

        let cancel = self.shutdown.child_token();
        let audio = StreamTrack::new(codecs[0].clone(), STREAM_ID, cancel.child_token());
        let video = StreamTrack::new(codecs[1].clone(), STREAM_ID, cancel.child_token());

        let data_channel = match self
            .attach_media(&pc, &audio, audio_stream, &video, video_stream)
            .await
        {
            Ok(dc) => dc,
            Err(e) => {
                audio.stop();
                video.stop();
                cancel.cancel();
                if let Err(close_err) = pc.close().await {
                    debug!("Failed to close partial peer connection: {}", close_err);
                }
                return Err(e);
            }
        };

        if self.config.ice_trickle {
            self.on_ice_candidate(&pc, session);
        }

        let peer = Arc::new(PeerConnection::new(
            PeerParts {
                pc: pc.clone(),
                data_channel: data_channel.clone(),
                audio,
                video,
                video_id: video_id.to_string(),
                ice_trickle: self.config.ice_trickle,
                cancel,
            },
            session,
            self.capture.clone(),
            CursorBridge::new(self.cursor_image.clone(), self.cursor_position.clone()),
            self.tracker.clone(),
        ));

        self.on_track(&pc, session);
        self.on_state_change(&pc, &peer, session);
        self.on_data_channel(&data_channel, &peer, session);

        let offer = match peer.create_offer(false).await {
            Ok(offer) => offer,
            Err(e) => {
                peer.destroy();
                return Err(e);
            }
        };

        // registered only after the initial offer, otherwise it fires and
        // intercepts the initial negotiation
        self.on_negotiation_needed(&pc, &peer, session);

        Ok((peer, offer))
    }

    async fn new_connection(&self, codecs: &[RtpCodec], session_id: &str) -> Result<RTCPeerConnection> {
        let mut media_engine = MediaEngine::default();
        for codec in codecs {
            codec.register(&mut media_engine)?;
        }

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(|e| {
            AppError::WebRtcError(format!("Failed to register interceptors: {}", e))
        })?;

        let api = APIBuilder::new()
            .with_setting_engine(self.setting_engine(session_id)?)
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        // a lite agent only offers host candidates
        let ice_servers = if self.config.ice_lite {
            vec![]
        } else {
            self.config
                .ice_servers
                .iter()
                .map(|server| RTCIceServer {
                    urls: server.urls.clone(),
                    username: server.username.clone(),
                    credential: server.credential.clone(),
                    ..Default::default()
                })
                .collect()
        };

        api.new_peer_connection(RTCConfiguration {
            ice_servers,
            ..Default::default()
        })
        .await
        .map_err(|e| AppError::WebRtcError(format!("Failed to create peer connection: {}", e)))
    }

    fn setting_engine(&self, session_id: &str) -> Result<SettingEngine> {
        let mut engine = SettingEngine::default();
        engine.set_lite(self.config.ice_lite);
        engine.set_ice_timeouts(
            Some(DISCONNECTED_TIMEOUT),
            Some(FAILED_TIMEOUT),
            Some(KEEPALIVE_INTERVAL),
        );

        if !self.config.nat1to1.is_empty() {
            engine.set_nat_1to1_ips(self.config.nat1to1.clone(), RTCIceCandidateType::Host);
        }

        let udp_mux = self.mux.read().as_ref().and_then(|mux| mux.udp());
        if let Some(udp_mux) = udp_mux {
            engine.set_udp_network(UDPNetwork::Muxed(udp_mux));
        } else if self.config.ephemeral_min > 0 && self.config.ephemeral_max > 0 {
            let ephemeral = EphemeralUDP::new(self.config.ephemeral_min, self.config.ephemeral_max)
                .map_err(|e| AppError::Config(format!("Invalid ephemeral port range: {}", e)))?;
            engine.set_udp_network(UDPNetwork::Ephemeral(ephemeral));
        }

        let mode = parse_mdns_mode(&self.config.mdns_mode).unwrap_or_else(|| {
            warn!("Unknown mDNS mode '{}', using query_only", self.config.mdns_mode);
            MulticastDnsMode::QueryOnly
        });
        engine.set_ice_multicast_dns_mode(mode);
        if mode == MulticastDnsMode::QueryAndGather {
            engine.set_multicast_dns_host_name(mdns_host_name(session_id));
        }
        debug!(session_id, "WebRTC mDNS mode: {}", mdns_mode_label(mode));

        Ok(engine)
    }

    async fn attach_media(
        &self,
        pc: &RTCPeerConnection,
        audio: &StreamTrack,
        audio_stream: Arc<dyn StreamSink>,
        video: &StreamTrack,
        video_stream: Arc<dyn StreamSink>,
    ) -> Result<Arc<RTCDataChannel>> {
        audio.set_stream(audio_stream)?;
        audio.add_to(pc, &self.tracker).await?;

        video.set_stream(video_stream)?;
        video.add_to(pc, &self.tracker).await?;

        pc.create_data_channel(DATA_CHANNEL_LABEL, None)
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to create data channel: {}", e)))
    }

    fn on_ice_candidate(&self, pc: &RTCPeerConnection, session: &Arc<Session>) {
        let session = Arc::downgrade(session);
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let session = session.clone();
            Box::pin(async move {
                let Some(session) = session.upgrade() else {
                    return;
                };
                let Some(candidate) = candidate else {
                    debug!(session_id = %session.id(), "All local ICE candidates sent");
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => session.send(SIGNAL_CANDIDATE, &IceCandidate::from(init)),
                    Err(e) => warn!(session_id = %session.id(), "Failed to encode ICE candidate: {}", e),
                }
            })
        }));
    }

    fn on_track(self: &Arc<Self>, pc: &Arc<RTCPeerConnection>, session: &Arc<Session>) {
        let manager = Arc::downgrade(self);
        let session = Arc::downgrade(session);
        let weak_pc = Arc::downgrade(pc);
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let manager = manager.clone();
                let session = session.clone();
                let remote = ReceivedTrack {
                    pc: weak_pc.clone(),
                    track,
                    receiver,
                };
                Box::pin(async move {
                    let (Some(manager), Some(session)) = (manager.upgrade(), session.upgrade())
                    else {
                        return;
                    };
                    let tracker = manager.tracker.clone();
                    tracker.spawn(async move {
                        manager.receive_track(session, Arc::new(remote)).await;
                    });
                })
            },
        ));
    }

    /// Forward one remote track into the matching inbound slot until it ends
    async fn receive_track(&self, session: Arc<Session>, remote: Arc<dyn RemoteTrack>) {
        let params = remote.codec();
        let mime = params.capability.mime_type.clone();
        let remote_kind = remote.kind();
        info!(session_id = %session.id(), kind = %remote_kind, mime = %mime, "Received remote track");

        let (kind, codec) = match admit_remote_track(&session.profile(), remote_kind, &params) {
            Ok(admitted) => admitted,
            Err(e) => {
                warn!(session_id = %session.id(), kind = %remote_kind, mime = %mime, "Rejecting remote track: {}", e);
                remote.stop().await;
                return;
            }
        };

        let (slot, src) = match kind {
            MediaKind::Video => (&self.webcam, self.capture.webcam()),
            MediaKind::Audio => (&self.microphone, self.capture.microphone()),
        };

        let stopper = TrackStopper::new(kind, src);
        if let Err(e) = slot.acquire(stopper.clone(), codec) {
            warn!(session_id = %session.id(), kind = %kind, mime = %mime, "Failed to start inbound stream: {}", e);
            remote.stop().await;
            return;
        }
        drop(session);

        let stopped = stopper.cancelled();
        let shutdown = self.shutdown.clone();

        // keyframe requests only mean something to a video decoder
        if kind == MediaKind::Video {
            self.spawn_pli(remote.clone(), stopped.clone());
        }

        loop {
            tokio::select! {
                _ = stopped.cancelled() => break,
                _ = shutdown.cancelled() => break,
                result = remote.read_packet() => match result {
                    Ok(packet) => stopper.write(&packet),
                    Err(e) => {
                        warn!(kind = %kind, mime = %mime, "Failed to read from remote track: {}", e);
                        break;
                    }
                }
            }
        }

        slot.release(&stopper);
        remote.stop().await;
        info!(kind = %kind, mime = %mime, "Remote track finished");
    }

    /// Ask the remote side for a keyframe on a fixed interval
    fn spawn_pli(&self, remote: Arc<dyn RemoteTrack>, stopped: CancellationToken) {
        let period = Duration::from_millis(self.config.pli_interval_ms);
        let shutdown = self.shutdown.clone();
        self.tracker.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = stopped.cancelled() => break,
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => match remote.request_keyframe().await {
                        Ok(()) => {}
                        Err(AppError::PeerNotConnected) => break,
                        Err(e) => warn!("Failed to send PLI: {}", e),
                    }
                }
            }
        });
    }

    fn on_state_change(&self, pc: &RTCPeerConnection, peer: &Arc<PeerConnection>, session: &Arc<Session>) {
        let peer = Arc::downgrade(peer);
        let session = Arc::downgrade(session);
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let peer = peer.clone();
            let session = session.clone();
            Box::pin(async move {
                let Some(peer) = peer.upgrade() else {
                    return;
                };
                let Some(state) = ConnectionState::from_rtc(state) else {
                    return;
                };
                info!(session_id = %peer.session_id(), "Peer connection state: {}", state);

                match state {
                    ConnectionState::Connected => {
                        if let Some(session) = session.upgrade() {
                            session.set_webrtc_connected(peer.id(), true);
                        }
                    }
                    ConnectionState::Disconnected | ConnectionState::Failed => peer.destroy(),
                    ConnectionState::Closed => {
                        if let Some(session) = session.upgrade() {
                            session.set_webrtc_connected(peer.id(), false);
                        }
                        peer.data_channel_closed();
                        peer.release_tracks();
                    }
                    ConnectionState::New | ConnectionState::Connecting => {}
                }
            })
        }));
    }

    fn on_data_channel(&self, dc: &RTCDataChannel, peer: &Arc<PeerConnection>, session: &Arc<Session>) {
        let weak = Arc::downgrade(peer);
        dc.on_open(Box::new(move || {
            Box::pin(async move {
                if let Some(peer) = weak.upgrade() {
                    peer.data_channel_opened();
                }
            })
        }));

        let weak = Arc::downgrade(peer);
        dc.on_close(Box::new(move || {
            let peer = weak.clone();
            Box::pin(async move {
                if let Some(peer) = peer.upgrade() {
                    peer.data_channel_closed();
                }
            })
        }));

        let data = self.data.clone();
        let session = Arc::downgrade(session);
        dc.on_message(Box::new(move |message: DataChannelMessage| {
            let data = data.clone();
            let session = session.clone();
            Box::pin(async move {
                let Some(session) = session.upgrade() else {
                    return;
                };
                if message.is_string {
                    data.handle_text(&session, &message.data).await;
                } else {
                    data.handle_binary(&session, &message.data);
                }
            })
        }));
    }

    fn on_negotiation_needed(&self, pc: &RTCPeerConnection, peer: &Arc<PeerConnection>, session: &Arc<Session>) {
        let peer = Arc::downgrade(peer);
        let session = Arc::downgrade(session);
        pc.on_negotiation_needed(Box::new(move || {
            let peer = peer.clone();
            let session = session.clone();
            Box::pin(async move {
                let (Some(peer), Some(session)) = (peer.upgrade(), session.upgrade()) else {
                    return;
                };
                renegotiate(&peer, &session).await;
            })
        }));
    }
}

/// Send a fresh offer unless an offer/answer exchange is still in flight
///
/// Returns whether an offer went out. A skipped renegotiation is dropped,
/// not queued.
async fn renegotiate(peer: &PeerConnection, session: &Session) -> bool {
    if Renegotiation::decide(peer.signaling_state()) == Renegotiation::Skip {
        warn!(session_id = %session.id(), "Negotiation needed but connection isn't stable, skipping");
        return false;
    }

    match peer.create_offer(false).await {
        Ok(sdp) => {
            session.send(SIGNAL_OFFER, &SignalDescription { sdp });
            true
        }
        Err(e) => {
            warn!(session_id = %session.id(), "Renegotiation offer failed: {}", e);
            false
        }
    }
}

/// Remote media track as the forwarding loop sees it
#[async_trait]
trait RemoteTrack: Send + Sync {
    fn kind(&self) -> RTPCodecType;

    fn codec(&self) -> RTCRtpCodecParameters;

    /// Next RTP packet, marshalled
    async fn read_packet(&self) -> Result<Bytes>;

    /// Send a picture loss indication for this track
    async fn request_keyframe(&self) -> Result<()>;

    async fn stop(&self);
}

struct ReceivedTrack {
    pc: Weak<RTCPeerConnection>,
    track: Arc<TrackRemote>,
    receiver: Arc<RTCRtpReceiver>,
}

#[async_trait]
impl RemoteTrack for ReceivedTrack {
    fn kind(&self) -> RTPCodecType {
        self.track.kind()
    }

    fn codec(&self) -> RTCRtpCodecParameters {
        self.track.codec()
    }

    async fn read_packet(&self) -> Result<Bytes> {
        let (packet, _) = self
            .track
            .read_rtp()
            .await
            .map_err(|e| AppError::WebRtcError(e.to_string()))?;
        packet
            .marshal()
            .map_err(|e| AppError::WebRtcError(format!("Failed to marshal RTP packet: {}", e)))
    }

    async fn request_keyframe(&self) -> Result<()> {
        let pc = self.pc.upgrade().ok_or(AppError::PeerNotConnected)?;
        let pli: [Box<dyn Packet + Send + Sync>; 1] = [Box::new(PictureLossIndication {
            sender_ssrc: 0,
            media_ssrc: self.track.ssrc(),
        })];
        pc.write_rtcp(&pli)
            .await
            .map(|_| ())
            .map_err(|e| AppError::WebRtcError(e.to_string()))
    }

    async fn stop(&self) {
        if let Err(e) = self.receiver.stop().await {
            debug!("Failed to stop receiver: {}", e);
        }
    }
}
