//! RTP codec table

use std::fmt;

use webrtc::api::media_engine::MediaEngine;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};
use webrtc::rtp_transceiver::RTCPFeedback;

use crate::error::{AppError, Result};

/// Media kind of a track or stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn codec_type(self) -> RTPCodecType {
        match self {
            MediaKind::Audio => RTPCodecType::Audio,
            MediaKind::Video => RTPCodecType::Video,
        }
    }

    pub fn from_codec_type(kind: RTPCodecType) -> Option<Self> {
        match kind {
            RTPCodecType::Audio => Some(MediaKind::Audio),
            RTPCodecType::Video => Some(MediaKind::Video),
            _ => None,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// A codec the capture pipeline can produce or consume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpCodec {
    pub name: &'static str,
    pub kind: MediaKind,
    pub payload_type: u8,
    pub clock_rate: u32,
    pub channels: u16,
    pub fmtp: &'static str,
}

impl RtpCodec {
    pub const VP8: RtpCodec = RtpCodec::video("vp8", 96, "");
    pub const VP9: RtpCodec = RtpCodec::video("vp9", 98, "profile-id=0");
    pub const H264: RtpCodec = RtpCodec::video(
        "h264",
        102,
        "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f",
    );
    pub const AV1: RtpCodec = RtpCodec::video("av1", 41, "");
    pub const OPUS: RtpCodec = RtpCodec::audio("opus", 111, 48000, 2, "minptime=10;useinbandfec=1");
    pub const G722: RtpCodec = RtpCodec::audio("g722", 9, 8000, 0, "");
    pub const PCMU: RtpCodec = RtpCodec::audio("pcmu", 0, 8000, 0, "");
    pub const PCMA: RtpCodec = RtpCodec::audio("pcma", 8, 8000, 0, "");

    const fn video(name: &'static str, payload_type: u8, fmtp: &'static str) -> Self {
        Self {
            name,
            kind: MediaKind::Video,
            payload_type,
            clock_rate: 90000,
            channels: 0,
            fmtp,
        }
    }

    const fn audio(
        name: &'static str,
        payload_type: u8,
        clock_rate: u32,
        channels: u16,
        fmtp: &'static str,
    ) -> Self {
        Self {
            name,
            kind: MediaKind::Audio,
            payload_type,
            clock_rate,
            channels,
            fmtp,
        }
    }

    pub fn all() -> [RtpCodec; 8] {
        [
            Self::VP8,
            Self::VP9,
            Self::H264,
            Self::AV1,
            Self::OPUS,
            Self::G722,
            Self::PCMU,
            Self::PCMA,
        ]
    }

    /// Look up a codec by its configuration name
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        Self::all().into_iter().find(|c| c.name == name)
    }

    /// Map negotiated codec parameters to a known codec
    ///
    /// The negotiated payload type is kept since the remote side picks it.
    pub fn from_parameters(params: &RTCRtpCodecParameters) -> Option<Self> {
        let mime = params.capability.mime_type.to_ascii_lowercase();
        let mut codec = Self::all().into_iter().find(|c| c.mime_type().to_ascii_lowercase() == mime)?;
        codec.payload_type = params.payload_type;
        Some(codec)
    }

    pub fn mime_type(&self) -> String {
        let subtype = match self.name {
            "vp8" => "VP8",
            "vp9" => "VP9",
            "h264" => "H264",
            "av1" => "AV1",
            "opus" => "opus",
            "g722" => "G722",
            "pcmu" => "PCMU",
            "pcma" => "PCMA",
            other => other,
        };
        format!("{}/{}", self.kind, subtype)
    }

    pub fn capability(&self) -> RTCRtpCodecCapability {
        let rtcp_feedback = match self.kind {
            MediaKind::Video => vec![
                RTCPFeedback {
                    typ: "goog-remb".to_owned(),
                    parameter: "".to_owned(),
                },
                RTCPFeedback {
                    typ: "ccm".to_owned(),
                    parameter: "fir".to_owned(),
                },
                RTCPFeedback {
                    typ: "nack".to_owned(),
                    parameter: "".to_owned(),
                },
                RTCPFeedback {
                    typ: "nack".to_owned(),
                    parameter: "pli".to_owned(),
                },
            ],
            MediaKind::Audio => vec![],
        };

        RTCRtpCodecCapability {
            mime_type: self.mime_type(),
            clock_rate: self.clock_rate,
            channels: self.channels,
            sdp_fmtp_line: self.fmtp.to_owned(),
            rtcp_feedback,
        }
    }

    pub fn parameters(&self) -> RTCRtpCodecParameters {
        RTCRtpCodecParameters {
            capability: self.capability(),
            payload_type: self.payload_type,
            ..Default::default()
        }
    }

    /// Register this codec with a media engine
    pub fn register(&self, engine: &mut MediaEngine) -> Result<()> {
        engine
            .register_codec(self.parameters(), self.kind.codec_type())
            .map_err(|e| {
                AppError::WebRtcError(format!("Failed to register {} codec: {}", self.name, e))
            })
    }
}

impl fmt::Display for RtpCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mime_type())
    }
}
