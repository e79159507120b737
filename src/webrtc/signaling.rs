//! WebRTC signaling types

use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::signaling_state::RTCSignalingState;

/// ICE candidate as exchanged with clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate string
    pub candidate: String,
    /// SDP mid (media ID)
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    /// SDP mline index
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
    /// Username fragment
    #[serde(rename = "usernameFragment", default)]
    pub username_fragment: Option<String>,
}

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(candidate: IceCandidate) -> Self {
        Self {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        }
    }
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    pub fn from_rtc(state: RTCPeerConnectionState) -> Option<Self> {
        match state {
            RTCPeerConnectionState::New => Some(Self::New),
            RTCPeerConnectionState::Connecting => Some(Self::Connecting),
            RTCPeerConnectionState::Connected => Some(Self::Connected),
            RTCPeerConnectionState::Disconnected => Some(Self::Disconnected),
            RTCPeerConnectionState::Failed => Some(Self::Failed),
            RTCPeerConnectionState::Closed => Some(Self::Closed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::New => write!(f, "new"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Failed => write!(f, "failed"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// What to do when the library asks for renegotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Renegotiation {
    Proceed,
    /// An offer/answer exchange is in flight; the request is dropped, not queued
    Skip,
}

impl Renegotiation {
    pub fn decide(state: RTCSignalingState) -> Self {
        if state == RTCSignalingState::Stable {
            Renegotiation::Proceed
        } else {
            Renegotiation::Skip
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_wire_names() {
        let candidate = IceCandidate {
            candidate: "candidate:1 1 udp 2130706431 10.0.0.2 50000 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: Some("abcd".to_string()),
        };
        let value = serde_json::to_value(&candidate).unwrap();
        assert_eq!(value["sdpMid"], "0");
        assert_eq!(value["sdpMLineIndex"], 0);
        assert_eq!(value["usernameFragment"], "abcd");
    }

    #[test]
    fn test_candidate_optional_fields() {
        let candidate: IceCandidate = serde_json::from_str(r#"{"candidate":"c"}"#).unwrap();
        assert_eq!(candidate.sdp_mid, None);

        let init: RTCIceCandidateInit = candidate.clone().into();
        assert_eq!(IceCandidate::from(init), candidate);
    }

    #[test]
    fn test_renegotiation_only_when_stable() {
        assert_eq!(
            Renegotiation::decide(RTCSignalingState::Stable),
            Renegotiation::Proceed
        );
        assert_eq!(
            Renegotiation::decide(RTCSignalingState::HaveLocalOffer),
            Renegotiation::Skip
        );
        assert_eq!(
            Renegotiation::decide(RTCSignalingState::HaveRemoteOffer),
            Renegotiation::Skip
        );
    }

    #[test]
    fn test_connection_state_mapping() {
        assert_eq!(
            ConnectionState::from_rtc(RTCPeerConnectionState::Failed),
            Some(ConnectionState::Failed)
        );
        assert_eq!(ConnectionState::from_rtc(RTCPeerConnectionState::Unspecified), None);
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
    }
}
