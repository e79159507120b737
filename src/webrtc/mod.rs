//! WebRTC media transport
//!
//! One [`PeerConnection`] per watching viewer carries:
//! - the shared desktop audio stream
//! - one desktop video stream, switchable at runtime
//! - a data channel for input events and cursor updates
//!
//! ```text
//! CaptureManager ──samples──> StreamTrack ──RTP──> viewer
//!                                                    │
//! DesktopManager <──input── DataChannelHandler <─────┤ data channel
//!                ──cursor──> CursorBridge ──────────>│
//!                                                    │
//! webcam/mic src <──RTP── InboundSlot <── remote track
//! ```
//!
//! Negotiation messages travel over the signaling socket; see
//! [`crate::websocket`].

pub mod codec;
pub mod cursor;
pub mod handler;
pub mod manager;
pub mod mdns;
pub mod mux;
pub mod payload;
pub mod peer;
pub mod signaling;
pub mod slot;
pub mod track;

pub use codec::{MediaKind, RtpCodec};
pub use cursor::{CursorImageFeed, CursorPositionFeed};
pub use manager::WebRtcManager;
pub use peer::PeerConnection;
pub use signaling::{ConnectionState, IceCandidate};
pub use slot::InboundSlot;
