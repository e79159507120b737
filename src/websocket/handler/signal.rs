use std::sync::Arc;

use tracing::debug;

use super::MessageHandler;
use crate::error::{AppError, Result};
use crate::events::{
    SignalDescription, SignalProvide, SignalRequest, SignalVideo, SIGNAL_ANSWER, SIGNAL_PROVIDE,
    SIGNAL_RESTART, SIGNAL_VIDEO,
};
use crate::session::{Session, WebRtcPeer};
use crate::webrtc::IceCandidate;

impl MessageHandler {
    pub(super) async fn signal_request(
        &self,
        session: &Arc<Session>,
        request: SignalRequest,
    ) -> Result<()> {
        if !session.profile().can_watch {
            return Err(AppError::Forbidden("not allowed to watch".to_string()));
        }

        let video = match request.video {
            Some(video) => video,
            None => self
                .capture
                .video_ids()
                .into_iter()
                .next()
                .ok_or_else(|| AppError::StreamNotFound("default".to_string()))?,
        };

        let sdp = self.webrtc.create_peer(session, &video).await?;
        debug!(session_id = %session.id(), video = %video, "Providing offer");
        session.send(
            SIGNAL_PROVIDE,
            &SignalProvide {
                sdp,
                iceservers: self.webrtc.ice_servers(),
                video,
            },
        );
        Ok(())
    }

    pub(super) async fn signal_restart(&self, session: &Arc<Session>) -> Result<()> {
        let peer = webrtc_peer(session)?;
        let sdp = peer.create_offer(true).await?;
        session.send(SIGNAL_RESTART, &SignalDescription { sdp });
        Ok(())
    }

    pub(super) async fn signal_offer(
        &self,
        session: &Arc<Session>,
        offer: SignalDescription,
    ) -> Result<()> {
        let peer = webrtc_peer(session)?;
        peer.set_offer(offer.sdp).await?;
        let sdp = peer.create_answer().await?;
        session.send(SIGNAL_ANSWER, &SignalDescription { sdp });
        Ok(())
    }

    pub(super) async fn signal_answer(
        &self,
        session: &Arc<Session>,
        answer: SignalDescription,
    ) -> Result<()> {
        webrtc_peer(session)?.set_answer(answer.sdp).await
    }

    pub(super) async fn signal_candidate(
        &self,
        session: &Arc<Session>,
        candidate: IceCandidate,
    ) -> Result<()> {
        webrtc_peer(session)?.set_candidate(candidate).await
    }

    pub(super) fn signal_video(&self, session: &Arc<Session>, video: SignalVideo) -> Result<()> {
        webrtc_peer(session)?.set_video_id(&video.video)?;
        session.send(SIGNAL_VIDEO, &video);
        Ok(())
    }
}

fn webrtc_peer(session: &Session) -> Result<Arc<dyn WebRtcPeer>> {
    session.webrtc_peer().ok_or(AppError::PeerNotConnected)
}

#[cfg(test)]
mod tests {
    use super::super::testing::Fixture;
    use crate::session::testing::FakeWebRtcPeer;
    use crate::session::{MemberProfile, WebRtcPeer};
    use serde_json::json;

    #[tokio::test]
    async fn test_request_provides_offer_for_default_video() {
        let fx = Fixture::new();
        let (alice, socket) = fx.connect("alice");
        socket.clear();

        fx.send(&alice, "signal/request", json!(null)).await;
        let provide = &socket.messages("signal/provide")[0];
        assert_eq!(provide["video"], "main");
        assert!(provide["sdp"].as_str().unwrap().contains("m=video"));
        assert_eq!(provide["iceservers"], json!([]));

        let peer = alice.webrtc_peer().unwrap();
        assert_eq!(peer.video_id(), "main");
        peer.destroy();
        fx.webrtc.shutdown().await;
    }

    #[tokio::test]
    async fn test_request_unknown_video_sends_nothing() {
        let fx = Fixture::new();
        let (alice, socket) = fx.connect("alice");
        socket.clear();

        fx.send(&alice, "signal/request", json!({ "video": "cam99" }))
            .await;
        assert!(socket.events().is_empty());
        assert!(alice.webrtc_peer().is_none());
    }

    #[tokio::test]
    async fn test_request_requires_can_watch() {
        let fx = Fixture::new();
        fx.sessions
            .update_profile(
                "bob",
                MemberProfile {
                    can_watch: false,
                    ..Default::default()
                },
            )
            .unwrap();
        let (bob, socket) = fx.connect("bob");
        socket.clear();

        fx.send(&bob, "signal/request", json!({})).await;
        assert!(socket.events().is_empty());
        assert!(bob.webrtc_peer().is_none());
    }

    #[tokio::test]
    async fn test_negotiation_against_existing_peer() {
        let fx = Fixture::new();
        let (alice, socket) = fx.connect("alice");
        let peer = FakeWebRtcPeer::new("main");
        alice.set_webrtc_peer(peer.clone());
        socket.clear();

        fx.send(&alice, "signal/offer", json!({ "sdp": "remote" })).await;
        fx.send(&alice, "signal/answer", json!({ "sdp": "reply" })).await;
        fx.send(
            &alice,
            "signal/candidate",
            json!({ "candidate": "candidate:1 1 udp 1 10.0.0.1 5000 typ host", "sdpMid": "0" }),
        )
        .await;
        fx.send(&alice, "signal/restart", json!(null)).await;
        fx.send(&alice, "signal/video", json!({ "video": "low" })).await;

        assert_eq!(
            peer.calls(),
            vec![
                "set_offer:remote",
                "answer",
                "set_answer:reply",
                "candidate:candidate:1 1 udp 1 10.0.0.1 5000 typ host",
                "offer:true",
            ]
        );
        assert_eq!(socket.messages("signal/answer"), vec![json!({ "sdp": "v=0 answer" })]);
        assert_eq!(socket.messages("signal/restart"), vec![json!({ "sdp": "v=0 offer" })]);
        assert_eq!(socket.messages("signal/video"), vec![json!({ "video": "low" })]);
        assert_eq!(peer.video_id(), "low");
    }

    #[tokio::test]
    async fn test_signal_without_peer_is_ignored() {
        let fx = Fixture::new();
        let (alice, socket) = fx.connect("alice");
        socket.clear();

        assert!(fx.send(&alice, "signal/restart", json!(null)).await);
        assert!(fx.send(&alice, "signal/video", json!({ "video": "low" })).await);
        assert!(socket.events().is_empty());
    }
}
