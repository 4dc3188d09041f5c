//! WebRTC plumbing shared by both peer roles: peer connection construction
//! and fully gathered SDP exchange.
//!
//! Sessions do not trickle ICE — the local description is read back only
//! after candidate gathering completes, so the SDP each side posts through
//! the rendezvous relay is self-contained.

use std::sync::Arc;

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use crate::error::{Error, Result};

/// The DataChannel label both roles agree on.
pub(crate) const CHANNEL_LABEL: &str = "fileTransfer";

/// Build a peer connection configured with the given STUN servers.
pub(crate) async fn new_peer_connection(stun_urls: &[String]) -> Result<Arc<RTCPeerConnection>> {
    let mut media = MediaEngine::default();
    media.register_default_codecs()?;
    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media)?;
    let api = APIBuilder::new()
        .with_media_engine(media)
        .with_interceptor_registry(registry)
        .build();

    let config = RTCConfiguration {
        ice_servers: vec![RTCIceServer {
            urls: stun_urls.to_vec(),
            ..Default::default()
        }],
        ..Default::default()
    };

    Ok(Arc::new(api.new_peer_connection(config).await?))
}

/// Create an offer, wait for gathering, and return the complete local SDP.
pub(crate) async fn create_offer_sdp(pc: &Arc<RTCPeerConnection>) -> Result<String> {
    let offer = pc.create_offer(None).await?;
    let mut gathered = pc.gathering_complete_promise().await;
    pc.set_local_description(offer).await?;
    let _ = gathered.recv().await;
    local_sdp(pc).await
}

/// Apply a remote offer, answer it, wait for gathering, and return the
/// complete local SDP.
pub(crate) async fn answer_offer_sdp(
    pc: &Arc<RTCPeerConnection>,
    remote_offer: &str,
) -> Result<String> {
    let offer = RTCSessionDescription::offer(remote_offer.to_string())?;
    pc.set_remote_description(offer).await?;
    let answer = pc.create_answer(None).await?;
    let mut gathered = pc.gathering_complete_promise().await;
    pc.set_local_description(answer).await?;
    let _ = gathered.recv().await;
    local_sdp(pc).await
}

/// Apply the remote answer on the offering side.
pub(crate) async fn apply_answer_sdp(pc: &Arc<RTCPeerConnection>, remote_answer: &str) -> Result<()> {
    let answer = RTCSessionDescription::answer(remote_answer.to_string())?;
    pc.set_remote_description(answer).await?;
    Ok(())
}

async fn local_sdp(pc: &Arc<RTCPeerConnection>) -> Result<String> {
    pc.local_description()
        .await
        .map(|d| d.sdp)
        .ok_or_else(|| Error::Transport("local description missing after gathering".into()))
}
