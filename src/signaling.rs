//! # Rendezvous Client
//!
//! A minimal HTTP long-poll mailbox client used for SDP exchange within a
//! short room code. The relay is stateless and holds no file data — its
//! only job is forwarding signaling payloads between peers in the same
//! room.
//!
//! ## Wire format
//!
//! - `POST /join {room, sid}` → `{peers: [sid]}`
//! - `GET /poll?sid=` → `{messages: [{type, sender, data, ...}]}`; the
//!   relay may hold the request up to ~30 s before returning an empty set.
//! - `POST /signal {sender, type, data, target?, room}` → 200 OK
//!
//! Messages for a given `(sender, target, type)` triple arrive in relay
//! order; across types there is no ordering guarantee.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::{Error, Result};

// ============================================================================
// WIRE TYPES
// ============================================================================

/// A message delivered by the relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalMessage {
    /// Another client joined our room.
    PeerJoined {
        /// Session id of the new peer.
        sid: String,
    },
    /// An SDP offer from a peer.
    Offer {
        /// Session id of the sender.
        sender: String,
        /// The SDP payload.
        data: String,
    },
    /// An SDP answer from a peer.
    Answer {
        /// Session id of the sender.
        sender: String,
        /// The SDP payload.
        data: String,
    },
    /// A trickled ICE candidate. Sessions exchange fully gathered SDPs, so
    /// this is parsed for forward compatibility and ignored.
    Ice {
        /// Session id of the sender.
        sender: String,
        /// The candidate payload.
        data: String,
    },
    /// A message kind this build does not know. Logged and dropped.
    #[serde(other)]
    Unknown,
}

#[derive(Serialize)]
struct JoinBody<'a> {
    room: &'a str,
    sid: &'a str,
}

#[derive(Deserialize)]
struct JoinReply {
    #[serde(default)]
    peers: Vec<String>,
}

#[derive(Serialize)]
struct SignalBody<'a> {
    sender: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    data: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    target: Option<&'a str>,
    room: &'a str,
}

#[derive(Deserialize)]
struct PollReply {
    #[serde(default)]
    messages: Vec<SignalMessage>,
}

// ============================================================================
// CLIENT
// ============================================================================

/// Long-poll client for the rendezvous relay.
///
/// Delivered messages flow to the channel supplied at construction; the
/// poll loop runs as its own task from a successful [`join`](Self::join)
/// until [`close`](Self::close).
pub struct RendezvousClient {
    http: reqwest::Client,
    base_url: String,
    sid: String,
    room: Mutex<Option<String>>,
    events: mpsc::UnboundedSender<SignalMessage>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
    join_timeout: std::time::Duration,
    poll_timeout: std::time::Duration,
    poll_backoff: std::time::Duration,
}

impl RendezvousClient {
    /// Create a client for the configured relay; `events` receives every
    /// delivered message once joined.
    pub fn new(config: &Config, events: mpsc::UnboundedSender<SignalMessage>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.signaling_url.trim_end_matches('/').to_string(),
            sid: uuid::Uuid::new_v4().to_string(),
            room: Mutex::new(None),
            events,
            poll_task: Mutex::new(None),
            join_timeout: config.join_timeout,
            poll_timeout: config.poll_timeout,
            poll_backoff: config.poll_backoff,
        }
    }

    /// This client's opaque session id.
    pub fn sid(&self) -> &str {
        &self.sid
    }

    /// Join a room and start the poll loop. Returns the sids of peers
    /// already present. Transport failures map to
    /// [`Error::SignalingUnavailable`].
    pub async fn join(self: &Arc<Self>, room: &str) -> Result<Vec<String>> {
        let reply = self
            .http
            .post(format!("{}/join", self.base_url))
            .json(&JoinBody {
                room,
                sid: &self.sid,
            })
            .timeout(self.join_timeout)
            .send()
            .await
            .map_err(|e| Error::SignalingUnavailable(e.to_string()))?
            .error_for_status()
            .map_err(|e| Error::SignalingUnavailable(e.to_string()))?
            .json::<JoinReply>()
            .await
            .map_err(|e| Error::SignalingUnavailable(e.to_string()))?;

        *self.room.lock() = Some(room.to_string());
        tracing::info!(room, sid = %self.sid, "joined rendezvous room");

        let client = Arc::clone(self);
        *self.poll_task.lock() = Some(tokio::spawn(async move {
            client.poll_loop().await;
        }));

        Ok(reply.peers)
    }

    async fn poll_loop(&self) {
        loop {
            let result = self
                .http
                .get(format!("{}/poll", self.base_url))
                .query(&[("sid", self.sid.as_str())])
                .timeout(self.poll_timeout)
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => {
                    match resp.json::<PollReply>().await {
                        Ok(reply) => {
                            for message in reply.messages {
                                if matches!(message, SignalMessage::Unknown) {
                                    tracing::warn!("ignoring unknown signal kind");
                                    continue;
                                }
                                if self.events.send(message).is_err() {
                                    // Nobody is listening anymore.
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "poll body unreadable");
                            tokio::time::sleep(self.poll_backoff).await;
                        }
                    }
                }
                Ok(resp) => {
                    tracing::warn!(status = %resp.status(), "poll rejected");
                    tokio::time::sleep(self.poll_backoff).await;
                }
                // A long-poll timing out is the expected idle case; go
                // straight back around.
                Err(e) if e.is_timeout() => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "poll transport error");
                    tokio::time::sleep(self.poll_backoff).await;
                }
            }
        }
    }

    /// Send an SDP offer, optionally targeted at one peer.
    pub async fn send_offer(&self, sdp: &str, target: Option<&str>) {
        self.signal("offer", sdp, target).await;
    }

    /// Send an SDP answer, optionally targeted at one peer.
    pub async fn send_answer(&self, sdp: &str, target: Option<&str>) {
        self.signal("answer", sdp, target).await;
    }

    /// Send an ICE candidate, optionally targeted at one peer.
    pub async fn send_ice(&self, candidate: &str, target: Option<&str>) {
        self.signal("ice", candidate, target).await;
    }

    /// Fire-and-forget `POST /signal`; errors are logged only.
    async fn signal(&self, kind: &str, data: &str, target: Option<&str>) {
        let room = self.room.lock().clone().unwrap_or_default();
        let body = SignalBody {
            sender: &self.sid,
            kind,
            data,
            target,
            room: &room,
        };
        if let Err(e) = self
            .http
            .post(format!("{}/signal", self.base_url))
            .json(&body)
            .timeout(std::time::Duration::from_secs(20))
            .send()
            .await
        {
            tracing::warn!(kind, error = %e, "signal post failed");
        }
    }

    /// Cancel the poll loop. Idempotent.
    pub fn close(&self) {
        if let Some(task) = self.poll_task.lock().take() {
            task.abort();
        }
    }
}

impl Drop for RendezvousClient {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_joined_deserializes() {
        let json = r#"{"type":"peer_joined","sid":"abc-123"}"#;
        let msg: SignalMessage = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg,
            SignalMessage::PeerJoined {
                sid: "abc-123".into()
            }
        );
    }

    #[test]
    fn test_offer_deserializes() {
        let json = r#"{"type":"offer","sender":"s1","data":"v=0 ..."}"#;
        let msg: SignalMessage = serde_json::from_str(json).unwrap();
        match msg {
            SignalMessage::Offer { sender, data } => {
                assert_eq!(sender, "s1");
                assert!(data.starts_with("v=0"));
            }
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_unknown_kind_tolerated() {
        let json = r#"{"type":"room_stats","count":3}"#;
        let msg: SignalMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg, SignalMessage::Unknown);
    }

    #[test]
    fn test_poll_reply_defaults_to_empty() {
        let reply: PollReply = serde_json::from_str("{}").unwrap();
        assert!(reply.messages.is_empty());
    }

    #[test]
    fn test_signal_body_omits_absent_target() {
        let body = SignalBody {
            sender: "me",
            kind: "offer",
            data: "sdp",
            target: None,
            room: "123456",
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(!json.contains("target"));
        assert!(json.contains("\"type\":\"offer\""));

        let targeted = SignalBody {
            target: Some("peer-1"),
            ..body
        };
        let json = serde_json::to_string(&targeted).unwrap();
        assert!(json.contains("\"target\":\"peer-1\""));
    }

    #[tokio::test]
    async fn test_join_unreachable_relay_is_signaling_unavailable() {
        let mut config = Config::default();
        // A port nothing listens on.
        config.signaling_url = "http://127.0.0.1:9".into();
        config.join_timeout = std::time::Duration::from_secs(2);
        let (tx, _rx) = mpsc::unbounded_channel();
        let client = Arc::new(RendezvousClient::new(&config, tx));
        let err = client.join("123456").await.unwrap_err();
        assert!(matches!(err, Error::SignalingUnavailable(_)));
    }
}
