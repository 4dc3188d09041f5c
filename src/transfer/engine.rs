//! # Transfer Engine
//!
//! The orchestrator the UI talks to. It owns the share session, the
//! rendezvous client, the peer map, the HTTP file server + tunnel pair for
//! cloud shares, and the shared monitor/history. Per-peer errors stay
//! inside their peer session; engine-level failures (rendezvous join,
//! tunnel startup, port binding) tear the whole session down.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{Config, ROOM_CODE_LEN};
use crate::error::{Error, Result};
use crate::fs;
use crate::history::{Integrity, TransferHistory};
use crate::http::HttpFileServer;
use crate::monitor::{MonitorSnapshot, TransferMonitor};
use crate::signaling::{RendezvousClient, SignalMessage};
use crate::tunnel::TunnelSupervisor;

use super::protocol::FileStat;
use super::receiver::{ReceiverContext, ReceiverPeer};
use super::sender::{SenderContext, SenderPeer};
use super::{PeerState, ShareMode, ShareSession};

// ============================================================================
// EVENTS
// ============================================================================

/// Typed notifications for the UI layer, drained from the channel returned
/// by [`TransferEngine::new`]. Progress numbers are not events — poll
/// [`TransferEngine::snapshot`] for those.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A peer appeared in our rendezvous room.
    PeerJoined {
        /// Relay-assigned peer id.
        peer: String,
    },
    /// A peer's DataChannel opened.
    PeerConnected {
        /// Relay-assigned peer id.
        peer: String,
    },
    /// A peer finished its transfer cleanly.
    PeerDone {
        /// Relay-assigned peer id.
        peer: String,
    },
    /// A peer session failed; other peers are unaffected.
    PeerFailed {
        /// Relay-assigned peer id.
        peer: String,
        /// Human-readable reason.
        message: String,
    },
    /// Password handshake failed; the session is terminal.
    AuthFailed {
        /// Which side rejected us (or whom we rejected).
        peer: String,
    },
    /// A peer-supplied filename tried to escape the save directory.
    SecurityWarning {
        /// The offending wire name.
        name: String,
    },
    /// One file fully sent to one peer.
    FileSent {
        /// Relay-assigned peer id.
        peer: String,
        /// Wire name.
        name: String,
    },
    /// One file fully received and verified.
    FileReceived {
        /// Wire name.
        name: String,
        /// Outcome of the hash comparison.
        integrity: Integrity,
    },
    /// The receive side saw `transfer_end`.
    TransferComplete {
        /// How many files arrived.
        files: usize,
    },
}

// ============================================================================
// ENGINE
// ============================================================================

/// Orchestrates P2P and cloud sharing. One engine per process; at most one
/// active share session at a time.
pub struct TransferEngine {
    config: Config,
    monitor: Arc<TransferMonitor>,
    history: Arc<TransferHistory>,
    events: mpsc::UnboundedSender<EngineEvent>,

    share: Mutex<Option<ShareSession>>,
    peers: Arc<Mutex<HashMap<String, Arc<SenderPeer>>>>,
    rendezvous: Mutex<Option<Arc<RendezvousClient>>>,
    signal_task: Mutex<Option<JoinHandle<()>>>,

    http_server: tokio::sync::Mutex<Option<HttpFileServer>>,
    tunnel: tokio::sync::Mutex<TunnelSupervisor>,

    receiver: tokio::sync::Mutex<Option<Arc<ReceiverPeer>>>,
}

impl TransferEngine {
    /// Build an engine and the event channel the UI drains.
    pub fn new(config: Config) -> (Arc<Self>, mpsc::UnboundedReceiver<EngineEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let history = Arc::new(TransferHistory::open(&config.history_path));
        let tunnel = TunnelSupervisor::new(config.tunnel.clone());
        let engine = Arc::new(Self {
            monitor: Arc::new(TransferMonitor::new()),
            history,
            events,
            share: Mutex::new(None),
            peers: Arc::new(Mutex::new(HashMap::new())),
            rendezvous: Mutex::new(None),
            signal_task: Mutex::new(None),
            http_server: tokio::sync::Mutex::new(None),
            tunnel: tokio::sync::Mutex::new(tunnel),
            receiver: tokio::sync::Mutex::new(None),
            config,
        });
        (engine, events_rx)
    }

    /// The shared monitor, for callers that want to hold it directly.
    pub fn monitor(&self) -> Arc<TransferMonitor> {
        Arc::clone(&self.monitor)
    }

    /// The shared history ledger.
    pub fn history(&self) -> Arc<TransferHistory> {
        Arc::clone(&self.history)
    }

    /// Aggregated progress for the UI; cheap enough for 1 Hz polling.
    pub fn snapshot(&self) -> MonitorSnapshot {
        self.monitor.snapshot()
    }

    /// Sum of the instantaneous speeds of every sender peer.
    pub fn total_peer_speed(&self) -> f64 {
        let peers: Vec<Arc<SenderPeer>> = self.peers.lock().values().cloned().collect();
        peers.iter().map(|p| p.speed()).sum()
    }

    /// Connection state per peer, keyed by relay sid.
    pub fn peer_states(&self) -> HashMap<String, PeerState> {
        self.peers
            .lock()
            .iter()
            .map(|(sid, peer)| (sid.clone(), peer.state()))
            .collect()
    }

    // ── Sending: P2P ────────────────────────────────────────────────────

    /// Publish `paths` over WebRTC. Joins a fresh rendezvous room and
    /// returns its 6-digit code for the receivers. Fails with
    /// [`Error::ShareActive`] when a share is already running and with
    /// [`Error::SignalingUnavailable`] when the relay cannot be reached.
    pub async fn start_direct(
        &self,
        paths: &[PathBuf],
        password: Option<String>,
    ) -> Result<String> {
        if self.share.lock().is_some() {
            return Err(Error::ShareActive);
        }
        let entries = fs::expand_entries(paths)?;
        self.monitor.reset();
        self.monitor.set_total_size(fs::total_size(&entries));

        let room = generate_room_code();
        let (sig_tx, sig_rx) = mpsc::unbounded_channel();
        let rendezvous = Arc::new(RendezvousClient::new(&self.config, sig_tx));
        let existing_peers = rendezvous.join(&room).await?;
        if !existing_peers.is_empty() {
            tracing::info!(count = existing_peers.len(), "peers already waiting in room");
        }

        let session = ShareSession::new(ShareMode::P2p, entries.clone(), password.clone());
        let ctx = SenderContext {
            files: Arc::new(entries),
            password,
            monitor: Arc::clone(&self.monitor),
            history: Arc::clone(&self.history),
            events: self.events.clone(),
        };
        let task = tokio::spawn(sender_signal_loop(
            sig_rx,
            ctx,
            Arc::clone(&rendezvous),
            Arc::clone(&self.peers),
            self.config.ice_servers.clone(),
            self.config.connect_timeout,
        ));

        *self.share.lock() = Some(session);
        *self.rendezvous.lock() = Some(rendezvous);
        *self.signal_task.lock() = Some(task);
        tracing::info!(room, "direct share started");
        Ok(room)
    }

    // ── Sending: Cloud ──────────────────────────────────────────────────

    /// Publish `paths` over the HTTP file server and expose it through the
    /// tunnel. Returns the public URL. Port binding or tunnel failure
    /// tears everything back down.
    pub async fn start_cloud(&self, paths: &[PathBuf]) -> Result<String> {
        if self.share.lock().is_some() {
            return Err(Error::ShareActive);
        }
        let entries = fs::expand_entries(paths)?;
        self.monitor.reset();
        self.monitor.set_total_size(fs::total_size(&entries));

        let server = HttpFileServer::start(
            &self.config.server_host,
            self.config.server_port,
            entries.clone(),
            Arc::clone(&self.monitor),
        )
        .await?;
        let port = server.local_addr().port();

        let started = {
            let mut tunnel = self.tunnel.lock().await;
            tunnel.start(port, self.config.tunnel_token.as_deref()).await
        };
        match started {
            Ok(url) => {
                *self.http_server.lock().await = Some(server);
                *self.share.lock() = Some(ShareSession::new(ShareMode::Cloud, entries, None));
                tracing::info!(%url, "cloud share started");
                Ok(url)
            }
            Err(e) => {
                server.shutdown().await;
                Err(e)
            }
        }
    }

    // ── Control ─────────────────────────────────────────────────────────

    /// Pause every sender peer (and a receive session, if one is active).
    /// Pause has no timeout; a session may stay paused indefinitely.
    pub async fn pause(&self) {
        let peers: Vec<Arc<SenderPeer>> = self.peers.lock().values().cloned().collect();
        for peer in peers {
            peer.pause().await;
        }
        if let Some(receiver) = self.receiver.lock().await.clone() {
            receiver.pause().await;
        }
        tracing::info!("transfer paused");
    }

    /// Release everything [`pause`](Self::pause) halted.
    pub async fn resume(&self) {
        let peers: Vec<Arc<SenderPeer>> = self.peers.lock().values().cloned().collect();
        for peer in peers {
            peer.resume().await;
        }
        if let Some(receiver) = self.receiver.lock().await.clone() {
            receiver.resume().await;
        }
        tracing::info!("transfer resumed");
    }

    /// Tear down whatever is running: `STOPPED` to every open channel,
    /// close peer connections, cancel the poll loop, stop the tunnel and
    /// the HTTP server. Idempotent — a second call is a no-op.
    pub async fn stop(&self) {
        let peers: Vec<Arc<SenderPeer>> = {
            let mut map = self.peers.lock();
            map.drain().map(|(_, peer)| peer).collect()
        };
        for peer in peers {
            peer.stop().await;
        }
        if let Some(receiver) = self.receiver.lock().await.take() {
            receiver.stop().await;
        }
        if let Some(task) = self.signal_task.lock().take() {
            task.abort();
        }
        if let Some(rendezvous) = self.rendezvous.lock().take() {
            rendezvous.close();
        }
        if let Some(server) = self.http_server.lock().await.take() {
            server.shutdown().await;
        }
        self.tunnel.lock().await.stop().await;
        let had_session = self.share.lock().take().is_some();
        if had_session {
            tracing::info!("share session stopped");
        }
        self.monitor.reset();
    }

    // ── Receiving ───────────────────────────────────────────────────────

    /// Join a room as a receiver and return the sender's catalogue.
    /// `password`, when set, is asserted during the channel handshake.
    pub async fn connect_by_code(
        &self,
        code: &str,
        password: Option<String>,
    ) -> Result<Vec<FileStat>> {
        if self.receiver.lock().await.is_some() {
            return Err(Error::ShareActive);
        }
        self.monitor.reset();

        let (sig_tx, sig_rx) = mpsc::unbounded_channel();
        let rendezvous = Arc::new(RendezvousClient::new(&self.config, sig_tx));
        let _ = rendezvous.join(code).await?;

        let ctx = ReceiverContext {
            monitor: Arc::clone(&self.monitor),
            history: Arc::clone(&self.history),
            events: self.events.clone(),
        };
        let (receiver, offer) = ReceiverPeer::connect(
            ctx,
            password,
            &self.config.ice_servers,
            self.config.connect_timeout,
        )
        .await?;
        rendezvous.send_offer(&offer, None).await;

        let task = tokio::spawn(receiver_signal_loop(sig_rx, Arc::clone(&receiver)));

        match receiver.wait_for_listing(self.config.connect_timeout).await {
            Ok(listing) => {
                *self.receiver.lock().await = Some(receiver);
                *self.rendezvous.lock() = Some(rendezvous);
                *self.signal_task.lock() = Some(task);
                Ok(listing)
            }
            Err(e) => {
                task.abort();
                receiver.stop().await;
                rendezvous.close();
                Err(e)
            }
        }
    }

    /// Request `files` from the connected sender, resuming from whatever
    /// partial data already sits under `save_dir`.
    pub async fn request_download(&self, files: Vec<String>, save_dir: &Path) -> Result<()> {
        let receiver = self
            .receiver
            .lock()
            .await
            .clone()
            .ok_or(Error::NoActiveSession)?;
        receiver.request_download(files, save_dir.to_path_buf()).await
    }

    /// Block until the active receive session reaches a terminal state.
    pub async fn wait_receive_done(&self) -> Result<()> {
        let receiver = self
            .receiver
            .lock()
            .await
            .clone()
            .ok_or(Error::NoActiveSession)?;
        receiver.wait_done().await;
        Ok(())
    }
}

// ============================================================================
// SIGNAL LOOPS
// ============================================================================

/// Sender side: every offer arriving in the room becomes a new peer
/// session with its own answer.
async fn sender_signal_loop(
    mut signals: mpsc::UnboundedReceiver<SignalMessage>,
    ctx: SenderContext,
    rendezvous: Arc<RendezvousClient>,
    peers: Arc<Mutex<HashMap<String, Arc<SenderPeer>>>>,
    ice_servers: Vec<String>,
    connect_timeout: std::time::Duration,
) {
    while let Some(message) = signals.recv().await {
        match message {
            SignalMessage::PeerJoined { sid } => {
                tracing::info!(peer = %sid, "peer joined the room");
                let _ = ctx.events.send(EngineEvent::PeerJoined { peer: sid });
            }
            SignalMessage::Offer { sender, data } => {
                tracing::info!(peer = %sender, "offer received");
                match SenderPeer::accept(
                    sender.clone(),
                    &data,
                    ctx.clone(),
                    &ice_servers,
                    connect_timeout,
                )
                .await
                {
                    Ok((peer, answer)) => {
                        peers.lock().insert(sender.clone(), peer);
                        rendezvous.send_answer(&answer, Some(&sender)).await;
                    }
                    Err(e) => {
                        tracing::warn!(peer = %sender, error = %e, "offer rejected");
                        let _ = ctx.events.send(EngineEvent::PeerFailed {
                            peer: sender,
                            message: e.to_string(),
                        });
                    }
                }
            }
            SignalMessage::Answer { sender, .. } => {
                tracing::debug!(peer = %sender, "unexpected answer in sender role");
            }
            SignalMessage::Ice { .. } => {
                // Sessions exchange fully gathered SDPs; candidates are
                // already inside them.
                tracing::debug!("ice candidate ignored");
            }
            SignalMessage::Unknown => {}
        }
    }
}

/// Receiver side: only the sender's answer matters.
async fn receiver_signal_loop(
    mut signals: mpsc::UnboundedReceiver<SignalMessage>,
    receiver: Arc<ReceiverPeer>,
) {
    while let Some(message) = signals.recv().await {
        match message {
            SignalMessage::Answer { sender, data } => {
                tracing::info!(peer = %sender, "answer received");
                if let Err(e) = receiver.set_answer(&data).await {
                    tracing::warn!(error = %e, "applying answer failed");
                }
            }
            SignalMessage::Ice { .. } => {
                tracing::debug!("ice candidate ignored");
            }
            other => {
                tracing::debug!(message = ?other, "signal ignored in receive role");
            }
        }
    }
}

fn generate_room_code() -> String {
    let mut rng = rand::thread_rng();
    (0..ROOM_CODE_LEN)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_config() -> Config {
        Config {
            // A port nothing listens on, so rendezvous calls fail fast.
            signaling_url: "http://127.0.0.1:9".into(),
            join_timeout: std::time::Duration::from_secs(1),
            history_path: std::env::temp_dir().join(format!(
                "quickshare-test-history-{}.json",
                uuid::Uuid::new_v4()
            )),
            ..Config::default()
        }
    }

    #[test]
    fn test_room_code_shape() {
        for _ in 0..50 {
            let code = generate_room_code();
            assert_eq!(code.len(), ROOM_CODE_LEN);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[tokio::test]
    async fn test_start_direct_fails_without_relay() {
        let (engine, _events) = TransferEngine::new(offline_config());
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, b"hello").unwrap();

        let err = engine.start_direct(&[file], None).await.unwrap_err();
        assert!(matches!(err, Error::SignalingUnavailable(_)));
        // The failed start left no session behind.
        assert!(engine.share.lock().is_none());
    }

    #[tokio::test]
    async fn test_stop_twice_is_a_noop() {
        let (engine, _events) = TransferEngine::new(offline_config());
        engine.stop().await;
        engine.stop().await;
        assert!(engine.share.lock().is_none());
        assert!(engine.peer_states().is_empty());
    }

    #[tokio::test]
    async fn test_request_download_without_session() {
        let (engine, _events) = TransferEngine::new(offline_config());
        let err = engine
            .request_download(vec!["a.txt".into()], Path::new("/tmp"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoActiveSession));
    }

    #[tokio::test]
    async fn test_snapshot_available_when_idle() {
        let (engine, _events) = TransferEngine::new(offline_config());
        let snap = engine.snapshot();
        assert_eq!(snap.total_sent, 0);
        assert_eq!(snap.active_transfers, 0);
        assert_eq!(engine.total_peer_speed(), 0.0);
    }
}
