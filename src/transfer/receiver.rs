//! # Receiver Peer Session
//!
//! The receiving half of a transfer: creates the DataChannel and the SDP
//! offer, walks the sender's catalogue, requests a selection with resume
//! offsets, and writes incoming files to disk with integrity verification.
//!
//! Every peer-supplied filename passes [`crate::fs::is_safe_join`] before a
//! byte touches disk; a violation skips that file with a security warning
//! and the session carries on — subsequent valid files are unaffected.
//!
//! All file I/O happens in the protocol loop, which is the sole owner of
//! the current file handle; the channel callbacks only route frames into
//! it.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot, watch};
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::RTCDataChannel;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;

use crate::error::{Error, Result};
use crate::fs::is_safe_join;
use crate::hash;
use crate::history::{Direction, Integrity, Method, TransferHistory, TransferRecord, TransferStatus};
use crate::monitor::TransferMonitor;

use super::engine::EngineEvent;
use super::protocol::{FileStat, PeerMessage};
use super::{rtc, PeerState, SpeedSample};

// ============================================================================
// RECEIVER PEER
// ============================================================================

/// Shared collaborators for the receive side.
#[derive(Clone)]
pub(crate) struct ReceiverContext {
    pub monitor: Arc<TransferMonitor>,
    pub history: Arc<TransferHistory>,
    pub events: mpsc::UnboundedSender<EngineEvent>,
}

/// Frames as they arrive from the channel, physical type preserved.
enum InboundFrame {
    Text(PeerMessage),
    Binary(Bytes),
    /// A text frame that failed to decode; aborts the session as Failed.
    Malformed(Error),
}

/// The receiver half of one sender↔receiver pair.
pub struct ReceiverPeer {
    pc: Arc<RTCPeerConnection>,
    channel: Arc<RTCDataChannel>,
    state: Arc<Mutex<PeerState>>,
    stopped: Arc<AtomicBool>,
    save_dir: Arc<Mutex<Option<PathBuf>>>,
    listing: Arc<Mutex<Option<Vec<FileStat>>>>,
    listing_rx: tokio::sync::Mutex<Option<oneshot::Receiver<Result<Vec<FileStat>>>>>,
    done: watch::Sender<bool>,
}

impl ReceiverPeer {
    /// Build the peer connection and DataChannel, install handlers, start
    /// the protocol loop, and return the fully gathered offer SDP to post
    /// through the relay.
    pub(crate) async fn connect(
        ctx: ReceiverContext,
        password: Option<String>,
        ice_servers: &[String],
        connect_timeout: Duration,
    ) -> Result<(Arc<Self>, String)> {
        let pc = rtc::new_peer_connection(ice_servers).await?;
        let channel = pc
            .create_data_channel(
                rtc::CHANNEL_LABEL,
                Some(RTCDataChannelInit {
                    ordered: Some(true),
                    ..Default::default()
                }),
            )
            .await?;

        let (listing_tx, listing_rx) = oneshot::channel();
        let (done_tx, _) = watch::channel(false);
        let peer = Arc::new(Self {
            pc: Arc::clone(&pc),
            channel: Arc::clone(&channel),
            state: Arc::new(Mutex::new(PeerState::New)),
            stopped: Arc::new(AtomicBool::new(false)),
            save_dir: Arc::new(Mutex::new(None)),
            listing: Arc::new(Mutex::new(None)),
            listing_rx: tokio::sync::Mutex::new(Some(listing_rx)),
            done: done_tx,
        });

        {
            let state = Arc::clone(&peer.state);
            pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                tracing::debug!(state = %s, "peer connection state");
                if s == RTCPeerConnectionState::Failed {
                    let mut state = state.lock();
                    if !state.is_terminal() {
                        *state = PeerState::Failed;
                    }
                }
                Box::pin(async {})
            }));
        }

        // Opening handshake: announce ourselves as soon as the channel is
        // live.
        {
            let dc = Arc::clone(&channel);
            let state = Arc::clone(&peer.state);
            channel.on_open(Box::new(move || {
                let dc = Arc::clone(&dc);
                let state = Arc::clone(&state);
                let hello = match &password {
                    Some(password) => PeerMessage::Auth {
                        password: password.clone(),
                    },
                    None => PeerMessage::Ready,
                };
                Box::pin(async move {
                    tracing::info!("data channel open");
                    *state.lock() = PeerState::Connected;
                    if let Ok(encoded) = hello.encode() {
                        if let Err(e) = dc.send_text(encoded).await {
                            tracing::warn!(error = %e, "opening handshake failed");
                        }
                    }
                })
            }));
        }

        // Frame router: control applies immediately, the rest feeds the
        // protocol loop.
        let (frame_tx, frame_rx) = mpsc::unbounded_channel::<InboundFrame>();
        {
            let stopped = Arc::clone(&peer.stopped);
            channel.on_message(Box::new(move |msg| {
                if msg.is_string {
                    let text = String::from_utf8_lossy(&msg.data).into_owned();
                    match PeerMessage::decode(&text) {
                        Ok(PeerMessage::Pause) => {
                            tracing::info!("sender paused the transfer");
                        }
                        Ok(PeerMessage::Resume) => {
                            tracing::info!("sender resumed the transfer");
                        }
                        Ok(PeerMessage::Stopped) => {
                            stopped.store(true, Ordering::SeqCst);
                            let _ = frame_tx.send(InboundFrame::Text(PeerMessage::Stopped));
                        }
                        Ok(frame) => {
                            let _ = frame_tx.send(InboundFrame::Text(frame));
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "malformed text frame");
                            let _ = frame_tx.send(InboundFrame::Malformed(e));
                        }
                    }
                } else {
                    let _ = frame_tx.send(InboundFrame::Binary(msg.data.clone()));
                }
                Box::pin(async {})
            }));
        }

        tokio::spawn(run_receiver_protocol(
            frame_rx,
            ctx,
            Arc::clone(&peer.save_dir),
            Arc::clone(&peer.listing),
            listing_tx,
            Arc::clone(&peer.state),
            peer.done.clone(),
        ));

        *peer.state.lock() = PeerState::Connecting;
        let offer = rtc::create_offer_sdp(&pc).await?;

        // Establishment deadline.
        {
            let state = Arc::clone(&peer.state);
            let pc = Arc::clone(&pc);
            tokio::spawn(async move {
                tokio::time::sleep(connect_timeout).await;
                let timed_out = {
                    let mut state = state.lock();
                    if matches!(*state, PeerState::New | PeerState::Connecting) {
                        *state = PeerState::Failed;
                        true
                    } else {
                        false
                    }
                };
                if timed_out {
                    tracing::warn!("connection establishment timed out");
                    let _ = pc.close().await;
                }
            });
        }

        Ok((peer, offer))
    }

    /// Apply the sender's SDP answer.
    pub async fn set_answer(&self, sdp: &str) -> Result<()> {
        rtc::apply_answer_sdp(&self.pc, sdp).await
    }

    /// Current connection state.
    pub fn state(&self) -> PeerState {
        *self.state.lock()
    }

    /// The catalogue the sender offered, once received.
    pub fn listing(&self) -> Option<Vec<FileStat>> {
        self.listing.lock().clone()
    }

    /// Wait for the sender's catalogue (or an auth rejection), bounded by
    /// `timeout`.
    pub async fn wait_for_listing(&self, timeout: Duration) -> Result<Vec<FileStat>> {
        let rx = self
            .listing_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::Protocol("listing already consumed".into()))?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Protocol("session ended before the file list".into())),
            Err(_) => {
                let mut state = self.state.lock();
                if !state.is_terminal() {
                    *state = PeerState::Failed;
                }
                drop(state);
                let _ = self.pc.close().await;
                Err(Error::Timeout("no file list from the sender".into()))
            }
        }
    }

    /// Send the selection with resume offsets gathered from `save_dir`.
    /// Incoming files will be written beneath that directory.
    pub async fn request_download(&self, files: Vec<String>, save_dir: PathBuf) -> Result<()> {
        let mut offsets = std::collections::HashMap::new();
        for name in &files {
            if let Some(target) = is_safe_join(&save_dir, name) {
                if let Ok(meta) = std::fs::metadata(&target) {
                    if meta.len() > 0 {
                        offsets.insert(name.clone(), meta.len());
                    }
                }
            }
        }
        *self.save_dir.lock() = Some(save_dir);
        tracing::info!(
            files = files.len(),
            resumable = offsets.len(),
            "requesting download"
        );
        self.channel
            .send_text(PeerMessage::DownloadRequest { files, offsets }.encode()?)
            .await?;
        Ok(())
    }

    /// Ask the sender to halt after the in-flight chunk.
    pub async fn pause(&self) {
        if let Ok(encoded) = PeerMessage::Pause.encode() {
            let _ = self.channel.send_text(encoded).await;
        }
    }

    /// Ask the sender to continue.
    pub async fn resume(&self) {
        if let Ok(encoded) = PeerMessage::Resume.encode() {
            let _ = self.channel.send_text(encoded).await;
        }
    }

    /// Cancel the session and close the connection. Idempotent.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(encoded) = PeerMessage::Stopped.encode() {
            let _ = self.channel.send_text(encoded).await;
        }
        {
            let mut state = self.state.lock();
            if !state.is_terminal() {
                *state = PeerState::Stopped;
            }
        }
        let _ = self.done.send_replace(true);
        let _ = self.pc.close().await;
    }

    /// Wait until the session reaches a terminal state.
    pub async fn wait_done(&self) {
        let mut rx = self.done.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

// ============================================================================
// PROTOCOL LOOP
// ============================================================================

struct CurrentFile {
    name: String,
    size: u64,
    file: tokio::fs::File,
    hasher: Sha256,
    /// Bytes accounted for this file, including any resumed prefix.
    received: u64,
    started: Instant,
    resumed_from: u64,
}

#[allow(clippy::too_many_arguments)]
async fn run_receiver_protocol(
    mut frames: mpsc::UnboundedReceiver<InboundFrame>,
    ctx: ReceiverContext,
    save_dir: Arc<Mutex<Option<PathBuf>>>,
    listing: Arc<Mutex<Option<Vec<FileStat>>>>,
    listing_tx: oneshot::Sender<Result<Vec<FileStat>>>,
    state: Arc<Mutex<PeerState>>,
    done: watch::Sender<bool>,
) {
    let mut listing_tx = Some(listing_tx);
    let mut current: Option<CurrentFile> = None;
    let mut bytes_received: u64 = 0;
    let mut files_received: usize = 0;
    let mut speed = SpeedSample::new();

    while let Some(frame) = frames.recv().await {
        match frame {
            InboundFrame::Text(msg) => match msg {
                PeerMessage::AuthSuccess => {
                    tracing::info!("password accepted");
                }
                PeerMessage::AuthRequired | PeerMessage::AuthFailed => {
                    // Either we sent no password or the wrong one. Terminal.
                    tracing::warn!("authentication failed");
                    *state.lock() = PeerState::Failed;
                    let _ = ctx.events.send(EngineEvent::AuthFailed {
                        peer: "sender".into(),
                    });
                    if let Some(tx) = listing_tx.take() {
                        let _ = tx.send(Err(Error::Auth("rejected by the sender".into())));
                    }
                    break;
                }
                PeerMessage::FileList { files, total_size } => {
                    tracing::info!(files = files.len(), total_size, "file list received");
                    ctx.monitor.set_total_size(total_size);
                    *listing.lock() = Some(files.clone());
                    if let Some(tx) = listing_tx.take() {
                        let _ = tx.send(Ok(files));
                    }
                }
                PeerMessage::FileStart {
                    name,
                    size,
                    index,
                    total,
                    offset,
                } => {
                    if let Some(prev) = current.take() {
                        tracing::warn!(file = %prev.name, "file_start before file_end, abandoning");
                        ctx.monitor.finish_file(&prev.name);
                    }
                    let Some(dir) = save_dir.lock().clone() else {
                        tracing::warn!(file = %name, "file_start before a download request");
                        continue;
                    };
                    let Some(target) = is_safe_join(&dir, &name) else {
                        tracing::warn!(file = %name, "SECURITY: filename escapes the save directory, skipping");
                        let _ = ctx.events.send(EngineEvent::SecurityWarning { name });
                        continue;
                    };
                    tracing::info!(file = %name, index = index + 1, total, offset, "receiving");
                    match open_destination(&target, offset).await {
                        Ok((file, hasher, resumed_from)) => {
                            bytes_received += resumed_from;
                            ctx.monitor.add_bytes(resumed_from);
                            ctx.monitor.update_file_progress(&name, resumed_from, size);
                            current = Some(CurrentFile {
                                name,
                                size,
                                file,
                                hasher,
                                received: resumed_from,
                                started: Instant::now(),
                                resumed_from,
                            });
                        }
                        Err(e) => {
                            tracing::warn!(file = %name, error = %e, "cannot open destination");
                            let _ = ctx.history.log(TransferRecord::new(
                                name,
                                size,
                                Direction::Receive,
                                TransferStatus::Failed,
                                Integrity::Skipped,
                                0.0,
                                0.0,
                                Method::P2p,
                            ));
                        }
                    }
                }
                PeerMessage::FileEnd { name, hash } => {
                    let Some(mut finished) = current.take() else {
                        tracing::warn!(file = %name, "file_end without file_start");
                        continue;
                    };
                    if let Err(e) = finished.file.flush().await {
                        tracing::warn!(file = %name, error = %e, "flush failed");
                    }
                    drop(finished.file);

                    let local = hex::encode(finished.hasher.finalize());
                    let integrity = if hash.is_empty() {
                        Integrity::Skipped
                    } else if local == hash {
                        Integrity::Verified
                    } else {
                        Integrity::Mismatch
                    };
                    match integrity {
                        Integrity::Verified => tracing::info!(file = %name, "received, hash OK"),
                        Integrity::Mismatch => {
                            tracing::warn!(file = %name, expected = %hash, actual = %local, "received, hash MISMATCH")
                        }
                        Integrity::Skipped => tracing::info!(file = %name, "received, no hash offered"),
                    }

                    let duration = finished.started.elapsed().as_secs_f64();
                    let moved = finished.received.saturating_sub(finished.resumed_from);
                    let _ = ctx.history.log(TransferRecord::new(
                        name.clone(),
                        finished.size,
                        Direction::Receive,
                        TransferStatus::Success,
                        integrity,
                        duration,
                        if duration > 0.0 { moved as f64 / duration } else { 0.0 },
                        Method::P2p,
                    ));
                    ctx.monitor.finish_file(&name);
                    files_received += 1;
                    let _ = ctx.events.send(EngineEvent::FileReceived { name, integrity });
                }
                PeerMessage::TransferEnd => {
                    tracing::info!(files = files_received, "transfer complete");
                    {
                        let mut st = state.lock();
                        if !st.is_terminal() {
                            *st = PeerState::Done;
                        }
                    }
                    let _ = ctx.events.send(EngineEvent::TransferComplete {
                        files: files_received,
                    });
                    let _ = done.send_replace(true);
                    break;
                }
                PeerMessage::Stopped => {
                    tracing::info!("sender stopped the transfer");
                    {
                        let mut st = state.lock();
                        if !st.is_terminal() {
                            *st = PeerState::Stopped;
                        }
                    }
                    if let Some(cur) = current.take() {
                        let _ = ctx.history.log(TransferRecord::new(
                            cur.name.clone(),
                            cur.size,
                            Direction::Receive,
                            TransferStatus::Cancelled,
                            Integrity::Skipped,
                            cur.started.elapsed().as_secs_f64(),
                            0.0,
                            Method::P2p,
                        ));
                        ctx.monitor.finish_file(&cur.name);
                    }
                    if let Some(tx) = listing_tx.take() {
                        let _ = tx.send(Err(Error::Cancelled));
                    }
                    let _ = done.send_replace(true);
                    break;
                }
                PeerMessage::Unknown => {
                    tracing::warn!("ignoring unknown frame");
                }
                other => {
                    tracing::debug!(frame = ?other, "frame ignored in receive role");
                }
            },
            InboundFrame::Binary(data) => {
                let Some(cur) = current.as_mut() else {
                    tracing::debug!(bytes = data.len(), "binary frame with no open file, dropped");
                    continue;
                };
                if let Err(e) = cur.file.write_all(&data).await {
                    tracing::warn!(file = %cur.name, error = %e, "write failed, abandoning file");
                    let abandoned = current.take().unwrap();
                    let _ = ctx.history.log(TransferRecord::new(
                        abandoned.name.clone(),
                        abandoned.size,
                        Direction::Receive,
                        TransferStatus::Failed,
                        Integrity::Skipped,
                        abandoned.started.elapsed().as_secs_f64(),
                        0.0,
                        Method::P2p,
                    ));
                    ctx.monitor.finish_file(&abandoned.name);
                    continue;
                }
                cur.hasher.update(&data);
                cur.received += data.len() as u64;
                bytes_received += data.len() as u64;
                ctx.monitor.add_bytes(data.len() as u64);
                ctx.monitor
                    .update_file_progress(&cur.name, cur.received, cur.size);
                speed.update(bytes_received);
            }
            InboundFrame::Malformed(e) => {
                tracing::warn!(error = %e, "aborting session on malformed frame");
                *state.lock() = PeerState::Failed;
                if let Some(cur) = current.take() {
                    let _ = ctx.history.log(TransferRecord::new(
                        cur.name.clone(),
                        cur.size,
                        Direction::Receive,
                        TransferStatus::Failed,
                        Integrity::Skipped,
                        cur.started.elapsed().as_secs_f64(),
                        0.0,
                        Method::P2p,
                    ));
                    ctx.monitor.finish_file(&cur.name);
                }
                if let Some(tx) = listing_tx.take() {
                    let _ = tx.send(Err(e));
                }
                let _ = done.send_replace(true);
                break;
            }
        }
    }

    // Channel gone without a clean ending.
    {
        let mut st = state.lock();
        if !st.is_terminal() {
            *st = PeerState::Failed;
        }
    }
    let _ = done.send_replace(true);
}

/// Open the destination per the resume rule: append only when the sender
/// offset is non-zero and the local file is exactly that long; anything
/// else truncates and starts over. Returns the handle, the seeded hasher
/// and how many bytes the resume skipped.
async fn open_destination(
    target: &std::path::Path,
    offset: u64,
) -> Result<(tokio::fs::File, Sha256, u64)> {
    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let existing = tokio::fs::metadata(target).await.map(|m| m.len()).ok();
    if offset > 0 && existing == Some(offset) {
        let path = target.to_path_buf();
        let hasher = tokio::task::spawn_blocking(move || hash::prefix_hasher(&path, offset))
            .await
            .map_err(|e| Error::Io(e.to_string()))??;
        let file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(target)
            .await?;
        Ok((file, hasher, offset))
    } else {
        let file = tokio::fs::File::create(target).await?;
        Ok((file, Sha256::new(), 0))
    }
}

// ============================================================================
// TESTS
// ============================================================================
