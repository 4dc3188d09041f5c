//! # Sender Peer Session
//!
//! One [`SenderPeer`] per receiver. The engine creates it when an SDP offer
//! arrives from the rendezvous relay; from then on the peer owns its
//! DataChannel and runs the sender half of the framing protocol in its own
//! task. Control (pause/resume/stop) reaches the protocol loop through a
//! shared gate and a stop flag so that the loop remains the sole writer of
//! its own transfer state.
//!
//! ## Adaptive chunking
//!
//! The producer sizes chunks from the file (`size / 1000`, clamped to
//! 16–256 KiB) and watches the channel's outbound buffered amount. Above
//! 8× the current chunk size the chunk halves (floored at 16 KiB) and the
//! loop sleeps with exponential back-off (1 → 50 ms) until the buffer
//! drains; once clear it regrows by ×1.2 toward the nominal size. No chunk
//! is ever split by control frames — pause and stop act between chunks.

use std::collections::HashSet;
use std::io::SeekFrom;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use webrtc::data_channel::RTCDataChannel;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;

use crate::config::{BUFFER_THRESHOLD_FACTOR, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};
use crate::error::{Error, Result};
use crate::fs::FileEntry;
use crate::hash;
use crate::history::{Direction, Integrity, Method, TransferHistory, TransferRecord, TransferStatus};
use crate::monitor::TransferMonitor;

use super::engine::EngineEvent;
use super::protocol::{FileStat, PeerMessage};
use super::{rtc, PauseGate, PeerState, SpeedSample};

/// Longest single sleep while waiting for the channel buffer to drain.
const MAX_DRAIN_BACKOFF: Duration = Duration::from_millis(50);

// ============================================================================
// ADAPTIVE CHUNKER
// ============================================================================

/// Chunk-size controller for one file.
#[derive(Debug)]
pub(crate) struct AdaptiveChunker {
    nominal: usize,
    current: usize,
}

impl AdaptiveChunker {
    pub(crate) fn new(file_size: u64) -> Self {
        let nominal = usize::try_from(file_size / 1000)
            .unwrap_or(MAX_CHUNK_SIZE)
            .clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);
        Self {
            nominal,
            current: nominal,
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.current
    }

    /// Buffered-amount ceiling for the current chunk size.
    pub(crate) fn threshold(&self) -> usize {
        self.current * BUFFER_THRESHOLD_FACTOR
    }

    /// Congestion: halve, floored at the clamp minimum.
    pub(crate) fn shrink(&mut self) {
        self.current = (self.current / 2).max(MIN_CHUNK_SIZE);
    }

    /// Clear air: regrow by ×1.2 toward the nominal size.
    pub(crate) fn grow(&mut self) {
        if self.current < self.nominal {
            self.current = ((self.current as f64 * 1.2) as usize).min(self.nominal);
        }
    }
}

/// The subset of `offered` the receiver asked for, in offered order.
fn select_files(offered: &[FileEntry], requested: &[String]) -> Vec<FileEntry> {
    let wanted: HashSet<&str> = requested.iter().map(String::as_str).collect();
    offered
        .iter()
        .filter(|f| wanted.contains(f.name.as_str()))
        .cloned()
        .collect()
}

// ============================================================================
// SENDER PEER
// ============================================================================

/// Everything the protocol loop needs besides the channel itself.
#[derive(Clone)]
pub(crate) struct SenderContext {
    pub files: Arc<Vec<FileEntry>>,
    pub password: Option<String>,
    pub monitor: Arc<TransferMonitor>,
    pub history: Arc<TransferHistory>,
    pub events: mpsc::UnboundedSender<EngineEvent>,
}

/// The sender half of one sender↔receiver pair.
pub struct SenderPeer {
    /// Peer id assigned by the rendezvous relay.
    pub sid: String,
    pc: Arc<RTCPeerConnection>,
    state: Arc<Mutex<PeerState>>,
    pause: PauseGate,
    stopped: Arc<AtomicBool>,
    channel: Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
    speed: Arc<Mutex<SpeedSample>>,
    bytes_sent: Arc<AtomicU64>,
}

impl SenderPeer {
    /// Accept a receiver's SDP offer: build the peer connection, install the
    /// DataChannel handlers, and return the fully gathered answer SDP for
    /// the relay.
    pub(crate) async fn accept(
        sid: String,
        offer_sdp: &str,
        ctx: SenderContext,
        ice_servers: &[String],
        connect_timeout: Duration,
    ) -> Result<(Arc<Self>, String)> {
        let pc = rtc::new_peer_connection(ice_servers).await?;
        let peer = Arc::new(Self {
            sid: sid.clone(),
            pc: Arc::clone(&pc),
            state: Arc::new(Mutex::new(PeerState::New)),
            pause: PauseGate::new(),
            stopped: Arc::new(AtomicBool::new(false)),
            channel: Arc::new(Mutex::new(None)),
            speed: Arc::new(Mutex::new(SpeedSample::new())),
            bytes_sent: Arc::new(AtomicU64::new(0)),
        });

        {
            let state = Arc::clone(&peer.state);
            let sid = sid.clone();
            pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                tracing::debug!(peer = %sid, state = %s, "peer connection state");
                if s == RTCPeerConnectionState::Failed {
                    let mut state = state.lock();
                    if !state.is_terminal() {
                        *state = PeerState::Failed;
                    }
                }
                Box::pin(async {})
            }));
        }

        {
            let ctx = ctx.clone();
            let sid = sid.clone();
            let state = Arc::clone(&peer.state);
            let pause = peer.pause.clone();
            let stopped = Arc::clone(&peer.stopped);
            let channel_slot = Arc::clone(&peer.channel);
            let speed = Arc::clone(&peer.speed);
            let bytes_sent = Arc::clone(&peer.bytes_sent);
            pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                let ctx = ctx.clone();
                let sid = sid.clone();
                let state = Arc::clone(&state);
                let pause = pause.clone();
                let stopped = Arc::clone(&stopped);
                let channel_slot = Arc::clone(&channel_slot);
                let speed = Arc::clone(&speed);
                let bytes_sent = Arc::clone(&bytes_sent);
                Box::pin(async move {
                    tracing::info!(peer = %sid, label = %dc.label(), "data channel connected");
                    *channel_slot.lock() = Some(Arc::clone(&dc));
                    *state.lock() = PeerState::Connected;
                    let _ = ctx.events.send(EngineEvent::PeerConnected { peer: sid.clone() });

                    let (frame_tx, frame_rx) = mpsc::unbounded_channel::<Result<PeerMessage>>();
                    install_frame_router(&dc, &sid, frame_tx, &pause, &stopped, &speed);

                    let dc_loop = Arc::clone(&dc);
                    tokio::spawn(run_sender_protocol(
                        dc_loop, frame_rx, ctx, sid, state, pause, stopped, speed, bytes_sent,
                    ));
                })
            }));
        }

        *peer.state.lock() = PeerState::Connecting;
        let answer = rtc::answer_offer_sdp(&pc, offer_sdp).await?;

        // Signaling-level establishment deadline.
        {
            let state = Arc::clone(&peer.state);
            let pc = Arc::clone(&pc);
            let sid = sid.clone();
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
                    tracing::warn!(peer = %sid, "connection establishment timed out");
                    let _ = pc.close().await;
                }
            });
        }

        Ok((peer, answer))
    }

    /// Current connection state.
    pub fn state(&self) -> PeerState {
        *self.state.lock()
    }

    /// This peer's instantaneous send speed in bytes per second.
    pub fn speed(&self) -> f64 {
        self.speed.lock().speed
    }

    /// Halt this peer's producer after the in-flight chunk and tell the
    /// receiver.
    pub async fn pause(&self) {
        self.pause.pause();
        self.speed.lock().clear();
        self.send_control(PeerMessage::Pause).await;
        let mut state = self.state.lock();
        if *state == PeerState::Transferring {
            *state = PeerState::Paused;
        }
    }

    /// Release the producer and tell the receiver.
    pub async fn resume(&self) {
        self.pause.resume();
        self.send_control(PeerMessage::Resume).await;
        let mut state = self.state.lock();
        if *state == PeerState::Paused {
            *state = PeerState::Transferring;
        }
    }

    /// Cancel the session: `STOPPED` on the wire, then close the
    /// connection. Terminal and idempotent.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        // Release a paused producer so it can observe the stop flag.
        self.pause.resume();
        self.send_control(PeerMessage::Stopped).await;
        let mut state = self.state.lock();
        if !state.is_terminal() {
            *state = PeerState::Stopped;
        }
        drop(state);
        let _ = self.pc.close().await;
    }

    async fn send_control(&self, msg: PeerMessage) {
        let channel = self.channel.lock().clone();
        if let (Some(dc), Ok(encoded)) = (channel, msg.encode()) {
            if let Err(e) = dc.send_text(encoded).await {
                tracing::debug!(peer = %self.sid, error = %e, "control frame not delivered");
            }
        }
    }
}

/// Route inbound frames: symmetric control is applied immediately, all
/// other text frames flow to the protocol loop. The sender never expects
/// binary frames.
fn install_frame_router(
    dc: &Arc<RTCDataChannel>,
    sid: &str,
    frame_tx: mpsc::UnboundedSender<Result<PeerMessage>>,
    pause: &PauseGate,
    stopped: &Arc<AtomicBool>,
    speed: &Arc<Mutex<SpeedSample>>,
) {
    let sid = sid.to_string();
    let pause = pause.clone();
    let stopped = Arc::clone(stopped);
    let speed = Arc::clone(speed);
    dc.on_message(Box::new(move |msg| {
        if !msg.is_string {
            return Box::pin(async {});
        }
        let text = String::from_utf8_lossy(&msg.data).into_owned();
        match PeerMessage::decode(&text) {
            Ok(PeerMessage::Pause) => {
                tracing::info!(peer = %sid, "receiver requested pause");
                pause.pause();
                speed.lock().clear();
            }
            Ok(PeerMessage::Resume) => {
                tracing::info!(peer = %sid, "receiver requested resume");
                pause.resume();
            }
            Ok(PeerMessage::Stopped) => {
                stopped.store(true, Ordering::SeqCst);
                pause.resume();
                let _ = frame_tx.send(Ok(PeerMessage::Stopped));
            }
            Ok(PeerMessage::Unknown) => {
                tracing::warn!(peer = %sid, frame = %text, "ignoring unknown frame");
            }
            Ok(frame) => {
                let _ = frame_tx.send(Ok(frame));
            }
            Err(e) => {
                // Malformed frames abort the session with status Failed.
                tracing::warn!(peer = %sid, error = %e, "malformed text frame");
                let _ = frame_tx.send(Err(e));
            }
        }
        Box::pin(async {})
    }));
}

// ============================================================================
// PROTOCOL LOOP
// ============================================================================

#[allow(clippy::too_many_arguments)]
async fn run_sender_protocol(
    dc: Arc<RTCDataChannel>,
    frame_rx: mpsc::UnboundedReceiver<Result<PeerMessage>>,
    ctx: SenderContext,
    sid: String,
    state: Arc<Mutex<PeerState>>,
    pause: PauseGate,
    stopped: Arc<AtomicBool>,
    speed: Arc<Mutex<SpeedSample>>,
    bytes_sent: Arc<AtomicU64>,
) {
    let outcome = sender_protocol(
        &dc, frame_rx, &ctx, &sid, &state, &pause, &stopped, &speed, &bytes_sent,
    )
    .await;
    match outcome {
        Ok(()) => {
            tracing::info!(peer = %sid, "transfer complete");
        }
        Err(Error::Cancelled) => {
            let mut state = state.lock();
            if !state.is_terminal() {
                *state = PeerState::Stopped;
            }
            tracing::info!(peer = %sid, "transfer stopped");
        }
        Err(e) => {
            let mut st = state.lock();
            if !st.is_terminal() {
                *st = PeerState::Failed;
            }
            drop(st);
            tracing::warn!(peer = %sid, error = %e, "sender session failed");
            let _ = ctx.events.send(EngineEvent::PeerFailed {
                peer: sid.clone(),
                message: e.to_string(),
            });
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn sender_protocol(
    dc: &Arc<RTCDataChannel>,
    mut frame_rx: mpsc::UnboundedReceiver<Result<PeerMessage>>,
    ctx: &SenderContext,
    sid: &str,
    state: &Arc<Mutex<PeerState>>,
    pause: &PauseGate,
    stopped: &Arc<AtomicBool>,
    speed: &Arc<Mutex<SpeedSample>>,
    bytes_sent: &Arc<AtomicU64>,
) -> Result<()> {
    // ── Auth gate ───────────────────────────────────────────────────────
    loop {
        let frame = next_frame(&mut frame_rx, stopped).await?;
        match frame {
            PeerMessage::Ready => {
                if ctx.password.is_some() {
                    send_text(dc, &PeerMessage::AuthRequired).await?;
                    tracing::info!(peer = %sid, "password required, waiting for auth");
                    continue;
                }
                break;
            }
            PeerMessage::Auth { password } => {
                match &ctx.password {
                    Some(expected) if *expected != password => {
                        send_text(dc, &PeerMessage::AuthFailed).await?;
                        *state.lock() = PeerState::Failed;
                        let _ = ctx.events.send(EngineEvent::AuthFailed { peer: sid.to_string() });
                        let _ = dc.close().await;
                        return Err(Error::Auth("receiver presented a wrong password".into()));
                    }
                    _ => {
                        send_text(dc, &PeerMessage::AuthSuccess).await?;
                        break;
                    }
                }
            }
            other => {
                tracing::debug!(peer = %sid, frame = ?other, "frame ignored before handshake");
            }
        }
    }

    // ── Catalogue & selection ───────────────────────────────────────────
    let catalogue: Vec<FileStat> = ctx
        .files
        .iter()
        .map(|f| FileStat {
            name: f.name.clone(),
            size: f.size,
        })
        .collect();
    let total_size: u64 = catalogue.iter().map(|f| f.size).sum();
    send_text(
        dc,
        &PeerMessage::FileList {
            files: catalogue,
            total_size,
        },
    )
    .await?;
    tracing::info!(peer = %sid, files = ctx.files.len(), "file list sent, awaiting selection");

    let (requested, offsets) = loop {
        match next_frame(&mut frame_rx, stopped).await? {
            PeerMessage::DownloadRequest { files, offsets } => break (files, offsets),
            other => {
                tracing::debug!(peer = %sid, frame = ?other, "frame ignored while awaiting selection");
            }
        }
    };

    let selected = select_files(&ctx.files, &requested);
    tracing::info!(peer = %sid, selected = selected.len(), "download request received");

    // ── Stream ──────────────────────────────────────────────────────────
    *state.lock() = PeerState::Transferring;
    ctx.monitor.start_transfer();

    let total = selected.len();
    let stream_result: Result<()> = async {
        for (index, entry) in selected.iter().enumerate() {
            if stopped.load(Ordering::SeqCst) {
                record_cancelled(ctx, entry);
                break;
            }
            let offset = offsets.get(&entry.name).copied().unwrap_or(0).min(entry.size);
            match stream_one_file(
                dc, entry, index, total, offset, ctx, pause, stopped, speed, bytes_sent,
            )
            .await
            {
                Ok(()) => {
                    let _ = ctx.events.send(EngineEvent::FileSent {
                        peer: sid.to_string(),
                        name: entry.name.clone(),
                    });
                }
                Err(Error::Cancelled) => {
                    record_cancelled(ctx, entry);
                    break;
                }
                Err(Error::Io(msg)) => {
                    // This file failed; the receiver resynchronizes on the
                    // next file_start. Remaining files still go out.
                    tracing::warn!(peer = %sid, file = %entry.name, error = %msg, "file skipped");
                    ctx.monitor.finish_file(&entry.name);
                    let _ = ctx.history.log(TransferRecord::new(
                        entry.name.clone(),
                        entry.size,
                        Direction::Send,
                        TransferStatus::Failed,
                        Integrity::Skipped,
                        0.0,
                        0.0,
                        Method::P2p,
                    ));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
    .await;

    ctx.monitor.end_transfer();
    stream_result?;
    if stopped.load(Ordering::SeqCst) {
        return Err(Error::Cancelled);
    }
    send_text(dc, &PeerMessage::TransferEnd).await?;
    {
        let mut st = state.lock();
        if !st.is_terminal() {
            *st = PeerState::Done;
        }
    }
    let _ = ctx.events.send(EngineEvent::PeerDone {
        peer: sid.to_string(),
    });
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn stream_one_file(
    dc: &Arc<RTCDataChannel>,
    entry: &FileEntry,
    index: usize,
    total: usize,
    offset: u64,
    ctx: &SenderContext,
    pause: &PauseGate,
    stopped: &Arc<AtomicBool>,
    speed: &Arc<Mutex<SpeedSample>>,
    bytes_sent: &Arc<AtomicU64>,
) -> Result<()> {
    // Open and seed the full-file hash before announcing the file, so an
    // unreadable file is skipped without ever emitting file_start.
    let mut hasher = if offset > 0 {
        let path = entry.path.clone();
        tokio::task::spawn_blocking(move || hash::prefix_hasher(&path, offset))
            .await
            .map_err(|e| Error::Io(e.to_string()))??
    } else {
        Sha256::new()
    };
    let mut file = tokio::fs::File::open(&entry.path).await?;
    if offset > 0 {
        file.seek(SeekFrom::Start(offset)).await?;
        tracing::info!(file = %entry.name, offset, "resuming from offset");
    }

    send_text(
        dc,
        &PeerMessage::FileStart {
            name: entry.name.clone(),
            size: entry.size,
            index,
            total,
            offset,
        },
    )
    .await?;

    let started = Instant::now();
    let mut chunker = AdaptiveChunker::new(entry.size);
    let mut sent = offset;
    ctx.monitor.update_file_progress(&entry.name, sent, entry.size);

    loop {
        pause.wait_resumed().await;
        if stopped.load(Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }

        // Backpressure against the channel's outbound buffer.
        if dc.buffered_amount().await > chunker.threshold() {
            chunker.shrink();
            let mut backoff = Duration::from_millis(1);
            while dc.buffered_amount().await > chunker.threshold() {
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 3 / 2).min(MAX_DRAIN_BACKOFF);
                if stopped.load(Ordering::SeqCst) {
                    return Err(Error::Cancelled);
                }
            }
        } else {
            chunker.grow();
        }

        let mut buf = vec![0u8; chunker.size()];
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        buf.truncate(n);
        hasher.update(&buf);
        dc.send(&Bytes::from(buf)).await?;

        sent += n as u64;
        let peer_total = bytes_sent.fetch_add(n as u64, Ordering::Relaxed) + n as u64;
        ctx.monitor.add_bytes(n as u64);
        ctx.monitor.update_file_progress(&entry.name, sent, entry.size);
        speed.lock().update(peer_total);
    }

    send_text(
        dc,
        &PeerMessage::FileEnd {
            name: entry.name.clone(),
            hash: hex::encode(hasher.finalize()),
        },
    )
    .await?;

    let duration = started.elapsed().as_secs_f64();
    let moved = entry.size - offset;
    let _ = ctx.history.log(TransferRecord::new(
        entry.name.clone(),
        entry.size,
        Direction::Send,
        TransferStatus::Success,
        Integrity::Verified,
        duration,
        if duration > 0.0 { moved as f64 / duration } else { 0.0 },
        Method::P2p,
    ));
    ctx.monitor.finish_file(&entry.name);
    tracing::info!(file = %entry.name, bytes = moved, "file sent");
    Ok(())
}

/// Next protocol frame. `Cancelled` once the stop flag is up or a
/// `STOPPED` arrives; a routed decode error or a vanished channel is a
/// protocol failure.
async fn next_frame(
    frame_rx: &mut mpsc::UnboundedReceiver<Result<PeerMessage>>,
    stopped: &Arc<AtomicBool>,
) -> Result<PeerMessage> {
    if stopped.load(Ordering::SeqCst) {
        return Err(Error::Cancelled);
    }
    match frame_rx.recv().await {
        Some(Ok(PeerMessage::Stopped)) => Err(Error::Cancelled),
        Some(Ok(frame)) => Ok(frame),
        Some(Err(e)) => Err(e),
        None => Err(Error::Protocol("data channel closed mid-protocol".into())),
    }
}

async fn send_text(dc: &Arc<RTCDataChannel>, msg: &PeerMessage) -> Result<()> {
    dc.send_text(msg.encode()?).await?;
    Ok(())
}

fn record_cancelled(ctx: &SenderContext, entry: &FileEntry) {
    let _ = ctx.history.log(TransferRecord::new(
        entry.name.clone(),
        entry.size,
        Direction::Send,
        TransferStatus::Cancelled,
        Integrity::Skipped,
        0.0,
        0.0,
        Method::P2p,
    ));
    ctx.monitor.finish_file(&entry.name);
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn entry(name: &str, size: u64) -> FileEntry {
        FileEntry {
            name: name.into(),
            size,
            path: PathBuf::from(format!("/src/{name}")),
            is_folder: false,
        }
    }

    #[test]
    fn test_chunker_nominal_clamped() {
        // Tiny file: clamp up to the minimum.
        assert_eq!(AdaptiveChunker::new(1_000).size(), MIN_CHUNK_SIZE);
        // Huge file: clamp down to the maximum.
        assert_eq!(AdaptiveChunker::new(10_000_000_000).size(), MAX_CHUNK_SIZE);
        // In between: size / 1000.
        assert_eq!(AdaptiveChunker::new(100_000_000).size(), 100_000);
    }

    #[test]
    fn test_chunker_shrink_floors_at_minimum() {
        let mut chunker = AdaptiveChunker::new(100_000_000);
        for _ in 0..20 {
            chunker.shrink();
        }
        assert_eq!(chunker.size(), MIN_CHUNK_SIZE);
    }

    #[test]
    fn test_chunker_grow_caps_at_nominal() {
        let mut chunker = AdaptiveChunker::new(100_000_000);
        let nominal = chunker.size();
        chunker.shrink();
        chunker.shrink();
        let shrunk = chunker.size();
        assert!(shrunk < nominal);
        for _ in 0..100 {
            chunker.grow();
        }
        assert_eq!(chunker.size(), nominal);
    }

    #[test]
    fn test_chunker_threshold_tracks_current_size() {
        let mut chunker = AdaptiveChunker::new(100_000_000);
        assert_eq!(chunker.threshold(), chunker.size() * BUFFER_THRESHOLD_FACTOR);
        chunker.shrink();
        assert_eq!(chunker.threshold(), chunker.size() * BUFFER_THRESHOLD_FACTOR);
    }

    #[test]
    fn test_select_files_keeps_offered_order() {
        let offered = vec![entry("a", 1), entry("b", 2), entry("c", 3)];
        let requested = vec!["c".to_string(), "a".to_string()];
        let selected = select_files(&offered, &requested);
        let names: Vec<_> = selected.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[test]
    fn test_select_files_ignores_unknown_names() {
        let offered = vec![entry("a", 1)];
        let requested = vec!["ghost".to_string(), "a".to_string()];
        let selected = select_files(&offered, &requested);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name, "a");
    }

    #[test]
    fn test_select_files_empty_request_selects_nothing() {
        let offered = vec![entry("a", 1), entry("b", 2)];
        assert!(select_files(&offered, &[]).is_empty());
    }
}
