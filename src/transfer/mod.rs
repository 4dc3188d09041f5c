//! # P2P Transfer
//!
//! The WebRTC side of the core: the DataChannel framing protocol, the
//! per-peer sender and receiver state machines, and the engine that
//! orchestrates rendezvous, fanout and control.
//!
//! ## Transfer Flow
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     DATACHANNEL TRANSFER PROTOCOL                       │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Receiver                              Sender                           │
//! │  ────────                              ──────                           │
//! │  1. ready / auth ─────────────────────►                                 │
//! │                                        2. validate password             │
//! │                   ◄─────────────────── auth_success / auth_failed /     │
//! │                                        auth_required                    │
//! │                   ◄─────────────────── 3. file_list                     │
//! │  4. DOWNLOAD_REQUEST ─────────────────►                                 │
//! │     (selection + resume offsets)                                        │
//! │                   ◄─────────────────── 5. file_start (offset)           │
//! │                   ◄═══════════════════ 6. binary chunks (adaptive,      │
//! │                                           backpressure-gated)           │
//! │                   ◄─────────────────── 7. file_end (full-file SHA-256)  │
//! │                                        8. repeat 5-7 per selected file  │
//! │                   ◄─────────────────── 9. transfer_end                  │
//! │                                                                         │
//! │  PAUSE / RESUME / STOPPED may flow either way at any point; they take   │
//! │  effect at the next chunk boundary — in-flight chunks never split.      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod engine;
mod protocol;
mod receiver;
mod rtc;
mod sender;

pub use engine::{EngineEvent, TransferEngine};
pub use protocol::{FileStat, PeerMessage};
pub use receiver::ReceiverPeer;
pub use sender::SenderPeer;

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::fs::FileEntry;

// ============================================================================
// SESSION TYPES
// ============================================================================

/// Which engine a share session runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareMode {
    /// WebRTC DataChannel via the rendezvous relay.
    P2p,
    /// HTTP file server behind the tunnel.
    Cloud,
}

/// Connection state of one peer session.
///
/// Monotonic except that `Connected ↔ Paused ↔ Transferring` may
/// oscillate; `Done`, `Failed` and `Stopped` are terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerState {
    /// Session created, nothing negotiated yet.
    #[default]
    New,
    /// SDP/ICE exchange in progress.
    Connecting,
    /// DataChannel open.
    Connected,
    /// File bytes flowing.
    Transferring,
    /// Producer halted cooperatively.
    Paused,
    /// Protocol completed.
    Done,
    /// Session aborted with an error.
    Failed,
    /// Cancelled by either side.
    Stopped,
}

impl PeerState {
    /// Whether no further transitions can happen.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Stopped)
    }
}

/// One "start sharing" action. At most one is active per engine.
#[derive(Debug, Clone)]
pub struct ShareSession {
    /// Opaque identifier.
    pub id: String,
    /// Which engine carries it.
    pub mode: ShareMode,
    /// Optional shared secret receivers must present.
    pub password: Option<String>,
    /// The flat, ordered file set (directories already expanded).
    pub files: Vec<FileEntry>,
    /// When the share started.
    pub created_at: Instant,
}

impl ShareSession {
    /// Create a session over an expanded file set.
    pub fn new(mode: ShareMode, files: Vec<FileEntry>, password: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            mode,
            password,
            files,
            created_at: Instant::now(),
        }
    }
}

// ============================================================================
// PAUSE GATE
// ============================================================================

/// Cooperative pause flag for a producer loop.
///
/// `pause()` clears the gate, `resume()` sets it, and the producer awaits
/// [`wait_resumed`](Self::wait_resumed) between chunks — so an in-flight
/// chunk always completes and the next one blocks. Pausing does not close
/// the channel or disturb buffered data.
#[derive(Clone)]
pub struct PauseGate {
    running: watch::Sender<bool>,
}

impl PauseGate {
    /// A gate that starts open.
    pub fn new() -> Self {
        let (running, _) = watch::channel(true);
        Self { running }
    }

    /// Halt the producer at the next chunk boundary.
    pub fn pause(&self) {
        let _ = self.running.send_replace(false);
    }

    /// Release a paused producer.
    pub fn resume(&self) {
        let _ = self.running.send_replace(true);
    }

    /// Whether the gate is currently closed.
    pub fn is_paused(&self) -> bool {
        !*self.running.borrow()
    }

    /// Wait until the gate is open. Returns immediately when not paused.
    pub async fn wait_resumed(&self) {
        let mut rx = self.running.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// PER-PEER SPEED SAMPLE
// ============================================================================

/// Instantaneous speed bookkeeping for one peer: a delta estimator over a
/// ≥500 ms window, mirroring the monitor's sampling floor.
#[derive(Debug)]
pub(crate) struct SpeedSample {
    last_at: Option<Instant>,
    last_bytes: u64,
    /// Most recent bytes-per-second estimate.
    pub speed: f64,
}

impl SpeedSample {
    pub(crate) fn new() -> Self {
        Self {
            last_at: None,
            last_bytes: 0,
            speed: 0.0,
        }
    }

    /// Feed the running byte total; recomputes speed when the window
    /// elapsed.
    pub(crate) fn update(&mut self, total_bytes: u64) {
        let now = Instant::now();
        match self.last_at {
            None => {
                self.last_at = Some(now);
                self.last_bytes = total_bytes;
            }
            Some(last) => {
                let elapsed = now.duration_since(last).as_secs_f64();
                if elapsed >= 0.5 {
                    self.speed = total_bytes.saturating_sub(self.last_bytes) as f64 / elapsed;
                    self.last_at = Some(now);
                    self.last_bytes = total_bytes;
                }
            }
        }
    }

    /// Zero the estimate (e.g. on pause).
    pub(crate) fn clear(&mut self) {
        self.speed = 0.0;
        self.last_at = None;
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_state_terminal() {
        assert!(!PeerState::New.is_terminal());
        assert!(!PeerState::Connecting.is_terminal());
        assert!(!PeerState::Connected.is_terminal());
        assert!(!PeerState::Transferring.is_terminal());
        assert!(!PeerState::Paused.is_terminal());
        assert!(PeerState::Done.is_terminal());
        assert!(PeerState::Failed.is_terminal());
        assert!(PeerState::Stopped.is_terminal());
    }

    #[tokio::test]
    async fn test_pause_gate_open_by_default() {
        let gate = PauseGate::new();
        assert!(!gate.is_paused());
        // Must not block.
        tokio::time::timeout(std::time::Duration::from_millis(50), gate.wait_resumed())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_pause_gate_blocks_until_resumed() {
        let gate = PauseGate::new();
        gate.pause();
        assert!(gate.is_paused());

        let waiter = gate.clone();
        let handle = tokio::spawn(async move {
            waiter.wait_resumed().await;
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        gate.resume();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_speed_sample_window() {
        let mut sample = SpeedSample::new();
        sample.update(0);
        sample.update(1000);
        // Window has not elapsed yet.
        assert_eq!(sample.speed, 0.0);
        std::thread::sleep(std::time::Duration::from_millis(550));
        sample.update(10_000);
        assert!(sample.speed > 0.0);
        sample.clear();
        assert_eq!(sample.speed, 0.0);
    }
}
