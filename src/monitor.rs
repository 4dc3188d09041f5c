//! # Transfer Monitor
//!
//! Thread-safe counters the engines feed as bytes move, condensed into a
//! [`MonitorSnapshot`] the UI polls at 1 Hz. Speed is a delta estimator with
//! a 500 ms sampling floor; ETA is `remaining / speed` while speed is
//! positive.
//!
//! Every operation is O(1) inside the critical section and `snapshot()`
//! never touches I/O.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;

/// Minimum interval between speed samples, in seconds.
const SPEED_SAMPLE_FLOOR: f64 = 0.5;

// ============================================================================
// SNAPSHOT
// ============================================================================

/// Per-file progress inside a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FileProgress {
    /// Bytes delivered so far.
    pub sent: u64,
    /// Total bytes for this file.
    pub size: u64,
}

/// Read-only view of the monitor, cheap to produce and to serialize.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorSnapshot {
    /// Bytes delivered across all active transfers.
    pub total_sent: u64,
    /// Total bytes the session set out to move.
    pub total_size: u64,
    /// Bytes per second, recomputed at most every 500 ms.
    pub current_speed: f64,
    /// Estimated seconds remaining; `0` whenever speed is zero.
    pub eta_secs: u64,
    /// Number of in-flight transfers.
    pub active_transfers: usize,
    /// Per-file progress keyed by wire name.
    pub files: HashMap<String, FileProgress>,
}

// ============================================================================
// MONITOR
// ============================================================================

#[derive(Default)]
struct MonitorState {
    total_sent: u64,
    total_size: u64,
    active_transfers: usize,
    files: HashMap<String, FileProgress>,
    last_sample_at: Option<Instant>,
    last_sample_bytes: u64,
    current_speed: f64,
}

/// Aggregated transfer accounting shared by every engine component.
#[derive(Default)]
pub struct TransferMonitor {
    state: Mutex<MonitorState>,
}

impl TransferMonitor {
    /// Create an idle monitor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the total byte count the current session will move.
    pub fn set_total_size(&self, size: u64) {
        self.state.lock().total_size = size;
    }

    /// Record `count` more bytes delivered.
    pub fn add_bytes(&self, count: u64) {
        self.state.lock().total_sent += count;
    }

    /// Update (or create) the per-file progress row for `name`.
    pub fn update_file_progress(&self, name: &str, sent: u64, size: u64) {
        self.state
            .lock()
            .files
            .insert(name.to_string(), FileProgress { sent, size });
    }

    /// Drop the per-file row for `name`.
    pub fn finish_file(&self, name: &str) {
        self.state.lock().files.remove(name);
    }

    /// One more transfer in flight.
    pub fn start_transfer(&self) {
        self.state.lock().active_transfers += 1;
    }

    /// One transfer done; the count never goes negative.
    pub fn end_transfer(&self) {
        let mut state = self.state.lock();
        state.active_transfers = state.active_transfers.saturating_sub(1);
    }

    /// Reset all counters for a fresh session.
    pub fn reset(&self) {
        *self.state.lock() = MonitorState::default();
    }

    /// Produce a snapshot, recomputing speed if the sampling floor elapsed.
    pub fn snapshot(&self) -> MonitorSnapshot {
        let mut state = self.state.lock();
        let now = Instant::now();
        match state.last_sample_at {
            None => {
                state.last_sample_at = Some(now);
                state.last_sample_bytes = state.total_sent;
            }
            Some(last) => {
                let elapsed = now.duration_since(last).as_secs_f64();
                if elapsed >= SPEED_SAMPLE_FLOOR {
                    let diff = state.total_sent.saturating_sub(state.last_sample_bytes);
                    state.current_speed = diff as f64 / elapsed;
                    state.last_sample_at = Some(now);
                    state.last_sample_bytes = state.total_sent;
                }
            }
        }

        // Two receivers streaming the same set can push total_sent past
        // total_size; the snapshot clamps so the UI bar never overflows.
        let total_sent = if state.total_size > 0 {
            state.total_sent.min(state.total_size)
        } else {
            state.total_sent
        };
        let remaining = state.total_size.saturating_sub(total_sent);
        let eta_secs = if state.current_speed > 0.0 && remaining > 0 {
            (remaining as f64 / state.current_speed) as u64
        } else {
            0
        };

        MonitorSnapshot {
            total_sent,
            total_size: state.total_size,
            current_speed: state.current_speed,
            eta_secs,
            active_transfers: state.active_transfers,
            files: state.files.clone(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
