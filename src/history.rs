//! # Transfer History
//!
//! An append-only JSON ledger of finished transfers, capped FIFO at
//! [`MAX_HISTORY_RECORDS`](crate::config::MAX_HISTORY_RECORDS) entries and
//! persisted atomically (write a `.tmp` sibling, then rename). A corrupt or
//! missing ledger is treated as empty; no migration is attempted.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::MAX_HISTORY_RECORDS;

// ============================================================================
// RECORD TYPES
// ============================================================================

/// Which way the bytes moved, from this host's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// We were the sender.
    Send,
    /// We were the receiver.
    Receive,
}

/// Final outcome of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    /// All bytes moved.
    Success,
    /// The transfer aborted with an error.
    Failed,
    /// The user stopped it.
    Cancelled,
}

/// Result of the integrity check, when one ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Integrity {
    /// Hashes matched.
    Verified,
    /// Hashes differed; the file is kept and the mismatch surfaced.
    Mismatch,
    /// No hash was available to compare against.
    Skipped,
}

/// Which engine carried the transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// Tunneled HTTP streaming.
    Http,
    /// WebRTC DataChannel.
    P2p,
}

/// One historical entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRecord {
    /// Unique record id.
    pub id: String,
    /// RFC 3339 local timestamp.
    pub timestamp: String,
    /// Wire name of the file.
    pub filename: String,
    /// Byte size.
    pub size: u64,
    /// Send or receive.
    pub direction: Direction,
    /// Outcome.
    pub status: TransferStatus,
    /// Integrity check result.
    pub integrity: Integrity,
    /// Wall-clock duration in seconds.
    pub duration_sec: f64,
    /// Average bytes per second over the transfer.
    pub avg_speed: f64,
    /// Which engine carried it.
    pub method: Method,
}

impl TransferRecord {
    /// Build a record stamped with a fresh id and the current local time.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        filename: impl Into<String>,
        size: u64,
        direction: Direction,
        status: TransferStatus,
        integrity: Integrity,
        duration_sec: f64,
        avg_speed: f64,
        method: Method,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Local::now().to_rfc3339(),
            filename: filename.into(),
            size,
            direction,
            status,
            integrity,
            duration_sec,
            avg_speed,
            method,
        }
    }
}

/// Aggregate view over the whole ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistoryStats {
    /// Total number of records.
    pub total_transfers: usize,
    /// Bytes successfully sent.
    pub total_sent: u64,
    /// Bytes successfully received.
    pub total_received: u64,
    /// Count of successful transfers.
    pub success_count: usize,
    /// Count of failed transfers.
    pub failed_count: usize,
}

// ============================================================================
// LEDGER
// ============================================================================

#[derive(Debug, Default, Serialize, Deserialize)]
struct Ledger {
    #[serde(default)]
    transfers: Vec<TransferRecord>,
}

/// The persisted transfer history.
///
/// All mutation happens under one mutex so concurrent `log()` calls cannot
/// interleave file writes.
pub struct TransferHistory {
    path: PathBuf,
    cap: usize,
    ledger: Mutex<Ledger>,
}

impl TransferHistory {
    /// Open (or create) the ledger at `path` with the default cap.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::with_cap(path, MAX_HISTORY_RECORDS)
    }

    /// Open with an explicit record cap. Read failures yield an empty
    /// ledger.
    pub fn with_cap(path: impl Into<PathBuf>, cap: usize) -> Self {
        let path = path.into();
        let ledger = Self::load(&path);
        Self {
            path,
            cap,
            ledger: Mutex::new(ledger),
        }
    }

    fn load(path: &Path) -> Ledger {
        match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(ledger) => ledger,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "history corrupt, starting empty");
                    Ledger::default()
                }
            },
            Err(_) => Ledger::default(),
        }
    }

    /// Append a record, trim to the cap, persist. Returns the record id.
    /// Persistence failures are logged, not fatal; the in-memory ledger
    /// stays coherent either way.
    pub fn log(&self, record: TransferRecord) -> String {
        let id = record.id.clone();
        let mut ledger = self.ledger.lock();
        ledger.transfers.push(record);
        if ledger.transfers.len() > self.cap {
            let excess = ledger.transfers.len() - self.cap;
            ledger.transfers.drain(..excess);
        }
        self.persist(&ledger);
        id
    }

    /// Up to `count` most-recent records, newest first, optionally filtered
    /// by direction.
    pub fn recent(&self, count: usize, direction: Option<Direction>) -> Vec<TransferRecord> {
        let ledger = self.ledger.lock();
        ledger
            .transfers
            .iter()
            .rev()
            .filter(|r| direction.map_or(true, |d| r.direction == d))
            .take(count)
            .cloned()
            .collect()
    }

    /// The most recent record, if any.
    pub fn last(&self) -> Option<TransferRecord> {
        self.ledger.lock().transfers.last().cloned()
    }

    /// Aggregate totals and counts over the ledger.
    pub fn stats(&self) -> HistoryStats {
        let ledger = self.ledger.lock();
        let mut stats = HistoryStats {
            total_transfers: ledger.transfers.len(),
            ..HistoryStats::default()
        };
        for record in &ledger.transfers {
            match record.status {
                TransferStatus::Success => {
                    stats.success_count += 1;
                    match record.direction {
                        Direction::Send => stats.total_sent += record.size,
                        Direction::Receive => stats.total_received += record.size,
                    }
                }
                TransferStatus::Failed => stats.failed_count += 1,
                TransferStatus::Cancelled => {}
            }
        }
        stats
    }

    /// Empty the ledger and persist the empty state.
    pub fn clear(&self) {
        let mut ledger = self.ledger.lock();
        ledger.transfers.clear();
        self.persist(&ledger);
    }

    /// Write-temp + rename so a crash mid-write never leaves a torn file.
    fn persist(&self, ledger: &Ledger) {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    tracing::warn!(error = %e, "cannot create history directory");
                    return;
                }
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        let payload = match serde_json::to_string_pretty(ledger) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "history serialize failed");
                return;
            }
        };
        if let Err(e) = std::fs::write(&tmp, payload).and_then(|_| std::fs::rename(&tmp, &self.path))
        {
            tracing::warn!(path = %self.path.display(), error = %e, "history persist failed");
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, size: u64, direction: Direction, status: TransferStatus) -> TransferRecord {
        TransferRecord::new(
            name,
            size,
            direction,
            status,
            Integrity::Verified,
            1.0,
            size as f64,
            Method::Http,
        )
    }

    #[test]
    fn test_log_and_recent_order() {
        let dir = tempfile::tempdir().unwrap();
        let history = TransferHistory::open(dir.path().join("history.json"));
        history.log(record("first.bin", 1, Direction::Send, TransferStatus::Success));
        history.log(record("second.bin", 2, Direction::Receive, TransferStatus::Success));
        history.log(record("third.bin", 3, Direction::Send, TransferStatus::Failed));

        let recent = history.recent(2, None);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].filename, "third.bin");
        assert_eq!(recent[1].filename, "second.bin");

        let sends = history.recent(10, Some(Direction::Send));
        assert_eq!(sends.len(), 2);
        assert!(sends.iter().all(|r| r.direction == Direction::Send));
    }

    #[test]
    fn test_cap_evicts_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let history = TransferHistory::with_cap(dir.path().join("history.json"), 5);
        for i in 0..8 {
            history.log(record(&format!("f{i}"), i, Direction::Send, TransferStatus::Success));
        }
        let recent = history.recent(100, None);
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[0].filename, "f7");
        assert_eq!(recent[4].filename, "f3");
    }

    #[test]
    fn test_ids_unique() {
        let dir = tempfile::tempdir().unwrap();
        let history = TransferHistory::open(dir.path().join("history.json"));
        let a = history.log(record("a", 1, Direction::Send, TransferStatus::Success));
        let b = history.log(record("b", 1, Direction::Send, TransferStatus::Success));
        assert_ne!(a, b);
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        {
            let history = TransferHistory::open(&path);
            history.log(record("kept.bin", 42, Direction::Receive, TransferStatus::Success));
        }
        let reopened = TransferHistory::open(&path);
        let recent = reopened.recent(10, None);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].filename, "kept.bin");
        assert_eq!(recent[0].size, 42);
    }

    #[test]
    fn test_corrupt_file_treated_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, b"{not json at all").unwrap();
        let history = TransferHistory::open(&path);
        assert!(history.recent(10, None).is_empty());
        assert_eq!(history.stats(), HistoryStats::default());
    }

    #[test]
    fn test_stats_aggregation() {
        let dir = tempfile::tempdir().unwrap();
        let history = TransferHistory::open(dir.path().join("history.json"));
        history.log(record("s1", 100, Direction::Send, TransferStatus::Success));
        history.log(record("s2", 50, Direction::Send, TransferStatus::Failed));
        history.log(record("r1", 70, Direction::Receive, TransferStatus::Success));
        history.log(record("c1", 10, Direction::Receive, TransferStatus::Cancelled));

        let stats = history.stats();
        assert_eq!(stats.total_transfers, 4);
        assert_eq!(stats.total_sent, 100);
        assert_eq!(stats.total_received, 70);
        assert_eq!(stats.success_count, 2);
        assert_eq!(stats.failed_count, 1);
    }

    #[test]
    fn test_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        let history = TransferHistory::open(&path);
        history.log(record("x", 1, Direction::Send, TransferStatus::Success));
        history.clear();
        assert!(history.recent(10, None).is_empty());
        assert!(history.last().is_none());
        // The cleared state is what a fresh open sees.
        let reopened = TransferHistory::open(&path);
        assert!(reopened.recent(10, None).is_empty());
    }

    #[test]
    fn test_wire_format_field_names() {
        let rec = record("wire.bin", 9, Direction::Send, TransferStatus::Success);
        let json = serde_json::to_string(&rec).unwrap();
        assert!(json.contains("\"direction\":\"send\""));
        assert!(json.contains("\"status\":\"success\""));
        assert!(json.contains("\"integrity\":\"verified\""));
        assert!(json.contains("\"method\":\"http\""));
    }
}
