//! # Configuration
//!
//! Every tunable of the core in one place. The embedding application builds
//! a [`Config`] once (usually [`Config::default`] with a few overrides) and
//! hands it to the engine; nothing in the core persists configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Fixed chunk size for HTTP response streaming and hashing reads: 64 KiB.
pub const HTTP_CHUNK_SIZE: usize = 64 * 1024;

/// Lower clamp of the adaptive DataChannel chunk size: 16 KiB.
pub const MIN_CHUNK_SIZE: usize = 16 * 1024;

/// Upper clamp of the adaptive DataChannel chunk size: 256 KiB.
pub const MAX_CHUNK_SIZE: usize = 256 * 1024;

/// The outbound buffer threshold is this many times the current chunk size.
/// No chunk is sent while the channel buffers more than that.
pub const BUFFER_THRESHOLD_FACTOR: usize = 8;

/// Maximum number of records kept in the history ledger.
pub const MAX_HISTORY_RECORDS: usize = 200;

/// Length of the numeric room code handed out by `start_direct`.
pub const ROOM_CODE_LEN: usize = 6;

// ============================================================================
// CONFIG
// ============================================================================

/// Tunnel child-process contract: which binary to run and how to recognize
/// the public URL it prints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// Path to the tunnel binary (e.g. `cloudflared`).
    pub binary: PathBuf,
    /// Regex matched against every output line; the first match is the
    /// public URL.
    pub url_pattern: String,
    /// How long to wait for the URL before giving up.
    #[serde(with = "duration_secs")]
    pub startup_timeout: Duration,
    /// Grace period between the polite termination signal and force-kill.
    #[serde(with = "duration_secs")]
    pub stop_grace: Duration,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("cloudflared"),
            url_pattern: r"https://[a-zA-Z0-9-]+\.trycloudflare\.com".to_string(),
            startup_timeout: Duration::from_secs(30),
            stop_grace: Duration::from_secs(5),
        }
    }
}

/// Top-level configuration for the transfer core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host the HTTP file server binds to. Local only; the tunnel is the
    /// public face.
    pub server_host: String,
    /// Port the HTTP file server binds to. `0` picks an ephemeral port.
    pub server_port: u16,
    /// Request timeout for HTTP downloads.
    #[serde(with = "duration_secs")]
    pub http_timeout: Duration,
    /// Whole-request retry budget for HTTP downloads.
    pub max_retries: u32,

    /// Base URL of the rendezvous relay.
    pub signaling_url: String,
    /// Timeout for the initial `/join` (generous, to tolerate cold-started
    /// relays).
    #[serde(with = "duration_secs")]
    pub join_timeout: Duration,
    /// Long-poll timeout for `/poll`; the relay may hold the request up to
    /// ~30 s before returning an empty set.
    #[serde(with = "duration_secs")]
    pub poll_timeout: Duration,
    /// Back-off after a poll transport error.
    #[serde(with = "duration_secs")]
    pub poll_backoff: Duration,

    /// STUN servers used for ICE.
    pub ice_servers: Vec<String>,
    /// Deadline for WebRTC connection establishment; exceeding it fails the
    /// peer session.
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Tunnel child-process contract.
    pub tunnel: TunnelConfig,
    /// Optional tunnel credential passed as `--token`.
    #[serde(default)]
    pub tunnel_token: Option<String>,

    /// Where the history ledger lives.
    pub history_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            server_port: 5000,
            http_timeout: Duration::from_secs(120),
            max_retries: 5,
            signaling_url: "https://quickshare-signal.example.com".to_string(),
            join_timeout: Duration::from_secs(60),
            poll_timeout: Duration::from_secs(35),
            poll_backoff: Duration::from_secs(2),
            ice_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
                "stun:stun.cloudflare.com:3478".to_string(),
            ],
            connect_timeout: Duration::from_secs(15),
            tunnel: TunnelConfig::default(),
            tunnel_token: None,
            history_path: PathBuf::from("data/history.json"),
        }
    }
}

/// Serialize `Duration` as whole seconds; the config never needs sub-second
/// precision.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.server_host, "127.0.0.1");
        assert_eq!(cfg.max_retries, 5);
        assert_eq!(cfg.connect_timeout, Duration::from_secs(15));
        assert_eq!(cfg.tunnel.startup_timeout, Duration::from_secs(30));
        assert!(!cfg.ice_servers.is_empty());
    }

    #[test]
    fn test_round_trip() {
        let cfg = Config {
            server_port: 0,
            tunnel_token: Some("tok".into()),
            ..Config::default()
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.server_port, 0);
        assert_eq!(back.tunnel_token.as_deref(), Some("tok"));
        assert_eq!(back.join_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_chunk_clamp_ordering() {
        assert!(MIN_CHUNK_SIZE < MAX_CHUNK_SIZE);
        assert_eq!(MIN_CHUNK_SIZE * 16, MAX_CHUNK_SIZE);
    }
}
