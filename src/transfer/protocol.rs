//! # Framing Protocol
//!
//! The DataChannel carries two kinds of frames, distinguished by physical
//! message type: UTF-8 JSON text frames with a `type` discriminator, and
//! binary frames holding raw file bytes for the file currently being
//! transferred.
//!
//! The text vocabulary below keeps the historical wire names verbatim,
//! including the uppercase control tags (`DOWNLOAD_REQUEST`, `PAUSE`,
//! `RESUME`, `STOPPED`) — both ends of a transfer may be older builds.
//! Unknown tags decode to [`PeerMessage::Unknown`], which is logged and
//! ignored rather than failing the session.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;

// ============================================================================
// MESSAGE TYPES
// ============================================================================

/// One entry of the offered catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    /// Forward-slash relative name, unique within the session.
    pub name: String,
    /// Byte size.
    pub size: u64,
}

/// Every text frame that can cross the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PeerMessage {
    /// Receiver has opened the channel and uses no password.
    #[serde(rename = "ready")]
    Ready,

    /// Receiver asserts the shared secret.
    #[serde(rename = "auth")]
    Auth {
        /// The password, in the clear — the channel itself is
        /// DTLS-encrypted.
        password: String,
    },

    /// Sender accepted the password (or none was required).
    #[serde(rename = "auth_success")]
    AuthSuccess,

    /// Sender rejected the password. Terminal.
    #[serde(rename = "auth_failed")]
    AuthFailed,

    /// Receiver sent `ready` but the sender has a password configured.
    #[serde(rename = "auth_required")]
    AuthRequired,

    /// Catalogue offered to the receiver.
    #[serde(rename = "file_list")]
    FileList {
        /// Offered entries, in transfer order.
        files: Vec<FileStat>,
        /// Sum of all offered sizes.
        total_size: u64,
    },

    /// The receiver's selection, with its existing local sizes for resume.
    #[serde(rename = "DOWNLOAD_REQUEST")]
    DownloadRequest {
        /// Names of the wanted files.
        files: Vec<String>,
        /// Existing local byte counts keyed by name.
        #[serde(default)]
        offsets: HashMap<String, u64>,
    },

    /// Begins one file; subsequent binary frames belong to it until the
    /// matching `file_end`.
    #[serde(rename = "file_start")]
    FileStart {
        /// Wire name.
        name: String,
        /// Full size on the sender's disk, snapshotted here.
        size: u64,
        /// Position within the selected list, from 0, strictly increasing.
        index: usize,
        /// Count of selected files.
        total: usize,
        /// Resume offset; `0` means truncate, non-zero means append.
        #[serde(default)]
        offset: u64,
    },

    /// Closes the current file. `hash` covers the entire file on disk, not
    /// just the transmitted range, so verification is offset-independent.
    #[serde(rename = "file_end")]
    FileEnd {
        /// Wire name.
        name: String,
        /// Lowercase hex SHA-256 of the whole file.
        hash: String,
    },

    /// No more files; the receiver may close.
    #[serde(rename = "transfer_end")]
    TransferEnd,

    /// Halt the producer after the in-flight chunk. Symmetric.
    #[serde(rename = "PAUSE")]
    Pause,

    /// Release a paused producer. Symmetric.
    #[serde(rename = "RESUME")]
    Resume,

    /// Cancellation; terminal for the session.
    #[serde(rename = "STOPPED")]
    Stopped,

    /// Any frame type this build does not know.
    #[serde(other)]
    Unknown,
}

impl PeerMessage {
    /// Encode for the wire.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a text frame. Malformed JSON is a protocol error; an
    /// unrecognized `type` is [`PeerMessage::Unknown`].
    pub fn decode(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Whether this is one of the symmetric control frames that take
    /// effect between chunks.
    pub fn is_control(&self) -> bool {
        matches!(self, Self::Pause | Self::Resume | Self::Stopped)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_wire_name() {
        assert_eq!(PeerMessage::Ready.encode().unwrap(), r#"{"type":"ready"}"#);
    }

    #[test]
    fn test_control_frames_keep_uppercase_tags() {
        assert_eq!(PeerMessage::Pause.encode().unwrap(), r#"{"type":"PAUSE"}"#);
        assert_eq!(PeerMessage::Resume.encode().unwrap(), r#"{"type":"RESUME"}"#);
        assert_eq!(PeerMessage::Stopped.encode().unwrap(), r#"{"type":"STOPPED"}"#);
    }

    #[test]
    fn test_auth_round_trip() {
        let msg = PeerMessage::Auth {
            password: "hunter2".into(),
        };
        let json = msg.encode().unwrap();
        assert!(json.contains("\"type\":\"auth\""));
        assert_eq!(PeerMessage::decode(&json).unwrap(), msg);
    }

    #[test]
    fn test_file_list_shape() {
        let msg = PeerMessage::FileList {
            files: vec![
                FileStat {
                    name: "docs/report.pdf".into(),
                    size: 2_500_000,
                },
                FileStat {
                    name: "video.mp4".into(),
                    size: 10_000_000,
                },
            ],
            total_size: 12_500_000,
        };
        let json = msg.encode().unwrap();
        assert!(json.contains("\"type\":\"file_list\""));
        assert!(json.contains("\"total_size\":12500000"));
        assert_eq!(PeerMessage::decode(&json).unwrap(), msg);
    }

    #[test]
    fn test_download_request_with_resume_offsets() {
        let json = r#"{"type":"DOWNLOAD_REQUEST","files":["video.mp4"],"offsets":{"video.mp4":4000000}}"#;
        match PeerMessage::decode(json).unwrap() {
            PeerMessage::DownloadRequest { files, offsets } => {
                assert_eq!(files, vec!["video.mp4"]);
                assert_eq!(offsets["video.mp4"], 4_000_000);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_download_request_offsets_optional() {
        let json = r#"{"type":"DOWNLOAD_REQUEST","files":["a.txt"]}"#;
        match PeerMessage::decode(json).unwrap() {
            PeerMessage::DownloadRequest { files, offsets } => {
                assert_eq!(files.len(), 1);
                assert!(offsets.is_empty());
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_file_start_offset_defaults_to_zero() {
        let json = r#"{"type":"file_start","name":"a.txt","size":10,"index":0,"total":1}"#;
        match PeerMessage::decode(json).unwrap() {
            PeerMessage::FileStart { offset, .. } => assert_eq!(offset, 0),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_file_end_round_trip() {
        let msg = PeerMessage::FileEnd {
            name: "a.txt".into(),
            hash: "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad".into(),
        };
        let json = msg.encode().unwrap();
        assert_eq!(PeerMessage::decode(&json).unwrap(), msg);
    }

    #[test]
    fn test_unknown_type_is_tolerated() {
        let msg = PeerMessage::decode(r#"{"type":"telemetry","blob":123}"#).unwrap();
        assert_eq!(msg, PeerMessage::Unknown);
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        assert!(PeerMessage::decode("{nope").is_err());
    }

    #[test]
    fn test_is_control() {
        assert!(PeerMessage::Pause.is_control());
        assert!(PeerMessage::Resume.is_control());
        assert!(PeerMessage::Stopped.is_control());
        assert!(!PeerMessage::Ready.is_control());
        assert!(!PeerMessage::TransferEnd.is_control());
    }

    #[test]
    fn test_all_frames_round_trip() {
        let frames = vec![
            PeerMessage::Ready,
            PeerMessage::Auth { password: "p".into() },
            PeerMessage::AuthSuccess,
            PeerMessage::AuthFailed,
            PeerMessage::AuthRequired,
            PeerMessage::FileList { files: vec![], total_size: 0 },
            PeerMessage::DownloadRequest { files: vec!["x".into()], offsets: HashMap::new() },
            PeerMessage::FileStart { name: "x".into(), size: 1, index: 0, total: 1, offset: 0 },
            PeerMessage::FileEnd { name: "x".into(), hash: "00".into() },
            PeerMessage::TransferEnd,
            PeerMessage::Pause,
            PeerMessage::Resume,
            PeerMessage::Stopped,
        ];
        for frame in frames {
            let json = frame.encode().unwrap();
            assert_eq!(PeerMessage::decode(&json).unwrap(), frame, "round trip for {json}");
        }
    }
}
