//! # QuickShare Core
//!
//! The transfer core of a desktop peer-to-peer file sharing application.
//! Two hosts exchange arbitrary files and directories over one of two
//! transports, with progress, integrity verification and a persisted
//! transfer history shared between them.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       QUICKSHARE CORE MODULES                           │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │                         ┌────────────────┐                              │
//! │                         │ TransferEngine │  ← driven by the UI          │
//! │                         └───────┬────────┘                              │
//! │            ┌────────────────────┼─────────────────────┐                 │
//! │            │                    │                     │                 │
//! │  ┌─────────┴────────┐  ┌────────┴────────┐  ┌─────────┴─────────┐       │
//! │  │  P2P engine      │  │  Cloud engine   │  │  Shared state     │       │
//! │  │                  │  │                 │  │                   │       │
//! │  │ - Rendezvous     │  │ - HttpFileServer│  │ - TransferMonitor │       │
//! │  │   long-poll      │  │   (axum, Range, │  │ - TransferHistory │       │
//! │  │ - DataChannel    │  │    ZIP, hash)   │  │ - Config          │       │
//! │  │   framing        │  │ - TunnelSupervisor                     │       │
//! │  │ - Multi-peer     │  │ - HttpDownloader│  │                   │       │
//! │  │   fanout         │  │   (resume+retry)│  │                   │       │
//! │  └──────────────────┘  └─────────────────┘  └───────────────────┘       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types for the entire library
//! - [`config`] - Tunables: ports, chunk sizes, timeouts, tunnel command
//! - [`fs`] - File entries, directory expansion, safe path joining
//! - [`hash`] - Streaming SHA-256 helpers
//! - [`monitor`] - Thread-safe transfer counters and speed/ETA snapshots
//! - [`history`] - Capped, atomically persisted JSON transfer ledger
//! - [`tunnel`] - External tunnel child-process supervision
//! - [`signaling`] - HTTP long-poll rendezvous relay client
//! - [`transfer`] - The DataChannel framing protocol, peer sessions and
//!   the orchestrating engine
//! - [`http`] - The localhost file server and the resumable downloader
//!
//! ## Threading Model
//!
//! The core is async throughout and expects to run inside a tokio runtime
//! owned by the embedding application. Its public surface is `async fn`
//! methods; progress flows back to the UI either by polling
//! [`monitor::TransferMonitor::snapshot`] (cheap, 1 Hz friendly) or by
//! draining the [`transfer::EngineEvent`] channel.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod config;
pub mod error;
pub mod fs;
pub mod hash;
pub mod history;
pub mod http;
pub mod monitor;
pub mod signaling;
pub mod transfer;
pub mod tunnel;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use config::Config;
pub use error::{Error, Result};
pub use fs::FileEntry;
pub use history::{TransferHistory, TransferRecord};
pub use monitor::{MonitorSnapshot, TransferMonitor};
pub use transfer::{EngineEvent, TransferEngine};
