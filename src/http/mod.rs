//! # HTTP Engine
//!
//! The cloud half of the core: a localhost file server streamed through an
//! external tunnel on the sending side, and a resilient resumable
//! downloader on the receiving side.
//!
//! - [`server::HttpFileServer`] — listing, range-capable streaming, an
//!   on-the-fly ZIP of the whole set, and per-file hash endpoints. Every
//!   streamed byte is reported to the shared
//!   [`TransferMonitor`](crate::monitor::TransferMonitor).
//! - [`downloader::HttpDownloader`] — listing fetch, ranged resume with
//!   retry and back-off, and post-download SHA-256 verification against
//!   the server's hash endpoint.

pub mod downloader;
pub mod server;

pub use downloader::{DownloadProgress, HttpDownloader};
pub use server::HttpFileServer;
