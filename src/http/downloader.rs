//! # HTTP Downloader
//!
//! The receiving half of a cloud share: fetches the catalogue, streams
//! files with ranged resume, retries whole requests with linear back-off,
//! and verifies every completed file against the server's hash endpoint.
//!
//! ## Per-file algorithm
//!
//! 1. A non-empty partial at the destination sets `Range: bytes={n}-` and
//!    opens for append; otherwise the destination is truncated.
//! 2. `416` means the file is already complete — skip straight to
//!    verification.
//! 3. `206` appends; the true total comes from `Content-Range`.
//! 4. `200` while resuming means the server ignored the range: the
//!    partial is discarded and the download restarts from zero.
//! 5. Network or I/O failure retries the whole request, sleeping
//!    `2 s × attempt`, up to the configured attempt budget.
//! 6. After success, the server's `/hash/{name}` is compared against the
//!    local SHA-256 and the integrity outcome recorded.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use futures::StreamExt;
use reqwest::header;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::fs::is_safe_join;
use crate::hash::sha256_file;
use crate::history::{Direction, Integrity, Method, TransferHistory, TransferRecord, TransferStatus};
use crate::monitor::TransferMonitor;
use crate::transfer::FileStat;

/// Aggregated progress handed to the caller's callback.
#[derive(Debug, Clone, Copy)]
pub struct DownloadProgress {
    /// Bytes landed so far (all finished files plus the current one).
    pub downloaded: u64,
    /// Total bytes of the selection.
    pub total: u64,
    /// Bytes per second.
    pub speed: f64,
    /// 1-based index of the file in flight.
    pub file_index: usize,
    /// Number of selected files.
    pub file_count: usize,
}

/// Progress callback type; invoked from the download task.
pub type ProgressFn = dyn Fn(DownloadProgress) + Send + Sync;

#[derive(Deserialize)]
struct Listing {
    #[serde(default)]
    files: Vec<FileStat>,
}

#[derive(Deserialize)]
struct HashReply {
    hash: String,
}

// ============================================================================
// DOWNLOADER
// ============================================================================

/// Resumable, verifying downloader for a published QuickShare URL.
pub struct HttpDownloader {
    http: reqwest::Client,
    monitor: Arc<TransferMonitor>,
    history: Arc<TransferHistory>,
    max_retries: u32,
}

impl HttpDownloader {
    /// Build a downloader sharing the engine's monitor and history.
    pub fn new(
        config: &Config,
        monitor: Arc<TransferMonitor>,
        history: Arc<TransferHistory>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;
        Ok(Self {
            http,
            monitor,
            history,
            max_retries: config.max_retries.max(1),
        })
    }

    /// Fetch the remote catalogue.
    pub async fn list(&self, base_url: &str) -> Result<Vec<FileStat>> {
        let url = parse_base(base_url)?;
        let listing: Listing = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(listing.files)
    }

    /// Download one file into `save_dir`, resuming and retrying as needed,
    /// and return the integrity outcome.
    pub async fn download_file(
        &self,
        base_url: &str,
        name: &str,
        save_dir: &Path,
        progress: Option<&ProgressFn>,
    ) -> Result<Integrity> {
        self.download_file_indexed(base_url, name, save_dir, progress, 1, 1, 0, 0, &Instant::now())
            .await
    }

    /// Download every selected file in order, emitting global progress and
    /// recording each outcome in history. The first hard failure is logged
    /// and propagated.
    pub async fn download_files(
        &self,
        selection: &[FileStat],
        base_url: &str,
        save_dir: &Path,
        progress: Option<&ProgressFn>,
    ) -> Result<()> {
        let total: u64 = selection.iter().map(|f| f.size).sum();
        self.monitor.set_total_size(total);
        let started = Instant::now();
        let count = selection.len();
        let mut finished_size: u64 = 0;

        for (i, stat) in selection.iter().enumerate() {
            tracing::info!(file = %stat.name, index = i + 1, count, "downloading");
            let file_started = Instant::now();
            let outcome = self
                .download_file_indexed(
                    base_url,
                    &stat.name,
                    save_dir,
                    progress,
                    i + 1,
                    count,
                    finished_size,
                    total,
                    &started,
                )
                .await;
            let duration = file_started.elapsed().as_secs_f64();
            match outcome {
                Ok(integrity) => {
                    let _ = self.history.log(TransferRecord::new(
                        stat.name.clone(),
                        stat.size,
                        Direction::Receive,
                        TransferStatus::Success,
                        integrity,
                        duration,
                        if duration > 0.0 {
                            stat.size as f64 / duration
                        } else {
                            0.0
                        },
                        Method::Http,
                    ));
                }
                Err(e) => {
                    let _ = self.history.log(TransferRecord::new(
                        stat.name.clone(),
                        stat.size,
                        Direction::Receive,
                        TransferStatus::Failed,
                        Integrity::Skipped,
                        duration,
                        0.0,
                        Method::Http,
                    ));
                    return Err(e);
                }
            }
            finished_size += stat.size;
        }
        Ok(())
    }

    /// Fetch `/download` — the whole set as one ZIP — into `save_dir`.
    pub async fn download_archive(
        &self,
        base_url: &str,
        save_dir: &Path,
        progress: Option<&ProgressFn>,
    ) -> Result<PathBuf> {
        let url = parse_base(base_url)?
            .join("download")
            .map_err(|e| Error::Network(e.to_string()))?;
        let resp = self.http.get(url).send().await?.error_for_status()?;
        let total = resp.content_length().unwrap_or(0);

        tokio::fs::create_dir_all(save_dir).await?;
        let target = save_dir.join("download.zip");
        let mut file = tokio::fs::File::create(&target).await?;
        let mut stream = resp.bytes_stream();
        let mut downloaded: u64 = 0;
        let started = Instant::now();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            self.monitor.add_bytes(chunk.len() as u64);
            if let Some(cb) = progress {
                let elapsed = started.elapsed().as_secs_f64();
                cb(DownloadProgress {
                    downloaded,
                    total,
                    speed: if elapsed > 0.0 { downloaded as f64 / elapsed } else { 0.0 },
                    file_index: 1,
                    file_count: 1,
                });
            }
        }
        file.flush().await?;
        Ok(target)
    }

    // ── Internals ───────────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    async fn download_file_indexed(
        &self,
        base_url: &str,
        name: &str,
        save_dir: &Path,
        progress: Option<&ProgressFn>,
        file_index: usize,
        file_count: usize,
        finished_size: u64,
        selection_total: u64,
        selection_started: &Instant,
    ) -> Result<Integrity> {
        let target = is_safe_join(save_dir, name)
            .ok_or_else(|| Error::UnsafePath(name.to_string()))?;
        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let file_url = file_url(base_url, name)?;
        let mut attempt: u32 = 0;
        loop {
            match self
                .fetch_once(
                    &file_url,
                    &target,
                    name,
                    progress,
                    file_index,
                    file_count,
                    finished_size,
                    selection_total,
                    selection_started,
                )
                .await
            {
                Ok(()) => break,
                Err(e @ (Error::Network(_) | Error::Io(_))) => {
                    attempt += 1;
                    if attempt >= self.max_retries {
                        tracing::warn!(file = %name, error = %e, "retry budget exhausted");
                        return Err(e);
                    }
                    let backoff = Duration::from_secs(2 * u64::from(attempt));
                    tracing::warn!(
                        file = %name,
                        attempt,
                        max = self.max_retries,
                        error = %e,
                        "download error, retrying in {backoff:?}"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }

        self.verify(base_url, name, &target).await
    }

    /// One request/stream cycle; resume bookkeeping lives here.
    #[allow(clippy::too_many_arguments)]
    async fn fetch_once(
        &self,
        file_url: &reqwest::Url,
        target: &Path,
        name: &str,
        progress: Option<&ProgressFn>,
        file_index: usize,
        file_count: usize,
        finished_size: u64,
        selection_total: u64,
        selection_started: &Instant,
    ) -> Result<()> {
        let existing = tokio::fs::metadata(target).await.map(|m| m.len()).unwrap_or(0);
        let resuming = existing > 0;
        let mut request = self.http.get(file_url.clone());
        if resuming {
            tracing::info!(file = %name, offset = existing, "resuming download");
            request = request.header(header::RANGE, format!("bytes={existing}-"));
        }

        let resp = request.send().await?;
        if resp.status() == StatusCode::RANGE_NOT_SATISFIABLE {
            tracing::info!(file = %name, "already complete (416)");
            return Ok(());
        }
        let resp = resp
            .error_for_status()
            .map_err(|e| Error::Network(e.to_string()))?;

        let content_length = resp.content_length().unwrap_or(0);
        let content_range_total = resp
            .headers()
            .get(header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total);

        let (mut downloaded, total, append) = if resp.status() == StatusCode::PARTIAL_CONTENT {
            (
                existing,
                content_range_total.unwrap_or(existing + content_length),
                true,
            )
        } else {
            if resuming {
                // Server ignored the range: drop the partial, start over.
                tracing::info!(file = %name, "server ignored Range, restarting from zero");
            }
            (0, content_length, false)
        };

        let mut file = if append {
            tokio::fs::OpenOptions::new().append(true).open(target).await?
        } else {
            tokio::fs::File::create(target).await?
        };

        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::Network(e.to_string()))?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            self.monitor.add_bytes(chunk.len() as u64);
            self.monitor.update_file_progress(name, downloaded, total);
            if let Some(cb) = progress {
                let done = finished_size + downloaded;
                let grand_total = if selection_total > 0 { selection_total } else { total };
                let elapsed = selection_started.elapsed().as_secs_f64();
                cb(DownloadProgress {
                    downloaded: done,
                    total: grand_total,
                    speed: if elapsed > 0.0 { done as f64 / elapsed } else { 0.0 },
                    file_index,
                    file_count,
                });
            }
        }
        file.flush().await?;
        self.monitor.finish_file(name);
        Ok(())
    }

    /// Compare the server's hash with the local file. A failed fetch or an
    /// unreadable local file demotes the outcome to `Skipped` rather than
    /// failing a finished download.
    async fn verify(&self, base_url: &str, name: &str, target: &Path) -> Result<Integrity> {
        let url = match hash_url(base_url, name) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(file = %name, error = %e, "hash endpoint unavailable");
                return Ok(Integrity::Skipped);
            }
        };
        let remote = match self.http.get(url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.json::<HashReply>().await {
                Ok(reply) => reply.hash,
                Err(e) => {
                    tracing::warn!(file = %name, error = %e, "hash reply unreadable, skipping verification");
                    return Ok(Integrity::Skipped);
                }
            },
            Ok(resp) => {
                tracing::warn!(file = %name, status = %resp.status(), "hash fetch rejected, skipping verification");
                return Ok(Integrity::Skipped);
            }
            Err(e) => {
                tracing::warn!(file = %name, error = %e, "hash fetch failed, skipping verification");
                return Ok(Integrity::Skipped);
            }
        };

        let path = target.to_path_buf();
        let local = match tokio::task::spawn_blocking(move || sha256_file(&path)).await {
            Ok(Ok(hash)) => hash,
            _ => {
                tracing::warn!(file = %name, "local hash failed, skipping verification");
                return Ok(Integrity::Skipped);
            }
        };

        if local == remote.to_lowercase() {
            tracing::info!(file = %name, "hash verified");
            Ok(Integrity::Verified)
        } else {
            tracing::warn!(file = %name, expected = %remote, actual = %local, "hash mismatch");
            Ok(Integrity::Mismatch)
        }
    }
}

// ============================================================================
// URL HELPERS
// ============================================================================

fn parse_base(base_url: &str) -> Result<reqwest::Url> {
    let normalized = if base_url.ends_with('/') {
        base_url.to_string()
    } else {
        format!("{base_url}/")
    };
    reqwest::Url::parse(&normalized).map_err(|e| Error::Network(format!("bad URL: {e}")))
}

fn file_url(base_url: &str, name: &str) -> Result<reqwest::Url> {
    let encoded = URL_SAFE.encode(name.replace('\\', "/").as_bytes());
    parse_base(base_url)?
        .join(&format!("file_b64/{encoded}"))
        .map_err(|e| Error::Network(e.to_string()))
}

fn hash_url(base_url: &str, name: &str) -> Result<reqwest::Url> {
    let mut url = parse_base(base_url)?;
    url.path_segments_mut()
        .map_err(|_| Error::Network("URL cannot carry a path".into()))?
        .pop_if_empty()
        .push("hash")
        .extend(name.replace('\\', "/").split('/'));
    Ok(url)
}

/// Pull the total size out of `Content-Range: bytes 1000-4999/5000`.
fn parse_content_range_total(value: &str) -> Option<u64> {
    value.rsplit('/').next()?.trim().parse().ok()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::FileEntry;
    use crate::http::server::HttpFileServer;

    fn test_config() -> Config {
        Config {
            http_timeout: Duration::from_secs(10),
            max_retries: 2,
            ..Config::default()
        }
    }

    struct Fixture {
        _src: tempfile::TempDir,
        dest: tempfile::TempDir,
        server: HttpFileServer,
        server_monitor: Arc<TransferMonitor>,
        downloader: HttpDownloader,
        payload: Vec<u8>,
    }

    impl Fixture {
        fn base(&self) -> String {
            format!("http://{}", self.server.local_addr())
        }
    }

    async fn fixture() -> Fixture {
        let src = tempfile::tempdir().unwrap();
        let payload: Vec<u8> = (0..300_000u32).map(|i| (i % 253) as u8).collect();
        std::fs::write(src.path().join("big.bin"), &payload).unwrap();
        std::fs::create_dir(src.path().join("docs")).unwrap();
        std::fs::write(src.path().join("docs/note.txt"), b"note contents").unwrap();
        std::fs::write(src.path().join("empty.bin"), b"").unwrap();

        let entries = vec![
            FileEntry {
                name: "big.bin".into(),
                size: payload.len() as u64,
                path: src.path().join("big.bin"),
                is_folder: false,
            },
            FileEntry {
                name: "docs/note.txt".into(),
                size: 13,
                path: src.path().join("docs/note.txt"),
                is_folder: true,
            },
            FileEntry {
                name: "empty.bin".into(),
                size: 0,
                path: src.path().join("empty.bin"),
                is_folder: false,
            },
        ];
        let server_monitor = Arc::new(TransferMonitor::new());
        let server = HttpFileServer::start("127.0.0.1", 0, entries, Arc::clone(&server_monitor))
            .await
            .unwrap();

        let dest = tempfile::tempdir().unwrap();
        let config = test_config();
        let history = Arc::new(TransferHistory::open(
            dest.path().join("history.json"),
        ));
        let downloader =
            HttpDownloader::new(&config, Arc::new(TransferMonitor::new()), history).unwrap();

        Fixture {
            _src: src,
            dest,
            server,
            server_monitor,
            downloader,
            payload,
        }
    }

    #[tokio::test]
    async fn test_list() {
        let fx = fixture().await;
        let files = fx.downloader.list(&fx.base()).await.unwrap();
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["big.bin", "docs/note.txt", "empty.bin"]);
        fx.server.shutdown().await;
    }

    #[tokio::test]
    async fn test_download_files_round_trip_verified() {
        let fx = fixture().await;
        let files = fx.downloader.list(&fx.base()).await.unwrap();
        fx.downloader
            .download_files(&files, &fx.base(), fx.dest.path(), None)
            .await
            .unwrap();

        assert_eq!(
            std::fs::read(fx.dest.path().join("big.bin")).unwrap(),
            fx.payload
        );
        assert_eq!(
            std::fs::read(fx.dest.path().join("docs/note.txt")).unwrap(),
            b"note contents"
        );
        assert_eq!(
            std::fs::metadata(fx.dest.path().join("empty.bin")).unwrap().len(),
            0
        );

        let records = fx.downloader.history.recent(10, None);
        assert_eq!(records.len(), 3);
        assert!(records
            .iter()
            .all(|r| r.status == TransferStatus::Success && r.integrity == Integrity::Verified));
        fx.server.shutdown().await;
    }

    #[tokio::test]
    async fn test_resume_transfers_only_the_tail() {
        let fx = fixture().await;
        // Seed a correct 100 KB prefix at the destination.
        let prefix = 100_000usize;
        std::fs::write(fx.dest.path().join("big.bin"), &fx.payload[..prefix]).unwrap();

        let integrity = fx
            .downloader
            .download_file(&fx.base(), "big.bin", fx.dest.path(), None)
            .await
            .unwrap();
        assert_eq!(integrity, Integrity::Verified);
        assert_eq!(
            std::fs::read(fx.dest.path().join("big.bin")).unwrap(),
            fx.payload
        );
        // The server streamed exactly the missing suffix.
        assert_eq!(
            fx.server_monitor.snapshot().total_sent,
            (fx.payload.len() - prefix) as u64
        );
        fx.server.shutdown().await;
    }

    #[tokio::test]
    async fn test_already_complete_file_hits_416_and_verifies() {
        let fx = fixture().await;
        std::fs::write(fx.dest.path().join("big.bin"), &fx.payload).unwrap();

        let integrity = fx
            .downloader
            .download_file(&fx.base(), "big.bin", fx.dest.path(), None)
            .await
            .unwrap();
        assert_eq!(integrity, Integrity::Verified);
        // Nothing (re-)streamed on the file endpoint.
        assert_eq!(fx.server_monitor.snapshot().total_sent, 0);
        fx.server.shutdown().await;
    }

    #[tokio::test]
    async fn test_unsafe_name_is_rejected_locally() {
        let fx = fixture().await;
        let err = fx
            .downloader
            .download_file(&fx.base(), "../../etc/passwd", fx.dest.path(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsafePath(_)));
        fx.server.shutdown().await;
    }

    #[tokio::test]
    async fn test_range_ignoring_server_restarts_from_zero() {
        use axum::routing::get;
        use axum::Router;

        // A server that always answers 200 with the full body, Range or
        // not, forcing the discard-and-restart fallback.
        let payload: Vec<u8> = (0..50_000u32).map(|i| (i % 199) as u8).collect();
        let body = payload.clone();
        let app = Router::new().route(
            "/file_b64/:ignored",
            get(move || {
                let body = body.clone();
                async move { body }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let dest = tempfile::tempdir().unwrap();
        // A stale partial that does NOT match the payload prefix.
        std::fs::write(dest.path().join("blob.bin"), vec![0xAA; 10_000]).unwrap();

        let config = test_config();
        let history = Arc::new(TransferHistory::open(dest.path().join("history.json")));
        let downloader =
            HttpDownloader::new(&config, Arc::new(TransferMonitor::new()), history).unwrap();

        // No /hash endpoint on this fake server: integrity is Skipped, but
        // the bytes must equal the full payload (partial discarded).
        let integrity = downloader
            .download_file(&format!("http://{addr}"), "blob.bin", dest.path(), None)
            .await
            .unwrap();
        assert_eq!(integrity, Integrity::Skipped);
        assert_eq!(std::fs::read(dest.path().join("blob.bin")).unwrap(), payload);
    }

    #[tokio::test]
    async fn test_download_archive() {
        let fx = fixture().await;
        let target = fx
            .downloader
            .download_archive(&fx.base(), fx.dest.path(), None)
            .await
            .unwrap();
        let raw = std::fs::read(&target).unwrap();
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(raw)).unwrap();
        assert_eq!(archive.len(), 3);
        fx.server.shutdown().await;
    }

    #[test]
    fn test_parse_content_range_total() {
        assert_eq!(parse_content_range_total("bytes 1000-4999/5000"), Some(5000));
        assert_eq!(parse_content_range_total("bytes */123"), Some(123));
        assert_eq!(parse_content_range_total("bytes 0-1/*"), None);
    }

    #[test]
    fn test_hash_url_percent_encodes_segments() {
        let url = hash_url("http://127.0.0.1:5000", "docs/ödev raporu.pdf").unwrap();
        assert!(url.path().starts_with("/hash/docs/"));
        assert!(!url.path().contains(' '));
    }
}
