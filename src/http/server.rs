//! # HTTP File Server
//!
//! A small axum server bound to localhost that presents the currently
//! published file set. The tunnel process is its public face; the server
//! itself never listens beyond the loopback interface.
//!
//! | Path | Result |
//! |------|--------|
//! | `GET /` | `{"files": [{name, size, path}]}` |
//! | `GET /file/{name}` | Streams one file, honours `Range` |
//! | `GET /file_b64/{b64}` | Same, name as URL-safe base64 |
//! | `GET /download` | ZIP of the whole set, built at request time |
//! | `GET /hash/{name}` | `{"hash": hex}` streaming SHA-256 |
//!
//! Responses stream in fixed 64 KiB chunks and report every byte to the
//! shared monitor; requests are served concurrently with independent
//! range cursors. The published set travels in handler state — there is
//! no process-wide mutable.

use std::io::SeekFrom;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use async_stream::try_stream;
use axum::body::Body;
use axum::extract::{Path as UrlPath, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine as _;
use bytes::Bytes;
use futures::Stream;
use serde::Serialize;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use crate::config::HTTP_CHUNK_SIZE;
use crate::error::{Error, Result};
use crate::fs::FileEntry;
use crate::hash::sha256_file;
use crate::monitor::TransferMonitor;

/// Progress key used for the whole-set archive download.
const ARCHIVE_NAME: &str = "download.zip";

// ============================================================================
// SERVER HANDLE
// ============================================================================

/// A running file server: the bound address plus a graceful-shutdown
/// handle.
pub struct HttpFileServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl HttpFileServer {
    /// Bind `host:port` (`port` 0 picks an ephemeral one) and serve the
    /// published set. Bind failure is engine-fatal.
    pub async fn start(
        host: &str,
        port: u16,
        files: Vec<FileEntry>,
        monitor: Arc<TransferMonitor>,
    ) -> Result<Self> {
        let app = router(Arc::new(files), monitor);
        let listener = tokio::net::TcpListener::bind(format!("{host}:{port}"))
            .await
            .map_err(|e| Error::Io(format!("cannot bind {host}:{port}: {e}")))?;
        let addr = listener
            .local_addr()
            .map_err(|e| Error::Io(e.to_string()))?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = serve.await {
                tracing::warn!(error = %e, "file server exited with error");
            }
        });
        tracing::info!(%addr, "file server listening");
        Ok(Self {
            addr,
            shutdown: Some(shutdown_tx),
            task,
        })
    }

    /// The address actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections and wait briefly for in-flight streams.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if tokio::time::timeout(std::time::Duration::from_secs(5), &mut self.task)
            .await
            .is_err()
        {
            self.task.abort();
        }
    }
}

// ============================================================================
// ROUTER & STATE
// ============================================================================

#[derive(Clone)]
struct ServerState {
    files: Arc<Vec<FileEntry>>,
    monitor: Arc<TransferMonitor>,
}

/// Build the service router. Exposed within the crate so tests can drive
/// it over a real socket.
pub(crate) fn router(files: Arc<Vec<FileEntry>>, monitor: Arc<TransferMonitor>) -> Router {
    Router::new()
        .route("/", get(list_files))
        .route("/file/*name", get(serve_file_plain))
        .route("/file_b64/:encoded", get(serve_file_b64))
        .route("/download", get(serve_archive))
        .route("/hash/*name", get(serve_hash))
        .layer(TraceLayer::new_for_http())
        .with_state(ServerState { files, monitor })
}

fn find_entry<'a>(files: &'a [FileEntry], name: &str) -> Option<&'a FileEntry> {
    let wanted = name.replace('\\', "/");
    files.iter().find(|f| f.name == wanted)
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({"error": "File not found"}))).into_response()
}

// ============================================================================
// HANDLERS
// ============================================================================

#[derive(Serialize)]
struct ListedFile<'a> {
    name: &'a str,
    size: u64,
    path: String,
}

/// `GET /` — the published catalogue, forward-slash names.
async fn list_files(State(state): State<ServerState>) -> Json<serde_json::Value> {
    let files: Vec<ListedFile<'_>> = state
        .files
        .iter()
        .map(|f| ListedFile {
            name: &f.name,
            size: f.size,
            path: f.path.display().to_string(),
        })
        .collect();
    Json(json!({ "files": files }))
}

/// `GET /file/{name}` — stream one file by its relative name.
async fn serve_file_plain(
    State(state): State<ServerState>,
    UrlPath(name): UrlPath<String>,
    headers: HeaderMap,
) -> Response {
    stream_named(state, &name, &headers).await
}

/// `GET /file_b64/{encoded}` — stream one file, name carried as URL-safe
/// base64 so arbitrary characters survive any proxy in between.
async fn serve_file_b64(
    State(state): State<ServerState>,
    UrlPath(encoded): UrlPath<String>,
    headers: HeaderMap,
) -> Response {
    match decode_name(&encoded) {
        Ok(name) => stream_named(state, &name, &headers).await,
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": format!("Invalid filename encoding: {e}")})),
        )
            .into_response(),
    }
}

fn decode_name(encoded: &str) -> Result<String> {
    let raw = URL_SAFE
        .decode(encoded)
        .or_else(|_| URL_SAFE_NO_PAD.decode(encoded))
        .map_err(|e| Error::Protocol(e.to_string()))?;
    String::from_utf8(raw).map_err(|e| Error::Protocol(e.to_string()))
}

async fn stream_named(state: ServerState, name: &str, headers: &HeaderMap) -> Response {
    let Some(entry) = find_entry(&state.files, name) else {
        return not_found();
    };
    // Re-stat at request time; the catalogue size may be stale.
    let Ok(meta) = tokio::fs::metadata(&entry.path).await else {
        return not_found();
    };
    let size = meta.len();

    let range_header = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok());
    let (status, start, length) = match parse_range(range_header, size) {
        RangeSpec::Unsatisfiable => {
            return Response::builder()
                .status(StatusCode::RANGE_NOT_SATISFIABLE)
                .header(header::CONTENT_RANGE, format!("bytes */{size}"))
                .body(Body::from("Requested Range Not Satisfiable"))
                .unwrap_or_else(|_| StatusCode::RANGE_NOT_SATISFIABLE.into_response());
        }
        RangeSpec::Full => (StatusCode::OK, 0, size),
        RangeSpec::Partial(s, e) => (StatusCode::PARTIAL_CONTENT, s, e - s + 1),
    };

    let basename = entry
        .name
        .rsplit('/')
        .next()
        .unwrap_or(&entry.name)
        .to_string();
    let stream = monitored_file_stream(
        Arc::clone(&state.monitor),
        basename.clone(),
        entry.path.clone(),
        start,
        length,
    );

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, length)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{basename}\""),
        );
    if status == StatusCode::PARTIAL_CONTENT {
        builder = builder.header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", start, start + length - 1, size),
        );
    }
    builder
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// `GET /download` — the whole set as one ZIP, assembled at request time
/// and streamed in fixed chunks.
async fn serve_archive(State(state): State<ServerState>) -> Response {
    let files = Arc::clone(&state.files);
    let built = tokio::task::spawn_blocking(move || build_zip(&files)).await;
    let data = match built {
        Ok(Ok(data)) => data,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "archive build failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response();
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response();
        }
    };

    let stream = monitored_buffer_stream(Arc::clone(&state.monitor), Bytes::from(data));
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/zip")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename={ARCHIVE_NAME}"),
        )
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// `GET /hash/{name}` — streaming SHA-256 of one published file.
async fn serve_hash(State(state): State<ServerState>, UrlPath(name): UrlPath<String>) -> Response {
    let Some(entry) = find_entry(&state.files, &name) else {
        return not_found();
    };
    let path = entry.path.clone();
    match tokio::task::spawn_blocking(move || sha256_file(&path)).await {
        Ok(Ok(hash)) => Json(json!({ "hash": hash })).into_response(),
        Ok(Err(e)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

// ============================================================================
// RANGE PARSING
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RangeSpec {
    /// No (or unparseable) range: send the whole file as 200.
    Full,
    /// Closed byte range `[start, end]`, both inclusive.
    Partial(u64, u64),
    /// `start ≥ size`: 416 with `Content-Range: bytes */size`.
    Unsatisfiable,
}

/// Parse `bytes=start-end?`. A malformed header is ignored (full
/// response) rather than rejected; only a syntactically valid range with
/// `start ≥ size` is unsatisfiable. Suffix ranges (`bytes=-n`) are not
/// supported and fall back to the full file.
fn parse_range(header: Option<&str>, size: u64) -> RangeSpec {
    let Some(raw) = header else {
        return RangeSpec::Full;
    };
    let Some(spec) = raw.trim().strip_prefix("bytes=") else {
        return RangeSpec::Full;
    };
    let mut parts = spec.splitn(2, '-');
    let Some(start) = parts.next().and_then(|s| s.parse::<u64>().ok()) else {
        return RangeSpec::Full;
    };
    if start >= size {
        return RangeSpec::Unsatisfiable;
    }
    let end = match parts.next() {
        Some("") | None => size - 1,
        Some(raw_end) => match raw_end.parse::<u64>() {
            Ok(end) => end.min(size - 1),
            Err(_) => return RangeSpec::Full,
        },
    };
    if end < start {
        return RangeSpec::Full;
    }
    RangeSpec::Partial(start, end)
}

// ============================================================================
// MONITORED STREAMS
// ============================================================================

/// Registers one in-flight transfer with the monitor for the lifetime of a
/// response stream; dropping it (including on client disconnect) settles
/// the counters.
struct ActiveTransfer {
    monitor: Arc<TransferMonitor>,
    name: String,
}

impl ActiveTransfer {
    fn begin(monitor: Arc<TransferMonitor>, name: String) -> Self {
        monitor.start_transfer();
        Self { monitor, name }
    }

    fn report(&self, delta: u64, sent: u64, total: u64) {
        self.monitor.add_bytes(delta);
        self.monitor.update_file_progress(&self.name, sent, total);
    }
}

impl Drop for ActiveTransfer {
    fn drop(&mut self) {
        self.monitor.end_transfer();
        self.monitor.finish_file(&self.name);
    }
}

/// Stream `length` bytes of `path` from `start`, reporting as it goes.
fn monitored_file_stream(
    monitor: Arc<TransferMonitor>,
    name: String,
    path: PathBuf,
    start: u64,
    length: u64,
) -> impl Stream<Item = std::io::Result<Bytes>> {
    try_stream! {
        let guard = ActiveTransfer::begin(monitor, name);
        let mut file = tokio::fs::File::open(&path).await?;
        if start > 0 {
            file.seek(SeekFrom::Start(start)).await?;
        }
        let mut remaining = length;
        while remaining > 0 {
            let take = remaining.min(HTTP_CHUNK_SIZE as u64) as usize;
            let mut buf = vec![0u8; take];
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            buf.truncate(n);
            remaining -= n as u64;
            guard.report(n as u64, length - remaining, length);
            yield Bytes::from(buf);
        }
    }
}

/// Stream an in-memory buffer in fixed chunks, reporting as it goes.
fn monitored_buffer_stream(
    monitor: Arc<TransferMonitor>,
    data: Bytes,
) -> impl Stream<Item = std::io::Result<Bytes>> {
    try_stream! {
        let guard = ActiveTransfer::begin(monitor, ARCHIVE_NAME.to_string());
        let total = data.len() as u64;
        let mut offset = 0usize;
        while offset < data.len() {
            let end = (offset + HTTP_CHUNK_SIZE).min(data.len());
            let chunk = data.slice(offset..end);
            offset = end;
            guard.report(chunk.len() as u64, offset as u64, total);
            yield chunk;
        }
    }
}

/// Deflate the whole published set into one in-memory ZIP.
fn build_zip(files: &[FileEntry]) -> Result<Vec<u8>> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    for entry in files.iter() {
        writer
            .start_file(entry.name.clone(), options.clone())
            .map_err(|e| Error::Io(e.to_string()))?;
        let mut file = std::fs::File::open(&entry.path)?;
        std::io::copy(&mut file, &mut writer)?;
    }
    Ok(writer
        .finish()
        .map_err(|e| Error::Io(e.to_string()))?
        .into_inner())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    // ── Range parsing ───────────────────────────────────────────────────

    #[test]
    fn test_parse_range_absent() {
        assert_eq!(parse_range(None, 100), RangeSpec::Full);
    }

    #[test]
    fn test_parse_range_open_ended() {
        assert_eq!(parse_range(Some("bytes=40-"), 100), RangeSpec::Partial(40, 99));
    }

    #[test]
    fn test_parse_range_closed() {
        assert_eq!(parse_range(Some("bytes=10-19"), 100), RangeSpec::Partial(10, 19));
    }

    #[test]
    fn test_parse_range_end_clamped_to_size() {
        assert_eq!(parse_range(Some("bytes=10-500"), 100), RangeSpec::Partial(10, 99));
    }

    #[test]
    fn test_parse_range_start_at_size_is_unsatisfiable() {
        assert_eq!(parse_range(Some("bytes=100-"), 100), RangeSpec::Unsatisfiable);
        assert_eq!(parse_range(Some("bytes=250-"), 100), RangeSpec::Unsatisfiable);
    }

    #[test]
    fn test_parse_range_garbage_falls_back_to_full() {
        assert_eq!(parse_range(Some("bytes=abc-"), 100), RangeSpec::Full);
        assert_eq!(parse_range(Some("chunks=1-2"), 100), RangeSpec::Full);
        assert_eq!(parse_range(Some("bytes=-500"), 100), RangeSpec::Full);
    }

    // ── Name decoding ───────────────────────────────────────────────────

    #[test]
    fn test_decode_name_padded_and_unpadded() {
        let name = "docs/rapor ödev.pdf";
        let padded = URL_SAFE.encode(name.as_bytes());
        let unpadded = URL_SAFE_NO_PAD.encode(name.as_bytes());
        assert_eq!(decode_name(&padded).unwrap(), name);
        assert_eq!(decode_name(&unpadded).unwrap(), name);
    }

    #[test]
    fn test_decode_name_rejects_garbage() {
        assert!(decode_name("!!!not-base64!!!").is_err());
    }

    // ── Full-stack round trips over a real socket ───────────────────────

    struct TestShare {
        _dir: tempfile::TempDir,
        server: HttpFileServer,
        monitor: Arc<TransferMonitor>,
        payload: Vec<u8>,
    }

    async fn publish_fixture() -> TestShare {
        let dir = tempfile::tempdir().unwrap();
        let payload: Vec<u8> = (0..150_000u32).map(|i| (i % 241) as u8).collect();
        std::fs::write(dir.path().join("data.bin"), &payload).unwrap();
        std::fs::create_dir(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs/nested.txt"), b"nested file").unwrap();
        std::fs::write(dir.path().join("empty.bin"), b"").unwrap();

        let entries = vec![
            FileEntry {
                name: "data.bin".into(),
                size: payload.len() as u64,
                path: dir.path().join("data.bin"),
                is_folder: false,
            },
            FileEntry {
                name: "docs/nested.txt".into(),
                size: 11,
                path: dir.path().join("docs/nested.txt"),
                is_folder: true,
            },
            FileEntry {
                name: "empty.bin".into(),
                size: 0,
                path: dir.path().join("empty.bin"),
                is_folder: false,
            },
        ];
        let monitor = Arc::new(TransferMonitor::new());
        let server = HttpFileServer::start("127.0.0.1", 0, entries, Arc::clone(&monitor))
            .await
            .unwrap();
        TestShare {
            _dir: dir,
            server,
            monitor,
            payload,
        }
    }

    fn base(share: &TestShare) -> String {
        format!("http://{}", share.server.local_addr())
    }

    #[tokio::test]
    async fn test_listing_endpoint() {
        let share = publish_fixture().await;
        let body: serde_json::Value = reqwest::get(format!("{}/", base(&share)))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let files = body["files"].as_array().unwrap();
        assert_eq!(files.len(), 3);
        assert_eq!(files[0]["name"], "data.bin");
        assert_eq!(files[1]["name"], "docs/nested.txt");
        assert_eq!(files[1]["size"], 11);
        share.server.shutdown().await;
    }

    #[tokio::test]
    async fn test_full_file_download_and_monitor() {
        let share = publish_fixture().await;
        let resp = reqwest::get(format!("{}/file/data.bin", base(&share)))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers()["accept-ranges"], "bytes");
        let body = resp.bytes().await.unwrap();
        assert_eq!(body.as_ref(), share.payload.as_slice());
        assert_eq!(share.monitor.snapshot().total_sent, share.payload.len() as u64);
        share.server.shutdown().await;
    }

    #[tokio::test]
    async fn test_range_request_returns_206_with_content_range() {
        let share = publish_fixture().await;
        let client = reqwest::Client::new();
        let resp = client
            .get(format!("{}/file/data.bin", base(&share)))
            .header("Range", "bytes=100000-")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 206);
        let total = share.payload.len();
        assert_eq!(
            resp.headers()["content-range"],
            format!("bytes 100000-{}/{}", total - 1, total)
        );
        let body = resp.bytes().await.unwrap();
        assert_eq!(body.as_ref(), &share.payload[100000..]);
        share.server.shutdown().await;
    }

    #[tokio::test]
    async fn test_range_past_end_returns_416() {
        let share = publish_fixture().await;
        let client = reqwest::Client::new();
        let resp = client
            .get(format!("{}/file/data.bin", base(&share)))
            .header("Range", format!("bytes={}-", share.payload.len()))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 416);
        assert_eq!(
            resp.headers()["content-range"],
            format!("bytes */{}", share.payload.len())
        );
        share.server.shutdown().await;
    }

    #[tokio::test]
    async fn test_b64_endpoint_serves_nested_name() {
        let share = publish_fixture().await;
        let encoded = URL_SAFE.encode("docs/nested.txt");
        let resp = reqwest::get(format!("{}/file_b64/{encoded}", base(&share)))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.bytes().await.unwrap().as_ref(), b"nested file");
        share.server.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_file_is_404() {
        let share = publish_fixture().await;
        let resp = reqwest::get(format!("{}/file/ghost.bin", base(&share)))
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
        share.server.shutdown().await;
    }

    #[tokio::test]
    async fn test_hash_endpoint_matches_local_hash() {
        let share = publish_fixture().await;
        let body: serde_json::Value = reqwest::get(format!("{}/hash/data.bin", base(&share)))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let expected = {
            use sha2::{Digest, Sha256};
            hex::encode(Sha256::digest(&share.payload))
        };
        assert_eq!(body["hash"], expected.as_str());
        share.server.shutdown().await;
    }

    #[tokio::test]
    async fn test_archive_contains_every_file() {
        let share = publish_fixture().await;
        let resp = reqwest::get(format!("{}/download", base(&share))).await.unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers()["content-type"], "application/zip");
        let body = resp.bytes().await.unwrap();

        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(body.to_vec())).unwrap();
        assert_eq!(archive.len(), 3);
        let mut data = Vec::new();
        archive
            .by_name("data.bin")
            .unwrap()
            .read_to_end(&mut data)
            .unwrap();
        assert_eq!(data, share.payload);
        let mut nested = String::new();
        archive
            .by_name("docs/nested.txt")
            .unwrap()
            .read_to_string(&mut nested)
            .unwrap();
        assert_eq!(nested, "nested file");
        share.server.shutdown().await;
    }

    #[tokio::test]
    async fn test_empty_file_streams_zero_bytes() {
        let share = publish_fixture().await;
        let resp = reqwest::get(format!("{}/file/empty.bin", base(&share)))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers()["content-length"], "0");
        assert!(resp.bytes().await.unwrap().is_empty());
        share.server.shutdown().await;
    }
}
