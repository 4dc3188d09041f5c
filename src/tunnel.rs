//! # Tunnel Supervisor
//!
//! Supervises the external tunnel child process that exposes the local HTTP
//! file server at a generated public URL. The child is a black box: its
//! only contract is the argv we pass, the URL it prints on stdout/stderr,
//! and its exit code. This keeps the underlying tunnel implementation
//! swappable without touching the core.
//!
//! ```text
//! start(port, token)
//!   └─ spawn: <binary> tunnel --url http://127.0.0.1:{port} --no-autoupdate
//!        ├─ reader task (stdout) ──┐
//!        ├─ reader task (stderr) ──┼── first regex match wins → public URL
//!        └─ watchdog: child exit / 30 s timeout → TunnelStartFailed
//! ```

use std::process::Stdio;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::TunnelConfig;
use crate::error::{Error, Result};

/// Supervisor for the tunnel child process.
pub struct TunnelSupervisor {
    config: TunnelConfig,
    child: Option<Child>,
    public_url: Option<String>,
    reader_tasks: Vec<JoinHandle<()>>,
}

impl TunnelSupervisor {
    /// Create an idle supervisor with the given child-process contract.
    pub fn new(config: TunnelConfig) -> Self {
        Self {
            config,
            child: None,
            public_url: None,
            reader_tasks: Vec::new(),
        }
    }

    /// Spawn the tunnel child for `local_port` and wait for its public URL.
    ///
    /// Fails with [`Error::TunnelStartFailed`] when the binary cannot be
    /// spawned, the child exits before printing a URL, or the URL regex
    /// does not match within the configured startup timeout.
    pub async fn start(&mut self, local_port: u16, token: Option<&str>) -> Result<String> {
        if self.child.is_some() {
            return Err(Error::TunnelStartFailed("tunnel already running".into()));
        }

        let pattern = Regex::new(&self.config.url_pattern)
            .map_err(|e| Error::TunnelStartFailed(format!("invalid URL pattern: {e}")))?;

        let mut command = Command::new(&self.config.binary);
        command
            .arg("tunnel")
            .arg("--url")
            .arg(format!("http://127.0.0.1:{local_port}"))
            .arg("--no-autoupdate")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(token) = token {
            command.arg("--token").arg(token);
        }

        let mut child = command.spawn().map_err(|e| {
            Error::TunnelStartFailed(format!(
                "cannot run {}: {e}",
                self.config.binary.display()
            ))
        })?;

        // The child may print the URL on either stream; scan both.
        let (url_tx, mut url_rx) = mpsc::channel::<String>(1);
        if let Some(stdout) = child.stdout.take() {
            self.reader_tasks
                .push(spawn_line_scanner(stdout, pattern.clone(), url_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            self.reader_tasks
                .push(spawn_line_scanner(stderr, pattern, url_tx));
        }

        let outcome = tokio::time::timeout(self.config.startup_timeout, async {
            tokio::select! {
                biased;
                url = url_rx.recv() => url.ok_or_else(|| {
                    Error::TunnelStartFailed("tunnel output ended before a public URL appeared".into())
                }),
                status = child.wait() => {
                    // The URL may have raced the exit; drain once before failing.
                    if let Ok(url) = url_rx.try_recv() {
                        return Ok(url);
                    }
                    let code = status
                        .ok()
                        .and_then(|s| s.code())
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "unknown".into());
                    Err(Error::TunnelStartFailed(format!(
                        "tunnel exited early (status {code})"
                    )))
                }
            }
        })
        .await;

        match outcome {
            Ok(Ok(url)) => {
                tracing::info!(%url, "tunnel established");
                self.child = Some(child);
                self.public_url = Some(url.clone());
                Ok(url)
            }
            Ok(Err(e)) => {
                self.abort_spawn(child).await;
                Err(e)
            }
            Err(_) => {
                self.abort_spawn(child).await;
                Err(Error::TunnelStartFailed(format!(
                    "no public URL within {:?}",
                    self.config.startup_timeout
                )))
            }
        }
    }

    /// Politely terminate the child, wait up to the grace period, then
    /// force-kill. Idempotent.
    pub async fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        terminate_politely(&mut child);
        if tokio::time::timeout(self.config.stop_grace, child.wait())
            .await
            .is_err()
        {
            tracing::warn!("tunnel ignored termination signal, killing");
            let _ = child.kill().await;
        }
        self.cleanup();
    }

    /// Whether the child is currently alive.
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// The public URL captured at startup, while the tunnel runs.
    pub fn public_url(&self) -> Option<&str> {
        self.public_url.as_deref()
    }

    async fn abort_spawn(&mut self, mut child: Child) {
        let _ = child.kill().await;
        self.cleanup();
    }

    fn cleanup(&mut self) {
        for task in self.reader_tasks.drain(..) {
            task.abort();
        }
        self.public_url = None;
    }
}

/// Drain one output stream line by line, forwarding the first URL match.
fn spawn_line_scanner(
    stream: impl AsyncRead + Unpin + Send + 'static,
    pattern: Regex,
    url_tx: mpsc::Sender<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(target: "quickshare_core::tunnel", line = %line);
            if let Some(found) = pattern.find(&line) {
                // Only the first URL matters; later sends fail harmlessly.
                let _ = url_tx.try_send(found.as_str().to_string());
                return;
            }
        }
    })
}

#[cfg(unix)]
fn terminate_politely(child: &mut Child) {
    if let Some(pid) = child.id() {
        // SIGTERM first; the grace period in stop() covers cleanup time.
        unsafe {
            let _ = libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn terminate_politely(child: &mut Child) {
    let _ = child.start_kill();
}

// ============================================================================
// TESTS
// ============================================================================
