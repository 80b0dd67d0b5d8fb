//! The local model runtime: probes, process launch, and model pulls.
//!
//! [`ModelRuntime`] is the seam the bootstrap manager drives. The production
//! implementation, [`OllamaRuntime`], shells out to the runtime executable for
//! `serve` and `pull <model>` and uses its HTTP API (`GET /api/tags`) for
//! the cheap probes.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

use crate::error::RuntimeError;

/// Callback receiving each line of `pull` output.
pub type PullLineSink<'a> = &'a (dyn Fn(&str) + Send + Sync);

#[async_trait]
pub trait ModelRuntime: Send + Sync {
    /// The executable is on disk.
    async fn is_installed(&self) -> bool;

    /// The server answers on its endpoint.
    async fn is_running(&self) -> bool;

    /// Models the running server reports as present.
    async fn installed_models(&self) -> Result<BTreeSet<String>, RuntimeError>;

    /// Launch the server as a detached background process. Returns once the
    /// process is spawned, not when it is ready.
    async fn start(&self) -> Result<(), RuntimeError>;

    /// Fetch `model`, forwarding every output line to `on_line`.
    async fn pull_model(&self, model: &str, on_line: PullLineSink<'_>) -> Result<(), RuntimeError>;
}

/// Well-known install locations checked after `PATH`.
const CANDIDATE_PATHS: &[&str] = &["/usr/local/bin/ollama", "/opt/homebrew/bin/ollama", "/usr/bin/ollama"];

/// A `pull` printing nothing for this long is treated as hung.
pub const DEFAULT_PULL_STALL_TIMEOUT: Duration = Duration::from_secs(600);

pub struct OllamaRuntime {
    http: reqwest::Client,
    endpoint: String,
    binary: Option<PathBuf>,
    install_location: Option<PathBuf>,
    pull_stall_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

impl OllamaRuntime {
    /// `binary` pins the executable; `install_location` is where the
    /// installation strategy puts it.
    pub fn new(endpoint: &str, binary: Option<PathBuf>, install_location: Option<PathBuf>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(3))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            binary,
            install_location,
            pull_stall_timeout: DEFAULT_PULL_STALL_TIMEOUT,
        }
    }

    /// Abort a `pull` that goes silent for `timeout`.
    pub fn with_pull_stall_timeout(mut self, timeout: Duration) -> Self {
        self.pull_stall_timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Resolve the executable: pinned path, install location, `PATH`, then
    /// well-known locations.
    pub fn resolve_binary(&self) -> Option<PathBuf> {
        if let Some(pinned) = &self.binary {
            return pinned.is_file().then(|| pinned.clone());
        }
        if let Some(loc) = &self.install_location {
            if loc.is_file() {
                return Some(loc.clone());
            }
        }
        if let Ok(found) = which::which("ollama") {
            return Some(found);
        }
        if cfg!(windows) {
            return None;
        }
        CANDIDATE_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|p| p.is_file())
    }

    /// `host:port` for `OLLAMA_HOST`, derived from the endpoint URL.
    fn host_env(&self) -> String {
        self.endpoint
            .trim_start_matches("http://")
            .trim_start_matches("https://")
            .to_string()
    }

    async fn tags(&self) -> Result<TagsResponse, RuntimeError> {
        let resp = self
            .http
            .get(format!("{}/api/tags", self.endpoint))
            .send()
            .await
            .map_err(|e| RuntimeError::Api(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(RuntimeError::Api(format!("/api/tags returned {}", resp.status())));
        }
        resp.json().await.map_err(|e| RuntimeError::Api(e.to_string()))
    }
}

#[async_trait]
impl ModelRuntime for OllamaRuntime {
    async fn is_installed(&self) -> bool {
        self.resolve_binary().is_some()
    }

    async fn is_running(&self) -> bool {
        match self.tags().await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(endpoint = %self.endpoint, error = %e, "runtime not responding");
                false
            }
        }
    }

    async fn installed_models(&self) -> Result<BTreeSet<String>, RuntimeError> {
        Ok(self.tags().await?.models.into_iter().map(|m| m.name).collect())
    }

    async fn start(&self) -> Result<(), RuntimeError> {
        let binary = self.resolve_binary().ok_or(RuntimeError::NotInstalled)?;
        let mut cmd = std::process::Command::new(&binary);
        cmd.arg("serve")
            .env("OLLAMA_HOST", self.host_env())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        let pid = spawn_detached(&mut cmd).map_err(|source| RuntimeError::Spawn {
            command: format!("{} serve", binary.display()),
            source,
        })?;
        tracing::info!(pid, binary = %binary.display(), "started runtime server");
        Ok(())
    }

    async fn pull_model(&self, model: &str, on_line: PullLineSink<'_>) -> Result<(), RuntimeError> {
        let binary = self.resolve_binary().ok_or(RuntimeError::NotInstalled)?;
        let command = format!("{} pull {}", binary.display(), model);

        let mut cmd = tokio::process::Command::new(&binary);
        cmd.arg("pull")
            .arg(model)
            .env("OLLAMA_HOST", self.host_env())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(windows)]
        {
            cmd.creation_flags(0x0800_0000);
        }

        let mut child = cmd.spawn().map_err(|source| RuntimeError::Spawn {
            command: command.clone(),
            source,
        })?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(out) = child.stdout.take() {
            tokio::spawn(forward_lines(out, tx.clone()));
        }
        if let Some(err) = child.stderr.take() {
            tokio::spawn(forward_lines(err, tx.clone()));
        }
        drop(tx);

        // Returning early drops `child`, which kills it.
        let idle = self.pull_stall_timeout;
        let stalled = |command: &str| {
            tracing::warn!(command, ?idle, "model pull stalled");
            RuntimeError::Stalled {
                command: command.to_string(),
                idle,
            }
        };
        let mut last_line = String::new();
        while let Some(line) = tokio::time::timeout(idle, rx.recv())
            .await
            .map_err(|_| stalled(&command))?
        {
            on_line(&line);
            last_line = line;
        }

        let status = tokio::time::timeout(idle, child.wait())
            .await
            .map_err(|_| stalled(&command))?
            .map_err(|source| RuntimeError::Spawn {
                command: command.clone(),
                source,
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(RuntimeError::Exit {
                command,
                status: status.to_string(),
                detail: last_line,
            })
        }
    }
}

/// Spawn a process that outlives the caller and return its pid.
///
/// A detached thread waits on the child so it is reaped if it exits
/// while this process is still alive.
fn spawn_detached(cmd: &mut std::process::Command) -> std::io::Result<u32> {
    let mut child = cmd.spawn()?;
    let pid = child.id();
    let reaper = std::thread::Builder::new()
        .name("runtime-reaper".to_string())
        .spawn(move || match child.wait() {
            Ok(status) => tracing::info!(pid, %status, "runtime server exited"),
            Err(e) => tracing::warn!(pid, error = %e, "could not wait on runtime server"),
        });
    if let Err(e) = reaper {
        tracing::warn!(pid, error = %e, "could not start reaper thread");
    }
    Ok(pid)
}

/// Split a byte stream on `\n` or `\r` (progress bars redraw with `\r`)
/// and forward non-empty lines.
async fn forward_lines<R>(mut reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 4096];
    let mut pending: Vec<u8> = Vec::new();
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        for &b in &buf[..n] {
            if b == b'\n' || b == b'\r' {
                if let Some(line) = take_line(&mut pending) {
                    if tx.send(line).is_err() {
                        return;
                    }
                }
            } else {
                pending.push(b);
            }
        }
    }
    if let Some(line) = take_line(&mut pending) {
        let _ = tx.send(line);
    }
}

fn take_line(pending: &mut Vec<u8>) -> Option<String> {
    let line = strip_ansi(&String::from_utf8_lossy(pending));
    pending.clear();
    let line = line.trim().to_string();
    (!line.is_empty()).then_some(line)
}

/// Drop terminal escape sequences (`ESC [ ... letter`).
fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' {
            for esc in chars.by_ref() {
                if esc.is_ascii_alphabetic() {
                    break;
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn strips_escape_sequences() {
        assert_eq!(strip_ansi("\u{1b}[?25lpulling manifest \u{1b}[K"), "pulling manifest ");
        assert_eq!(strip_ansi("plain"), "plain");
    }

    #[test]
    fn host_env_drops_scheme() {
        let rt = OllamaRuntime::new("http://127.0.0.1:11434/", None, None);
        assert_eq!(rt.endpoint(), "http://127.0.0.1:11434");
        assert_eq!(rt.host_env(), "127.0.0.1:11434");
    }

    #[test]
    fn pinned_binary_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let rt = OllamaRuntime::new("http://127.0.0.1:1", Some(dir.path().join("nope")), None);
        assert!(rt.resolve_binary().is_none());

        let bin = dir.path().join("ollama");
        std::fs::write(&bin, b"").unwrap();
        let rt = OllamaRuntime::new("http://127.0.0.1:1", Some(bin.clone()), None);
        assert_eq!(rt.resolve_binary(), Some(bin));
    }

    #[tokio::test]
    async fn not_running_when_unreachable() {
        let rt = OllamaRuntime::new("http://127.0.0.1:1", None, None);
        assert!(!rt.is_running().await);
        assert!(rt.installed_models().await.is_err());
    }

    #[cfg(unix)]
    fn script(dir: &std::path::Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-runtime");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn pull_forwards_stdout_and_stderr_lines() {
        let dir = tempfile::tempdir().unwrap();
        let bin = script(
            dir.path(),
            r#"echo "pulling manifest"; printf 'pulling abc 10%%\rpulling abc 90%%\n' >&2; echo success"#,
        );
        let rt = OllamaRuntime::new("http://127.0.0.1:1", Some(bin), None);

        let lines = Mutex::new(Vec::new());
        rt.pull_model("m", &|l: &str| lines.lock().unwrap().push(l.to_string()))
            .await
            .unwrap();
        let lines = lines.into_inner().unwrap();
        assert!(lines.contains(&"pulling manifest".to_string()));
        assert!(lines.contains(&"pulling abc 10%".to_string()));
        assert!(lines.contains(&"pulling abc 90%".to_string()));
        assert!(lines.contains(&"success".to_string()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn pull_failure_carries_last_line() {
        let dir = tempfile::tempdir().unwrap();
        let bin = script(dir.path(), r#"echo "Error: pull model manifest: file does not exist" >&2; exit 1"#);
        let rt = OllamaRuntime::new("http://127.0.0.1:1", Some(bin), None);

        let err = rt.pull_model("nope", &|_: &str| {}).await.unwrap_err();
        match err {
            RuntimeError::Exit { detail, .. } => assert!(detail.contains("file does not exist")),
            other => panic!("unexpected: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn silent_pull_is_aborted() {
        let dir = tempfile::tempdir().unwrap();
        let bin = script(dir.path(), "echo 'pulling manifest'; exec sleep 30");
        let rt = OllamaRuntime::new("http://127.0.0.1:1", Some(bin), None)
            .with_pull_stall_timeout(Duration::from_millis(300));

        let lines = Mutex::new(Vec::new());
        let started = std::time::Instant::now();
        let err = rt
            .pull_model("m", &|l: &str| lines.lock().unwrap().push(l.to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Stalled { .. }), "{err}");
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(lines.into_inner().unwrap(), vec!["pulling manifest".to_string()]);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn detached_child_is_reaped_after_exit() {
        let mut cmd = std::process::Command::new("sh");
        cmd.args(["-c", "exit 0"]);
        let pid = spawn_detached(&mut cmd).unwrap();

        // A zombie keeps its /proc entry until waited on.
        let proc_entry = PathBuf::from(format!("/proc/{}", pid));
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while proc_entry.exists() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(!proc_entry.exists(), "child {pid} was not reaped");
    }

    #[tokio::test]
    async fn start_without_binary_is_not_installed() {
        let dir = tempfile::tempdir().unwrap();
        let rt = OllamaRuntime::new("http://127.0.0.1:1", Some(dir.path().join("missing")), None);
        assert!(matches!(rt.start().await, Err(RuntimeError::NotInstalled)));
    }
}
