//! Installation strategies for the runtime executable.
//!
//! A strategy is chosen once at startup by [`select_strategy`]:
//!
//! - [`ArchiveInstall`]: download the standalone zip, verify it, extract it
//!   into a per-user directory (Windows default).
//! - [`CommandInstall`]: run the vendor install script or Homebrew, bounded
//!   to five minutes (Linux / macOS).
//!
//! Both report coarse progress through a callback and fail with
//! [`InstallationError`]; a missing executable after a "successful" install
//! is itself an error.

use async_trait::async_trait;
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use crate::config::RuntimeConfig;
use crate::error::InstallationError;
use crate::models::SetupStage;

/// Progress callback: stage and overall percentage.
pub type InstallProgress<'a> = &'a (dyn Fn(SetupStage, u8) + Send + Sync);

const COMMAND_TIMEOUT: Duration = Duration::from_secs(300);
/// Longest wait for response headers or the next body chunk of a download.
const DOWNLOAD_STALL_TIMEOUT: Duration = Duration::from_secs(300);
const INSTALL_SCRIPT: &str = "curl -fsSL https://ollama.com/install.sh | sh";

#[async_trait]
pub trait InstallStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Where this strategy places the executable, when known in advance.
    fn executable_path(&self) -> Option<PathBuf>;

    /// Acquire and place the runtime. Returns the executable's path.
    async fn install(&self, progress: InstallProgress<'_>) -> Result<PathBuf, InstallationError>;
}

/// Platform executable name.
pub fn executable_name() -> &'static str {
    if cfg!(windows) {
        "ollama.exe"
    } else {
        "ollama"
    }
}

/// Default per-user archive install directory (`%LOCALAPPDATA%\Ollama` on Windows).
pub fn default_install_dir() -> PathBuf {
    dirs_next::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("Ollama")
}

// ============ Archive ============

pub struct ArchiveInstall {
    http: reqwest::Client,
    url: String,
    archive_path: PathBuf,
    install_dir: PathBuf,
    executable: String,
    attempts: u32,
    stall_timeout: Duration,
}

impl ArchiveInstall {
    pub fn new(url: impl Into<String>, install_dir: impl Into<PathBuf>) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            url: url.into(),
            archive_path: std::env::temp_dir().join("ollama-runtime.zip"),
            install_dir: install_dir.into(),
            executable: executable_name().to_string(),
            attempts: 3,
            stall_timeout: DOWNLOAD_STALL_TIMEOUT,
        }
    }

    /// Where the downloaded archive is cached between attempts.
    pub fn with_archive_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.archive_path = path.into();
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn with_executable(mut self, name: impl Into<String>) -> Self {
        self.executable = name.into();
        self
    }

    /// Fail an attempt when no headers or body bytes arrive for `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    async fn download(&self, progress: InstallProgress<'_>) -> Result<(), String> {
        let stalled = || format!("download stalled for {:?}", self.stall_timeout);
        let response = tokio::time::timeout(self.stall_timeout, self.http.get(&self.url).send())
            .await
            .map_err(|_| stalled())?
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }
        let total = response.content_length().unwrap_or(0);

        let mut file = tokio::fs::File::create(&self.archive_path)
            .await
            .map_err(|e| e.to_string())?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        while let Some(chunk) = tokio::time::timeout(self.stall_timeout, stream.next())
            .await
            .map_err(|_| stalled())?
        {
            let chunk = chunk.map_err(|e| e.to_string())?;
            file.write_all(&chunk).await.map_err(|e| e.to_string())?;
            written += chunk.len() as u64;
            if total > 0 {
                let pct = 10 + (written.min(total) * 40 / total) as u8;
                progress(SetupStage::Downloading, pct);
            }
        }
        file.flush().await.map_err(|e| e.to_string())?;
        Ok(())
    }

    fn discard_archive(&self) {
        if let Err(e) = std::fs::remove_file(&self.archive_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.archive_path.display(), error = %e, "could not remove archive");
            }
        }
    }
}

/// A usable archive is non-empty and opens as a zip.
pub fn verify_archive(path: &Path) -> Result<(), InstallationError> {
    let corrupt = |reason: String| InstallationError::CorruptArchive {
        path: path.to_path_buf(),
        reason,
    };
    let meta = std::fs::metadata(path).map_err(|e| corrupt(e.to_string()))?;
    if meta.len() == 0 {
        return Err(corrupt("empty file".to_string()));
    }
    let file = std::fs::File::open(path).map_err(|e| corrupt(e.to_string()))?;
    zip::ZipArchive::new(file).map_err(|e| corrupt(e.to_string()))?;
    Ok(())
}

#[async_trait]
impl InstallStrategy for ArchiveInstall {
    fn name(&self) -> &str {
        "archive"
    }

    fn executable_path(&self) -> Option<PathBuf> {
        Some(self.install_dir.join(&self.executable))
    }

    async fn install(&self, progress: InstallProgress<'_>) -> Result<PathBuf, InstallationError> {
        progress(SetupStage::Downloading, 5);

        let mut ready = false;
        if self.archive_path.exists() {
            match verify_archive(&self.archive_path) {
                Ok(()) => {
                    tracing::info!(path = %self.archive_path.display(), "reusing cached runtime archive");
                    ready = true;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "discarding cached archive");
                    self.discard_archive();
                }
            }
        }

        let mut last_error = String::new();
        let mut attempt = 0;
        while !ready && attempt < self.attempts {
            attempt += 1;
            tracing::info!(attempt, url = %self.url, "downloading runtime archive");
            match self.download(progress).await {
                Ok(()) => match verify_archive(&self.archive_path) {
                    Ok(()) => ready = true,
                    Err(e) => {
                        last_error = e.to_string();
                        self.discard_archive();
                    }
                },
                Err(e) => {
                    last_error = e;
                    self.discard_archive();
                }
            }
            if !ready {
                tracing::warn!(attempt, error = %last_error, "runtime download attempt failed");
            }
        }
        if !ready {
            return Err(InstallationError::DownloadExhausted {
                attempts: self.attempts,
                last_error,
            });
        }

        progress(SetupStage::Extracting, 50);
        let archive = self.archive_path.clone();
        let dest = self.install_dir.clone();
        tokio::task::spawn_blocking(move || -> Result<(), InstallationError> {
            std::fs::create_dir_all(&dest).map_err(|e| InstallationError::Io(e.to_string()))?;
            let file = std::fs::File::open(&archive)
                .map_err(|e| InstallationError::Extraction(e.to_string()))?;
            let mut zip = zip::ZipArchive::new(file)
                .map_err(|e| InstallationError::Extraction(e.to_string()))?;
            zip.extract(&dest)
                .map_err(|e| InstallationError::Extraction(e.to_string()))
        })
        .await
        .map_err(|e| InstallationError::Extraction(e.to_string()))??;

        progress(SetupStage::Installing, 58);
        self.discard_archive();

        let exe = self.install_dir.join(&self.executable);
        if !exe.is_file() {
            return Err(InstallationError::ExecutableMissing(exe));
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&exe)
                .map_err(|e| InstallationError::Io(e.to_string()))?
                .permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&exe, perms).map_err(|e| InstallationError::Io(e.to_string()))?;
        }
        progress(SetupStage::Installing, 60);
        Ok(exe)
    }
}

// ============ Command (script / Homebrew) ============

pub struct CommandInstall {
    name: String,
    program: String,
    args: Vec<String>,
    expected: Option<PathBuf>,
    timeout: Duration,
}

impl CommandInstall {
    pub fn new(name: &str, program: &str, args: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            expected: None,
            timeout: COMMAND_TIMEOUT,
        }
    }

    /// The official `install.sh`, piped through `sh`.
    pub fn script() -> Self {
        Self::new("script", "sh", &["-c", INSTALL_SCRIPT])
            .with_expected(PathBuf::from("/usr/local/bin/ollama"))
    }

    pub fn homebrew() -> Self {
        Self::new("homebrew", "brew", &["install", "ollama"])
    }

    pub fn with_expected(mut self, path: PathBuf) -> Self {
        self.expected = Some(path);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn locate(&self) -> Option<PathBuf> {
        if let Some(p) = &self.expected {
            if p.is_file() {
                return Some(p.clone());
            }
        }
        which::which("ollama").ok()
    }
}

#[async_trait]
impl InstallStrategy for CommandInstall {
    fn name(&self) -> &str {
        &self.name
    }

    fn executable_path(&self) -> Option<PathBuf> {
        self.expected.clone()
    }

    async fn install(&self, progress: InstallProgress<'_>) -> Result<PathBuf, InstallationError> {
        progress(SetupStage::Installing, 10);
        tracing::info!(program = %self.program, args = ?self.args, "running runtime installer");

        let child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| {
                InstallationError::Command(format!(
                    "{} timed out after {}s",
                    self.name,
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| InstallationError::Command(format!("{}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr.lines().last().unwrap_or("").trim().to_string();
            return Err(InstallationError::Command(format!(
                "{} exited with {}: {}",
                self.name, output.status, detail
            )));
        }
        progress(SetupStage::Installing, 60);

        self.locate().ok_or_else(|| {
            InstallationError::ExecutableMissing(
                self.expected
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(executable_name())),
            )
        })
    }
}

/// Pick the installation strategy for this platform and config.
pub fn select_strategy(config: &RuntimeConfig) -> Box<dyn InstallStrategy> {
    let archive = || {
        let dir = config.install_dir.clone().unwrap_or_else(default_install_dir);
        Box::new(ArchiveInstall::new(&config.archive_url, dir).with_attempts(config.download_attempts))
            as Box<dyn InstallStrategy>
    };
    match config.install_method.as_str() {
        "archive" => archive(),
        "script" => Box::new(CommandInstall::script()),
        "homebrew" => Box::new(CommandInstall::homebrew()),
        _ => {
            if cfg!(windows) {
                archive()
            } else if cfg!(target_os = "macos") && which::which("brew").is_ok() {
                Box::new(CommandInstall::homebrew())
            } else {
                Box::new(CommandInstall::script())
            }
        }
    }
}
