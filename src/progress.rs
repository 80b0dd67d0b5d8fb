//! Setup progress reporting.
//!
//! The bootstrap manager records every transition in a [`ProgressCell`]
//! (the polling surface behind `status`) and forwards it to a
//! [`ProgressReporter`] for live output. Reporters write to **stderr** so
//! stdout stays parseable for scripts.
//!
//! [`classify_pull_line`] turns the runtime's free-form `pull` output into
//! coarse stages.

use chrono::Utc;
use std::io::Write;
use std::sync::{PoisonError, RwLock};

use crate::models::{SetupProgress, SetupStage};

/// Receives every setup progress transition.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, progress: &SetupProgress);
}

/// Human-friendly progress on stderr: "setup  pulling_model   84%".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, progress: &SetupProgress) {
        let line = match &progress.error {
            Some(err) => format!("setup  {}  {:>3}%  {}\n", progress.stage, progress.percent, err),
            None => format!("setup  {:<14}{:>3}%\n", progress.stage.as_str(), progress.percent),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, progress: &SetupProgress) {
        let obj = serde_json::json!({
            "event": "progress",
            "stage": progress.stage,
            "percent": progress.percent,
            "error": progress.error,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _progress: &SetupProgress) {}
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

/// Shared, replace-on-write progress record.
///
/// Readers get a consistent snapshot; the percentage never decreases
/// between [`ProgressCell::begin`] calls.
#[derive(Debug, Default)]
pub struct ProgressCell {
    inner: RwLock<SetupProgress>,
}

impl ProgressCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SetupProgress {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Start a new attempt: `checking` at 0%, error cleared.
    pub fn begin(&self) -> SetupProgress {
        self.replace(|_| SetupProgress {
            stage: SetupStage::Checking,
            percent: 0,
            error: None,
            updated_at: Some(Utc::now()),
        })
    }

    /// Move to `stage`. The percentage is clamped to 100 and never goes back.
    pub fn advance(&self, stage: SetupStage, percent: u8) -> SetupProgress {
        self.replace(|prev| SetupProgress {
            stage,
            percent: percent.min(100).max(prev.percent),
            error: None,
            updated_at: Some(Utc::now()),
        })
    }

    /// Mark the attempt failed, keeping the percentage reached.
    pub fn fail(&self, message: impl Into<String>) -> SetupProgress {
        let message = message.into();
        self.replace(|prev| SetupProgress {
            stage: SetupStage::Failed,
            percent: prev.percent,
            error: Some(message),
            updated_at: Some(Utc::now()),
        })
    }

    fn replace(&self, next: impl FnOnce(&SetupProgress) -> SetupProgress) -> SetupProgress {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let value = next(&guard);
        *guard = value.clone();
        value
    }
}

/// Coarse stage of one model pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PullStage {
    Manifest,
    Downloading,
    Extracting,
    Complete,
}

impl PullStage {
    /// Fraction of a single model's pull represented by this stage, in tenths.
    pub fn tenths(&self) -> u32 {
        match self {
            PullStage::Manifest => 1,
            PullStage::Downloading => 5,
            PullStage::Extracting => 8,
            PullStage::Complete => 10,
        }
    }
}

/// Classify one line of `pull` output. Unrecognized lines return `None`.
pub fn classify_pull_line(line: &str) -> Option<PullStage> {
    let line = line.trim().to_ascii_lowercase();
    if line.is_empty() {
        return None;
    }
    if line.contains("pulling manifest") {
        Some(PullStage::Manifest)
    } else if line.contains("success") || line.contains("complete") || line.contains("writing manifest") {
        Some(PullStage::Complete)
    } else if line.contains("extracting") || line.contains("verifying") {
        Some(PullStage::Extracting)
    } else if line.contains("downloading") || line.starts_with("pulling ") {
        Some(PullStage::Downloading)
    } else {
        None
    }
}
